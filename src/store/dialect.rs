use std::fmt;
use std::str::FromStr;

use sqlx::any::AnyKind;

use crate::common::errors::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    #[allow(unreachable_patterns)]
    pub fn from_kind(kind: AnyKind) -> Result<Self, MigrationError> {
        match kind {
            AnyKind::Sqlite => Ok(Dialect::Sqlite),
            AnyKind::MySql => Ok(Dialect::MySql),
            other => Err(MigrationError::unsupported(format!(
                "unsupported database kind {:?}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
        }
    }

    /// MySQL commits implicitly around every DDL statement.
    pub fn transactional_ddl(&self) -> bool {
        match self {
            Dialect::Sqlite => true,
            Dialect::MySql => false,
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Sqlite => format!("\"{}\"", identifier),
            Dialect::MySql => format!("`{}`", identifier),
        }
    }
}

impl FromStr for Dialect {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" => Ok(Dialect::MySql),
            other => Err(MigrationError::invalid(format!(
                "unknown dialect '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

use std::fmt;

use crate::common::errors::MigrationError;
use crate::common::helpers::validate_identifier;

/// Foreign key declared inline on a column; the owning table is implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    pub to_table: String,
    pub to_column: String,
}

impl ColumnReference {
    pub fn new(to_table: impl Into<String>) -> Self {
        ColumnReference {
            to_table: to_table.into(),
            to_column: "id".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        validate_identifier("table", &self.to_table)?;
        validate_identifier("column", &self.to_column)
    }
}

impl fmt::Display for ColumnReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.to_table, self.to_column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub from_table: String,
    pub column: String,
    pub to_table: String,
    pub to_column: String,
    pub nullable: bool,
}

impl ForeignKeySpec {
    pub fn new(
        from_table: impl Into<String>,
        column: impl Into<String>,
        to_table: impl Into<String>,
    ) -> Self {
        ForeignKeySpec {
            from_table: from_table.into(),
            column: column.into(),
            to_table: to_table.into(),
            to_column: "id".to_string(),
            nullable: true,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn constraint_name(&self) -> String {
        constraint_name(&self.from_table, &self.column)
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        validate_identifier("table", &self.from_table)?;
        validate_identifier("column", &self.column)?;
        validate_identifier("table", &self.to_table)?;
        validate_identifier("column", &self.to_column)
    }
}

impl fmt::Display for ForeignKeySpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}({}) {}",
            self.from_table,
            self.column,
            self.to_table,
            self.to_column,
            if self.nullable { "null" } else { "not null" }
        )
    }
}

pub fn constraint_name(table: &str, column: &str) -> String {
    format!("fk_{}_{}", table, column)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    /// Names the index `index_<table>_on_<a>_and_<b>`.
    pub fn new(table: &str, columns: &[&str], unique: bool) -> Self {
        IndexSpec {
            name: format!("index_{}_on_{}", table, columns.join("_and_")),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            unique,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        validate_identifier("index", &self.name)?;

        if self.columns.is_empty() {
            return Err(MigrationError::invalid(format!(
                "index {} has no columns",
                self.name
            )));
        }

        for column in &self.columns {
            validate_identifier("column", column)?;
        }

        Ok(())
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}index {} ({})",
            if self.unique { "unique " } else { "" },
            self.name,
            self.columns.join(", ")
        )
    }
}

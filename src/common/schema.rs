use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::common::constraints::{ColumnReference, IndexSpec};
use crate::common::errors::MigrationError;
use crate::common::helpers::validate_identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticType {
    String,
    Text,
    Integer,
    BigInt,
    Float,
    Decimal,
    Boolean,
    Uuid,
    Date,
    DateTime,
    Binary,
    Json,
}

impl SemanticType {
    pub const ALL: [SemanticType; 12] = [
        SemanticType::String,
        SemanticType::Text,
        SemanticType::Integer,
        SemanticType::BigInt,
        SemanticType::Float,
        SemanticType::Decimal,
        SemanticType::Boolean,
        SemanticType::Uuid,
        SemanticType::Date,
        SemanticType::DateTime,
        SemanticType::Binary,
        SemanticType::Json,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Text => "text",
            SemanticType::Integer => "integer",
            SemanticType::BigInt => "bigint",
            SemanticType::Float => "float",
            SemanticType::Decimal => "decimal",
            SemanticType::Boolean => "boolean",
            SemanticType::Uuid => "uuid",
            SemanticType::Date => "date",
            SemanticType::DateTime => "datetime",
            SemanticType::Binary => "binary",
            SemanticType::Json => "json",
        }
    }
}

impl FromStr for SemanticType {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timestamp" => Ok(SemanticType::DateTime),
            _ => SemanticType::ALL
                .iter()
                .copied()
                .find(|semantic_type| semantic_type.name() == s)
                .ok_or_else(|| MigrationError::invalid(format!("unknown column type '{}'", s))),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKeyType {
    /// Auto-incrementing integer `id`.
    BigInt,
    Uuid,
    None,
}

impl FromStr for PrimaryKeyType {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bigint" | "integer" => Ok(PrimaryKeyType::BigInt),
            "uuid" => Ok(PrimaryKeyType::Uuid),
            "none" => Ok(PrimaryKeyType::None),
            other => Err(MigrationError::invalid(format!(
                "unknown primary key type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PrimaryKeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimaryKeyType::BigInt => write!(f, "bigint"),
            PrimaryKeyType::Uuid => write!(f, "uuid"),
            PrimaryKeyType::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: SemanticType,
    pub is_nullable: bool,
    pub default: Option<String>,
    pub references: Option<ColumnReference>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: SemanticType) -> Self {
        ColumnSpec {
            name: name.into(),
            data_type,
            is_nullable: true,
            default: None,
            references: None,
        }
    }

    pub fn not_null(self) -> Self {
        self.nullable(false)
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.is_nullable = nullable;
        self
    }

    /// Raw SQL default expression, e.g. `'draft'` or `0`.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, reference: ColumnReference) -> Self {
        self.references = Some(reference);
        self
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        validate_identifier("column", &self.name)?;

        if let Some(reference) = &self.references {
            reference.validate()?;
        }

        Ok(())
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        write!(f, "{}", if self.is_nullable { " null" } else { " not null" })?;

        if let Some(default) = &self.default {
            write!(f, " default {}", default)?;
        }

        if let Some(reference) = &self.references {
            write!(f, " references {}", reference)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: PrimaryKeyType,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableDefinition {
    #[cfg(test)]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Every column name of the table, including the implicit `id`.
    pub fn column_names(&self) -> Vec<&str> {
        let primary_key = match self.primary_key {
            PrimaryKeyType::None => None,
            _ => Some("id"),
        };

        primary_key
            .into_iter()
            .chain(self.columns.iter().map(|column| column.name.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        validate_identifier("table", &self.name)?;

        if self.columns.is_empty() && self.primary_key == PrimaryKeyType::None {
            return Err(MigrationError::invalid(format!(
                "table {} has no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for name in self.column_names() {
            if !seen.insert(name) {
                return Err(MigrationError::invalid(format!(
                    "duplicate column {} in table {}",
                    name, self.name
                )));
            }
        }

        for column in &self.columns {
            column.validate()?;
        }

        for index in &self.indexes {
            index.validate()?;

            if let Some(missing) = index.columns.iter().find(|column| !seen.contains(column.as_str())) {
                return Err(MigrationError::invalid(format!(
                    "index {} references unknown column {}.{}",
                    index.name, self.name, missing
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (primary_key {}", self.name, self.primary_key)?;

        for column in &self.columns {
            write!(f, "; {}", column)?;
        }

        for index in &self.indexes {
            write!(f, "; {}", index)?;
        }

        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_semantic_types() {
        for semantic_type in SemanticType::ALL {
            assert_eq!(semantic_type.name().parse::<SemanticType>().unwrap(), semantic_type);
        }
        assert_eq!("timestamp".parse::<SemanticType>().unwrap(), SemanticType::DateTime);
    }

    #[test]
    fn unknown_semantic_type_is_invalid_definition() {
        let err = "money".parse::<SemanticType>().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { .. }));
        assert!(err.to_string().contains("unknown column type 'money'"));
    }

    #[test]
    fn column_display_is_canonical() {
        let column = ColumnSpec::new("author_id", SemanticType::Uuid)
            .not_null()
            .references(ColumnReference::new("authors"));

        assert_eq!(
            column.to_string(),
            "author_id uuid not null references authors(id)"
        );
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let table = TableDefinition {
            name: "books".to_string(),
            primary_key: PrimaryKeyType::Uuid,
            columns: vec![ColumnSpec::new("id", SemanticType::String)],
            indexes: vec![],
        };

        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate column id"));
    }

    #[test]
    fn index_on_unknown_column_is_rejected() {
        let table = TableDefinition {
            name: "books".to_string(),
            primary_key: PrimaryKeyType::BigInt,
            columns: vec![ColumnSpec::new("title", SemanticType::String)],
            indexes: vec![IndexSpec::new("books", &["isbn"], true)],
        };

        assert!(table.validate().is_err());
    }
}

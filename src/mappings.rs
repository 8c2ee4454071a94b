use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::common::errors::MigrationError;
use crate::common::schema::SemanticType;
use crate::store::dialect::Dialect;

/// Semantic column type to SQL type, per dialect.
#[derive(Debug, Clone)]
pub struct Mappings {
    mappings: HashMap<(Dialect, SemanticType), Mapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub to_type: String,
    pub max_characters_length: Option<u32>,
}

impl Mapping {
    fn new(to_type: &str, max_characters_length: Option<u32>) -> Self {
        Mapping {
            to_type: to_type.to_string(),
            max_characters_length,
        }
    }

    pub fn sql_type(&self) -> String {
        match self.max_characters_length {
            Some(length) => format!("{}({})", self.to_type, length),
            None => self.to_type.clone(),
        }
    }
}

impl Mappings {
    pub fn defaults() -> Self {
        use SemanticType::*;

        let sqlite = [
            (String, Mapping::new("VARCHAR", Some(255))),
            (Text, Mapping::new("TEXT", None)),
            (Integer, Mapping::new("INTEGER", None)),
            (BigInt, Mapping::new("BIGINT", None)),
            (Float, Mapping::new("REAL", None)),
            (Decimal, Mapping::new("DECIMAL", None)),
            (Boolean, Mapping::new("BOOLEAN", None)),
            (Uuid, Mapping::new("VARCHAR", Some(36))),
            (Date, Mapping::new("DATE", None)),
            (DateTime, Mapping::new("DATETIME", None)),
            (Binary, Mapping::new("BLOB", None)),
            (Json, Mapping::new("JSON", None)),
        ];

        let mysql = [
            (String, Mapping::new("VARCHAR", Some(255))),
            (Text, Mapping::new("TEXT", None)),
            (Integer, Mapping::new("INT", None)),
            (BigInt, Mapping::new("BIGINT", None)),
            (Float, Mapping::new("DOUBLE", None)),
            (Decimal, Mapping::new("DECIMAL", None)),
            (Boolean, Mapping::new("TINYINT", Some(1))),
            (Uuid, Mapping::new("CHAR", Some(36))),
            (Date, Mapping::new("DATE", None)),
            (DateTime, Mapping::new("DATETIME", Some(6))),
            (Binary, Mapping::new("BLOB", None)),
            (Json, Mapping::new("JSON", None)),
        ];

        let mappings = sqlite
            .into_iter()
            .map(|(semantic_type, mapping)| ((Dialect::Sqlite, semantic_type), mapping))
            .chain(
                mysql
                    .into_iter()
                    .map(|(semantic_type, mapping)| ((Dialect::MySql, semantic_type), mapping)),
            )
            .collect();

        Mappings { mappings }
    }

    pub fn get(&self, dialect: Dialect, semantic_type: SemanticType) -> Option<&Mapping> {
        self.mappings.get(&(dialect, semantic_type))
    }

    pub fn sql_type(
        &self,
        dialect: Dialect,
        semantic_type: SemanticType,
    ) -> Result<String, MigrationError> {
        self.get(dialect, semantic_type)
            .map(Mapping::sql_type)
            .ok_or_else(|| {
                MigrationError::unsupported(format!(
                    "no {} mapping for column type {}",
                    dialect, semantic_type
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Entries of `overrides` replace the matching entries of `self`.
    pub fn merge(mut self, overrides: Mappings) -> Self {
        self.mappings.extend(overrides.mappings);
        self
    }

    pub(crate) fn from_toml(value: toml::Value) -> Result<Mappings> {
        let mappings_table = value
            .get("mappings")
            .ok_or(anyhow!("Missing mappings table"))?
            .as_array()
            .ok_or(anyhow!("Invalid mappings table format"))?;

        let mut mappings = HashMap::new();

        for mapping_table in mappings_table {
            let mapping_table = mapping_table
                .as_table()
                .ok_or(anyhow!("Invalid mapping format"))?;
            let dialect = mapping_table
                .get("dialect")
                .and_then(|v| v.as_str())
                .ok_or(anyhow!("Missing or invalid 'dialect' field"))?
                .parse::<Dialect>()?;
            let from_type = mapping_table
                .get("from_type")
                .and_then(|v| v.as_str())
                .ok_or(anyhow!("Missing or invalid 'from_type' field"))?
                .parse::<SemanticType>()?;
            let to_type = mapping_table
                .get("to_type")
                .and_then(|v| v.as_str())
                .ok_or(anyhow!("Missing or invalid 'to_type' field"))?
                .to_string();
            let max_characters_length = match mapping_table.get("max_characters_length") {
                Some(value) => {
                    let length = value
                        .as_integer()
                        .ok_or(anyhow!("Invalid 'max_characters_length' field"))?;
                    Some(u32::try_from(length).map_err(|_| {
                        anyhow!("'max_characters_length' {} is out of range", length)
                    })?)
                }
                None => None,
            };

            let mapping = Mapping {
                to_type,
                max_characters_length,
            };

            mappings.insert((dialect, from_type), mapping);
        }

        Ok(Mappings { mappings })
    }
}

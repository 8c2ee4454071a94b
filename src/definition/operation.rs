use std::fmt;

use crate::common::constraints::{ForeignKeySpec, IndexSpec};
use crate::common::errors::MigrationError;
use crate::common::helpers::validate_identifier;
use crate::common::schema::{ColumnSpec, TableDefinition};

/// A single schema change. Destructive variants optionally carry what they
/// destroy so that they can be inverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateTable(TableDefinition),
    DropTable {
        name: String,
        definition: Option<TableDefinition>,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    RemoveColumn {
        table: String,
        name: String,
        definition: Option<ColumnSpec>,
    },
    AddIndex {
        table: String,
        index: IndexSpec,
    },
    RemoveIndex {
        table: String,
        index: IndexSpec,
    },
    AddForeignKey(ForeignKeySpec),
    RemoveForeignKey(ForeignKeySpec),
    Sql {
        up: String,
        down: Option<String>,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable(_) => "create_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::RemoveColumn { .. } => "remove_column",
            Operation::AddIndex { .. } => "add_index",
            Operation::RemoveIndex { .. } => "remove_index",
            Operation::AddForeignKey(_) => "add_foreign_key",
            Operation::RemoveForeignKey(_) => "remove_foreign_key",
            Operation::Sql { .. } => "sql",
        }
    }

    /// Returns `None` when the operation lacks the data needed to undo it.
    pub fn inverse(&self) -> Option<Operation> {
        match self {
            Operation::CreateTable(definition) => Some(Operation::DropTable {
                name: definition.name.clone(),
                definition: Some(definition.clone()),
            }),
            Operation::DropTable { definition, .. } => {
                definition.clone().map(Operation::CreateTable)
            }
            Operation::AddColumn { table, column } => Some(Operation::RemoveColumn {
                table: table.clone(),
                name: column.name.clone(),
                definition: Some(column.clone()),
            }),
            Operation::RemoveColumn {
                table, definition, ..
            } => definition.clone().map(|column| Operation::AddColumn {
                table: table.clone(),
                column,
            }),
            Operation::AddIndex { table, index } => Some(Operation::RemoveIndex {
                table: table.clone(),
                index: index.clone(),
            }),
            Operation::RemoveIndex { table, index } => Some(Operation::AddIndex {
                table: table.clone(),
                index: index.clone(),
            }),
            Operation::AddForeignKey(spec) => Some(Operation::RemoveForeignKey(spec.clone())),
            Operation::RemoveForeignKey(spec) => Some(Operation::AddForeignKey(spec.clone())),
            Operation::Sql { up, down } => down.clone().map(|down| Operation::Sql {
                up: down,
                down: Some(up.clone()),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        match self {
            Operation::CreateTable(definition) => definition.validate(),
            Operation::DropTable { name, definition } => {
                validate_identifier("table", name)?;
                match definition {
                    Some(definition) if definition.name != *name => Err(MigrationError::invalid(
                        format!("drop_table {} carries the definition of {}", name, definition.name),
                    )),
                    Some(definition) => definition.validate(),
                    None => Ok(()),
                }
            }
            Operation::AddColumn { table, column } => {
                validate_identifier("table", table)?;
                column.validate()
            }
            Operation::RemoveColumn {
                table,
                name,
                definition,
            } => {
                validate_identifier("table", table)?;
                validate_identifier("column", name)?;
                match definition {
                    Some(column) if column.name != *name => Err(MigrationError::invalid(format!(
                        "remove_column {}.{} carries the definition of {}",
                        table, name, column.name
                    ))),
                    Some(column) => column.validate(),
                    None => Ok(()),
                }
            }
            Operation::AddIndex { table, index } | Operation::RemoveIndex { table, index } => {
                validate_identifier("table", table)?;
                index.validate()
            }
            Operation::AddForeignKey(spec) | Operation::RemoveForeignKey(spec) => spec.validate(),
            Operation::Sql { up, .. } => {
                if up.trim().is_empty() {
                    return Err(MigrationError::invalid("sql operation has an empty statement"));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::CreateTable(definition) => write!(f, "create_table {}", definition),
            Operation::DropTable { name, definition } => match definition {
                Some(definition) => write!(f, "drop_table {} as {}", name, definition),
                None => write!(f, "drop_table {}", name),
            },
            Operation::AddColumn { table, column } => {
                write!(f, "add_column {} {}", table, column)
            }
            Operation::RemoveColumn {
                table,
                name,
                definition,
            } => match definition {
                Some(column) => write!(f, "remove_column {}.{} as {}", table, name, column),
                None => write!(f, "remove_column {}.{}", table, name),
            },
            Operation::AddIndex { table, index } => write!(f, "add_index {} {}", table, index),
            Operation::RemoveIndex { table, index } => {
                write!(f, "remove_index {} {}", table, index)
            }
            Operation::AddForeignKey(spec) => write!(f, "add_foreign_key {}", spec),
            Operation::RemoveForeignKey(spec) => write!(f, "remove_foreign_key {}", spec),
            Operation::Sql { up, down } => {
                write!(f, "sql {:?} reverting {:?}", up, down.as_deref().unwrap_or("-"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{PrimaryKeyType, SemanticType};

    fn books() -> TableDefinition {
        TableDefinition {
            name: "books".to_string(),
            primary_key: PrimaryKeyType::Uuid,
            columns: vec![ColumnSpec::new("title", SemanticType::String)],
            indexes: vec![],
        }
    }

    #[test]
    fn create_table_inverts_to_drop_with_definition() {
        let create = Operation::CreateTable(books());
        let drop = create.inverse().unwrap();

        assert_eq!(
            drop,
            Operation::DropTable {
                name: "books".to_string(),
                definition: Some(books()),
            }
        );
        assert_eq!(drop.inverse().unwrap(), create);
    }

    #[test]
    fn bare_drop_table_is_not_invertible() {
        let drop = Operation::DropTable {
            name: "books".to_string(),
            definition: None,
        };
        assert!(drop.inverse().is_none());
    }

    #[test]
    fn sql_without_down_is_not_invertible() {
        let sql = Operation::Sql {
            up: "UPDATE books SET title = ''".to_string(),
            down: None,
        };
        assert!(sql.inverse().is_none());

        let reversible = Operation::Sql {
            up: "INSERT INTO authors (id) VALUES (1)".to_string(),
            down: Some("DELETE FROM authors WHERE id = 1".to_string()),
        };
        assert_eq!(
            reversible.inverse().unwrap(),
            Operation::Sql {
                up: "DELETE FROM authors WHERE id = 1".to_string(),
                down: Some("INSERT INTO authors (id) VALUES (1)".to_string()),
            }
        );
    }

    #[test]
    fn add_column_inverse_remembers_column() {
        let add = Operation::AddColumn {
            table: "books".to_string(),
            column: ColumnSpec::new("isbn", SemanticType::String).not_null(),
        };

        match add.inverse().unwrap() {
            Operation::RemoveColumn {
                name, definition, ..
            } => {
                assert_eq!(name, "isbn");
                assert!(!definition.unwrap().is_nullable);
            }
            other => panic!("unexpected inverse {}", other),
        }
    }

    #[test]
    fn mismatched_drop_definition_is_invalid() {
        let drop = Operation::DropTable {
            name: "authors".to_string(),
            definition: Some(books()),
        };
        assert!(drop.validate().is_err());
    }

    #[test]
    fn display_includes_every_field() {
        let create = Operation::CreateTable(books());
        assert_eq!(
            create.to_string(),
            "create_table books (primary_key uuid; title string null)"
        );
    }
}

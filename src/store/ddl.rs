use crate::common::constraints::{constraint_name, ColumnReference, ForeignKeySpec, IndexSpec};
use crate::common::errors::MigrationError;
use crate::common::schema::{ColumnSpec, PrimaryKeyType, SemanticType, TableDefinition};
use crate::definition::operation::Operation;
use crate::mappings::Mappings;
use crate::store::dialect::Dialect;

/// Turns schema operations into dialect-specific SQL statements.
#[derive(Debug, Clone)]
pub struct DdlRenderer {
    dialect: Dialect,
    mappings: Mappings,
}

impl DdlRenderer {
    pub fn new(dialect: Dialect, mappings: Mappings) -> Self {
        DdlRenderer { dialect, mappings }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn render(&self, operation: &Operation) -> Result<Vec<String>, MigrationError> {
        match operation {
            Operation::CreateTable(definition) => self.build_create_table_queries(definition),
            Operation::DropTable { name, .. } => {
                Ok(vec![format!("DROP TABLE {}", self.quote(name))])
            }
            Operation::AddColumn { table, column } => {
                Ok(vec![self.build_add_column_query(table, column)?])
            }
            Operation::RemoveColumn {
                table,
                name,
                definition,
            } => Ok(vec![self.build_remove_column_query(
                table,
                name,
                definition.as_ref(),
            )]),
            Operation::AddIndex { table, index } => Ok(vec![self.build_create_index(table, index)]),
            Operation::RemoveIndex { table, index } => Ok(vec![match self.dialect {
                Dialect::Sqlite => format!("DROP INDEX {}", self.quote(&index.name)),
                Dialect::MySql => format!(
                    "DROP INDEX {} ON {}",
                    self.quote(&index.name),
                    self.quote(table)
                ),
            }]),
            Operation::AddForeignKey(spec) => self.build_add_foreign_key(spec).map(|sql| vec![sql]),
            Operation::RemoveForeignKey(spec) => match self.dialect {
                Dialect::Sqlite => Err(unsupported_foreign_key(spec)),
                Dialect::MySql => Ok(vec![format!(
                    "ALTER TABLE {} DROP FOREIGN KEY {}",
                    self.quote(&spec.from_table),
                    self.quote(&spec.constraint_name())
                )]),
            },
            Operation::Sql { up, .. } => Ok(vec![up.clone()]),
        }
    }

    pub fn build_create_table_queries(
        &self,
        definition: &TableDefinition,
    ) -> Result<Vec<String>, MigrationError> {
        let mut elements = Vec::new();

        if let Some(primary_key) = self.build_primary_key(definition.primary_key)? {
            elements.push(primary_key);
        }

        for column in &definition.columns {
            elements.push(self.build_column_definition(column)?);
        }

        for column in &definition.columns {
            if let Some(reference) = &column.references {
                elements.push(self.build_foreign_key_constraint(
                    &definition.name,
                    &column.name,
                    reference,
                ));
            }
        }

        let mut queries = vec![format!(
            "CREATE TABLE {} ({})",
            self.quote(&definition.name),
            elements.join(", ")
        )];

        for index in &definition.indexes {
            queries.push(self.build_create_index(&definition.name, index));
        }

        Ok(queries)
    }

    fn build_primary_key(&self, primary_key: PrimaryKeyType) -> Result<Option<String>, MigrationError> {
        let id = self.quote("id");

        let definition = match (primary_key, self.dialect) {
            (PrimaryKeyType::None, _) => return Ok(None),
            (PrimaryKeyType::BigInt, Dialect::Sqlite) => {
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL", id)
            }
            (PrimaryKeyType::BigInt, Dialect::MySql) => {
                format!("{} BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY", id)
            }
            (PrimaryKeyType::Uuid, _) => format!(
                "{} {} PRIMARY KEY NOT NULL",
                id,
                self.mappings.sql_type(self.dialect, SemanticType::Uuid)?
            ),
        };

        Ok(Some(definition))
    }

    pub fn build_column_definition(&self, column: &ColumnSpec) -> Result<String, MigrationError> {
        let mut result_str = String::new();

        result_str.push_str(&self.quote(&column.name));
        result_str.push(' ');
        result_str.push_str(&self.mappings.sql_type(self.dialect, column.data_type)?);

        let nullable_property = if column.is_nullable {
            " NULL"
        } else {
            " NOT NULL"
        };
        result_str.push_str(nullable_property);

        if let Some(default) = &column.default {
            result_str.push_str(" DEFAULT ");
            result_str.push_str(default);
        }

        Ok(result_str)
    }

    fn build_foreign_key_constraint(
        &self,
        table: &str,
        column: &str,
        reference: &ColumnReference,
    ) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote(&constraint_name(table, column)),
            self.quote(column),
            self.quote(&reference.to_table),
            self.quote(&reference.to_column)
        )
    }

    fn build_add_column_query(
        &self,
        table: &str,
        column: &ColumnSpec,
    ) -> Result<String, MigrationError> {
        let column_definition = self.build_column_definition(column)?;

        let query = match (&column.references, self.dialect) {
            (None, _) => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote(table),
                column_definition
            ),
            (Some(reference), Dialect::Sqlite) => format!(
                "ALTER TABLE {} ADD COLUMN {} REFERENCES {} ({})",
                self.quote(table),
                column_definition,
                self.quote(&reference.to_table),
                self.quote(&reference.to_column)
            ),
            (Some(reference), Dialect::MySql) => format!(
                "ALTER TABLE {} ADD COLUMN {}, ADD {}",
                self.quote(table),
                column_definition,
                self.build_foreign_key_constraint(table, &column.name, reference)
            ),
        };

        Ok(query)
    }

    fn build_remove_column_query(
        &self,
        table: &str,
        name: &str,
        definition: Option<&ColumnSpec>,
    ) -> String {
        let has_foreign_key = definition.map_or(false, |column| column.references.is_some());

        if has_foreign_key && self.dialect == Dialect::MySql {
            format!(
                "ALTER TABLE {} DROP FOREIGN KEY {}, DROP COLUMN {}",
                self.quote(table),
                self.quote(&constraint_name(table, name)),
                self.quote(name)
            )
        } else {
            format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote(table),
                self.quote(name)
            )
        }
    }

    pub fn build_create_index(&self, table: &str, index: &IndexSpec) -> String {
        let columns = index
            .columns
            .iter()
            .map(|column| self.quote(column))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.quote(table),
            columns
        )
    }

    fn build_add_foreign_key(&self, spec: &ForeignKeySpec) -> Result<String, MigrationError> {
        match self.dialect {
            Dialect::Sqlite => Err(unsupported_foreign_key(spec)),
            Dialect::MySql => Ok(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                self.quote(&spec.from_table),
                self.quote(&spec.constraint_name()),
                self.quote(&spec.column),
                self.quote(&spec.to_table),
                self.quote(&spec.to_column)
            )),
        }
    }

    fn quote(&self, identifier: &str) -> String {
        self.dialect.quote(identifier)
    }
}

fn unsupported_foreign_key(spec: &ForeignKeySpec) -> MigrationError {
    MigrationError::unsupported(format!(
        "sqlite cannot alter foreign key {} on an existing table, declare it with the column",
        spec.constraint_name()
    ))
}

pub fn build_ledger_table_query(dialect: Dialect, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id BIGINT PRIMARY KEY NOT NULL, name VARCHAR(255) NOT NULL, checksum VARCHAR(64) NOT NULL, applied_at VARCHAR(64) NOT NULL)",
        dialect.quote(table)
    )
}

/// Single-row table; holding row `id = 1` is holding the migration lock.
pub fn build_lock_table_query(dialect: Dialect, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY NOT NULL, owner VARCHAR(255) NOT NULL, locked_at VARCHAR(64) NOT NULL)",
        dialect.quote(table)
    )
}

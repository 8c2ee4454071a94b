use std::collections::HashMap;

use crate::common::errors::MigrationError;
use crate::common::schema::{ColumnSpec, PrimaryKeyType, TableDefinition};
use crate::definition::migration::{Migration, MigrationId};
use crate::definition::operation::Operation;
use crate::ledger::Ledger;

/// Every known migration, sorted by identifier and validated as a sequence.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// `external_tables` are tables that exist outside the migration history
    /// and may be referenced by foreign keys.
    pub fn new(
        mut migrations: Vec<Migration>,
        external_tables: &[String],
    ) -> Result<Self, MigrationError> {
        migrations.sort_by_key(Migration::id);

        if let Some(pair) = migrations.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
            return Err(MigrationError::invalid(format!(
                "duplicate migration identifier shared by {} and {}",
                pair[0].name(),
                pair[1].name()
            ))
            .with_id(pair[0].id()));
        }

        let mut model = SchemaModel::new(external_tables);
        for migration in &migrations {
            for operation in migration.operations() {
                model
                    .apply(operation)
                    .map_err(|err| err.with_id(migration.id()))?;
            }
        }

        Ok(MigrationSet { migrations })
    }

    pub fn get(&self, id: MigrationId) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&id, Migration::id)
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<MigrationId> {
        self.migrations.iter().map(Migration::id).collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Unapplied migrations in ascending order, bounded by `to` when given.
    pub fn pending(&self, ledger: &Ledger, to: Option<MigrationId>) -> Vec<&Migration> {
        self.migrations
            .iter()
            .filter(|migration| !ledger.is_applied(migration.id()))
            .filter(|migration| to.map_or(true, |to| migration.id() <= to))
            .collect()
    }

    /// Applied migrations must still match the checksum they were applied with.
    pub fn verify_checksums(&self, ledger: &Ledger) -> Result<(), MigrationError> {
        for entry in ledger.entries() {
            if let Some(migration) = self.get(entry.id) {
                if migration.checksum() != entry.checksum {
                    return Err(MigrationError::invalid(format!(
                        "{} was modified after it was applied (checksum {} != {})",
                        migration.name(),
                        migration.checksum(),
                        entry.checksum
                    ))
                    .with_id(entry.id));
                }
            }
        }

        Ok(())
    }
}

/// Table set as it evolves through the migration history. Columns of
/// external tables are unknown, so checks against them are skipped.
struct SchemaModel {
    tables: HashMap<String, Option<HashMap<String, bool>>>,
}

impl SchemaModel {
    fn new(external_tables: &[String]) -> Self {
        SchemaModel {
            tables: external_tables
                .iter()
                .map(|table| (table.clone(), None))
                .collect(),
        }
    }

    fn apply(&mut self, operation: &Operation) -> Result<(), MigrationError> {
        match operation {
            Operation::CreateTable(definition) => self.create_table(definition),
            Operation::DropTable { name, .. } => {
                self.require_table(name)?;
                self.tables.remove(name);
                Ok(())
            }
            Operation::AddColumn { table, column } => {
                self.check_reference(table, column)?;

                if let Some(columns) = self.require_table(table)? {
                    if columns.contains_key(&column.name) {
                        return Err(MigrationError::invalid(format!(
                            "column {}.{} already exists",
                            table, column.name
                        )));
                    }
                }

                if let Some(Some(columns)) = self.tables.get_mut(table) {
                    columns.insert(column.name.clone(), column.is_nullable);
                }
                Ok(())
            }
            Operation::RemoveColumn { table, name, .. } => {
                self.require_column(table, name)?;

                if let Some(Some(columns)) = self.tables.get_mut(table) {
                    columns.remove(name);
                }
                Ok(())
            }
            Operation::AddIndex { table, index } => {
                for column in &index.columns {
                    self.require_column(table, column)?;
                }
                Ok(())
            }
            Operation::RemoveIndex { table, .. } => self.require_table(table).map(|_| ()),
            Operation::AddForeignKey(spec) => {
                self.require_table(&spec.to_table)?;

                if let Some(nullable) = self.require_column(&spec.from_table, &spec.column)? {
                    if nullable != spec.nullable {
                        return Err(MigrationError::invalid(format!(
                            "foreign key {} declares nullable = {} but the column is {}",
                            spec.constraint_name(),
                            spec.nullable,
                            if nullable { "nullable" } else { "not null" }
                        )));
                    }
                }
                Ok(())
            }
            Operation::RemoveForeignKey(spec) => {
                self.require_column(&spec.from_table, &spec.column).map(|_| ())
            }
            Operation::Sql { .. } => Ok(()),
        }
    }

    fn create_table(&mut self, definition: &TableDefinition) -> Result<(), MigrationError> {
        if self.tables.contains_key(&definition.name) {
            return Err(MigrationError::invalid(format!(
                "table {} already exists",
                definition.name
            )));
        }

        for column in &definition.columns {
            if let Some(reference) = &column.references {
                if reference.to_table != definition.name {
                    self.check_reference(&definition.name, column)?;
                }
            }
        }

        let mut columns: HashMap<String, bool> = definition
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.is_nullable))
            .collect();

        if definition.primary_key != PrimaryKeyType::None {
            columns.insert("id".to_string(), false);
        }

        self.tables.insert(definition.name.clone(), Some(columns));

        Ok(())
    }

    fn check_reference(&self, table: &str, column: &ColumnSpec) -> Result<(), MigrationError> {
        match &column.references {
            Some(reference) if !self.tables.contains_key(&reference.to_table) => {
                Err(MigrationError::invalid(format!(
                    "{}.{} references table {} which is not defined",
                    table, column.name, reference.to_table
                )))
            }
            _ => Ok(()),
        }
    }

    fn require_table(&self, table: &str) -> Result<Option<&HashMap<String, bool>>, MigrationError> {
        self.tables
            .get(table)
            .map(Option::as_ref)
            .ok_or_else(|| MigrationError::invalid(format!("table {} is not defined", table)))
    }

    /// Returns the column's nullability when the table's columns are known.
    fn require_column(&self, table: &str, column: &str) -> Result<Option<bool>, MigrationError> {
        match self.require_table(table)? {
            Some(columns) => columns.get(column).copied().map(Some).ok_or_else(|| {
                MigrationError::invalid(format!("column {}.{} is not defined", table, column))
            }),
            None => Ok(None),
        }
    }
}

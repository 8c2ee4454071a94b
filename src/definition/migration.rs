use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::common::errors::MigrationError;
use crate::common::helpers::validate_identifier;
use crate::definition::operation::Operation;
use crate::ledger::LedgerEntry;
use crate::store::SchemaHandle;

/// Timestamp-derived migration identifier, e.g. `20220803175512`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MigrationId(u64);

impl MigrationId {
    pub fn new(value: u64) -> Result<Self, MigrationError> {
        if value == 0 || value > i64::MAX as u64 {
            return Err(MigrationError::invalid(format!(
                "migration identifier {} is out of range",
                value
            )));
        }

        Ok(MigrationId(value))
    }

    #[cfg(test)]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Ledger storage column value; always fits by construction.
    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }
}

impl FromStr for MigrationId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .parse::<u64>()
            .map_err(|_| MigrationError::invalid(format!("invalid migration identifier '{}'", s)))?;

        MigrationId::new(value)
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable schema change together with its inverse.
#[derive(Debug, Clone)]
pub struct Migration {
    id: MigrationId,
    name: String,
    operations: Vec<Operation>,
    inverse: Vec<Operation>,
    checksum: String,
}

impl Migration {
    /// Derives the inverse by undoing `operations` in reverse order.
    pub fn new(
        id: MigrationId,
        name: impl Into<String>,
        operations: Vec<Operation>,
    ) -> Result<Self, MigrationError> {
        Migration::build(id, name.into(), operations, None)
    }

    pub fn with_down(
        id: MigrationId,
        name: impl Into<String>,
        operations: Vec<Operation>,
        down: Vec<Operation>,
    ) -> Result<Self, MigrationError> {
        Migration::build(id, name.into(), operations, Some(down))
    }

    fn build(
        id: MigrationId,
        name: String,
        operations: Vec<Operation>,
        down: Option<Vec<Operation>>,
    ) -> Result<Self, MigrationError> {
        validate_identifier("migration", &name).map_err(|err| err.with_id(id))?;

        if operations.is_empty() {
            return Err(MigrationError::invalid("migration has no operations").with_id(id));
        }

        for operation in operations.iter().chain(down.iter().flatten()) {
            operation.validate().map_err(|err| err.with_id(id))?;
        }

        let inverse = match down {
            Some(down) if down.is_empty() && !only_raw_sql(&operations) => {
                return Err(MigrationError::invalid(
                    "explicit down is empty but the migration changes the schema",
                )
                .with_id(id));
            }
            Some(down) => down,
            None => derive_inverse(&operations).map_err(|err| err.with_id(id))?,
        };

        let checksum = compute_checksum(&name, &operations, &inverse);

        Ok(Migration {
            id,
            name,
            operations,
            inverse,
            checksum,
        })
    }

    pub fn id(&self) -> MigrationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn inverse(&self) -> &[Operation] {
        &self.inverse
    }

    /// SHA-256 over the canonical rendering of the name, operations and inverse.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub async fn apply<H>(&self, handle: &mut H) -> Result<LedgerEntry, MigrationError>
    where
        H: SchemaHandle + ?Sized,
    {
        if handle.is_applied(self.id).await.map_err(|err| err.with_id(self.id))? {
            return Err(MigrationError::AlreadyApplied { id: self.id });
        }

        for operation in &self.operations {
            debug!("{} ▸ {}", self.id, operation);
            handle
                .execute(operation)
                .await
                .map_err(|err| err.with_id(self.id))?;
        }

        let entry = LedgerEntry {
            id: self.id,
            name: self.name.clone(),
            checksum: self.checksum.clone(),
            applied_at: Utc::now(),
        };

        handle
            .record_applied(&entry)
            .await
            .map_err(|err| err.with_id(self.id))?;

        Ok(entry)
    }

    pub async fn rollback<H>(&self, handle: &mut H) -> Result<(), MigrationError>
    where
        H: SchemaHandle + ?Sized,
    {
        if !handle.is_applied(self.id).await.map_err(|err| err.with_id(self.id))? {
            return Err(MigrationError::NotApplied { id: self.id });
        }

        for operation in &self.inverse {
            debug!("{} ◂ {}", self.id, operation);
            handle
                .execute(operation)
                .await
                .map_err(|err| err.with_id(self.id))?;
        }

        handle
            .record_rolled_back(self.id)
            .await
            .map_err(|err| err.with_id(self.id))
    }
}

/// Data-only migrations may declare an empty down; nothing in the schema
/// would be left behind by rolling them back.
fn only_raw_sql(operations: &[Operation]) -> bool {
    operations
        .iter()
        .all(|operation| matches!(operation, Operation::Sql { .. }))
}

fn derive_inverse(operations: &[Operation]) -> Result<Vec<Operation>, MigrationError> {
    operations
        .iter()
        .rev()
        .map(|operation| {
            operation.inverse().ok_or_else(|| {
                MigrationError::invalid(format!(
                    "{} cannot be reversed automatically, declare an explicit down",
                    operation.kind()
                ))
            })
        })
        .collect()
}

fn compute_checksum(name: &str, operations: &[Operation], inverse: &[Operation]) -> String {
    let mut hasher = Sha256::new();

    hasher.update(name.as_bytes());
    hasher.update(b"\n");

    for operation in operations {
        hasher.update(operation.to_string().as_bytes());
        hasher.update(b"\n");
    }

    hasher.update(b"--\n");

    for operation in inverse {
        hasher.update(operation.to_string().as_bytes());
        hasher.update(b"\n");
    }

    hex::encode(hasher.finalize())
}

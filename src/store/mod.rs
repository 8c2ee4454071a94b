use async_trait::async_trait;

use crate::common::errors::MigrationError;
use crate::definition::migration::MigrationId;
use crate::definition::operation::Operation;
use crate::ledger::LedgerEntry;

pub mod ddl;
pub mod dialect;
pub mod sql_store;

/// The transactional surface a migration is applied through: schema changes
/// and ledger writes issued on one handle commit or abort together.
#[async_trait]
pub trait SchemaHandle: Send {
    async fn execute(&mut self, operation: &Operation) -> Result<(), MigrationError>;

    async fn is_applied(&mut self, id: MigrationId) -> Result<bool, MigrationError>;

    async fn record_applied(&mut self, entry: &LedgerEntry) -> Result<(), MigrationError>;

    async fn record_rolled_back(&mut self, id: MigrationId) -> Result<(), MigrationError>;
}

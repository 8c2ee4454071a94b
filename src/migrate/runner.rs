use chrono::Utc;
use tokio::time::Instant;

use crate::common::errors::MigrationError;
use crate::definition::catalog::MigrationSet;
use crate::definition::migration::{Migration, MigrationId};
use crate::ledger::{Ledger, LedgerEntry};
use crate::migrate::migration_result::{Direction, MigrationResult};
use crate::migrate::status::StatusReport;
use crate::store::sql_store::{MigrationLock, SqlStore};

/// Ledger after a batch, and what the batch did.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub ledger: Ledger,
    pub results: Vec<MigrationResult>,
}

pub struct MigrationRunner {
    store: SqlStore,
    migrations: MigrationSet,
    owner: String,
}

impl MigrationRunner {
    pub fn new(store: SqlStore, migrations: MigrationSet) -> Self {
        MigrationRunner {
            store,
            migrations,
            owner: format!("pid {} since {}", std::process::id(), Utc::now().to_rfc3339()),
        }
    }

    #[cfg(test)]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn store(&self) -> &SqlStore {
        &self.store
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    /// Applies pending migrations up to and including `to`.
    pub async fn up(&self, to: Option<MigrationId>) -> Result<MigrationOutcome, MigrationError> {
        let lock = self.lock().await?;
        let outcome = match self.load_verified_ledger().await {
            Ok(ledger) => self.apply_pending(ledger, to).await,
            Err(err) => Err(err),
        };

        self.unlock(lock, outcome).await
    }

    /// Rolls back every applied migration newer than `to`, or only the
    /// latest one when no bound is given.
    pub async fn down(&self, to: Option<MigrationId>) -> Result<MigrationOutcome, MigrationError> {
        let lock = self.lock().await?;
        let outcome = match self.load_verified_ledger().await {
            Ok(ledger) => self.roll_back_to(ledger, to).await,
            Err(err) => Err(err),
        };

        self.unlock(lock, outcome).await
    }

    pub async fn status(&self) -> Result<StatusReport, MigrationError> {
        self.store.ensure_ledger().await?;
        let ledger = self.store.load_ledger().await?;

        Ok(StatusReport::new(&self.migrations, &ledger))
    }

    pub async fn apply_pending(
        &self,
        mut ledger: Ledger,
        to: Option<MigrationId>,
    ) -> Result<MigrationOutcome, MigrationError> {
        let pending = self.migrations.pending(&ledger, to);

        if pending.is_empty() {
            info!("Schema is up to date, nothing to apply");
            return Ok(MigrationOutcome {
                ledger,
                results: Vec::new(),
            });
        }

        if let Some(latest) = ledger.latest() {
            for migration in pending.iter().filter(|m| m.id() < latest.id) {
                warn!(
                    "{} {} is older than the latest applied migration {}, applying out of order",
                    migration.id(),
                    migration.name(),
                    latest.id
                );
            }
        }

        info!("Pending migrations: {}", pending.len());

        let mut results = Vec::with_capacity(pending.len());

        for migration in pending {
            let start_time = Instant::now();
            info!("Applying {} {}", migration.id(), migration.name());

            let entry = self.apply_one(migration).await?;
            ledger.record_applied(entry)?;

            let result = MigrationResult {
                id: migration.id(),
                name: migration.name().to_string(),
                direction: Direction::Up,
                elapsed: Instant::now().saturating_duration_since(start_time),
            };

            info!("Applied {}", result);
            results.push(result);
        }

        Ok(MigrationOutcome { ledger, results })
    }

    pub async fn roll_back_to(
        &self,
        mut ledger: Ledger,
        to: Option<MigrationId>,
    ) -> Result<MigrationOutcome, MigrationError> {
        let targets: Vec<MigrationId> = match to {
            Some(to) => ledger
                .applied_ids_in_order()
                .into_iter()
                .rev()
                .filter(|id| *id > to)
                .collect(),
            None => ledger.latest().map(|entry| vec![entry.id]).unwrap_or_default(),
        };

        if targets.is_empty() {
            if ledger.is_empty() {
                info!("No migrations are applied, nothing to roll back");
            } else {
                info!("Nothing to roll back");
            }
            return Ok(MigrationOutcome {
                ledger,
                results: Vec::new(),
            });
        }

        let migrations = targets
            .iter()
            .map(|id| {
                self.migrations.get(*id).ok_or_else(|| {
                    MigrationError::invalid("applied migration has no definition to roll back")
                        .with_id(*id)
                })
            })
            .collect::<Result<Vec<&Migration>, MigrationError>>()?;

        let mut results = Vec::with_capacity(migrations.len());

        for migration in migrations {
            let start_time = Instant::now();
            info!("Rolling back {} {}", migration.id(), migration.name());

            self.roll_back_one(migration).await?;
            ledger.record_rolled_back(migration.id())?;

            let result = MigrationResult {
                id: migration.id(),
                name: migration.name().to_string(),
                direction: Direction::Down,
                elapsed: Instant::now().saturating_duration_since(start_time),
            };

            info!("Rolled back {}", result);
            results.push(result);
        }

        Ok(MigrationOutcome { ledger, results })
    }

    async fn apply_one(&self, migration: &Migration) -> Result<LedgerEntry, MigrationError> {
        let mut tx = self.store.begin().await?;

        match migration.apply(&mut tx).await {
            Ok(entry) => {
                tx.commit().await.map_err(|err| err.with_id(migration.id()))?;
                Ok(entry)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of {} failed: {}", migration.id(), rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn roll_back_one(&self, migration: &Migration) -> Result<(), MigrationError> {
        if migration.inverse().is_empty() {
            warn!(
                "{} {} has an empty down, only its ledger entry is removed",
                migration.id(),
                migration.name()
            );
        }

        let mut tx = self.store.begin().await?;

        match migration.rollback(&mut tx).await {
            Ok(()) => tx.commit().await.map_err(|err| err.with_id(migration.id())),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of {} failed: {}", migration.id(), rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn lock(&self) -> Result<MigrationLock, MigrationError> {
        self.store.ensure_ledger().await?;
        let lock = self.store.acquire_lock(&self.owner).await?;
        debug!("Migration lock acquired by {}", lock.owner());

        Ok(lock)
    }

    async fn unlock(
        &self,
        lock: MigrationLock,
        outcome: Result<MigrationOutcome, MigrationError>,
    ) -> Result<MigrationOutcome, MigrationError> {
        let released = self.store.release_lock(lock).await;

        let outcome = outcome?;
        released?;

        Ok(outcome)
    }

    async fn load_verified_ledger(&self) -> Result<Ledger, MigrationError> {
        let ledger = self.store.load_ledger().await?;
        self.migrations.verify_checksums(&ledger)?;

        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{ColumnSpec, SemanticType};
    use crate::definition::builder::TableBuilder;
    use crate::definition::operation::Operation;
    use crate::store::sql_store::TableInfo;
    use crate::test_support::{add_isbn, create_authors, create_books, id, memory_store};

    fn into_store(runner: MigrationRunner) -> SqlStore {
        runner.store
    }

    async fn runner(migrations: Vec<Migration>) -> MigrationRunner {
        let set = MigrationSet::new(migrations, &[]).unwrap();
        MigrationRunner::new(memory_store().await, set).with_owner("test-runner")
    }

    fn column_names(tables: &[TableInfo], table: &str) -> Vec<String> {
        tables
            .iter()
            .find(|info| info.name == table)
            .map(|info| info.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn create_books_scenario() {
        let runner = runner(vec![create_authors(), create_books()]).await;

        let outcome = runner.up(None).await.unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.ledger.is_applied(create_books().id()));
        assert_eq!(outcome.ledger, runner.store().load_ledger().await.unwrap());

        let schema = runner.store().describe_schema().await.unwrap();
        assert_eq!(
            column_names(&schema, "books"),
            vec!["id", "title", "author_id", "created_at", "updated_at"]
        );

        let second = runner.up(None).await.unwrap();
        assert!(second.results.is_empty());
        assert_eq!(second.ledger, outcome.ledger);
        assert_eq!(runner.store().describe_schema().await.unwrap(), schema);
    }

    #[tokio::test]
    async fn up_honours_upper_bound() {
        let runner = runner(vec![create_authors(), create_books(), add_isbn()]).await;

        let outcome = runner.up(Some(create_books().id())).await.unwrap();
        assert_eq!(
            outcome.ledger.applied_ids_in_order(),
            vec![create_authors().id(), create_books().id()]
        );

        let status = runner.status().await.unwrap();
        assert_eq!(status.pending_ids(), vec![add_isbn().id()]);
    }

    #[tokio::test]
    async fn down_to_removes_newer_migrations_in_descending_order() {
        let runner = runner(vec![create_authors(), create_books(), add_isbn()]).await;
        runner.up(None).await.unwrap();

        let outcome = runner.down(Some(create_authors().id())).await.unwrap();

        let rolled_back: Vec<MigrationId> = outcome.results.iter().map(|r| r.id).collect();
        assert_eq!(rolled_back, vec![add_isbn().id(), create_books().id()]);
        assert!(outcome.results.iter().all(|r| r.direction == Direction::Down));
        assert_eq!(
            outcome.ledger.applied_ids_in_order(),
            vec![create_authors().id()]
        );

        let schema = runner.store().describe_schema().await.unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].name, "authors");
    }

    #[tokio::test]
    async fn down_without_bound_rolls_back_latest_only() {
        let runner = runner(vec![create_authors(), create_books(), add_isbn()]).await;
        runner.up(None).await.unwrap();

        let outcome = runner.down(None).await.unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id, add_isbn().id());
        assert_eq!(outcome.ledger.len(), 2);
    }

    #[tokio::test]
    async fn rollback_then_reapply_yields_equivalent_schema() {
        let runner = runner(vec![create_authors(), create_books(), add_isbn()]).await;
        runner.up(None).await.unwrap();
        let before = runner.store().describe_schema().await.unwrap();

        runner.down(Some(create_authors().id())).await.unwrap();
        runner.up(None).await.unwrap();

        assert_eq!(runner.store().describe_schema().await.unwrap(), before);
    }

    #[tokio::test]
    async fn failing_operation_leaves_no_trace() {
        let publishers = TableBuilder::new("publishers")
            .column(ColumnSpec::new("name", SemanticType::String))
            .build()
            .unwrap();

        let broken = Migration::new(
            id(20220901000000),
            "create_publishers",
            vec![
                Operation::CreateTable(publishers),
                Operation::Sql {
                    up: "INSERT INTO missing_table (name) VALUES ('x')".to_string(),
                    down: Some("SELECT 1".to_string()),
                },
                Operation::AddColumn {
                    table: "publishers".to_string(),
                    column: ColumnSpec::new("country", SemanticType::String),
                },
            ],
        )
        .unwrap();

        let runner = runner(vec![create_authors(), broken]).await;
        let err = runner.up(None).await.unwrap_err();

        assert_eq!(err.migration_id(), Some(id(20220901000000)));
        assert_eq!(err.exit_code(), 5);

        let ledger = runner.store().load_ledger().await.unwrap();
        assert_eq!(ledger.applied_ids_in_order(), vec![create_authors().id()]);

        let schema = runner.store().describe_schema().await.unwrap();
        assert!(schema.iter().all(|table| table.name != "publishers"));
        assert_eq!(runner.store().lock_owner().await.unwrap(), None);
    }

    #[tokio::test]
    async fn held_lock_rejects_second_runner() {
        let runner = runner(vec![create_authors()]).await;
        let _held = runner.store().acquire_lock("other-host").await.unwrap();

        let err = runner.up(None).await.unwrap_err();

        match err {
            MigrationError::ConcurrentMigration { owner, .. } => assert_eq!(owner, "other-host"),
            other => panic!("unexpected error {}", other),
        }
        assert!(runner.store().load_ledger().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn modified_applied_migration_blocks_up() {
        let runner = runner(vec![create_authors()]).await;
        runner.up(None).await.unwrap();

        let changed = Migration::new(
            create_authors().id(),
            "create_authors",
            vec![Operation::CreateTable(
                TableBuilder::new("authors")
                    .column(ColumnSpec::new("nickname", SemanticType::String))
                    .build()
                    .unwrap(),
            )],
        )
        .unwrap();

        let set = MigrationSet::new(vec![changed], &[]).unwrap();
        let store = into_store(runner);
        let runner = MigrationRunner::new(store, set);

        let err = runner.up(None).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { id: Some(_), .. }));
    }

    #[tokio::test]
    async fn applied_migration_without_definition_cannot_be_rolled_back() {
        let runner = runner(vec![create_authors()]).await;
        runner.up(None).await.unwrap();

        let store = into_store(runner);
        let runner = MigrationRunner::new(store, MigrationSet::default());

        let status = runner.status().await.unwrap();
        assert_eq!(status.missing_ids(), vec![create_authors().id()]);

        let err = runner.down(None).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn empty_down_only_removes_ledger_entry() {
        let seed = Migration::with_down(
            id(20220803175600),
            "seed_authors",
            vec![Operation::Sql {
                up: "INSERT INTO authors (id, name, created_at, updated_at) \
                     VALUES ('a1', 'Le Guin', '2022-08-03', '2022-08-03')"
                    .to_string(),
                down: None,
            }],
            vec![],
        )
        .unwrap();
        let runner = runner(vec![create_authors(), seed.clone()]).await;
        runner.up(None).await.unwrap();

        let outcome = runner.down(None).await.unwrap();

        assert_eq!(outcome.results[0].id, seed.id());
        assert!(!outcome.ledger.is_applied(seed.id()));
        let schema = runner.store().describe_schema().await.unwrap();
        assert!(schema.iter().any(|table| table.name == "authors"));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::any::{Any, AnyPool, AnyRow};
use sqlx::{Executor, Row, Transaction};

use crate::common::errors::MigrationError;
use crate::definition::migration::MigrationId;
use crate::definition::operation::Operation;
use crate::ledger::{Ledger, LedgerEntry};
use crate::mappings::Mappings;
use crate::store::ddl::{build_ledger_table_query, build_lock_table_query, DdlRenderer};
use crate::store::dialect::Dialect;
use crate::store::SchemaHandle;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub ledger_table: String,
    pub lock_table: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            ledger_table: "schema_migrations".to_string(),
            lock_table: "schema_migrations_lock".to_string(),
        }
    }
}

/// Proof of holding the migration lock row.
#[derive(Debug)]
#[must_use = "the migration lock must be released"]
pub struct MigrationLock {
    owner: String,
}

impl MigrationLock {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    pub column: String,
    pub to_table: String,
    pub to_column: Option<String>,
}

/// Target schema and its ledger, living in the same database.
pub struct SqlStore {
    pool: AnyPool,
    renderer: DdlRenderer,
    options: StoreOptions,
}

impl SqlStore {
    pub fn new(
        pool: AnyPool,
        mappings: Mappings,
        options: StoreOptions,
    ) -> Result<Self, MigrationError> {
        let dialect = Dialect::from_kind(pool.any_kind())?;

        Ok(SqlStore {
            pool,
            renderer: DdlRenderer::new(dialect, mappings),
            options,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.renderer.dialect()
    }

    pub async fn ensure_ledger(&self) -> Result<(), MigrationError> {
        let dialect = self.dialect();

        for query in [
            build_ledger_table_query(dialect, &self.options.ledger_table),
            build_lock_table_query(dialect, &self.options.lock_table),
        ] {
            (&self.pool)
                .execute(query.as_str())
                .await
                .map_err(|err| MigrationError::operation("Failed to create ledger tables", err))?;
        }

        Ok(())
    }

    pub async fn load_ledger(&self) -> Result<Ledger, MigrationError> {
        let query = format!(
            "SELECT id, name, checksum, applied_at FROM {} ORDER BY id",
            self.quote(&self.options.ledger_table)
        );

        let mut rows = sqlx::query(&query).fetch(&self.pool);
        let mut entries = Vec::new();

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|err| MigrationError::operation("Failed to read ledger", err))?
        {
            entries.push(parse_ledger_entry(&row)?);
        }

        debug!("Ledger holds {} applied migrations", entries.len());

        Ok(Ledger::from_entries(entries))
    }

    /// Inserts the single lock row; a second runner fails on the primary key.
    pub async fn acquire_lock(&self, owner: &str) -> Result<MigrationLock, MigrationError> {
        let query = format!(
            "INSERT INTO {} (id, owner, locked_at) VALUES (1, ?, ?)",
            self.quote(&self.options.lock_table)
        );

        let result = sqlx::query(&query)
            .bind(owner.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!("Migration lock acquired by {}", owner);
                Ok(MigrationLock {
                    owner: owner.to_string(),
                })
            }
            Err(err) => match self.lock_owner().await? {
                Some(holder) => Err(MigrationError::ConcurrentMigration {
                    id: None,
                    owner: holder,
                }),
                None => Err(MigrationError::operation(
                    "Failed to acquire migration lock",
                    err,
                )),
            },
        }
    }

    pub async fn release_lock(&self, lock: MigrationLock) -> Result<(), MigrationError> {
        let query = format!(
            "DELETE FROM {} WHERE id = 1 AND owner = ?",
            self.quote(&self.options.lock_table)
        );

        let result = sqlx::query(&query)
            .bind(lock.owner.clone())
            .execute(&self.pool)
            .await
            .map_err(|err| MigrationError::operation("Failed to release migration lock", err))?;

        if result.rows_affected() == 0 {
            warn!("Migration lock of {} was already released", lock.owner);
        } else {
            debug!("Migration lock released by {}", lock.owner);
        }

        Ok(())
    }

    pub async fn lock_owner(&self) -> Result<Option<String>, MigrationError> {
        let query = format!(
            "SELECT owner FROM {} WHERE id = 1",
            self.quote(&self.options.lock_table)
        );

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| MigrationError::operation("Failed to read migration lock", err))?;

        row.map(|row| row.try_get::<String, _>("owner"))
            .transpose()
            .map_err(|err| MigrationError::operation("Failed to read migration lock owner", err))
    }

    /// Clears a lock left behind by a crashed runner; returns its owner.
    pub async fn force_unlock(&self) -> Result<Option<String>, MigrationError> {
        let owner = self.lock_owner().await?;

        let query = format!("DELETE FROM {}", self.quote(&self.options.lock_table));
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|err| MigrationError::operation("Failed to clear migration lock", err))?;

        Ok(owner)
    }

    pub async fn begin(&self) -> Result<SqlTransaction, MigrationError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| MigrationError::operation("Failed to begin transaction", err))?;

        Ok(SqlTransaction {
            tx,
            compensating: !self.dialect().transactional_ddl(),
            renderer: self.renderer.clone(),
            ledger_table: self.options.ledger_table.clone(),
            executed: Vec::new(),
        })
    }

    /// Live tables with their columns and foreign keys, ledger tables excluded.
    pub async fn describe_schema(&self) -> Result<Vec<TableInfo>, MigrationError> {
        let mut tables = Vec::new();

        for name in self.fetch_tables().await? {
            if name == self.options.ledger_table || name == self.options.lock_table {
                continue;
            }

            let columns = self.fetch_columns(&name).await?;
            let foreign_keys = self.fetch_foreign_keys(&name).await?;

            tables.push(TableInfo {
                name,
                columns,
                foreign_keys,
            });
        }

        Ok(tables)
    }

    async fn fetch_tables(&self) -> Result<Vec<String>, MigrationError> {
        let query = match self.dialect() {
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Dialect::MySql => {
                "SELECT CAST(TABLE_NAME AS CHAR) AS name FROM information_schema.TABLES WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME"
            }
        };

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| MigrationError::operation("Failed to list tables", err))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| MigrationError::operation("Failed to read table name", err))
    }

    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, MigrationError> {
        let query = match self.dialect() {
            Dialect::Sqlite => {
                "SELECT name, type AS sql_type, \"notnull\" AS not_null, pk AS primary_key FROM pragma_table_info(?) ORDER BY cid"
            }
            Dialect::MySql => {
                "SELECT CAST(COLUMN_NAME AS CHAR) AS name, CAST(COLUMN_TYPE AS CHAR) AS sql_type, \
                 CASE WHEN IS_NULLABLE = 'NO' THEN 1 ELSE 0 END AS not_null, \
                 CASE WHEN COLUMN_KEY = 'PRI' THEN 1 ELSE 0 END AS primary_key \
                 FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION"
            }
        };

        let rows = sqlx::query(query)
            .bind(table.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|err| MigrationError::operation(format!("Failed to describe table {}", table), err))?;

        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    sql_type: row.try_get("sql_type")?,
                    not_null: row.try_get::<i64, _>("not_null")? != 0,
                    primary_key: row.try_get::<i64, _>("primary_key")? != 0,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|err| MigrationError::operation(format!("Failed to read columns of {}", table), err))
    }

    async fn fetch_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>, MigrationError> {
        let query = match self.dialect() {
            Dialect::Sqlite => {
                "SELECT \"from\" AS column_name, \"table\" AS to_table, \"to\" AS to_column FROM pragma_foreign_key_list(?) ORDER BY id, seq"
            }
            Dialect::MySql => {
                "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name, CAST(REFERENCED_TABLE_NAME AS CHAR) AS to_table, \
                 CAST(REFERENCED_COLUMN_NAME AS CHAR) AS to_column \
                 FROM information_schema.KEY_COLUMN_USAGE WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
                 AND REFERENCED_TABLE_NAME IS NOT NULL ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION"
            }
        };

        let rows = sqlx::query(query)
            .bind(table.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                MigrationError::operation(format!("Failed to list foreign keys of {}", table), err)
            })?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKeyInfo {
                    column: row.try_get("column_name")?,
                    to_table: row.try_get("to_table")?,
                    to_column: row.try_get("to_column")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|err| {
                MigrationError::operation(format!("Failed to read foreign keys of {}", table), err)
            })
    }

    fn quote(&self, identifier: &str) -> String {
        self.dialect().quote(identifier)
    }
}

fn parse_ledger_entry(row: &AnyRow) -> Result<LedgerEntry, MigrationError> {
    let read = |err| MigrationError::operation("Failed to decode ledger entry", err);

    let id: i64 = row.try_get("id").map_err(read)?;
    let name: String = row.try_get("name").map_err(read)?;
    let checksum: String = row.try_get("checksum").map_err(read)?;
    let applied_at: String = row.try_get("applied_at").map_err(read)?;

    let id = u64::try_from(id)
        .map_err(|_| MigrationError::invalid(format!("negative ledger identifier {}", id)))
        .and_then(MigrationId::new)?;

    let applied_at = DateTime::parse_from_rfc3339(&applied_at)
        .map_err(|err| {
            MigrationError::invalid(format!("unreadable applied_at '{}': {}", applied_at, err))
                .with_id(id)
        })?
        .with_timezone(&Utc);

    Ok(LedgerEntry {
        id,
        name,
        checksum,
        applied_at,
    })
}

/// One migration's transaction. Dropping it without `commit` rolls back.
pub struct SqlTransaction {
    tx: Transaction<'static, Any>,
    /// Undo executed operations on rollback; set when DDL is not transactional.
    compensating: bool,
    renderer: DdlRenderer,
    ledger_table: String,
    executed: Vec<Operation>,
}

impl SqlTransaction {
    pub async fn commit(self) -> Result<(), MigrationError> {
        self.tx
            .commit()
            .await
            .map_err(|err| MigrationError::operation("Failed to commit transaction", err))
    }

    /// Without transactional DDL the schema changes already ran have been
    /// committed by the database, so their inverses are executed first.
    pub async fn rollback(mut self) -> Result<(), MigrationError> {
        if self.compensating {
            let undone = self.compensate().await;
            debug!("Undid {} schema operations before rollback", undone.len());
        }

        self.tx
            .rollback()
            .await
            .map_err(|err| MigrationError::operation("Failed to roll back transaction", err))
    }

    /// Runs the inverses of executed operations, newest first. Returns the
    /// inverses that succeeded.
    async fn compensate(&mut self) -> Vec<Operation> {
        let executed = std::mem::take(&mut self.executed);
        let mut undone = Vec::new();

        for operation in executed.iter().rev() {
            let inverse = match operation.inverse() {
                Some(inverse) => inverse,
                None => {
                    warn!("Cannot undo '{}', schema needs manual repair", operation);
                    continue;
                }
            };

            match self.run(&inverse).await {
                Ok(()) => undone.push(inverse),
                Err(err) => warn!("Undoing '{}' failed: {}", operation, err),
            }
        }

        self.executed.clear();
        undone
    }

    async fn run(&mut self, operation: &Operation) -> Result<(), MigrationError> {
        let statements = self.renderer.render(operation)?;

        for (index, statement) in statements.iter().enumerate() {
            debug!("Executing: {}", statement);

            (&mut *self.tx)
                .execute(statement.as_str())
                .await
                .map_err(|err| {
                    MigrationError::operation(
                        format!("{} rejected by the database", operation.kind()),
                        err,
                    )
                })?;

            if index == 0 {
                self.executed.push(operation.clone());
            }
        }

        Ok(())
    }

    fn ledger_table(&self) -> String {
        self.renderer.dialect().quote(&self.ledger_table)
    }
}

#[async_trait]
impl SchemaHandle for SqlTransaction {
    async fn execute(&mut self, operation: &Operation) -> Result<(), MigrationError> {
        self.run(operation).await
    }

    async fn is_applied(&mut self, id: MigrationId) -> Result<bool, MigrationError> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE id = ?", self.ledger_table());

        let count: i64 = sqlx::query_scalar(&query)
            .bind(id.as_i64())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|err| MigrationError::operation("Failed to query ledger", err))?;

        Ok(count > 0)
    }

    async fn record_applied(&mut self, entry: &LedgerEntry) -> Result<(), MigrationError> {
        let query = format!(
            "INSERT INTO {} (id, name, checksum, applied_at) VALUES (?, ?, ?, ?)",
            self.ledger_table()
        );

        sqlx::query(&query)
            .bind(entry.id.as_i64())
            .bind(entry.name.clone())
            .bind(entry.checksum.clone())
            .bind(entry.applied_at.to_rfc3339())
            .execute(&mut *self.tx)
            .await
            .map_err(|err| MigrationError::operation("Failed to record ledger entry", err))?;

        Ok(())
    }

    async fn record_rolled_back(&mut self, id: MigrationId) -> Result<(), MigrationError> {
        let query = format!("DELETE FROM {} WHERE id = ?", self.ledger_table());

        let result = sqlx::query(&query)
            .bind(id.as_i64())
            .execute(&mut *self.tx)
            .await
            .map_err(|err| MigrationError::operation("Failed to remove ledger entry", err))?;

        if result.rows_affected() == 0 {
            return Err(MigrationError::NotApplied { id });
        }

        Ok(())
    }
}

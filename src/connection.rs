use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::any::{AnyConnectOptions, AnyPool, AnyPoolOptions};
use sqlx::ConnectOptions;

use crate::config::DatabaseConfig;

pub struct SqlxAnyConnection {
    pub pool: AnyPool,
}

#[async_trait]
pub trait DatabaseConnection: Sized {
    async fn new(config: &DatabaseConfig) -> Result<Self>;
}

#[async_trait]
impl DatabaseConnection for SqlxAnyConnection {
    async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut options = AnyConnectOptions::from_str(&config.url)
            .with_context(|| "Invalid database url")?;
        options.disable_statement_logging();

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(SqlxAnyConnection { pool })
    }
}

pub struct DatabaseConnectionFactory<C: DatabaseConnection> {
    config: DatabaseConfig,
    connection_type: std::marker::PhantomData<C>,
}

impl<C: DatabaseConnection> DatabaseConnectionFactory<C> {
    pub fn new(config: DatabaseConfig) -> Self {
        DatabaseConnectionFactory {
            config,
            connection_type: std::marker::PhantomData,
        }
    }

    pub async fn create_connection(&self) -> Result<C> {
        C::new(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_in_memory_sqlite() {
        let factory = DatabaseConnectionFactory::<SqlxAnyConnection>::new(DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        });

        let connection = factory.create_connection().await.unwrap();
        assert_eq!(connection.pool.any_kind(), sqlx::any::AnyKind::Sqlite);
    }

    #[tokio::test]
    async fn rejects_unknown_scheme() {
        let factory = DatabaseConnectionFactory::<SqlxAnyConnection>::new(DatabaseConfig {
            url: "oracle://localhost/app".to_string(),
            max_connections: 1,
        });

        assert!(factory.create_connection().await.is_err());
    }
}

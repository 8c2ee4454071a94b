use std::path::PathBuf;

use anyhow::{anyhow, Result};
use toml::Value;

use crate::store::sql_store::StoreOptions;

#[derive(Debug)]
pub(crate) struct Config {
    database: DatabaseConfig,
    settings: SettingsConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SettingsConfig {
    pub migrations_dir: PathBuf,
    pub ledger_table: String,
    pub lock_table: String,
    pub external_tables: Vec<String>,
    pub mappings_file: Option<PathBuf>,
}

impl SettingsConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            ledger_table: self.ledger_table.clone(),
            lock_table: self.lock_table.clone(),
        }
    }
}

impl Config {
    pub(crate) fn from_toml(config: Value) -> Result<Self> {
        let database = parse_database_config(
            config
                .get("database")
                .ok_or(anyhow!("Missing or invalid database settings"))?
                .clone(),
        )?;
        let settings = parse_settings_config(
            config
                .get("settings")
                .ok_or(anyhow!("Missing or invalid settings"))?
                .clone(),
        )?;

        Ok(Config { database, settings })
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn settings(&self) -> &SettingsConfig {
        &self.settings
    }
}

fn parse_database_config(config: Value) -> Result<DatabaseConfig> {
    let url = config
        .get("url")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid url"))?
        .to_string();

    let max_connections: u32 = match config.get("max_connections") {
        Some(value) => value
            .as_integer()
            .ok_or_else(|| anyhow!("Invalid max_connections"))?
            .try_into()?,
        None => 1,
    };

    if max_connections == 0 {
        return Err(anyhow!("max_connections must be at least 1"));
    }

    Ok(DatabaseConfig {
        url,
        max_connections,
    })
}

fn parse_settings_config(config: Value) -> Result<SettingsConfig> {
    let defaults = StoreOptions::default();

    let migrations_dir: PathBuf = config
        .get("migrations_dir")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing or invalid migrations_dir"))?
        .into();

    let ledger_table = optional_str(&config, "ledger_table")?
        .unwrap_or(defaults.ledger_table);

    let lock_table = optional_str(&config, "lock_table")?.unwrap_or(defaults.lock_table);

    let external_tables = match config.get("external_tables") {
        Some(value) => value
            .as_array()
            .ok_or_else(|| anyhow!("Invalid external_tables"))?
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| anyhow!("Invalid external table name {}", value))
            })
            .collect::<Result<Vec<String>>>()?,
        None => Vec::new(),
    };

    let mappings_file = optional_str(&config, "mappings_file")?.map(PathBuf::from);

    Ok(SettingsConfig {
        migrations_dir,
        ledger_table,
        lock_table,
        external_tables,
        mappings_file,
    })
}

fn optional_str(config: &Value, key: &str) -> Result<Option<String>> {
    config
        .get(key)
        .map(|value| {
            value
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("Invalid {}", key))
        })
        .transpose()
}

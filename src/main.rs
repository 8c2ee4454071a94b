#[macro_use]
extern crate log;

use std::io::Write;
use std::path::Path;
use std::{env, fs, process, thread};

use anyhow::{Context, Result};
use chrono::Local;
use env_logger::Env;
use structopt::StructOpt;
use toml::Value;

use crate::args::{Args, Command};
use crate::common::errors::MigrationError;
use crate::common::helpers::print_error_chain;
use crate::config::Config;
use crate::connection::{DatabaseConnectionFactory, SqlxAnyConnection};
use crate::definition::catalog::MigrationSet;
use crate::definition::loader::load_migrations;
use crate::mappings::Mappings;
use crate::migrate::runner::MigrationRunner;
use crate::store::sql_store::SqlStore;

mod args;
mod common;
mod config;
mod connection;
mod definition;
mod ledger;
mod mappings;
mod migrate;
mod store;
#[cfg(test)]
mod test_support;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(errors) = init().await {
        print_error_chain(&errors);
        if let Some(id) = domain_error(&errors).and_then(MigrationError::migration_id) {
            error!("Stopped at migration {}", id);
        }
        process::exit(exit_code(&errors));
    }
}

async fn init() -> Result<()> {
    let options = Args::from_args();

    initialize_logger(options.verbose, options.quiet);

    let config = load_config(&options.config).context("Failed to load config file")?;
    let mappings = load_mappings(config.settings().mappings_file.as_deref())
        .context("Failed to load mappings file")?;

    debug!("Total mappings loaded: {}", mappings.len());

    let migrations = load_migrations(&config.settings().migrations_dir)?;
    let migrations = MigrationSet::new(migrations, &config.settings().external_tables)
        .context("Migration definitions are inconsistent")?;

    if migrations.is_empty() {
        warn!(
            "No migrations found in {}",
            config.settings().migrations_dir.display()
        );
    }

    info!("Initializing connection...");

    let factory = DatabaseConnectionFactory::<SqlxAnyConnection>::new(config.database().clone());
    let connection = factory.create_connection().await?;

    let store = SqlStore::new(connection.pool, mappings, config.settings().store_options())?;
    info!("Connected to {} database", store.dialect());

    let runner = MigrationRunner::new(store, migrations);
    debug!("Total migrations loaded: {}", runner.migrations().len());

    run_command(&runner, options.command).await
}

async fn run_command(runner: &MigrationRunner, command: Command) -> Result<()> {
    match command {
        Command::Up { to } => {
            let outcome = runner.up(to).await.context("Migration failed")?;
            info!(
                "Applied {} migrations, {} recorded in total",
                outcome.results.len(),
                outcome.ledger.len()
            );
        }
        Command::Down { to } => {
            let outcome = runner.down(to).await.context("Rollback failed")?;
            info!(
                "Rolled back {} migrations, {} still applied",
                outcome.results.len(),
                outcome.ledger.len()
            );
        }
        Command::Status => {
            let report = runner.status().await?;
            print!("{}", report);
            info!(
                "{} applied, {} pending, {} missing",
                report.applied_ids().len(),
                report.pending_ids().len(),
                report.missing_ids().len()
            );
        }
        Command::Schema => {
            for table in runner.store().describe_schema().await? {
                println!("{}", table.name);
                for column in &table.columns {
                    println!(
                        "  {:<32} {:<20}{}{}",
                        column.name,
                        column.sql_type,
                        if column.not_null { " NOT NULL" } else { "" },
                        if column.primary_key { " PRIMARY KEY" } else { "" }
                    );
                }
                for foreign_key in &table.foreign_keys {
                    println!(
                        "  {} -> {}({})",
                        foreign_key.column,
                        foreign_key.to_table,
                        foreign_key.to_column.as_deref().unwrap_or("?")
                    );
                }
            }
        }
        Command::Unlock => match runner.store().force_unlock().await? {
            Some(owner) => info!("Released migration lock held by {}", owner),
            None => info!("Migration lock was not held"),
        },
    }

    Ok(())
}

fn domain_error(errors: &anyhow::Error) -> Option<&MigrationError> {
    errors
        .chain()
        .find_map(|error| error.downcast_ref::<MigrationError>())
}

/// Exit code of the first domain error in the chain, 1 otherwise.
fn exit_code(errors: &anyhow::Error) -> i32 {
    domain_error(errors)
        .map(MigrationError::exit_code)
        .unwrap_or(1)
}

fn initialize_logger(verbose: bool, quiet: bool) {
    if quiet {
        env::set_var("RUST_LOG", "warn");
    } else {
        env::set_var("RUST_LOG", if verbose { "debug" } else { "info" });
    }

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .filter_module("sqlx", log::LevelFilter::Error)
        .format(|buf, record| {
            let timestamp = Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "{} {:<5} [{}] - {}",
                timestamp,
                record.level(),
                thread::current().name().unwrap_or("<unnamed>"),
                record.args()
            )
        })
        .init();
}

fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = content.parse::<Value>()?;
    let config = Config::from_toml(value)?;
    Ok(config)
}

/// Built-in mappings, overridden by the optional mappings file.
fn load_mappings(path: Option<&Path>) -> Result<Mappings> {
    let defaults = Mappings::defaults();

    let path = match path {
        Some(path) => path,
        None => return Ok(defaults),
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = content.parse::<Value>()?;
    let overrides = Mappings::from_toml(value)?;
    Ok(defaults.merge(overrides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::id;

    #[test]
    fn exit_code_follows_domain_error_through_context() {
        let error = anyhow::Error::new(MigrationError::AlreadyApplied { id: id(1) })
            .context("Migration failed");
        assert_eq!(exit_code(&error), 3);

        let error = anyhow::anyhow!("Failed to load config file");
        assert_eq!(exit_code(&error), 1);
    }

    #[test]
    fn failed_migration_id_is_found_through_context() {
        let error = anyhow::Error::new(MigrationError::NotApplied { id: id(7) })
            .context("Rollback failed");
        assert_eq!(domain_error(&error).and_then(MigrationError::migration_id), Some(id(7)));

        let error = anyhow::Error::new(MigrationError::invalid("duplicate identifier"))
            .context("Migration definitions are inconsistent");
        assert_eq!(domain_error(&error).and_then(MigrationError::migration_id), None);
    }

    #[test]
    fn missing_mappings_file_uses_defaults() {
        let mappings = load_mappings(None).unwrap();
        assert_eq!(mappings.len(), Mappings::defaults().len());
    }
}

use std::path::PathBuf;

use structopt::clap::AppSettings;
use structopt::StructOpt;

use crate::definition::migration::MigrationId;

#[derive(Debug, StructOpt)]
#[structopt(
name = "migrate",
version = env ! ("CARGO_PKG_VERSION"),
about = "Applies and rolls back versioned schema migrations, recording each one in a ledger table of the target database.",
setting = AppSettings::ColoredHelp,
)]
pub struct Args {
    /// Activate verbose mode
    #[structopt(short = "v", long = "verbose", global = true)]
    pub verbose: bool,

    /// Activate quiet mode
    #[structopt(short = "q", long = "quiet", global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[structopt(
        short = "c",
        long = "config",
        default_value = "config.toml",
        parse(from_os_str),
        global = true
    )]
    pub config: PathBuf,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Apply pending migrations
    Up {
        /// Stop after this migration identifier
        #[structopt(long = "to")]
        to: Option<MigrationId>,
    },

    /// Roll back applied migrations, the latest one by default
    Down {
        /// Roll back every migration newer than this identifier
        #[structopt(long = "to")]
        to: Option<MigrationId>,
    },

    /// List applied and pending migrations
    Status,

    /// Print the live tables and columns
    Schema,

    /// Release a migration lock left behind by a crashed run
    Unlock,
}

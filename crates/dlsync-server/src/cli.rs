//! Command-line interface definition

use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dlsync - tester datalog synchronization server
#[derive(Parser, Debug)]
#[command(name = "dlsync-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the CLI reference as Markdown and exit
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daily sync scheduler until interrupted
    Serve {
        /// Daily sync time (HH:MM or HH:MM:SS, local time), overrides DLSYNC_SYNC_AT
        #[arg(long, value_parser = parse_time)]
        sync_at: Option<NaiveTime>,
    },

    /// Run one sync pass over the registered stations now
    SyncOnce {
        /// Open the sync switch first
        #[arg(short, long)]
        force: bool,
    },

    /// Parse one datalog and print the record as JSON
    Parse {
        /// Mirrored datalog file
        file: PathBuf,

        /// Mirror root the datalog layout starts from
        #[arg(long)]
        prefix: PathBuf,

        /// Tester family (J750, ULTRA_FLEX, ADV93000)
        #[arg(long, default_value = "J750")]
        system: String,

        /// Station name stamped on the record
        #[arg(long, default_value = "local")]
        station: String,

        /// Path of an earlier copy of this datalog
        #[arg(long)]
        duplicate: Option<String>,
    },

    /// Push files to every enabled backup target, then delete them locally
    Backup {
        /// Station folder to place the files in
        #[arg(long)]
        station: String,

        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    crate::config::parse_time_of_day(raw).ok_or_else(|| format!("invalid time of day: {}", raw))
}

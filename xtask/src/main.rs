//! Build automation tasks for dlsync
//!
//! - Generating the CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for dlsync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<dlsync_server::cli::Cli>();

    let content = format!(
        r#"# dlsync-server CLI Reference

Generated from the CLI source code on {}.

## Overview

`dlsync-server` mirrors tester datalogs from station storage to central
storage, records each log's pass/fail outcome in PostgreSQL, archives every
station run, and copies the archives to backup hosts.

## Quick Start

```bash
# Run the daily scheduler (sync time from DLSYNC_SYNC_AT, default 02:00)
dlsync-server serve

# One pass right now, even if the sync switch starts closed
dlsync-server sync-once --force

# Check how a single datalog parses
dlsync-server parse /data/J750-01/2910_DATA/202301/JD/20230105_ab_ZS/1234.txt \
  --prefix /data/J750-01 --system J750 --station J750-01
```

## Commands

{}

## Environment Variables

- `DATABASE_URL` - PostgreSQL connection string
- `DLSYNC_SYNC_AT` - Daily sync time, `HH:MM[:SS]` local time
- `DLSYNC_SYNC_ENABLED` / `DLSYNC_BACKUP_ENABLED` - Initial switch states
- `DLSYNC_MAX_WORKERS` - Stations synced in parallel (default: 8)
- `DLSYNC_TASK_TIMEOUT_MINUTES` - Pass timeout (default: 60)
- `DLSYNC_CONFLICT_LOCAL_PATH` / `DLSYNC_CONFLICT_VOLUME_PATH` - Conflict area roots
- `DLSYNC_ZIP_SPLIT_SIZE` - Archive volume size in bytes, decimal or `0x` hex
- `DLSYNC_COMPRESSION_LEVEL` - `0` store, `-1` default deflate, `1`-`9`
- `DLSYNC_LOG_LEVEL`, `DLSYNC_LOG_FORMAT`, `DLSYNC_LOG_OUTPUT` - Logging
- `RUST_LOG` - Filter directives (e.g., `dlsync_server=debug`)

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}

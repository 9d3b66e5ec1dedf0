//! dlsync server - main entry point

use anyhow::Context;
use clap::Parser;
use dlsync_common::logging::{init_logging, LogConfig, LogLevel};
use dlsync_common::types::SystemFamily;
use dlsync_server::app::App;
use dlsync_server::cli::{Cli, Commands};
use dlsync_server::config::Config;
use dlsync_server::parser::LogParser;
use dlsync_server::scheduler::SyncScheduler;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("dlsync-server")
        .filter_directives("dlsync_server=debug,sqlx=warn")
        .build();

    // DLSYNC_LOG_* variables take precedence
    let log_config = if std::env::vars().any(|(key, _)| key.starts_with("DLSYNC_LOG_")) {
        LogConfig::from_env().unwrap_or(log_config)
    } else {
        log_config
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        },
    };

    if let Err(e) = execute_command(command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve { sync_at } => serve(sync_at).await,
        Commands::SyncOnce { force } => sync_once(force).await,
        Commands::Parse {
            file,
            prefix,
            system,
            station,
            duplicate,
        } => {
            let system: SystemFamily = system.parse()?;
            let parser = LogParser::new().context("Failed to compile datalog grammar")?;
            let record = parser
                .parse(&file, duplicate.as_deref(), &prefix, system, &station)
                .with_context(|| {
                    format!("{} does not match the datalog layout", file.display())
                })?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        },
        Commands::Backup { station, files } => {
            let app = App::connect(Config::load()?).await?;
            if !app.backup.is_enabled() {
                warn!("Backup switch is closed (DLSYNC_BACKUP_ENABLED=false), nothing sent");
            }
            let report = app.backup.backup(&files, &station).await;
            app.backup.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failed_targets > 0 {
                anyhow::bail!("{} backup target(s) failed", report.failed_targets);
            }
            Ok(())
        },
    }
}

async fn serve(sync_at: Option<chrono::NaiveTime>) -> anyhow::Result<()> {
    info!("Starting dlsync server");

    let config = Config::load()?;
    let at = sync_at.unwrap_or(config.schedule.sync_at);
    let app = App::connect(config).await?;

    let scheduler = SyncScheduler::new(app.orchestrator.clone(), at);
    let handle = scheduler.start();
    info!(sync_at = %scheduler.schedule_time(), "Scheduler started");

    shutdown_signal().await;

    handle.abort();
    app.backup.shutdown().await;
    app.store.pool().close().await;
    info!("Server shut down gracefully");
    Ok(())
}

async fn sync_once(force: bool) -> anyhow::Result<()> {
    let app = App::connect(Config::load()?).await?;
    if force {
        app.switches.open_sync();
    }

    let report = app.orchestrator.run_scheduled_pass().await;
    app.backup.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failures() > 0 {
        anyhow::bail!(
            "{} file(s) failed, {} connection(s) timed out",
            report.files_failed,
            report.timed_out
        );
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

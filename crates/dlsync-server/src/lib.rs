//! dlsync Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Mirrors tester datalogs from station storage to central storage, parses
//! their pass/fail outcome, archives each station's run, and pushes the
//! archives to backup hosts.
//!
//! # Overview
//!
//! - **Sync**: [`sync::SyncOrchestrator`] runs one bounded-pool task per
//!   enabled station and waits for them up to a timeout
//! - **Remote access**: [`remote::RemoteAdapter`] over SFTP, a mounted SMB
//!   share, or explicit SMB sessions
//! - **Archives**: [`archive::ArchiveBuilder`] writes PKZIP split archives
//! - **Parsing**: [`parser::LogParser`] turns a mirrored datalog into a
//!   [`dlsync_common::types::ResultRecord`]
//! - **Persistence**: [`gateway::PersistenceGateway`] marks duplicates and
//!   writes records through a [`store::ResultStore`]
//! - **Backup**: [`backup::BackupPropagator`] copies archives to every
//!   enabled backup target
//! - **Scheduling**: [`scheduler::SyncScheduler`] fires a pass daily
//!
//! # Example
//!
//! ```no_run
//! use dlsync_server::{app::App, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = App::connect(Config::load()?).await?;
//!     app.switches.open_sync();
//!     let report = app.orchestrator.run_scheduled_pass().await;
//!     println!("{} files, {} failures", report.files_transferred, report.failures());
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod flags;
pub mod gateway;
pub mod parser;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use error::{SyncError, SyncResult};

//! Sync orchestration
//!
//! A pass fans out one task per enabled connection onto a bounded pool.
//! Each task runs [`connection::sync_connection`] to completion; the pass
//! waits for all of them up to the task timeout and aborts the rest.
//! An aborted connection's partial archive is removed when the builder is
//! dropped. Its records are lost unless their insert had already started;
//! a started insert runs to completion outside the aborted task.

pub mod conflict;
pub mod connection;

pub use connection::{ConnectionReport, ConnectionStatus};

use crate::backup::BackupPropagator;
use crate::config::{ArchiveSettings, SyncSettings};
use crate::flags::Switch;
use crate::gateway::PersistenceGateway;
use crate::parser::LogParser;
use crate::remote::AdapterFactory;
use crate::store::ConnectionRegistry;
use chrono::Local;
use serde::Serialize;
use dlsync_common::types::ConnectionDescriptor;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Aggregate outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// The sync switch was closed when the pass was requested
    pub disabled: bool,
    pub started: usize,
    pub completed: usize,
    /// Disabled connections plus runs that never got past connect/list
    pub skipped: usize,
    pub timed_out: usize,
    pub panicked: usize,
    pub files_listed: usize,
    pub files_transferred: usize,
    pub files_failed: usize,
    pub records_persisted: u64,
    pub remote_cleared: usize,
}

impl PassReport {
    /// Failed file transfers plus connections cut off by the timeout
    pub fn failures(&self) -> usize {
        self.files_failed + self.timed_out
    }

    fn absorb(&mut self, connection: ConnectionReport) {
        match connection.status {
            ConnectionStatus::Completed => self.completed += 1,
            _ => self.skipped += 1,
        }
        self.files_listed += connection.listed;
        self.files_transferred += connection.transferred;
        self.files_failed += connection.failed;
        self.records_persisted += connection.persisted;
        if connection.remote_cleared {
            self.remote_cleared += 1;
        }
    }
}

/// Collaborators shared by every connection task.
#[derive(Clone)]
pub struct SyncServices {
    pub adapters: Arc<dyn AdapterFactory>,
    pub gateway: PersistenceGateway,
    pub backup: BackupPropagator,
    pub connections: Arc<dyn ConnectionRegistry>,
}

pub(crate) struct PassContext {
    pub(crate) settings: SyncSettings,
    pub(crate) archive: ArchiveSettings,
    pub(crate) parser: Arc<LogParser>,
    pub(crate) adapters: Arc<dyn AdapterFactory>,
    pub(crate) gateway: PersistenceGateway,
    pub(crate) backup: BackupPropagator,
}

pub struct SyncOrchestrator {
    ctx: Arc<PassContext>,
    connections: Arc<dyn ConnectionRegistry>,
    switch: Switch,
}

impl SyncOrchestrator {
    pub fn new(
        settings: SyncSettings,
        archive: ArchiveSettings,
        parser: LogParser,
        services: SyncServices,
        switch: Switch,
    ) -> Self {
        Self {
            ctx: Arc::new(PassContext {
                settings,
                archive,
                parser: Arc::new(parser),
                adapters: services.adapters,
                gateway: services.gateway,
                backup: services.backup,
            }),
            connections: services.connections,
            switch,
        }
    }

    pub fn switch(&self) -> &Switch {
        &self.switch
    }

    /// Load connections from the registry and run a pass over them.
    pub async fn run_scheduled_pass(&self) -> PassReport {
        if !self.switch.is_open() {
            info!("Sync disabled, scheduled pass skipped");
            return PassReport {
                disabled: true,
                ..PassReport::default()
            };
        }

        match self.connections.list_connections().await {
            Ok(connections) => self.run_sync_pass(connections).await,
            Err(e) => {
                error!(error = %e, "Failed to load station connections");
                PassReport::default()
            },
        }
    }

    /// Sync every enabled connection, at most `max_workers` at a time.
    pub async fn run_sync_pass(&self, connections: Vec<ConnectionDescriptor>) -> PassReport {
        let mut report = PassReport::default();
        if !self.switch.is_open() {
            info!("Sync disabled, pass skipped");
            report.disabled = true;
            return report;
        }

        let start = Instant::now();
        let settings = &self.ctx.settings;
        info!(
            connections = connections.len(),
            workers = settings.max_workers,
            "Starting sync pass"
        );

        if let Err(e) = tokio::fs::create_dir_all(&settings.archive_dir).await {
            warn!(dir = %settings.archive_dir.display(), error = %e, "Failed to create archive directory");
        }

        let run_date = Local::now().date_naive();
        let semaphore = Arc::new(Semaphore::new(settings.max_workers.max(1)));
        let mut tasks = JoinSet::new();

        for connection in connections {
            if !connection.sync_enabled {
                report.skipped += 1;
                continue;
            }
            report.started += 1;

            let ctx = self.ctx.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                connection::sync_connection(&ctx, connection, run_date).await
            });
        }

        let collected = tokio::time::timeout(settings.task_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(connection) => report.absorb(connection),
                    Err(e) => {
                        error!(error = %e, "Connection task panicked");
                        report.panicked += 1;
                    },
                }
            }
        })
        .await;

        if collected.is_err() {
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(connection) => report.absorb(connection),
                    Err(e) if e.is_cancelled() => report.timed_out += 1,
                    Err(e) => {
                        error!(error = %e, "Connection task panicked");
                        report.panicked += 1;
                    },
                }
            }
            error!(
                unfinished = report.timed_out,
                timeout_secs = settings.task_timeout.as_secs(),
                "Sync pass timed out, unfinished connections cancelled"
            );
        }

        info!(
            completed = report.completed,
            skipped = report.skipped,
            timed_out = report.timed_out,
            files = report.files_transferred,
            failures = report.failures(),
            records = report.records_persisted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sync pass finished"
        );
        report
    }
}

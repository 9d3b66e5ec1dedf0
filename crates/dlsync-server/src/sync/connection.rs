//! One station's sync run: list, mirror, parse, archive, back up, clear, persist.

use super::conflict::{TargetPaths, TargetResolver};
use super::PassContext;
use crate::archive::{discard_volumes, ArchiveBuilder};
use crate::remote::RemoteAdapter;
use chrono::NaiveDate;
use dlsync_common::types::{ConnectionDescriptor, ResultRecord, SystemFamily};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How far a connection run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Completed,
    UnknownSystem,
    ConnectFailed,
    /// Listing failed or found no files
    NothingListed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub station: String,
    pub status: ConnectionStatus,
    pub listed: usize,
    pub transferred: usize,
    pub failed: usize,
    pub records: usize,
    pub persisted: u64,
    pub archive_volumes: usize,
    pub remote_cleared: bool,
}

impl ConnectionReport {
    fn new(station: &str, status: ConnectionStatus) -> Self {
        Self {
            station: station.to_string(),
            status,
            listed: 0,
            transferred: 0,
            failed: 0,
            records: 0,
            persisted: 0,
            archive_volumes: 0,
            remote_cleared: false,
        }
    }
}

/// Progress is logged every `step` files
fn progress_step(total: usize) -> usize {
    if total > 1000 {
        1000
    } else {
        100
    }
}

pub(crate) async fn sync_connection(
    ctx: &PassContext,
    connection: ConnectionDescriptor,
    run_date: NaiveDate,
) -> ConnectionReport {
    let station = connection.station_name.clone();
    let start = Instant::now();

    let family = match connection.system_family() {
        Ok(family) => family,
        Err(e) => {
            error!(station = %station, system = %connection.system, error = %e, "Unknown system family, skipping");
            return ConnectionReport::new(&station, ConnectionStatus::UnknownSystem);
        },
    };

    let mut adapter = ctx.adapters.station_adapter(&connection, family);
    info!(station = %station, remote = %adapter.describe(), "Starting connection sync");

    if let Err(e) = adapter.connect().await {
        warn!(station = %station, host = %connection.host, error = %e, "Failed to connect to station");
        return ConnectionReport::new(&station, ConnectionStatus::ConnectFailed);
    }

    let files = match adapter.list_recursive(&connection.remote_prefix).await {
        Ok(files) if !files.is_empty() => files,
        Ok(_) => {
            info!(station = %station, "No files to sync");
            adapter.disconnect().await;
            return ConnectionReport::new(&station, ConnectionStatus::NothingListed);
        },
        Err(e) => {
            warn!(station = %station, error = %e, "Failed to list remote files");
            adapter.disconnect().await;
            return ConnectionReport::new(&station, ConnectionStatus::NothingListed);
        },
    };

    let mut report = ConnectionReport::new(&station, ConnectionStatus::Completed);
    report.listed = files.len();
    info!(station = %station, files = files.len(), "Remote files listed");

    let mut archive = match ArchiveBuilder::create(&ctx.settings.archive_dir, &station, run_date, &ctx.archive) {
        Ok(builder) => Some(builder),
        Err(e) => {
            error!(station = %station, error = %e, "Failed to create archive, continuing without it");
            None
        },
    };

    let mut resolver = TargetResolver::new(&connection, &ctx.settings, run_date);
    let mut records: Vec<ResultRecord> = Vec::new();
    let step = progress_step(files.len());

    for (index, file) in files.iter().enumerate() {
        let target = resolver.resolve(&file.relative);

        match adapter.download(&file.path, &target.local).await {
            Ok(bytes) => {
                debug!(from = %file.path, to = %target.local.display(), bytes, "Downloaded");
                report.transferred += 1;

                let (record, builder) =
                    parse_and_archive(ctx, archive.take(), &target, &file.relative, family, &station).await;
                archive = builder;

                if let Some(mut record) = record {
                    record.path = target.volume;
                    records.push(record);
                }
            },
            Err(e) => {
                report.failed += 1;
                warn!(from = %file.path, to = %target.local.display(), error = %e, "Transfer failed");
            },
        }

        if (index + 1) % step == 0 {
            info!(station = %station, "{} / {}", index + 1, files.len());
        }
    }

    if let Some(builder) = archive {
        let volumes = finish_archive(builder).await;
        report.archive_volumes = volumes.len();
        hand_off_archive(ctx, volumes, &station).await;
    }

    if report.failed == 0 {
        report.remote_cleared = clear_remote(&*adapter, &connection.remote_prefix, &station).await;
    }
    adapter.disconnect().await;

    report.records = records.len();
    // Detached so a pass timeout cannot cut the batch off halfway; the
    // gateway logs the rows it wrote either way
    let gateway = ctx.gateway.clone();
    let insert = tokio::spawn(async move { gateway.insert_batch(records).await });
    report.persisted = match insert.await {
        Ok(persisted) => persisted.inserted,
        Err(e) => {
            error!(station = %station, error = %e, "Record insert task failed");
            0
        },
    };

    info!(
        station = %station,
        transferred = report.transferred,
        failures = report.failed,
        records = report.records,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Connection sync finished"
    );
    report
}

/// Parse the mirrored file and append it to the archive off the async runtime.
/// The builder is handed back for the next file.
async fn parse_and_archive(
    ctx: &PassContext,
    mut archive: Option<ArchiveBuilder>,
    target: &TargetPaths,
    entry_name: &str,
    family: SystemFamily,
    station: &str,
) -> (Option<ResultRecord>, Option<ArchiveBuilder>) {
    let parser = ctx.parser.clone();
    let local = target.local.clone();
    let local_prefix = target.local_prefix.clone();
    let duplicate_of = target.duplicate_of.clone();
    let entry_name = entry_name.to_string();
    let station = station.to_string();

    let joined = tokio::task::spawn_blocking(move || {
        let record = parser.parse(&local, duplicate_of.as_deref(), &local_prefix, family, &station);
        if let Some(builder) = archive.as_mut() {
            if let Err(e) = builder.append_file(&entry_name, &local) {
                warn!(path = %local.display(), error = %e, "Failed to add file to archive");
            }
        }
        (record, archive)
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Parse task failed, archive dropped");
            (None, None)
        },
    }
}

async fn finish_archive(builder: ArchiveBuilder) -> Vec<PathBuf> {
    let name = builder.name().to_string();
    match tokio::task::spawn_blocking(move || builder.finish()).await {
        Ok(Ok(volumes)) => volumes,
        Ok(Err(e)) => {
            error!(archive = %name, error = %e, "Failed to close archive");
            Vec::new()
        },
        Err(e) => {
            error!(archive = %name, error = %e, "Archive close task failed");
            Vec::new()
        },
    }
}

/// Back the archive up, or schedule its removal when backup is off.
async fn hand_off_archive(ctx: &PassContext, volumes: Vec<PathBuf>, station: &str) {
    if volumes.is_empty() {
        return;
    }

    // The switch is read once, inside backup; a skipped report means the
    // volumes are still ours
    if !ctx.backup.backup(&volumes, station).await.skipped {
        return;
    }

    let delay = ctx.settings.archive_discard_delay;
    if delay.is_zero() {
        discard_volumes(&volumes);
    } else {
        debug!(station, delay_secs = delay.as_secs(), "Backup disabled, archive removal scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            discard_volumes(&volumes);
        });
    }
}

/// Delete the remote tree and recreate its empty root.
async fn clear_remote(adapter: &dyn RemoteAdapter, root: &str, station: &str) -> bool {
    info!(station, root, "Removing synced remote files");
    if let Err(e) = adapter.remove_tree(root).await {
        error!(station, root, error = %e, "Failed to remove remote tree");
        return false;
    }
    if let Err(e) = adapter.create_dir(root).await {
        error!(station, root, error = %e, "Failed to recreate remote root");
        return false;
    }
    true
}

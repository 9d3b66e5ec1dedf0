//! Shared fixtures for dlsync-server integration tests
//!
//! Stations and backup hosts are plain directories: each host gets
//! `<root>/<host>/` and is reached through [`LocalMountAdapter`], optionally
//! wrapped in [`FlakyAdapter`] to inject failures and delays.

#![allow(dead_code)]

use async_trait::async_trait;
use dlsync_common::types::{
    BackupTargetDescriptor, ConnectionDescriptor, OsFamily, RecordIdentity, ResultRecord,
    SystemFamily,
};
use dlsync_server::backup::BackupPropagator;
use dlsync_server::config::{ArchiveSettings, SyncSettings};
use dlsync_server::flags::Switches;
use dlsync_server::gateway::PersistenceGateway;
use dlsync_server::parser::LogParser;
use dlsync_server::remote::local::LocalMountAdapter;
use dlsync_server::remote::{AdapterFactory, RemoteAdapter, RemoteError, RemoteFile};
use dlsync_server::error::SyncResult;
use dlsync_server::store::{MemoryStore, ResultStore};
use dlsync_server::sync::{SyncOrchestrator, SyncServices};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const BIN_PASS: &str = "Datalog report\n   Site   Sort   Bin\n   ----   ----   ---\n     0      1      1\n";
pub const BIN_FAIL: &str = "Datalog report\n   Site   Sort   Bin\n   ----   ----   ---\n     0      5      2\n";

/// Initialize tracing output for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dlsync_server=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fake transports
// ============================================================================

/// [`LocalMountAdapter`] with injectable faults.
pub struct FlakyAdapter {
    inner: LocalMountAdapter,
    fail_downloads_containing: Option<String>,
    connect_delay: Duration,
}

#[async_trait]
impl RemoteAdapter for FlakyAdapter {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn connect(&mut self) -> Result<(), RemoteError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.inner.connect().await
    }

    async fn list_recursive(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        self.inner.list_recursive(root).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, RemoteError> {
        if let Some(marker) = &self.fail_downloads_containing {
            if remote.contains(marker.as_str()) {
                return Err(RemoteError::Protocol(format!("injected failure for {}", remote)));
            }
        }
        self.inner.download(remote, local).await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        self.inner.upload(local, remote).await
    }

    async fn remove_tree(&self, root: &str) -> Result<(), RemoteError> {
        self.inner.remove_tree(root).await
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        self.inner.create_dir(path).await
    }

    async fn disconnect(&mut self) {
        self.inner.disconnect().await
    }
}

/// [`MemoryStore`] whose inserts take `delay` to land.
pub struct SlowInsertStore {
    pub inner: MemoryStore,
    pub delay: Duration,
}

#[async_trait]
impl ResultStore for SlowInsertStore {
    async fn find_by_identity(
        &self,
        identities: &[RecordIdentity],
    ) -> SyncResult<HashMap<RecordIdentity, String>> {
        self.inner.find_by_identity(identities).await
    }

    async fn insert_many(&self, records: &[ResultRecord]) -> SyncResult<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_many(records).await
    }
}

/// Every host is a directory under `stations` or `backups`.
#[derive(Default)]
pub struct DirectoryAdapters {
    pub stations: PathBuf,
    pub backups: PathBuf,
    pub fail_downloads_containing: Option<String>,
    pub connect_delay: Duration,
    /// Backup host whose connect takes the given time
    pub slow_backup_host: Option<(String, Duration)>,
}

impl AdapterFactory for DirectoryAdapters {
    fn station_adapter(
        &self,
        connection: &ConnectionDescriptor,
        _family: SystemFamily,
    ) -> Box<dyn RemoteAdapter> {
        Box::new(FlakyAdapter {
            inner: LocalMountAdapter::new(self.stations.join(&connection.host)),
            fail_downloads_containing: self.fail_downloads_containing.clone(),
            connect_delay: self.connect_delay,
        })
    }

    fn backup_adapter(
        &self,
        target: &BackupTargetDescriptor,
        _os: OsFamily,
    ) -> Box<dyn RemoteAdapter> {
        let connect_delay = match &self.slow_backup_host {
            Some((host, delay)) if *host == target.host => *delay,
            _ => Duration::ZERO,
        };
        Box::new(FlakyAdapter {
            inner: LocalMountAdapter::new(self.backups.join(&target.host)),
            fail_downloads_containing: None,
            connect_delay,
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn connection(id: i64, host: &str, station: &str, system: &str, local_prefix: &Path) -> ConnectionDescriptor {
    ConnectionDescriptor {
        id,
        host: host.to_string(),
        port: 445,
        username: "operator".to_string(),
        password: "secret".to_string(),
        remote_prefix: "/datalog".to_string(),
        local_prefix: local_prefix.to_string_lossy().into_owned(),
        volume_prefix: Some("/vol".to_string()),
        system: system.to_string(),
        station_name: station.to_string(),
        sync_enabled: true,
    }
}

pub fn backup_target(id: i64, host: &str, os: &str) -> BackupTargetDescriptor {
    BackupTargetDescriptor {
        id,
        host: host.to_string(),
        port: 22,
        username: "backup".to_string(),
        password: "secret".to_string(),
        backup_prefix: "/archive".to_string(),
        os: os.to_string(),
        sync_enabled: true,
        compression_level: None,
    }
}

/// Write `content` to `<stations>/<host>/datalog/<relative>`.
pub fn put_remote_file(stations: &Path, host: &str, relative: &str, content: &str) -> PathBuf {
    let path = stations.join(host).join("datalog").join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// All regular files below `root`, relative and `/`-separated, sorted.
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

/// A complete sync environment rooted in one temp directory.
pub struct SyncHarness {
    pub temp: TempDir,
    pub stations: PathBuf,
    pub backups: PathBuf,
    pub mirror: PathBuf,
    pub conflict: PathBuf,
    pub archive_dir: PathBuf,
    pub store: MemoryStore,
    pub switches: Switches,
}

impl SyncHarness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let harness = Self {
            stations: root.join("stations"),
            backups: root.join("backups"),
            mirror: root.join("mirror"),
            conflict: root.join("conflict"),
            archive_dir: root.join("archives"),
            temp,
            store: MemoryStore::new(),
            switches: Switches::new(true, true),
        };
        fs::create_dir_all(&harness.stations).unwrap();
        fs::create_dir_all(&harness.backups).unwrap();
        harness
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            conflict_local_path: self.conflict.clone(),
            conflict_volume_path: "/vol/conflict".to_string(),
            task_timeout: Duration::from_secs(60),
            max_workers: 8,
            archive_dir: self.archive_dir.clone(),
            archive_discard_delay: Duration::ZERO,
        }
    }

    pub fn adapters(&self) -> DirectoryAdapters {
        DirectoryAdapters {
            stations: self.stations.clone(),
            backups: self.backups.clone(),
            ..DirectoryAdapters::default()
        }
    }

    pub fn orchestrator(&self, settings: SyncSettings, adapters: DirectoryAdapters) -> SyncOrchestrator {
        self.orchestrator_with_results(settings, adapters, Arc::new(self.store.clone()))
    }

    /// Like [`orchestrator`](Self::orchestrator) but records go to `results`.
    pub fn orchestrator_with_results(
        &self,
        settings: SyncSettings,
        adapters: DirectoryAdapters,
        results: Arc<dyn ResultStore>,
    ) -> SyncOrchestrator {
        let adapters: Arc<dyn AdapterFactory> = Arc::new(adapters);
        let shared = Arc::new(self.store.clone());
        let backup = BackupPropagator::new(shared.clone(), adapters.clone(), self.switches.backup.clone());

        SyncOrchestrator::new(
            settings,
            ArchiveSettings {
                split_size: 1 << 20,
                compression_level: -1,
            },
            LogParser::new().unwrap(),
            SyncServices {
                adapters,
                gateway: PersistenceGateway::new(results),
                backup,
                connections: shared,
            },
            self.switches.sync.clone(),
        )
    }

    /// Where a station's files land below the shared mirror prefix
    pub fn mirror_for(&self, station: &str) -> PathBuf {
        self.mirror.join(station)
    }
}

//! Pushes finished archives to every enabled backup target.

use crate::flags::Switch;
use crate::remote::{join_remote, AdapterFactory, RemoteAdapter};
use crate::store::BackupTargetRegistry;
use dlsync_common::types::BackupTargetDescriptor;
use futures::future::join_all;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one [`BackupPropagator::backup`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    /// The backup switch was closed; nothing was sent or deleted
    pub skipped: bool,
    /// Enabled targets that received every file
    pub targets: usize,
    pub failed_targets: usize,
    pub uploaded: usize,
    pub failed_uploads: usize,
}

type Session = Arc<Mutex<Box<dyn RemoteAdapter>>>;

struct Inner {
    registry: Arc<dyn BackupTargetRegistry>,
    adapters: Arc<dyn AdapterFactory>,
    switch: Switch,
    /// Open sessions keyed by target, kept until shutdown or a failure
    sessions: Mutex<HashMap<String, Session>>,
}

/// Cheap to clone; clones share sessions and the switch.
#[derive(Clone)]
pub struct BackupPropagator {
    inner: Arc<Inner>,
}

fn session_key(target: &BackupTargetDescriptor) -> String {
    format!("{}@{}:{}", target.id, target.host, target.port)
}

impl BackupPropagator {
    pub fn new(
        registry: Arc<dyn BackupTargetRegistry>,
        adapters: Arc<dyn AdapterFactory>,
        switch: Switch,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                adapters,
                switch,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.switch.is_open()
    }

    /// Copy `files` to `<target prefix>/<station>/` on every enabled target,
    /// then delete the local files whatever the outcome.
    pub async fn backup(&self, files: &[PathBuf], station: &str) -> BackupReport {
        let mut report = BackupReport::default();
        if !self.inner.switch.is_open() {
            debug!(station, "Backup disabled, skipping");
            report.skipped = true;
            return report;
        }

        let targets = match self.inner.registry.list_backup_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(station, error = %e, "Failed to load backup targets");
                Vec::new()
            },
        };

        for target in targets.iter().filter(|t| t.sync_enabled) {
            if self.push_to_target(target, files, station, &mut report).await {
                report.targets += 1;
            } else {
                report.failed_targets += 1;
            }
        }

        for file in files {
            if let Err(e) = tokio::fs::remove_file(file).await {
                warn!(path = %file.display(), error = %e, "Failed to delete backed up file");
            }
        }

        info!(
            station,
            targets = report.targets,
            failed_targets = report.failed_targets,
            uploaded = report.uploaded,
            failed_uploads = report.failed_uploads,
            "Backup finished"
        );
        report
    }

    async fn push_to_target(
        &self,
        target: &BackupTargetDescriptor,
        files: &[PathBuf],
        station: &str,
        report: &mut BackupReport,
    ) -> bool {
        let Some(session) = self.session(target).await else {
            return false;
        };
        let adapter = session.lock().await;

        let dest_dir = join_remote(&target.backup_prefix, station);
        if let Err(e) = adapter.create_dir(&dest_dir).await {
            warn!(target = %adapter.describe(), dir = %dest_dir, error = %e, "Failed to create backup directory");
            drop(adapter);
            self.forget(target).await;
            return false;
        }

        let mut complete = true;
        for file in files {
            let Some(name) = file.file_name() else {
                continue;
            };
            let remote = join_remote(&dest_dir, &name.to_string_lossy());
            match adapter.upload(file, &remote).await {
                Ok(bytes) => {
                    debug!(target = %adapter.describe(), remote = %remote, bytes, "Uploaded");
                    report.uploaded += 1;
                },
                Err(e) => {
                    warn!(
                        target = %adapter.describe(),
                        path = %file.display(),
                        error = %e,
                        "Backup upload failed"
                    );
                    report.failed_uploads += 1;
                    complete = false;
                },
            }
        }

        drop(adapter);
        if !complete {
            self.forget(target).await;
        }
        complete
    }

    /// Reuse or open the session for `target`. The session map is not held
    /// while connecting, so a slow target never stalls the others.
    async fn session(&self, target: &BackupTargetDescriptor) -> Option<Session> {
        let key = session_key(target);
        let existing = self.inner.sessions.lock().await.get(&key).cloned();
        if existing.is_some() {
            return existing;
        }

        let os = match target.os_family() {
            Ok(os) => os,
            Err(e) => {
                warn!(target = %key, error = %e, "Skipping backup target");
                return None;
            },
        };

        let mut adapter = self.inner.adapters.backup_adapter(target, os);
        if let Err(e) = adapter.connect().await {
            warn!(target = %adapter.describe(), error = %e, "Failed to connect to backup target");
            return None;
        }

        let raced = {
            let mut sessions = self.inner.sessions.lock().await;
            match sessions.entry(key) {
                Entry::Occupied(entry) => Some(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let session: Session = Arc::new(Mutex::new(adapter));
                    entry.insert(session.clone());
                    return Some(session);
                },
            }
        };

        // Another backup connected first; keep its session
        debug!(target = %adapter.describe(), "Backup session already open, closing duplicate");
        adapter.disconnect().await;
        raced
    }

    async fn forget(&self, target: &BackupTargetDescriptor) {
        let removed = self.inner.sessions.lock().await.remove(&session_key(target));
        if let Some(session) = removed {
            session.lock().await.disconnect().await;
        }
    }

    /// Close every open backup session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Session> = self
            .inner
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();

        let count = sessions.len();
        join_all(sessions.iter().map(|session| async move {
            session.lock().await.disconnect().await;
        }))
        .await;
        info!(sessions = count, "Backup sessions closed");
    }

    /// [`shutdown`](Self::shutdown) in the background after `delay`.
    pub fn shutdown_after(&self, delay: Duration) -> JoinHandle<()> {
        let propagator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            propagator.shutdown().await;
        })
    }

    pub async fn open_sessions(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }
}

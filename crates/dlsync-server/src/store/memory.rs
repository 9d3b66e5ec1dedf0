//! In-process store for tests

use super::{BackupTargetRegistry, ConnectionRegistry, ResultStore};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use dlsync_common::types::{
    BackupTargetDescriptor, ConnectionDescriptor, RecordIdentity, ResultRecord,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    records: Vec<ResultRecord>,
    connections: Vec<ConnectionDescriptor>,
    targets: Vec<BackupTargetDescriptor>,
    failing_chips: HashSet<String>,
    insert_calls: usize,
}

/// Records are kept in insertion order, so the first identity match is the
/// earliest one.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_connection(&self, connection: ConnectionDescriptor) {
        self.inner.lock().await.connections.push(connection);
    }

    pub async fn add_backup_target(&self, target: BackupTargetDescriptor) {
        self.inner.lock().await.targets.push(target);
    }

    /// Make every insert containing a record for `chip_id` fail
    pub async fn fail_inserts_for_chip(&self, chip_id: &str) {
        self.inner
            .lock()
            .await
            .failing_chips
            .insert(chip_id.to_string());
    }

    pub async fn records(&self) -> Vec<ResultRecord> {
        self.inner.lock().await.records.clone()
    }

    /// Number of `insert_many` calls, failed ones included
    pub async fn insert_calls(&self) -> usize {
        self.inner.lock().await.insert_calls
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn find_by_identity(
        &self,
        identities: &[RecordIdentity],
    ) -> SyncResult<HashMap<RecordIdentity, String>> {
        let wanted: HashSet<&RecordIdentity> = identities.iter().collect();
        let inner = self.inner.lock().await;

        let mut matches = HashMap::new();
        for record in &inner.records {
            let identity = record.identity();
            if wanted.contains(&identity) {
                matches.entry(identity).or_insert_with(|| record.path.clone());
            }
        }
        Ok(matches)
    }

    async fn insert_many(&self, records: &[ResultRecord]) -> SyncResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.insert_calls += 1;

        if let Some(bad) = records
            .iter()
            .find(|r| inner.failing_chips.contains(&r.chip_id))
        {
            return Err(SyncError::Store(format!(
                "insert rejected for chip {}",
                bad.chip_id
            )));
        }

        inner.records.extend_from_slice(records);
        Ok(records.len() as u64)
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryStore {
    async fn list_connections(&self) -> SyncResult<Vec<ConnectionDescriptor>> {
        Ok(self.inner.lock().await.connections.clone())
    }
}

#[async_trait]
impl BackupTargetRegistry for MemoryStore {
    async fn list_backup_targets(&self) -> SyncResult<Vec<BackupTargetDescriptor>> {
        Ok(self.inner.lock().await.targets.clone())
    }
}

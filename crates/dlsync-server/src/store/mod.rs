//! Persistence seams for parsed records and the station / backup registries
//!
//! The sync pipeline only talks to these traits. [`PgStore`] is the
//! production implementation; [`MemoryStore`] backs tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::SyncResult;
use async_trait::async_trait;
use dlsync_common::types::{
    BackupTargetDescriptor, ConnectionDescriptor, RecordIdentity, ResultRecord,
};
use std::collections::HashMap;

/// Storage of parsed datalog records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Look up already stored records sharing any of `identities`.
    ///
    /// Returns the path of the earliest stored record per matching identity.
    /// Identities with no stored match are absent from the map.
    async fn find_by_identity(
        &self,
        identities: &[RecordIdentity],
    ) -> SyncResult<HashMap<RecordIdentity, String>>;

    /// Insert all records in one statement. Returns the number of rows written.
    async fn insert_many(&self, records: &[ResultRecord]) -> SyncResult<u64>;
}

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn list_connections(&self) -> SyncResult<Vec<ConnectionDescriptor>>;
}

#[async_trait]
pub trait BackupTargetRegistry: Send + Sync {
    async fn list_backup_targets(&self) -> SyncResult<Vec<BackupTargetDescriptor>>;
}

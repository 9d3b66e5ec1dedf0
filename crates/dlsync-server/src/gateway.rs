//! Deduplication and batched persistence of parsed records
//!
//! Duplicates are never dropped. A record whose identity was already seen,
//! either earlier in the same flush or in the store, keeps its row and gets
//! `duplicate_path` pointing at the earlier copy.

use crate::store::ResultStore;
use dlsync_common::types::{RecordIdentity, ResultRecord};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Records written per store round trip
pub const DEFAULT_SUB_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayReport {
    pub inserted: u64,
    pub failed_batches: usize,
    /// Records linked to an earlier record of the same flush
    pub intra_duplicates: usize,
    /// Records linked to an already stored record
    pub stored_duplicates: usize,
}

/// Shared by every connection task of a pass.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn ResultStore>,
    sub_batch: usize,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            sub_batch: DEFAULT_SUB_BATCH,
        }
    }

    pub fn with_sub_batch(mut self, sub_batch: usize) -> Self {
        self.sub_batch = sub_batch.max(1);
        self
    }

    /// Annotate duplicates and write `records` in sub-batches.
    ///
    /// A failed sub-batch is logged and skipped; later sub-batches are still
    /// attempted.
    pub async fn insert_batch(&self, mut records: Vec<ResultRecord>) -> GatewayReport {
        let mut report = GatewayReport::default();
        if records.is_empty() {
            return report;
        }

        let start = Instant::now();
        report.intra_duplicates = link_intra_batch(&mut records);

        for (index, chunk) in records.chunks_mut(self.sub_batch).enumerate() {
            let identities: Vec<RecordIdentity> = chunk.iter().map(|r| r.identity()).collect();

            match self.store.find_by_identity(&identities).await {
                Ok(stored) => {
                    for (record, identity) in chunk.iter_mut().zip(&identities) {
                        if let Some(path) = stored.get(identity) {
                            record.duplicate_path = Some(path.clone());
                            report.stored_duplicates += 1;
                        }
                    }
                },
                Err(e) => {
                    warn!(
                        sub_batch = index,
                        error = %e,
                        "Duplicate lookup failed, writing sub-batch without stored links"
                    );
                },
            }

            match self.store.insert_many(chunk).await {
                Ok(rows) => {
                    debug!(sub_batch = index, rows, "Sub-batch written");
                    report.inserted += rows;
                },
                Err(e) => {
                    warn!(
                        sub_batch = index,
                        records = chunk.len(),
                        error = %e,
                        "Failed to write sub-batch"
                    );
                    report.failed_batches += 1;
                },
            }
        }

        info!(
            rows = report.inserted,
            failed_batches = report.failed_batches,
            duplicates = report.intra_duplicates + report.stored_duplicates,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Persisted result records"
        );
        report
    }
}

/// Point every repeated identity at the first record carrying it.
/// Returns the number of records linked.
pub fn link_intra_batch(records: &mut [ResultRecord]) -> usize {
    let mut first_seen: HashMap<RecordIdentity, String> = HashMap::new();
    let mut linked = 0;

    for record in records.iter_mut() {
        match first_seen.entry(record.identity()) {
            Entry::Occupied(first) => {
                record.duplicate_path = Some(first.get().clone());
                linked += 1;
            },
            Entry::Vacant(slot) => {
                slot.insert(record.path.clone());
            },
        }
    }
    linked
}

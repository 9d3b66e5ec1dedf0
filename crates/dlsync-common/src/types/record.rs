use super::{AgingPhase, FileKind, SystemFamily, TestOutcome};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One parsed datalog.
///
/// Path-derived fields come from the directory layout; `real_result` and
/// `test_suites` come from the file content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub model: String,
    pub batch: String,
    pub aging_phase: AgingPhase,
    /// Only set for post burn-in logs
    pub aging_end_date: Option<NaiveDate>,
    pub test_begin_date: NaiveDate,
    /// Degrees Celsius, only set for post burn-in logs
    pub temperature: Option<i32>,
    /// Only set for qualification logs
    pub qualification_group: Option<String>,
    pub tester_abbr: String,
    pub chip_id: String,
    /// Consumer-facing (volume) path of the mirrored file
    pub path: String,
    /// Path of an earlier copy with the same identity
    pub duplicate_path: Option<String>,
    pub surface_result: TestOutcome,
    pub real_result: Option<TestOutcome>,
    pub file_kind: FileKind,
    pub content_error: bool,
    pub file_size: Option<u64>,
    pub test_suites: Option<BTreeSet<String>>,
    pub station_name: String,
    pub system: SystemFamily,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            model: self.model.clone(),
            batch: self.batch.clone(),
            aging_phase: self.aging_phase,
            temperature: self.temperature,
            qualification_group: self.qualification_group.clone(),
            chip_id: self.chip_id.clone(),
            file_kind: self.file_kind,
        }
    }

    pub fn test_suite_count(&self) -> usize {
        self.test_suites.as_ref().map_or(0, BTreeSet::len)
    }

    /// Surface (file name) and real (content) verdicts disagree
    pub fn verdict_mismatch(&self) -> bool {
        self.real_result
            .is_some_and(|real| real != self.surface_result)
    }
}

/// The tuple two records must share to be treated as the same test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub model: String,
    pub batch: String,
    pub aging_phase: AgingPhase,
    pub temperature: Option<i32>,
    pub qualification_group: Option<String>,
    pub chip_id: String,
    pub file_kind: FileKind,
}

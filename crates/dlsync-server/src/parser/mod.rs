//! Datalog parsing: path layout plus content verdict.

pub mod content;
pub mod path;

pub use content::{ContentGrammar, ContentVerdict};
pub use path::{PathFields, PathGrammar};

use chrono::Utc;
use dlsync_common::types::{ResultRecord, SystemFamily};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, warn};

pub struct LogParser {
    path: PathGrammar,
    content: ContentGrammar,
}

impl LogParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            path: PathGrammar::new()?,
            content: ContentGrammar::new()?,
        })
    }

    /// Parse a mirrored datalog.
    ///
    /// `path_prefix` is the station's mirror root; the layout below it must
    /// match the datalog grammar or no record is produced. Unreadable content
    /// still yields a record, flagged with `content_error`.
    pub fn parse(
        &self,
        file_path: &Path,
        duplicate_path: Option<&str>,
        path_prefix: &Path,
        system: SystemFamily,
        station: &str,
    ) -> Option<ResultRecord> {
        let relative = file_path
            .strip_prefix(path_prefix)
            .ok()?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let Some(fields) = self.path.parse(&relative) else {
            debug!(path = %file_path.display(), "Path does not match datalog layout");
            return None;
        };

        let file_size = match std::fs::metadata(file_path) {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "Failed to read file size");
                None
            },
        };

        let verdict = match File::open(file_path) {
            Ok(file) => self
                .content
                .classify(BufReader::new(file), system, fields.file_kind),
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "Failed to open datalog");
                ContentVerdict::unreadable()
            },
        };

        Some(ResultRecord {
            model: fields.model,
            batch: fields.batch,
            aging_phase: fields.aging_phase,
            aging_end_date: fields.aging_end_date,
            test_begin_date: fields.test_begin_date,
            temperature: fields.temperature,
            qualification_group: fields.qualification_group,
            tester_abbr: fields.tester_abbr,
            chip_id: fields.chip_id,
            path: file_path.to_string_lossy().replace('\\', "/"),
            duplicate_path: duplicate_path.map(|p| p.replace('\\', "/")),
            surface_result: fields.surface_result,
            real_result: verdict.real_result,
            file_kind: fields.file_kind,
            content_error: verdict.content_error,
            file_size,
            test_suites: verdict.test_suites,
            station_name: station.to_string(),
            system,
            created_at: Utc::now(),
        })
    }
}

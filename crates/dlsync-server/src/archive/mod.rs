//! Per-station archives of every transferred datalog.
//!
//! An archive is named `<station>_<YYYYMMDD>_<random>`. Entries are written
//! to a single scratch zip; finishing lays it out as a PKZIP split set
//! (`.z01`, `.z02`, ..., last volume `.zip`) when it outgrows one volume, or
//! leaves a plain `.zip` when it does not.

pub mod split;

use crate::config::ArchiveSettings;
use crate::error::SyncResult;
use chrono::NaiveDate;
use split::{final_path, part_path, split_archive};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub use split::{MAX_SPLIT_SIZE, MIN_SPLIT_SIZE};

/// Entries at or above this size need zip64 headers
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;

fn scratch_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.zip.part", stem))
}

fn file_options(compression_level: i32) -> SimpleFileOptions {
    let options = SimpleFileOptions::default().unix_permissions(0o644);
    match compression_level {
        0 => options.compression_method(CompressionMethod::Stored),
        level if level < 0 => options.compression_method(CompressionMethod::Deflated),
        level => options
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(level))),
    }
}

/// Delete archive volumes, logging rather than failing.
pub fn discard_volumes(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to delete archive volume");
            }
        }
    }
}

/// Builds one station's archive. Finishing consumes the builder; a builder
/// dropped unfinished removes whatever it wrote.
pub struct ArchiveBuilder {
    writer: Option<ZipWriter<File>>,
    dir: PathBuf,
    stem: String,
    split_size: u64,
    compression_level: i32,
    entries: usize,
}

impl ArchiveBuilder {
    pub fn create(
        dir: &Path,
        station: &str,
        date: NaiveDate,
        settings: &ArchiveSettings,
    ) -> SyncResult<Self> {
        if settings.split_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "split size must be greater than 0",
            )
            .into());
        }
        let stem = format!(
            "{}_{}_{}",
            station,
            date.format("%Y%m%d"),
            Uuid::new_v4().simple()
        );
        fs::create_dir_all(dir)?;
        let scratch = File::create(scratch_path(dir, &stem))?;
        debug!(archive = %stem, split_size = settings.split_size, "Created archive");

        Ok(Self {
            writer: Some(ZipWriter::new(scratch)),
            dir: dir.to_path_buf(),
            stem,
            split_size: settings.split_size,
            compression_level: settings.compression_level,
            entries: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.stem
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Add `source` under `entry_name` (a `/`-separated relative path).
    pub fn append_file(&mut self, entry_name: &str, source: &Path) -> SyncResult<u64> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "archive already finished")
        })?;

        let mut file = File::open(source)?;
        let size = file.metadata()?.len();
        let options = file_options(self.compression_level).large_file(size >= ZIP64_THRESHOLD);

        writer.start_file(entry_name.trim_start_matches('/'), options)?;
        let copied = io::copy(&mut file, writer)?;
        self.entries += 1;
        Ok(copied)
    }

    /// Write the central directory and lay the archive out in volumes.
    pub fn finish(mut self) -> SyncResult<Vec<PathBuf>> {
        let Some(writer) = self.writer.take() else {
            return Ok(Vec::new());
        };
        let scratch = scratch_path(&self.dir, &self.stem);
        let finished = writer
            .finish()
            .map_err(crate::error::SyncError::from)
            .and_then(|file| file.sync_all().map_err(Into::into))
            .and_then(|()| {
                split_archive(&scratch, &self.dir, &self.stem, self.split_size).map_err(Into::into)
            });

        match finished {
            Ok(paths) => {
                debug!(archive = %self.stem, entries = self.entries, volumes = paths.len(), "Finished archive");
                Ok(paths)
            },
            Err(e) => {
                self.remove_volumes();
                Err(e)
            },
        }
    }

    /// Drop the archive and delete everything it wrote.
    pub fn discard(self) {
        debug!(archive = %self.stem, "Discarding archive");
    }

    fn remove_volumes(&self) {
        let mut paths = vec![
            scratch_path(&self.dir, &self.stem),
            final_path(&self.dir, &self.stem),
        ];
        let mut number = 1;
        loop {
            let part = part_path(&self.dir, &self.stem, number);
            if !part.exists() {
                break;
            }
            paths.push(part);
            number += 1;
        }
        discard_volumes(&paths);
    }
}

impl Drop for ArchiveBuilder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            self.remove_volumes();
        }
    }
}

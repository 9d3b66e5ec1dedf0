//! Configuration management

use crate::archive::{MAX_SPLIT_SIZE, MIN_SPLIT_SIZE};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/dlsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default local root of the conflict area.
pub const DEFAULT_CONFLICT_LOCAL_PATH: &str = "/data/conflict";

/// Default consumer-facing root of the conflict area.
pub const DEFAULT_CONFLICT_VOLUME_PATH: &str = "/volume/conflict";

/// Default limit for one sync pass, in minutes.
pub const DEFAULT_TASK_TIMEOUT_MINUTES: u64 = 60;

/// Default number of stations synchronized concurrently.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default deflate level (-1 selects the library default).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = -1;

/// Default archive volume size (1 GiB).
pub const DEFAULT_ZIP_SPLIT_SIZE: u64 = 0x4000_0000;

/// Default delay before discarding archives while backup is disabled.
pub const DEFAULT_ARCHIVE_DISCARD_DELAY_SECS: u64 = 0;

/// Default root under which SMB hosts are mounted.
pub const DEFAULT_SMB_MOUNT_ROOT: &str = "/";

/// Default SSH connect and I/O timeout in seconds.
pub const DEFAULT_SFTP_TIMEOUT_SECS: u64 = 60;

/// Default local time of the daily pass.
pub const DEFAULT_SYNC_AT: &str = "02:00:00";

/// Synchronization starts disabled until an operator opens it.
pub const DEFAULT_SYNC_ENABLED: bool = false;

/// Whether finished archives are copied to the backup targets until an
/// operator turns backups off.
pub const DEFAULT_BACKUP_ENABLED: bool = true;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncSettings,
    pub archive: ArchiveSettings,
    pub transfer: TransferConfig,
    pub schedule: ScheduleConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Settings for one sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Local root used once a station's target paths collide
    pub conflict_local_path: PathBuf,
    /// Consumer-facing counterpart of `conflict_local_path`
    pub conflict_volume_path: String,
    pub task_timeout: Duration,
    pub max_workers: usize,
    /// Scratch directory for archives awaiting backup
    pub archive_dir: PathBuf,
    pub archive_discard_delay: Duration,
}

/// Archive volume settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSettings {
    pub split_size: u64,
    /// 0 stores entries, -1 uses the default deflate level, 1..=9 picks one
    pub compression_level: i32,
}

/// Remote transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// SMB hosts are looked up at `<smb_mount_root>/<host>/<prefix>`
    pub smb_mount_root: PathBuf,
    pub sftp_timeout: Duration,
}

/// Scheduling and initial switch states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub sync_at: NaiveTime,
    pub sync_enabled: bool,
    pub backup_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            sync: SyncSettings::default(),
            archive: ArchiveSettings::default(),
            transfer: TransferConfig {
                smb_mount_root: PathBuf::from(DEFAULT_SMB_MOUNT_ROOT),
                sftp_timeout: Duration::from_secs(DEFAULT_SFTP_TIMEOUT_SECS),
            },
            schedule: ScheduleConfig {
                sync_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
                sync_enabled: DEFAULT_SYNC_ENABLED,
                backup_enabled: DEFAULT_BACKUP_ENABLED,
            },
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            conflict_local_path: PathBuf::from(DEFAULT_CONFLICT_LOCAL_PATH),
            conflict_volume_path: DEFAULT_CONFLICT_VOLUME_PATH.to_string(),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_MINUTES * 60),
            max_workers: DEFAULT_MAX_WORKERS,
            archive_dir: std::env::temp_dir().join("dlsync"),
            archive_discard_delay: Duration::from_secs(DEFAULT_ARCHIVE_DISCARD_DELAY_SECS),
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            split_size: DEFAULT_ZIP_SPLIT_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let sync_at = match std::env::var("DLSYNC_SYNC_AT") {
            Ok(raw) => parse_time_of_day(&raw)
                .ok_or_else(|| anyhow::anyhow!("Invalid DLSYNC_SYNC_AT value: {}", raw))?,
            Err(_) => defaults.schedule.sync_at,
        };

        let split_size = match std::env::var("DLSYNC_ZIP_SPLIT_SIZE") {
            Ok(raw) => parse_byte_size(&raw)
                .ok_or_else(|| anyhow::anyhow!("Invalid DLSYNC_ZIP_SPLIT_SIZE value: {}", raw))?,
            Err(_) => DEFAULT_ZIP_SPLIT_SIZE,
        };

        let config = Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            sync: SyncSettings {
                conflict_local_path: std::env::var("DLSYNC_CONFLICT_LOCAL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.sync.conflict_local_path),
                conflict_volume_path: std::env::var("DLSYNC_CONFLICT_VOLUME_PATH")
                    .unwrap_or(defaults.sync.conflict_volume_path),
                task_timeout: Duration::from_secs(
                    env_or("DLSYNC_TASK_TIMEOUT_MINUTES", DEFAULT_TASK_TIMEOUT_MINUTES) * 60,
                ),
                max_workers: env_or("DLSYNC_MAX_WORKERS", DEFAULT_MAX_WORKERS),
                archive_dir: std::env::var("DLSYNC_ARCHIVE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.sync.archive_dir),
                archive_discard_delay: Duration::from_secs(env_or(
                    "DLSYNC_ARCHIVE_DISCARD_DELAY_SECS",
                    DEFAULT_ARCHIVE_DISCARD_DELAY_SECS,
                )),
            },
            archive: ArchiveSettings {
                split_size,
                compression_level: env_or("DLSYNC_COMPRESSION_LEVEL", DEFAULT_COMPRESSION_LEVEL),
            },
            transfer: TransferConfig {
                smb_mount_root: std::env::var("DLSYNC_SMB_MOUNT_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.transfer.smb_mount_root),
                sftp_timeout: Duration::from_secs(env_or(
                    "DLSYNC_SFTP_TIMEOUT_SECS",
                    DEFAULT_SFTP_TIMEOUT_SECS,
                )),
            },
            schedule: ScheduleConfig {
                sync_at,
                sync_enabled: env_or("DLSYNC_SYNC_ENABLED", DEFAULT_SYNC_ENABLED),
                backup_enabled: env_or("DLSYNC_BACKUP_ENABLED", DEFAULT_BACKUP_ENABLED),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.sync.max_workers == 0 {
            anyhow::bail!("DLSYNC_MAX_WORKERS must be greater than 0");
        }

        if self.sync.conflict_local_path.as_os_str().is_empty()
            || self.sync.conflict_volume_path.is_empty()
        {
            anyhow::bail!("Conflict area paths cannot be empty");
        }

        if !(MIN_SPLIT_SIZE..=MAX_SPLIT_SIZE).contains(&self.archive.split_size) {
            anyhow::bail!(
                "Archive split size must be between {} and {} bytes, got {}",
                MIN_SPLIT_SIZE,
                MAX_SPLIT_SIZE,
                self.archive.split_size
            );
        }

        if !(-1..=9).contains(&self.archive.compression_level) {
            anyhow::bail!(
                "Compression level must be between -1 and 9, got {}",
                self.archive.compression_level
            );
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a byte count written in decimal or `0x` hex.
pub fn parse_byte_size(raw: &str) -> Option<u64> {
    let raw = raw.trim().replace('_', "");
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.archive.split_size, 1 << 30);
        assert_eq!(config.archive.compression_level, -1);
        assert_eq!(config.sync.max_workers, 8);
        assert_eq!(config.sync.task_timeout, Duration::from_secs(3600));
        assert!(!config.schedule.sync_enabled);
        assert!(config.schedule.backup_enabled);
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("0x40000000"), Some(0x4000_0000));
        assert_eq!(parse_byte_size("1048576"), Some(1_048_576));
        assert_eq!(parse_byte_size("1_048_576"), Some(1_048_576));
        assert_eq!(parse_byte_size("1GB"), None);
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("02:30"), NaiveTime::from_hms_opt(2, 30, 0));
        assert_eq!(parse_time_of_day("23:59:59"), NaiveTime::from_hms_opt(23, 59, 59));
        assert_eq!(parse_time_of_day("25:00"), None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.archive.compression_level = 12;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.archive.split_size = 0;
        assert!(config.validate().is_err());

        // Volume offsets are 32-bit
        let mut config = Config::default();
        config.archive.split_size = 1 << 32;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.conflict_volume_path.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        std::env::set_var("DLSYNC_ZIP_SPLIT_SIZE", "0x100000");
        std::env::set_var("DLSYNC_TASK_TIMEOUT_MINUTES", "5");
        std::env::set_var("DLSYNC_SYNC_AT", "04:15");
        std::env::set_var("DLSYNC_CONFLICT_LOCAL_PATH", "/srv/conflict");

        let config = Config::load();

        std::env::remove_var("DLSYNC_ZIP_SPLIT_SIZE");
        std::env::remove_var("DLSYNC_TASK_TIMEOUT_MINUTES");
        std::env::remove_var("DLSYNC_SYNC_AT");
        std::env::remove_var("DLSYNC_CONFLICT_LOCAL_PATH");

        let config = config.unwrap();
        assert_eq!(config.archive.split_size, 0x10_0000);
        assert_eq!(config.sync.task_timeout, Duration::from_secs(300));
        assert_eq!(config.schedule.sync_at, NaiveTime::from_hms_opt(4, 15, 0).unwrap());
        assert_eq!(config.sync.conflict_local_path, PathBuf::from("/srv/conflict"));
    }

    #[test]
    #[serial]
    fn test_load_rejects_malformed_schedule() {
        std::env::set_var("DLSYNC_SYNC_AT", "noon");
        let result = Config::load();
        std::env::remove_var("DLSYNC_SYNC_AT");
        assert!(result.is_err());
    }
}

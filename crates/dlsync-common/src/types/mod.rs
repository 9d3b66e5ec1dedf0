//! Common types used across dlsync

mod record;

pub use record::{RecordIdentity, ResultRecord};

use crate::error::{DlsyncError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enumerations
// ============================================================================

/// Tester platform that produced a datalog. Selects both the content grammar
/// and the remote protocol used to reach the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemFamily {
    J750,
    UltraFlex,
    Adv93000,
}

impl SystemFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemFamily::J750 => "J750",
            SystemFamily::UltraFlex => "ULTRA_FLEX",
            SystemFamily::Adv93000 => "ADV93000",
        }
    }

    /// Families whose logs carry a Site/Sort/Bin summary table.
    pub fn uses_bin_table(&self) -> bool {
        matches!(self, SystemFamily::J750 | SystemFamily::UltraFlex)
    }
}

impl fmt::Display for SystemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SystemFamily {
    type Err = DlsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "J750" => Ok(SystemFamily::J750),
            "ULTRA_FLEX" | "ULTRAFLEX" => Ok(SystemFamily::UltraFlex),
            "ADV93000" => Ok(SystemFamily::Adv93000),
            _ => Err(DlsyncError::UnknownSystem(s.to_string())),
        }
    }
}

/// Operating system of a backup target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "LINUX",
            OsFamily::Windows => "WINDOWS",
        }
    }
}

impl std::str::FromStr for OsFamily {
    type Err = DlsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LINUX" => Ok(OsFamily::Linux),
            "WINDOWS" => Ok(OsFamily::Windows),
            _ => Err(DlsyncError::UnknownOs(s.to_string())),
        }
    }
}

/// Burn-in stage of a chip batch.
///
/// Directory tokens and stored names keep the factory naming:
/// `laolianqian` (pre burn-in), `laolianhou` (post burn-in), `JD`
/// (qualification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgingPhase {
    #[serde(rename = "LAOLIANQIAN")]
    PreBurnIn,
    #[serde(rename = "LAOLIANHOU")]
    PostBurnIn,
    #[serde(rename = "JD")]
    Qualification,
}

impl AgingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgingPhase::PreBurnIn => "LAOLIANQIAN",
            AgingPhase::PostBurnIn => "LAOLIANHOU",
            AgingPhase::Qualification => "JD",
        }
    }
}

impl fmt::Display for AgingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgingPhase {
    type Err = DlsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "LAOLIANQIAN" => Ok(AgingPhase::PreBurnIn),
            "LAOLIANHOU" => Ok(AgingPhase::PostBurnIn),
            "JD" => Ok(AgingPhase::Qualification),
            _ => Err(DlsyncError::Parse(format!("unknown aging phase: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestOutcome {
    Passed,
    Failed,
}

impl TestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "PASSED",
            TestOutcome::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for TestOutcome {
    type Err = DlsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PASSED" => Ok(TestOutcome::Passed),
            "FAILED" => Ok(TestOutcome::Failed),
            _ => Err(DlsyncError::Parse(format!("unknown test outcome: {}", s))),
        }
    }
}

/// Whether a log is the raw process log or the `_x` summary report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    Process,
    Report,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Process => "PROCESS",
            FileKind::Report => "REPORT",
        }
    }
}

impl std::str::FromStr for FileKind {
    type Err = DlsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PROCESS" => Ok(FileKind::Process),
            "REPORT" => Ok(FileKind::Report),
            _ => Err(DlsyncError::Parse(format!("unknown file kind: {}", s))),
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// One tester station to pull datalogs from.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Root directory on the station (SFTP path, or `share/sub/dir` for SMB)
    pub remote_prefix: String,
    /// Local mirror root; files land under `<local_prefix>/<station_name>`
    pub local_prefix: String,
    /// Path as seen by downstream consumers; falls back to `local_prefix`
    pub volume_prefix: Option<String>,
    /// Raw system family tag, validated when the connection is processed
    pub system: String,
    pub station_name: String,
    pub sync_enabled: bool,
}

impl ConnectionDescriptor {
    pub fn system_family(&self) -> Result<SystemFamily> {
        self.system.parse()
    }

    pub fn effective_volume_prefix(&self) -> &str {
        match self.volume_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => prefix,
            _ => &self.local_prefix,
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("remote_prefix", &self.remote_prefix)
            .field("local_prefix", &self.local_prefix)
            .field("volume_prefix", &self.volume_prefix)
            .field("system", &self.system)
            .field("station_name", &self.station_name)
            .field("sync_enabled", &self.sync_enabled)
            .finish()
    }
}

/// A host that receives copies of finished archives.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackupTargetDescriptor {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Destination root; archives go to `<backup_prefix>/<station>/`
    pub backup_prefix: String,
    pub os: String,
    pub sync_enabled: bool,
    pub compression_level: Option<i32>,
}

impl BackupTargetDescriptor {
    pub fn os_family(&self) -> Result<OsFamily> {
        self.os.parse()
    }
}

impl fmt::Debug for BackupTargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupTargetDescriptor")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("backup_prefix", &self.backup_prefix)
            .field("os", &self.os)
            .field("sync_enabled", &self.sync_enabled)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn connection() -> ConnectionDescriptor {
        ConnectionDescriptor {
            id: 1,
            host: "10.0.0.5".to_string(),
            port: 22,
            username: "tester".to_string(),
            password: "secret".to_string(),
            remote_prefix: "/home/tester/datalog".to_string(),
            local_prefix: "/data/local".to_string(),
            volume_prefix: None,
            system: "adv93000".to_string(),
            station_name: "V93K-01".to_string(),
            sync_enabled: true,
        }
    }

    #[test]
    fn test_system_family_parsing() {
        assert_eq!("J750".parse::<SystemFamily>().unwrap(), SystemFamily::J750);
        assert_eq!("ultra_flex".parse::<SystemFamily>().unwrap(), SystemFamily::UltraFlex);
        assert_eq!(" ADV93000 ".parse::<SystemFamily>().unwrap(), SystemFamily::Adv93000);
        assert!(matches!(
            "T2000".parse::<SystemFamily>(),
            Err(DlsyncError::UnknownSystem(_))
        ));
    }

    #[test]
    fn test_bin_table_families() {
        assert!(SystemFamily::J750.uses_bin_table());
        assert!(SystemFamily::UltraFlex.uses_bin_table());
        assert!(!SystemFamily::Adv93000.uses_bin_table());
    }

    #[test]
    fn test_stored_names_match_serde() {
        assert_eq!(
            serde_json::to_string(&SystemFamily::UltraFlex).unwrap(),
            "\"ULTRA_FLEX\""
        );
        assert_eq!(
            serde_json::to_string(&AgingPhase::PostBurnIn).unwrap(),
            format!("\"{}\"", AgingPhase::PostBurnIn.as_str())
        );
        assert_eq!("jd".parse::<AgingPhase>().unwrap(), AgingPhase::Qualification);
        assert_eq!("report".parse::<FileKind>().unwrap(), FileKind::Report);
        assert_eq!("Windows".parse::<OsFamily>().unwrap(), OsFamily::Windows);
    }

    #[test]
    fn test_volume_prefix_falls_back_to_local_prefix() {
        let mut conn = connection();
        assert_eq!(conn.effective_volume_prefix(), "/data/local");

        conn.volume_prefix = Some(String::new());
        assert_eq!(conn.effective_volume_prefix(), "/data/local");

        conn.volume_prefix = Some("/mnt/volume".to_string());
        assert_eq!(conn.effective_volume_prefix(), "/mnt/volume");
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", connection());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("V93K-01"));
    }
}

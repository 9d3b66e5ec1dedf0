//! Remote station access.
//!
//! Every protocol sits behind [`RemoteAdapter`]. Paths handed to an adapter
//! are "logical" remote paths in the connection's own namespace (the same
//! form as the configured remote prefix); each adapter maps them onto its
//! transport.
//!
//! - [`sftp::SftpAdapter`]: SSH/SFTP stations (ADV93000) and Linux backups
//! - [`local::LocalMountAdapter`]: an SMB share already mounted on this host
//! - [`smb::SmbProtocolAdapter`]: explicit SMB sessions when no mount exists

pub mod local;
pub mod sftp;
pub mod smb;
#[cfg(feature = "smb-native")]
pub mod smb_native;

use crate::config::TransferConfig;
use async_trait::async_trait;
use dlsync_common::types::{
    BackupTargetDescriptor, ConnectionDescriptor, OsFamily, SystemFamily,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use self::local::LocalMountAdapter;
use self::sftp::{SftpAdapter, SftpConfig};
use self::smb::{SmbConnector, SmbCredentials, SmbProtocolAdapter};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication rejected for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("Session is not connected")]
    NotConnected,

    #[error("Remote path not found: {0}")]
    NotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking transfer task failed: {0}")]
    Join(String),
}

/// A file found while listing a remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Logical path, usable with [`RemoteAdapter::download`]
    pub path: String,
    /// Path below the listed root, `/`-separated
    pub relative: String,
}

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Short label for logs, e.g. `sftp://10.0.0.5:22`
    fn describe(&self) -> String;

    async fn connect(&mut self) -> Result<(), RemoteError>;

    /// All regular files below `root`, depth first, in a stable order.
    async fn list_recursive(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    /// Copy a remote file to `local`, creating parent directories. Returns bytes copied.
    async fn download(&self, remote: &str, local: &Path) -> Result<u64, RemoteError>;

    /// Copy `local` to a remote path, creating remote parents. Returns bytes copied.
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, RemoteError>;

    /// Delete `root` and everything below it. Files go first, then
    /// directories from the deepest up.
    async fn remove_tree(&self, root: &str) -> Result<(), RemoteError>;

    /// Create `path` and any missing ancestors. Succeeds if it already exists.
    async fn create_dir(&self, path: &str) -> Result<(), RemoteError>;

    async fn disconnect(&mut self);
}

/// Chooses the adapter for a station or backup target.
///
/// The protocol choice is a closed match on the family; the trait exists so
/// callers can substitute transports under test.
pub trait AdapterFactory: Send + Sync {
    fn station_adapter(
        &self,
        connection: &ConnectionDescriptor,
        family: SystemFamily,
    ) -> Box<dyn RemoteAdapter>;

    fn backup_adapter(&self, target: &BackupTargetDescriptor, os: OsFamily)
        -> Box<dyn RemoteAdapter>;
}

/// Production adapter selection.
pub struct ProtocolAdapters {
    transfer: TransferConfig,
    smb: Arc<dyn SmbConnector>,
}

impl ProtocolAdapters {
    pub fn new(transfer: TransferConfig) -> Self {
        Self::with_smb_connector(transfer, smb::default_connector())
    }

    pub fn with_smb_connector(transfer: TransferConfig, smb: Arc<dyn SmbConnector>) -> Self {
        Self { transfer, smb }
    }

    /// Local mount point for an SMB host: `<mount root>/<host>`
    fn mount_base(&self, host: &str) -> PathBuf {
        self.transfer.smb_mount_root.join(host)
    }
}

impl AdapterFactory for ProtocolAdapters {
    fn station_adapter(
        &self,
        connection: &ConnectionDescriptor,
        family: SystemFamily,
    ) -> Box<dyn RemoteAdapter> {
        match family {
            SystemFamily::Adv93000 => Box::new(SftpAdapter::new(SftpConfig {
                host: connection.host.clone(),
                port: connection.port,
                username: connection.username.clone(),
                password: connection.password.clone(),
                timeout: self.transfer.sftp_timeout,
            })),
            SystemFamily::J750 | SystemFamily::UltraFlex => {
                let mount = LocalMountAdapter::new(self.mount_base(&connection.host));
                if mount.resolve(&connection.remote_prefix).is_dir() {
                    debug!(host = %connection.host, "Using mounted share");
                    Box::new(mount)
                } else {
                    debug!(host = %connection.host, "Share not mounted, using SMB protocol");
                    Box::new(SmbProtocolAdapter::new(
                        SmbCredentials {
                            host: connection.host.clone(),
                            port: connection.port,
                            username: connection.username.clone(),
                            password: connection.password.clone(),
                        },
                        &connection.remote_prefix,
                        self.smb.clone(),
                    ))
                }
            },
        }
    }

    fn backup_adapter(
        &self,
        target: &BackupTargetDescriptor,
        os: OsFamily,
    ) -> Box<dyn RemoteAdapter> {
        match os {
            OsFamily::Linux => Box::new(SftpAdapter::new(SftpConfig {
                host: target.host.clone(),
                port: target.port,
                username: target.username.clone(),
                password: target.password.clone(),
                timeout: self.transfer.sftp_timeout,
            })),
            OsFamily::Windows => {
                let mount = LocalMountAdapter::new(self.mount_base(&target.host));
                let share_root = mount.resolve(&target.backup_prefix);
                if share_root.is_dir() || std::fs::create_dir_all(&share_root).is_ok() {
                    Box::new(mount)
                } else {
                    Box::new(SmbProtocolAdapter::new(
                        SmbCredentials {
                            host: target.host.clone(),
                            port: target.port,
                            username: target.username.clone(),
                            password: target.password.clone(),
                        },
                        &target.backup_prefix,
                        self.smb.clone(),
                    ))
                }
            },
        }
    }
}

/// Normalize separators and drop a trailing slash (keeping a lone `/`).
pub fn normalize_remote(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() && unified.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a logical remote path and a `/`-separated suffix.
pub fn join_remote(base: &str, suffix: &str) -> String {
    let base = normalize_remote(base);
    let suffix = suffix.replace('\\', "/");
    let suffix = suffix.trim_start_matches('/');
    match (base.as_str(), suffix) {
        (_, "") => base,
        ("", _) => suffix.to_string(),
        ("/", _) => format!("/{}", suffix),
        _ => format!("{}/{}", base, suffix),
    }
}

/// Parent of a logical remote path, if it has one.
pub fn parent_remote(path: &str) -> Option<String> {
    let path = normalize_remote(path);
    match path.rsplit_once('/') {
        Some(("", _)) if path.len() > 1 => Some("/".to_string()),
        Some((parent, _)) if !parent.is_empty() => Some(parent.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/home/demo/", "2910_DATA/a.txt"), "/home/demo/2910_DATA/a.txt");
        assert_eq!(join_remote("share\\logs", "/x/y.txt"), "share/logs/x/y.txt");
        assert_eq!(join_remote("/", "a"), "/a");
        assert_eq!(join_remote("", "a/b"), "a/b");
        assert_eq!(join_remote("/root", ""), "/root");
    }

    #[test]
    fn test_parent_remote() {
        assert_eq!(parent_remote("/a/b/c.txt").as_deref(), Some("/a/b"));
        assert_eq!(parent_remote("/a").as_deref(), Some("/"));
        assert_eq!(parent_remote("share/dir").as_deref(), Some("share"));
        assert_eq!(parent_remote("share"), None);
        assert_eq!(parent_remote("/"), None);
    }

    #[test]
    fn test_normalize_remote() {
        assert_eq!(normalize_remote("/"), "/");
        assert_eq!(normalize_remote("/a/b/"), "/a/b");
        assert_eq!(normalize_remote("a\\b"), "a/b");
    }
}

//! Explicit SMB sessions.
//!
//! The adapter speaks to a share through the small [`SmbShare`] seam and does
//! all tree logic itself: iterative listing, ancestor-by-ancestor directory
//! creation, bottom-up deletion, and chunked streaming. A [`SmbConnector`]
//! produces share sessions; the libsmbclient backend lives behind the
//! `smb-native` feature.

use super::{join_remote, normalize_remote, RemoteAdapter, RemoteError, RemoteFile};
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Streaming buffer size for share reads and writes
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbEntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbEntry {
    pub name: String,
    pub kind: SmbEntryKind,
}

/// One authenticated session on one share.
///
/// Paths are `/`-separated and relative to the share root; `""` is the root.
pub trait SmbShare: Send {
    /// Entries of a directory, without `.` and `..`
    fn list(&mut self, dir: &str) -> io::Result<Vec<SmbEntry>>;
    fn folder_exists(&mut self, path: &str) -> io::Result<bool>;
    fn create_dir(&mut self, path: &str) -> io::Result<()>;
    fn remove_file(&mut self, path: &str) -> io::Result<()>;
    fn remove_dir(&mut self, path: &str) -> io::Result<()>;
    fn open_read<'a>(&'a mut self, path: &str) -> io::Result<Box<dyn Read + 'a>>;
    /// Open for writing, creating or truncating the file
    fn open_write<'a>(&'a mut self, path: &str) -> io::Result<Box<dyn Write + 'a>>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct SmbCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

pub trait SmbConnector: Send + Sync {
    fn connect(&self, credentials: &SmbCredentials, share: &str) -> io::Result<Box<dyn SmbShare>>;
}

/// Used when the binary is built without an SMB backend.
pub struct UnavailableSmbConnector;

impl SmbConnector for UnavailableSmbConnector {
    fn connect(&self, credentials: &SmbCredentials, share: &str) -> io::Result<Box<dyn SmbShare>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "no SMB backend compiled in (enable `smb-native`) for //{}/{}",
                credentials.host, share
            ),
        ))
    }
}

pub fn default_connector() -> Arc<dyn SmbConnector> {
    #[cfg(feature = "smb-native")]
    {
        Arc::new(super::smb_native::PavaoConnector)
    }
    #[cfg(not(feature = "smb-native"))]
    {
        Arc::new(UnavailableSmbConnector)
    }
}

/// Split a logical path into share name and in-share path.
pub fn split_share(logical: &str) -> (String, String) {
    let normalized = normalize_remote(logical);
    let trimmed = normalized.trim_matches('/');
    match trimmed.split_once('/') {
        Some((share, rest)) => (share.to_string(), rest.trim_matches('/').to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

fn parent_in_share(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

fn join_in_share(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Copy in fixed-size chunks, writing only the bytes actually read.
pub fn copy_chunked(reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<u64> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Create `path` inside the share, walking up to the first existing ancestor
/// and then creating the missing ones top down.
pub fn ensure_dirs(share: &mut dyn SmbShare, path: &str) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut cursor = Some(path.trim_matches('/'));

    while let Some(dir) = cursor.filter(|d| !d.is_empty()) {
        if share.folder_exists(dir)? {
            break;
        }
        missing.push(dir.to_string());
        cursor = parent_in_share(dir);
    }

    while let Some(dir) = missing.pop() {
        share.create_dir(&dir)?;
    }
    Ok(())
}

/// Files below `dir` in depth-first name order, plus every subdirectory.
fn walk(share: &mut dyn SmbShare, dir: &str) -> io::Result<(Vec<String>, Vec<String>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut pending = vec![dir.to_string()];

    while let Some(current) = pending.pop() {
        let mut entries = share.list(&current)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = join_in_share(&current, &entry.name);
            match entry.kind {
                SmbEntryKind::File => files.push(path),
                SmbEntryKind::Directory => subdirs.push(path),
            }
        }
        dirs.extend(subdirs.iter().cloned());
        pending.extend(subdirs.into_iter().rev());
    }

    Ok((files, dirs))
}

/// Remove everything below `dir`, children before parents. The directory
/// itself is kept.
pub fn clear_dir(share: &mut dyn SmbShare, dir: &str) -> io::Result<()> {
    let (files, mut dirs) = walk(share, dir)?;
    for file in &files {
        share.remove_file(file)?;
    }
    dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
    for sub in &dirs {
        share.remove_dir(sub)?;
    }
    Ok(())
}

type SharedSession = Arc<Mutex<Box<dyn SmbShare>>>;

pub struct SmbProtocolAdapter {
    credentials: SmbCredentials,
    share_name: String,
    connector: Arc<dyn SmbConnector>,
    session: Option<SharedSession>,
}

impl SmbProtocolAdapter {
    /// `logical_root` is any path on the share; its first segment names the share.
    pub fn new(
        credentials: SmbCredentials,
        logical_root: &str,
        connector: Arc<dyn SmbConnector>,
    ) -> Self {
        let (share_name, _) = split_share(logical_root);
        Self {
            credentials,
            share_name,
            connector,
            session: None,
        }
    }

    fn in_share(&self, logical: &str) -> Result<String, RemoteError> {
        let (share, path) = split_share(logical);
        if share.eq_ignore_ascii_case(&self.share_name) {
            Ok(path)
        } else {
            Err(RemoteError::Protocol(format!(
                "{} is not on share {}",
                logical, self.share_name
            )))
        }
    }

    async fn with_share<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SmbShare) -> io::Result<T> + Send + 'static,
    {
        let session = self.session.clone().ok_or(RemoteError::NotConnected)?;
        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| RemoteError::Protocol("SMB session lock poisoned".to_string()))?;
            op(&mut **guard).map_err(RemoteError::from)
        })
        .await
        .map_err(|e| RemoteError::Join(e.to_string()))?
    }
}

#[async_trait]
impl RemoteAdapter for SmbProtocolAdapter {
    fn describe(&self) -> String {
        format!("smb://{}/{}", self.credentials.host, self.share_name)
    }

    async fn connect(&mut self) -> Result<(), RemoteError> {
        if self.session.is_some() {
            return Ok(());
        }
        let connector = self.connector.clone();
        let credentials = self.credentials.clone();
        let share_name = self.share_name.clone();
        let share = tokio::task::spawn_blocking(move || connector.connect(&credentials, &share_name))
            .await
            .map_err(|e| RemoteError::Join(e.to_string()))?
            .map_err(|e| RemoteError::Connect {
                host: self.credentials.host.clone(),
                port: self.credentials.port,
                reason: e.to_string(),
            })?;

        info!(host = %self.credentials.host, share = %self.share_name, "SMB session established");
        self.session = Some(Arc::new(Mutex::new(share)));
        Ok(())
    }

    async fn list_recursive(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let root_logical = normalize_remote(root);
        let root_in_share = self.in_share(&root_logical)?;
        let files = self
            .with_share(move |share| {
                if !root_in_share.is_empty() && !share.folder_exists(&root_in_share)? {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("folder {} does not exist", root_in_share),
                    ));
                }
                let (files, _) = walk(share, &root_in_share)?;
                Ok(files
                    .into_iter()
                    .map(|path| {
                        let relative = path
                            .strip_prefix(root_in_share.as_str())
                            .unwrap_or(&path)
                            .trim_start_matches('/')
                            .to_string();
                        (path, relative)
                    })
                    .collect::<Vec<_>>())
            })
            .await?;

        Ok(files
            .into_iter()
            .map(|(_, relative)| RemoteFile {
                path: join_remote(&root_logical, &relative),
                relative,
            })
            .collect())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, RemoteError> {
        let source = self.in_share(remote)?;
        let local = local.to_path_buf();
        self.with_share(move |share| {
            // Nothing may appear at `local` unless the copy completes; a stray
            // file would count as a collision on the next pass
            let mut reader = share.open_read(&source)?;
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut target = File::create(&local)?;
            match copy_chunked(&mut reader, &mut target) {
                Ok(copied) => Ok(copied),
                Err(e) => {
                    drop(target);
                    let _ = std::fs::remove_file(&local);
                    Err(e)
                },
            }
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let target = self.in_share(remote)?;
        let local = local.to_path_buf();
        self.with_share(move |share| {
            if let Some(parent) = parent_in_share(&target) {
                ensure_dirs(share, parent)?;
            }
            let mut source = File::open(&local)?;
            let mut writer = share.open_write(&target)?;
            copy_chunked(&mut source, &mut writer)
        })
        .await
    }

    async fn remove_tree(&self, root: &str) -> Result<(), RemoteError> {
        let root = self.in_share(root)?;
        self.with_share(move |share| {
            clear_dir(share, &root)?;
            // The share root itself cannot be removed
            if !root.is_empty() {
                share.remove_dir(&root)?;
            }
            Ok(())
        })
        .await?;
        debug!(share = %self.share_name, "Removed share tree");
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        let path = self.in_share(path)?;
        self.with_share(move |share| ensure_dirs(share, &path)).await
    }

    async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let result = tokio::task::spawn_blocking(move || match session.lock() {
            Ok(mut share) => share.close(),
            Err(_) => Ok(()),
        })
        .await;
        match result {
            Ok(Ok(())) => debug!(share = %self.share_name, "SMB session closed"),
            Ok(Err(e)) => warn!(share = %self.share_name, error = %e, "Failed to close SMB session"),
            Err(e) => warn!(share = %self.share_name, error = %e, "SMB disconnect task failed"),
        }
    }
}

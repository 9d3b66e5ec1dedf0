//! SFTP transport over `ssh2`.
//!
//! `ssh2` is blocking, so every operation runs on the blocking pool with the
//! session behind a mutex. One adapter owns one session for the lifetime of
//! a station's task.

use super::{normalize_remote, parent_remote, RemoteAdapter, RemoteError, RemoteFile};
use async_trait::async_trait;
use ssh2::{Session, Sftp};
use std::fs::File;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection attempts before a station is given up for this pass
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Base delay between connection attempts, multiplied by the attempt number
pub const RETRY_DELAY_SECS: u64 = 2;

#[derive(Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

struct SftpSession {
    session: Session,
    sftp: Sftp,
}

pub struct SftpAdapter {
    config: SftpConfig,
    session: Option<Arc<Mutex<SftpSession>>>,
}

impl SftpAdapter {
    pub fn new(config: SftpConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn open_session(config: &SftpConfig) -> Result<SftpSession, RemoteError> {
        let connect_error = |reason: String| RemoteError::Connect {
            host: config.host.clone(),
            port: config.port,
            reason,
        };

        let address = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| connect_error("host did not resolve".to_string()))?;

        let tcp = TcpStream::connect_timeout(&address, config.timeout)
            .map_err(|e| connect_error(e.to_string()))?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;

        let mut session = Session::new()?;
        session.set_timeout(u32::try_from(config.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&config.username, &config.password)?;

        if !session.authenticated() {
            return Err(RemoteError::Auth {
                user: config.username.clone(),
                host: config.host.clone(),
            });
        }

        let sftp = session.sftp()?;
        Ok(SftpSession { session, sftp })
    }

    /// Run `op` against the live session on the blocking pool.
    async fn with_sftp<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, RemoteError> + Send + 'static,
    {
        let session = self.session.clone().ok_or(RemoteError::NotConnected)?;
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| RemoteError::Protocol("SFTP session lock poisoned".to_string()))?;
            op(&guard.sftp)
        })
        .await
        .map_err(|e| RemoteError::Join(e.to_string()))?
    }
}

#[async_trait]
impl RemoteAdapter for SftpAdapter {
    fn describe(&self) -> String {
        format!("sftp://{}:{}", self.config.host, self.config.port)
    }

    async fn connect(&mut self) -> Result<(), RemoteError> {
        if self.session.is_some() {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            let config = self.config.clone();
            let result = tokio::task::spawn_blocking(move || Self::open_session(&config))
                .await
                .map_err(|e| RemoteError::Join(e.to_string()))?;

            match result {
                Ok(session) => {
                    info!(host = %self.config.host, port = self.config.port, "SFTP session established");
                    self.session = Some(Arc::new(Mutex::new(session)));
                    return Ok(());
                },
                Err(e @ RemoteError::Auth { .. }) => return Err(e),
                Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                    let delay = RETRY_DELAY_SECS * u64::from(attempt);
                    warn!(
                        host = %self.config.host,
                        attempt,
                        error = %e,
                        "SFTP connect failed, retrying in {}s",
                        delay
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_recursive(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let root = normalize_remote(root);
        self.with_sftp(move |sftp| list_tree(sftp, &root)).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, RemoteError> {
        let remote = remote.to_string();
        let local = local.to_path_buf();
        self.with_sftp(move |sftp| {
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut source = sftp.open(Path::new(&remote))?;
            let mut target = File::create(&local)?;
            match io::copy(&mut source, &mut target).and_then(|copied| target.flush().map(|_| copied)) {
                Ok(copied) => Ok(copied),
                Err(e) => {
                    drop(target);
                    let _ = std::fs::remove_file(&local);
                    Err(e.into())
                },
            }
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let remote = normalize_remote(remote);
        let local = local.to_path_buf();
        self.with_sftp(move |sftp| {
            if let Some(parent) = parent_remote(&remote) {
                make_dirs(sftp, &parent)?;
            }
            let mut source = File::open(&local)?;
            let mut target = sftp.create(Path::new(&remote))?;
            let copied = io::copy(&mut source, &mut target)?;
            target.flush()?;
            Ok(copied)
        })
        .await
    }

    async fn remove_tree(&self, root: &str) -> Result<(), RemoteError> {
        let root = normalize_remote(root);
        self.with_sftp(move |sftp| remove_tree(sftp, &root)).await
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        let path = normalize_remote(path);
        self.with_sftp(move |sftp| make_dirs(sftp, &path)).await
    }

    async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let host = self.config.host.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| RemoteError::Protocol("SFTP session lock poisoned".to_string()))?;
            guard
                .session
                .disconnect(None, "dlsync session closed", None)
                .map_err(RemoteError::from)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(host = %host, "SFTP session closed"),
            Ok(Err(e)) => warn!(host = %host, error = %e, "Failed to close SFTP session"),
            Err(e) => warn!(host = %host, error = %e, "SFTP disconnect task failed"),
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_dot_entry(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some(".") | Some("..") | None
    )
}

/// Depth-first walk: a directory's files, then its subdirectories in name
/// order.
fn list_tree(sftp: &Sftp, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
    let root_path = PathBuf::from(root);
    let mut files = Vec::new();
    let mut pending = vec![root_path.clone()];

    while let Some(dir) = pending.pop() {
        let mut entries = sftp.readdir(&dir)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut subdirs = Vec::new();
        for (path, stat) in entries {
            if is_dot_entry(&path) {
                continue;
            }
            if stat.is_dir() {
                subdirs.push(path);
            } else if stat.is_file() {
                let relative = path
                    .strip_prefix(&root_path)
                    .map(path_string)
                    .unwrap_or_else(|_| path_string(&path));
                files.push(RemoteFile {
                    path: path_string(&path),
                    relative,
                });
            }
        }

        pending.extend(subdirs.into_iter().rev());
    }

    Ok(files)
}

fn remove_tree(sftp: &Sftp, root: &str) -> Result<(), RemoteError> {
    let root_path = PathBuf::from(root);
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut pending = vec![root_path.clone()];

    while let Some(dir) = pending.pop() {
        for (path, stat) in sftp.readdir(&dir)? {
            if is_dot_entry(&path) {
                continue;
            }
            if stat.is_dir() {
                dirs.push(path.clone());
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }

    for file in &files {
        sftp.unlink(file)?;
    }

    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in &dirs {
        sftp.rmdir(dir)?;
    }

    sftp.rmdir(&root_path)?;
    debug!(root, files = files.len(), dirs = dirs.len(), "Removed remote tree");
    Ok(())
}

/// Create `path` and missing ancestors, top down.
fn make_dirs(sftp: &Sftp, path: &str) -> Result<(), RemoteError> {
    let mut current = if path.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(segment);

        let dir = Path::new(&current);
        match sftp.stat(dir) {
            Ok(stat) if stat.is_dir() => continue,
            Ok(_) => {
                return Err(RemoteError::Protocol(format!(
                    "{} exists and is not a directory",
                    current
                )))
            },
            Err(_) => {
                if let Err(e) = sftp.mkdir(dir, 0o755) {
                    // Another writer may have created it in between
                    if !sftp.stat(dir).map(|s| s.is_dir()).unwrap_or(false) {
                        return Err(e.into());
                    }
                }
            },
        }
    }

    Ok(())
}

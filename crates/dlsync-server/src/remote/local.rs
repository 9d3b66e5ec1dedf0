//! Shares that are already mounted on this host.

use super::{join_remote, normalize_remote, RemoteAdapter, RemoteError, RemoteFile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Treats a local directory as the remote namespace: the logical path
/// `share/dir/file` maps to `<base>/share/dir/file`.
#[derive(Debug, Clone)]
pub struct LocalMountAdapter {
    base: PathBuf,
}

impl LocalMountAdapter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn resolve(&self, logical: &str) -> PathBuf {
        let logical = normalize_remote(logical);
        let relative = logical.trim_start_matches('/');
        if relative.is_empty() {
            self.base.clone()
        } else {
            self.base.join(relative)
        }
    }
}

#[async_trait]
impl RemoteAdapter for LocalMountAdapter {
    fn describe(&self) -> String {
        format!("mount://{}", self.base.display())
    }

    async fn connect(&mut self) -> Result<(), RemoteError> {
        if tokio::fs::metadata(&self.base).await?.is_dir() {
            Ok(())
        } else {
            Err(RemoteError::NotFound(self.base.display().to_string()))
        }
    }

    async fn list_recursive(&self, root: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let root_logical = normalize_remote(root);
        let root_path = self.resolve(&root_logical);

        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root_path).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let message = e.to_string();
                    e.into_io_error()
                        .map(RemoteError::Io)
                        .unwrap_or(RemoteError::Protocol(message))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&root_path)
                    .map_err(|e| RemoteError::Protocol(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(RemoteFile {
                    path: join_remote(&root_logical, &relative),
                    relative,
                });
            }
            Ok(files)
        })
        .await
        .map_err(|e| RemoteError::Join(e.to_string()))?
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, RemoteError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::copy(self.resolve(remote), local).await?)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let target = self.resolve(remote);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::copy(local, target).await?)
    }

    async fn remove_tree(&self, root: &str) -> Result<(), RemoteError> {
        let path = self.resolve(root);
        tokio::fs::remove_dir_all(&path).await?;
        debug!(path = %path.display(), "Removed mounted tree");
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        Ok(tokio::fs::create_dir_all(self.resolve(path)).await?)
    }

    async fn disconnect(&mut self) {}
}

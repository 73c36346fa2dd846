mod backup;

pub use backup::{BackupInfo, BackupService};

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{BoardError, Result};
use crate::logging::LogType;
use crate::registry::Registry;

/// One directory listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Resolve a relative path against a server root, refusing anything that
/// would escape it. Purely lexical so it also covers paths that do not
/// exist yet.
pub(crate) fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() {
        return Err(BoardError::AccessDenied);
    }

    let mut resolved = root.to_path_buf();
    let mut depth: usize = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(BoardError::AccessDenied);
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BoardError::AccessDenied);
            }
        }
    }
    Ok(resolved)
}

/// File operations scoped to a server's private directory.
#[derive(Debug, Clone)]
pub struct FileService {
    registry: Arc<Registry>,
}

impl FileService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn resolve(&self, server_id: &str, relative: &str) -> Result<(PathBuf, PathBuf)> {
        let record = self.registry.get(server_id)?;
        let resolved = resolve_within(&record.directory, relative)?;
        Ok((record.directory, resolved))
    }

    pub async fn list_files(&self, server_id: &str, directory: &str) -> Result<Vec<FileEntry>> {
        let (_, dir_path) = self.resolve(server_id, directory)?;

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&dir_path).await?;
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_directory: metadata.is_dir(),
                size: metadata.len(),
                modified,
            });
        }

        Ok(entries)
    }

    pub async fn read_file(&self, server_id: &str, file_path: &str) -> Result<String> {
        let (_, path) = self.resolve(server_id, file_path)?;
        Ok(tokio::fs::read_to_string(&path).await?)
    }

    pub async fn write_file(
        &self,
        server_id: &str,
        file_path: &str,
        content: &str,
    ) -> Result<()> {
        let (_, path) = self.resolve(server_id, file_path)?;
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    pub async fn delete_file(&self, server_id: &str, file_path: &str) -> Result<()> {
        let (_, path) = self.resolve(server_id, file_path)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    /// Recursively delete a subdirectory. The server root itself is
    /// refused.
    pub async fn delete_directory(&self, server_id: &str, dir_path: &str) -> Result<()> {
        let (root, path) = self.resolve(server_id, dir_path)?;
        if path == root {
            return Err(BoardError::AccessDenied);
        }
        tokio::fs::remove_dir_all(&path).await?;
        Ok(())
    }

    /// Copy a server file out into the store's downloads directory and
    /// return the destination path.
    pub async fn download_file(&self, server_id: &str, file_path: &str) -> Result<PathBuf> {
        let (_, path) = self.resolve(server_id, file_path)?;

        let file_name = path
            .file_name()
            .ok_or(BoardError::AccessDenied)?
            .to_os_string();
        let dest = self.registry.store().downloads_dir().join(file_name);

        tokio::fs::copy(&path, &dest).await?;
        debug!(
            log_type = LogType::Files.as_str(),
            "Copied {:?} -> {:?}", path, dest
        );
        Ok(dest)
    }

    /// Copy an external file into a directory of the server. Returns the
    /// destination path.
    pub async fn upload_file(
        &self,
        server_id: &str,
        directory: &str,
        source: &Path,
    ) -> Result<PathBuf> {
        let (_, dir_path) = self.resolve(server_id, directory)?;
        if !dir_path.is_dir() {
            return Err(BoardError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Directory does not exist",
            )));
        }

        let file_name = source
            .file_name()
            .ok_or(BoardError::AccessDenied)?
            .to_os_string();
        let dest = dir_path.join(file_name);

        tokio::fs::copy(source, &dest).await?;
        debug!(
            log_type = LogType::Files.as_str(),
            "Uploaded {:?} -> {:?}", source, dest
        );
        Ok(dest)
    }
}

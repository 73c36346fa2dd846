use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{BoardError, Result};
use crate::logging::LogType;
use crate::registry::ServerRecord;
use crate::supervisor::Supervisor;

/// Listing entry for one stored backup.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub id: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub size: u64,
    pub version: String,
}

/// Sidecar written next to each archive.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupMetadata {
    id: String,
    name: String,
    date: DateTime<Utc>,
    server_id: String,
    server_name: String,
    version: String,
    size: u64,
}

/// Zip-archive backups of a server's directory, stored under
/// `backups/<server id>/` with a JSON metadata sidecar per archive.
/// Create and restore both require the server to be stopped.
#[derive(Clone)]
pub struct BackupService {
    supervisor: Arc<Supervisor>,
}

impl BackupService {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    fn server_backups_dir(&self, server_id: &str) -> PathBuf {
        self.supervisor.store().backups_dir().join(server_id)
    }

    fn ensure_stopped(&self, server_id: &str) -> Result<()> {
        if self.supervisor.is_server_running(server_id) {
            return Err(BoardError::ServerMustBeStopped);
        }
        Ok(())
    }

    pub async fn list_backups(&self, server_id: &str) -> Result<Vec<BackupInfo>> {
        self.supervisor.get_server(server_id)?;
        let backups_dir = self.server_backups_dir(server_id);
        if !backups_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let mut reader = tokio::fs::read_dir(&backups_dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let metadata: BackupMetadata =
                match serde_json::from_str(&tokio::fs::read_to_string(&path).await?) {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(
                            log_type = LogType::Backup.as_str(),
                            "Skipping corrupt backup metadata {:?}: {}", path, e
                        );
                        continue;
                    }
                };

            let zip_path = path.with_extension("zip");
            let size = tokio::fs::metadata(&zip_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);

            backups.push(BackupInfo {
                id: metadata.id,
                name: metadata.name,
                date: metadata.date,
                size,
                version: metadata.version,
            });
        }

        backups.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(backups)
    }

    pub async fn create_backup(&self, server_id: &str, name: &str) -> Result<BackupInfo> {
        let record = self.supervisor.get_server(server_id)?;
        self.ensure_stopped(server_id)?;

        let backups_dir = self.server_backups_dir(server_id);
        tokio::fs::create_dir_all(&backups_dir).await?;

        let backup_id = format!("backup-{}", Utc::now().timestamp_millis());
        let zip_path = backups_dir.join(format!("{backup_id}.zip"));
        let metadata_path = backups_dir.join(format!("{backup_id}.json"));

        info!(
            log_type = LogType::Backup.as_str(),
            "Creating backup '{}' of server '{}'", name, record.name
        );

        let result = self
            .write_backup(&record.directory, &zip_path, &metadata_path, &backup_id, name, &record)
            .await;

        match result {
            Ok(info) => Ok(info),
            Err(e) => {
                // Leave no half-written archive behind.
                let _ = tokio::fs::remove_file(&zip_path).await;
                let _ = tokio::fs::remove_file(&metadata_path).await;
                Err(e)
            }
        }
    }

    async fn write_backup(
        &self,
        source_dir: &Path,
        zip_path: &Path,
        metadata_path: &Path,
        backup_id: &str,
        name: &str,
        record: &ServerRecord,
    ) -> Result<BackupInfo> {
        let source = source_dir.to_path_buf();
        let archive = zip_path.to_path_buf();
        tokio::task::spawn_blocking(move || zip_directory(&source, &archive))
            .await
            .map_err(|e| BoardError::process(format!("Backup task failed: {e}")))??;

        let size = tokio::fs::metadata(zip_path).await?.len();
        let metadata = BackupMetadata {
            id: backup_id.to_string(),
            name: name.to_string(),
            date: Utc::now(),
            server_id: record.id.clone(),
            server_name: record.name.clone(),
            version: record.version.clone(),
            size,
        };
        tokio::fs::write(metadata_path, serde_json::to_string_pretty(&metadata)?).await?;

        Ok(BackupInfo {
            id: metadata.id,
            name: metadata.name,
            date: metadata.date,
            size,
            version: metadata.version,
        })
    }

    /// Replace the server directory's contents with the archive, keeping
    /// the server binary alive across the swap.
    pub async fn restore_backup(&self, server_id: &str, backup_id: &str) -> Result<()> {
        let record = self.supervisor.get_server(server_id)?;
        self.ensure_stopped(server_id)?;

        let backups_dir = self.server_backups_dir(server_id);
        let zip_path = backups_dir.join(format!("{backup_id}.zip"));
        let metadata_path = backups_dir.join(format!("{backup_id}.json"));

        if !zip_path.is_file() || !metadata_path.is_file() {
            return Err(BoardError::BackupNotFound(backup_id.to_string()));
        }

        info!(
            log_type = LogType::Backup.as_str(),
            "Restoring backup {} onto server '{}'", backup_id, record.name
        );

        // Stage the binary aside so a backup taken before a re-download
        // cannot leave the server unlaunchable.
        let staging_dir = self.supervisor.store().downloads_dir().join("restore-staging");
        tokio::fs::create_dir_all(&staging_dir).await?;
        let staged_binary = staging_dir.join(&record.binary_file);
        tokio::fs::copy(record.binary_path(), &staged_binary)
            .await
            .map_err(|e| BoardError::RestoreFailed(format!("Could not stage binary: {e}")))?;

        let restore = async {
            let mut entries = tokio::fs::read_dir(&record.directory).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.metadata().await?.is_dir() {
                    tokio::fs::remove_dir_all(&path).await?;
                } else {
                    tokio::fs::remove_file(&path).await?;
                }
            }

            let archive = zip_path.clone();
            let target = record.directory.clone();
            tokio::task::spawn_blocking(move || extract_archive(&archive, &target))
                .await
                .map_err(|e| BoardError::process(format!("Restore task failed: {e}")))??;

            if !record.binary_path().is_file() {
                tokio::fs::copy(&staged_binary, record.binary_path()).await?;
            }
            Ok::<(), BoardError>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&staged_binary).await;

        restore.map_err(|e| match e {
            BoardError::RestoreFailed(_) => e,
            other => BoardError::RestoreFailed(other.to_string()),
        })
    }

    pub async fn delete_backup(&self, server_id: &str, backup_id: &str) -> Result<()> {
        self.supervisor.get_server(server_id)?;

        let backups_dir = self.server_backups_dir(server_id);
        for ext in ["zip", "json"] {
            let path = backups_dir.join(format!("{backup_id}.{ext}"));
            if path.is_file() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

fn zip_directory(source: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut reader = File::open(entry.path())?;
            io::copy(&mut reader, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

fn extract_archive(archive_path: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    archive.extract(target)?;
    Ok(())
}

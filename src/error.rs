use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Server {0} not found")]
    NotFound(String),

    #[error("Server {0} is already running")]
    AlreadyRunning(String),

    #[error("Server {0} is not running")]
    NotRunning(String),

    #[error("Cannot send command - server {0} is not accepting input")]
    InputClosed(String),

    #[error("Access denied: path is outside server directory")]
    AccessDenied,

    #[error("Server must be stopped first")]
    ServerMustBeStopped,

    #[error("Server binary not found: {0}")]
    BinaryMissing(PathBuf),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Backup {0} not found")]
    BackupNotFound(String),

    #[error("Failed to restore backup: {0}")]
    RestoreFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Process error: {0}")]
    Process(String),
}

impl BoardError {
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;

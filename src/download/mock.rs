use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{BoardError, Result};

use super::{DownloadProgress, ServerDownloader};

/// In-memory downloader for tests and embedding without network access.
/// Writes a placeholder artifact and replays a short progress sequence.
#[derive(Clone, Default)]
pub struct MockDownloader {
    fail: bool,
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A downloader that fails every request, for error-path tests.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requested_versions(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerDownloader for MockDownloader {
    async fn download_server(
        &self,
        version_id: &str,
        destination_dir: &Path,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<String> {
        self.requested.lock().unwrap().push(version_id.to_string());

        if self.fail {
            return Err(BoardError::DownloadFailed(format!(
                "Version {version_id} not found"
            )));
        }

        tokio::fs::create_dir_all(destination_dir).await?;
        let payload = format!("mock server {version_id}");
        tokio::fs::write(destination_dir.join("server.jar"), &payload).await?;

        let total = payload.len() as u64;
        progress(DownloadProgress {
            percentage: 0,
            downloaded: 0,
            total,
        });
        progress(DownloadProgress {
            percentage: 100,
            downloaded: total,
            total,
        });

        Ok("server.jar".to_string())
    }
}

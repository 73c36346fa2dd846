mod mock;
mod mojang;

pub use mock::MockDownloader;
pub use mojang::{MojangDownloader, VersionEntry};

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Progress of a server-binary download, forwarded to the UI as events.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DownloadProgress {
    pub percentage: u8,
    pub downloaded: u64,
    pub total: u64,
}

/// Resolves a version identifier to a server binary on disk.
#[async_trait]
pub trait ServerDownloader: Send + Sync {
    /// Download the server binary for `version_id` into `destination_dir`,
    /// reporting progress through `progress`. Returns the file name of
    /// the artifact written inside `destination_dir`.
    async fn download_server(
        &self,
        version_id: &str,
        destination_dir: &Path,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<String>;
}

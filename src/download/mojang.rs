use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{BoardError, Result};
use crate::logging::LogType;

use super::{DownloadProgress, ServerDownloader};

const VERSION_MANIFEST_URL: &str =
    "https://launchermeta.mojang.com/mc/game/version_manifest.json";
const MANIFEST_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const SERVER_ARTIFACT_NAME: &str = "server.jar";

/// A single entry in the Mojang version manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    #[serde(rename = "releaseTime")]
    pub release_time: String,
}

#[derive(Debug, Deserialize)]
struct VersionManifest {
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionDetails {
    downloads: Option<VersionDownloads>,
}

#[derive(Debug, Deserialize)]
struct VersionDownloads {
    server: Option<ServerDownload>,
}

#[derive(Debug, Deserialize)]
struct ServerDownload {
    url: String,
    size: u64,
}

/// Downloader backed by the Mojang launcher manifest. The manifest is
/// cached for an hour; pre-release and release-candidate ids are
/// filtered out.
pub struct MojangDownloader {
    client: reqwest::Client,
    manifest_url: String,
    cache: Mutex<Option<(Instant, Vec<VersionEntry>)>>,
}

impl MojangDownloader {
    pub fn new() -> Self {
        Self::with_manifest_url(VERSION_MANIFEST_URL)
    }

    pub fn with_manifest_url(manifest_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            manifest_url: manifest_url.into(),
            cache: Mutex::new(None),
        }
    }

    pub async fn available_versions(&self) -> Result<Vec<VersionEntry>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some((fetched_at, versions)) = cache.as_ref()
                && fetched_at.elapsed() < MANIFEST_CACHE_TTL
            {
                return Ok(versions.clone());
            }
        }

        info!(
            log_type = LogType::Download.as_str(),
            "Fetching version manifest"
        );
        let manifest: VersionManifest = self
            .client
            .get(&self.manifest_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut versions: Vec<VersionEntry> = manifest
            .versions
            .into_iter()
            .filter(|v| !v.id.contains("pre") && !v.id.contains("rc"))
            .collect();
        versions.sort_by(|a, b| b.release_time.cmp(&a.release_time));

        debug!(
            log_type = LogType::Download.as_str(),
            "Manifest loaded with {} versions",
            versions.len()
        );

        *self.cache.lock().unwrap() = Some((Instant::now(), versions.clone()));
        Ok(versions)
    }

    /// Latest stable release, if the manifest lists one.
    pub async fn recommended_version(&self) -> Result<Option<VersionEntry>> {
        let versions = self.available_versions().await?;
        Ok(versions.into_iter().find(|v| v.version_type == "release"))
    }
}

impl Default for MojangDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerDownloader for MojangDownloader {
    async fn download_server(
        &self,
        version_id: &str,
        destination_dir: &Path,
        progress: &(dyn Fn(DownloadProgress) + Send + Sync),
    ) -> Result<String> {
        let versions = self.available_versions().await?;
        let version = versions
            .iter()
            .find(|v| v.id == version_id)
            .ok_or_else(|| {
                BoardError::DownloadFailed(format!("Version {version_id} not found"))
            })?;

        let details: VersionDetails = self
            .client
            .get(&version.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let server = details
            .downloads
            .and_then(|d| d.server)
            .ok_or_else(|| {
                BoardError::DownloadFailed(format!(
                    "No server download available for version {version_id}"
                ))
            })?;

        tokio::fs::create_dir_all(destination_dir).await?;
        let artifact_path = destination_dir.join(SERVER_ARTIFACT_NAME);

        info!(
            log_type = LogType::Download.as_str(),
            "Downloading server {} ({} bytes) to {:?}", version_id, server.size, artifact_path
        );

        let response = self.client.get(&server.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BoardError::DownloadFailed(format!(
                "HTTP {status} for {}",
                server.url
            )));
        }

        progress(DownloadProgress {
            percentage: 0,
            downloaded: 0,
            total: server.size,
        });

        let mut file = tokio::fs::File::create(&artifact_path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if server.size > 0 {
                progress(DownloadProgress {
                    percentage: (downloaded * 100 / server.size).min(100) as u8,
                    downloaded,
                    total: server.size,
                });
            }
        }
        file.flush().await?;

        progress(DownloadProgress {
            percentage: 100,
            downloaded: server.size,
            total: server.size,
        });

        Ok(SERVER_ARTIFACT_NAME.to_string())
    }
}

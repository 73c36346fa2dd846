use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed server. A record is `Stopped` exactly when
/// the supervisor tracks no live process for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed server, as persisted in the store document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub directory: PathBuf,
    pub binary_file: String,
    pub port: u16,
    /// Maximum heap size in megabytes.
    pub memory: u32,
    pub gamemode: String,
    pub difficulty: String,
    pub max_players: u32,
    #[serde(default)]
    pub motd: Option<String>,
    #[serde(default = "default_true")]
    pub pvp: bool,
    #[serde(default)]
    pub command_blocks_enabled: bool,
    #[serde(default = "default_true")]
    pub online_mode: bool,
    pub status: ServerStatus,
    #[serde(default)]
    pub last_started: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl ServerRecord {
    pub fn binary_path(&self) -> PathBuf {
        self.directory.join(&self.binary_file)
    }

    pub fn motd_or_default(&self) -> String {
        self.motd
            .clone()
            .unwrap_or_else(|| format!("{} - Minecraft Server", self.name))
    }
}

/// Parameters for creating a new server. Only `name` and `version` are
/// required; the rest fall back to vanilla defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerConfig {
    pub name: String,
    pub version: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default = "default_gamemode")]
    pub gamemode: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default)]
    pub motd: Option<String>,
}

/// Mutable settings, applied only while the server is stopped.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub name: String,
    pub port: u16,
    pub memory: u32,
    pub gamemode: String,
    pub difficulty: String,
    pub max_players: u32,
    #[serde(default)]
    pub motd: Option<String>,
    #[serde(default = "default_true")]
    pub pvp: bool,
    #[serde(default)]
    pub command_blocks_enabled: bool,
    #[serde(default = "default_true")]
    pub online_mode: bool,
}

fn default_port() -> u16 {
    25565
}

fn default_memory() -> u32 {
    1024
}

fn default_gamemode() -> String {
    "survival".to_string()
}

fn default_difficulty() -> String {
    "normal".to_string()
}

fn default_max_players() -> u32 {
    20
}

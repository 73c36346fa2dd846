use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::logging::LogType;
use crate::registry::ServerRecord;

/// The persisted document: the full server list plus the Java runtime
/// path. There is no partial-update API; every save replaces the whole
/// document atomically.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    #[serde(default)]
    java_path: Option<String>,
    #[serde(default)]
    servers: Vec<ServerRecord>,
}

/// JSON-backed configuration store. Owns the on-disk layout under a base
/// directory: `config.json`, `servers/`, `backups/` and `downloads/`.
#[derive(Debug)]
pub struct ConfigStore {
    base_dir: PathBuf,
    config_path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl ConfigStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let config_path = base_dir.join("config.json");

        for dir in ["servers", "backups", "downloads"] {
            fs::create_dir_all(base_dir.join(dir))?;
        }

        let document = match fs::read_to_string(&config_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        log_type = LogType::Store.as_str(),
                        "Corrupt store document at {:?}, starting empty: {}", config_path, e
                    );
                    StoreDocument::default()
                }
            },
            Err(_) => StoreDocument::default(),
        };

        debug!(
            log_type = LogType::Store.as_str(),
            "Opened config store at {:?} with {} servers",
            config_path,
            document.servers.len()
        );

        Ok(Self {
            base_dir,
            config_path,
            document: Mutex::new(document),
        })
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.base_dir.join("servers")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.base_dir.join("downloads")
    }

    pub fn load_servers(&self) -> Vec<ServerRecord> {
        self.document.lock().unwrap().servers.clone()
    }

    pub fn save_servers(&self, servers: &[ServerRecord]) -> Result<()> {
        let mut document = self.document.lock().unwrap();
        document.servers = servers.to_vec();
        self.write_document(&document)
    }

    pub fn java_path(&self) -> String {
        self.document
            .lock()
            .unwrap()
            .java_path
            .clone()
            .unwrap_or_else(|| "java".to_string())
    }

    pub fn set_java_path(&self, path: Option<String>) -> Result<()> {
        let mut document = self.document.lock().unwrap();
        document.java_path = path;
        self.write_document(&document)
    }

    // Atomic full replace: write next to the target, then rename over it.
    fn write_document(&self, document: &StoreDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        let tmp_path = self.config_path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.config_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::registry::ServerStatus;

    fn record(id: &str, dir: &Path) -> ServerRecord {
        ServerRecord {
            id: id.to_string(),
            name: format!("Server {id}"),
            version: "1.20.1".to_string(),
            directory: dir.to_path_buf(),
            binary_file: "server.jar".to_string(),
            port: 25565,
            memory: 1024,
            gamemode: "survival".to_string(),
            difficulty: "normal".to_string(),
            max_players: 20,
            motd: None,
            pvp: true,
            command_blocks_enabled: false,
            online_mode: true,
            status: ServerStatus::Stopped,
            last_started: None,
            created: Utc::now(),
        }
    }

    #[test]
    fn test_creates_layout_and_persists_servers() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::open(temp.path()).unwrap();

        assert!(store.servers_dir().is_dir());
        assert!(store.backups_dir().is_dir());
        assert!(store.downloads_dir().is_dir());

        let records = vec![record("one", temp.path())];
        store.save_servers(&records).unwrap();

        let reopened = ConfigStore::open(temp.path()).unwrap();
        let loaded = reopened.load_servers();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "one");
    }

    #[test]
    fn test_java_path_defaults_and_updates() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::open(temp.path()).unwrap();

        assert_eq!(store.java_path(), "java");
        store.set_java_path(Some("/opt/jdk/bin/java".to_string())).unwrap();
        assert_eq!(store.java_path(), "/opt/jdk/bin/java");

        let reopened = ConfigStore::open(temp.path()).unwrap();
        assert_eq!(reopened.java_path(), "/opt/jdk/bin/java");
    }

    #[test]
    fn test_corrupt_document_starts_empty() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.json"), "{ not json").unwrap();

        let store = ConfigStore::open(temp.path()).unwrap();
        assert!(store.load_servers().is_empty());
    }
}

mod record;

pub use record::{CreateServerConfig, ServerRecord, ServerSettings, ServerStatus};

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{BoardError, Result};
use crate::logging::LogType;
use crate::store::ConfigStore;

/// In-memory authoritative server list, mirrored to the config store on
/// every mutation. Mutations clone the list out of the lock before the
/// store write so file IO never happens under the lock.
#[derive(Debug)]
pub struct Registry {
    store: Arc<ConfigStore>,
    servers: RwLock<Vec<ServerRecord>>,
}

impl Registry {
    /// Load the persisted list, dropping records whose directory or
    /// binary no longer exists on disk. The pruned list is persisted
    /// immediately so the store never resurrects dead entries.
    pub fn load(store: Arc<ConfigStore>) -> Result<Self> {
        let mut servers = store.load_servers();
        let before = servers.len();

        servers.retain(|server| {
            if !server.directory.is_dir() {
                warn!(
                    log_type = LogType::Registry.as_str(),
                    "Dropping server '{}': directory {:?} missing", server.name, server.directory
                );
                return false;
            }
            if !server.binary_path().is_file() {
                warn!(
                    log_type = LogType::Registry.as_str(),
                    "Dropping server '{}': binary {:?} missing",
                    server.name,
                    server.binary_path()
                );
                return false;
            }
            true
        });

        if servers.len() != before {
            store.save_servers(&servers)?;
        }

        debug!(
            log_type = LogType::Registry.as_str(),
            "Loaded {} servers from store",
            servers.len()
        );

        Ok(Self {
            store,
            servers: RwLock::new(servers),
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn list(&self) -> Vec<ServerRecord> {
        self.servers.read().unwrap().clone()
    }

    pub fn get(&self, server_id: &str) -> Result<ServerRecord> {
        self.servers
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id == server_id)
            .cloned()
            .ok_or_else(|| BoardError::NotFound(server_id.to_string()))
    }

    pub fn insert(&self, record: ServerRecord) -> Result<()> {
        let snapshot = {
            let mut servers = self.servers.write().unwrap();
            servers.push(record);
            servers.clone()
        };
        self.store.save_servers(&snapshot)
    }

    pub fn remove(&self, server_id: &str) -> Result<ServerRecord> {
        let (removed, snapshot) = {
            let mut servers = self.servers.write().unwrap();
            let index = servers
                .iter()
                .position(|s| s.id == server_id)
                .ok_or_else(|| BoardError::NotFound(server_id.to_string()))?;
            let removed = servers.remove(index);
            (removed, servers.clone())
        };
        self.store.save_servers(&snapshot)?;
        Ok(removed)
    }

    /// Apply a mutation to one record and persist the full list.
    /// Returns the updated record.
    pub fn update<F>(&self, server_id: &str, mutate: F) -> Result<ServerRecord>
    where
        F: FnOnce(&mut ServerRecord),
    {
        let (updated, snapshot) = {
            let mut servers = self.servers.write().unwrap();
            let record = servers
                .iter_mut()
                .find(|s| s.id == server_id)
                .ok_or_else(|| BoardError::NotFound(server_id.to_string()))?;
            mutate(record);
            (record.clone(), servers.clone())
        };
        self.store.save_servers(&snapshot)?;
        Ok(updated)
    }

    /// Set the status of a record and persist. Returns the previous
    /// status so callers can decide whether a change event is due.
    pub fn set_status(&self, server_id: &str, status: ServerStatus) -> Result<ServerStatus> {
        let mut previous = status;
        self.update(server_id, |record| {
            previous = record.status;
            record.status = status;
        })?;
        Ok(previous)
    }

    /// Transition into `starting`: stamps `last_started` as well.
    pub fn mark_starting(&self, server_id: &str) -> Result<ServerRecord> {
        self.update(server_id, |record| {
            record.status = ServerStatus::Starting;
            record.last_started = Some(Utc::now());
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn seeded_registry(temp: &TempDir) -> (Arc<ConfigStore>, Registry) {
        let store = Arc::new(ConfigStore::open(temp.path()).unwrap());
        let dir = store.servers_dir().join("alpha");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("server.jar"), b"jar").unwrap();

        let record = ServerRecord {
            id: "alpha".to_string(),
            name: "Alpha".to_string(),
            version: "1.20.1".to_string(),
            directory: dir,
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
        };
        store.save_servers(std::slice::from_ref(&record)).unwrap();

        let registry = Registry::load(store.clone()).unwrap();
        (store, registry)
    }

    #[test]
    fn test_load_keeps_valid_records() {
        let temp = TempDir::new().unwrap();
        let (_store, registry) = seeded_registry(&temp);
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("alpha").is_ok());
    }

    #[test]
    fn test_load_prunes_records_without_binary() {
        let temp = TempDir::new().unwrap();
        let (store, registry) = seeded_registry(&temp);
        drop(registry);

        fs::remove_file(store.servers_dir().join("alpha").join("server.jar")).unwrap();
        let registry = Registry::load(store.clone()).unwrap();
        assert!(registry.list().is_empty());
        // pruning was persisted
        assert!(store.load_servers().is_empty());
    }

    #[test]
    fn test_get_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let (_store, registry) = seeded_registry(&temp);
        assert!(matches!(
            registry.get("missing"),
            Err(BoardError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_status_returns_previous_and_persists() {
        let temp = TempDir::new().unwrap();
        let (store, registry) = seeded_registry(&temp);

        let previous = registry
            .set_status("alpha", ServerStatus::Starting)
            .unwrap();
        assert_eq!(previous, ServerStatus::Stopped);
        assert_eq!(store.load_servers()[0].status, ServerStatus::Starting);
    }

    #[test]
    fn test_mark_starting_stamps_last_started() {
        let temp = TempDir::new().unwrap();
        let (_store, registry) = seeded_registry(&temp);

        let record = registry.mark_starting("alpha").unwrap();
        assert_eq!(record.status, ServerStatus::Starting);
        assert!(record.last_started.is_some());
    }

    #[test]
    fn test_remove_deletes_and_persists() {
        let temp = TempDir::new().unwrap();
        let (store, registry) = seeded_registry(&temp);

        let removed = registry.remove("alpha").unwrap();
        assert_eq!(removed.id, "alpha");
        assert!(registry.list().is_empty());
        assert!(store.load_servers().is_empty());
    }
}

mod events;
mod process;
mod readiness;

pub use events::SupervisorEvent;
pub use readiness::{ReadyDetector, VanillaReadyDetector};

use std::collections::HashMap;
use std::fs;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::download::ServerDownloader;
use crate::error::{BoardError, Result};
use crate::logging::LogType;
use crate::properties;
use crate::query::{QueryStatus, StatsSnapshot, StatusQueryClient};
use crate::registry::{
    CreateServerConfig, Registry, ServerRecord, ServerSettings, ServerStatus,
};
use crate::store::ConfigStore;

use events::EventSender;
use process::{Liveness, ProcessEntry, ProcessTable, finalize_exit};

const STOP_COMMAND: &str = "stop";
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
const STDIN_CHANNEL_CAPACITY: usize = 100;

/// Acknowledgement returned by a successful delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReceipt {
    pub id: String,
    pub deleted: bool,
}

/// Per-id operation locks. Every public lifecycle operation takes the
/// lock for its id first, so no two transitions for the same server are
/// ever in flight concurrently.
#[derive(Debug, Clone, Default)]
struct OpLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl OpLocks {
    fn handle(&self, server_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .unwrap()
            .entry(server_id.to_string())
            .or_default()
            .clone()
    }

    async fn guard(&self, server_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        self.handle(server_id).lock_owned().await
    }

    fn try_guard(&self, server_id: &str) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        self.handle(server_id).try_lock_owned().ok()
    }

    fn forget(&self, server_id: &str) {
        self.inner.lock().unwrap().remove(server_id);
    }
}

/// The process supervisor: owns the table of live child processes, the
/// start/stop/restart/send-command state machine, crash reconciliation
/// and shutdown coordination. All state transitions for one server id
/// are serialized through its operation lock.
pub struct Supervisor {
    registry: Arc<Registry>,
    store: Arc<ConfigStore>,
    downloader: Arc<dyn ServerDownloader>,
    processes: ProcessTable,
    op_locks: OpLocks,
    events: EventSender,
    query: StatusQueryClient,
    ready: Arc<dyn ReadyDetector>,
    stop_timeout: Duration,
    cleanup_interval: Duration,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(registry: Arc<Registry>, downloader: Arc<dyn ServerDownloader>) -> Self {
        let store = registry.store().clone();
        Self {
            registry,
            store,
            downloader,
            processes: ProcessTable::default(),
            op_locks: OpLocks::default(),
            events: EventSender::new(),
            query: StatusQueryClient::new(),
            ready: Arc::new(VanillaReadyDetector),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_ready_detector<D: ReadyDetector + 'static>(mut self, detector: D) -> Self {
        self.ready = Arc::new(detector);
        self
    }

    pub fn with_query_client(mut self, query: StatusQueryClient) -> Self {
        self.query = query;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Subscribe to the outbound event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn list_servers(&self) -> Vec<ServerRecord> {
        self.registry.list()
    }

    pub fn get_server(&self, server_id: &str) -> Result<ServerRecord> {
        self.registry.get(server_id)
    }

    pub fn is_server_running(&self, server_id: &str) -> bool {
        self.processes.contains(server_id)
    }

    pub fn has_running_servers(&self) -> bool {
        !self.processes.is_empty()
    }

    /// Probe for a usable Java runtime on the PATH and record the result
    /// in the store.
    pub async fn check_java_installation(&self) -> bool {
        let available = matches!(
            Command::new("java").arg("-version").output().await,
            Ok(output) if output.status.success()
        );

        let path = available.then(|| "java".to_string());
        if let Err(e) = self.store.set_java_path(path) {
            warn!(
                log_type = LogType::Supervisor.as_str(),
                "Could not persist java path: {}", e
            );
        }
        available
    }

    // ------ Creation ------

    /// Create a server: allocate its directory, download the binary for
    /// the requested version (progress forwarded as events), write the
    /// boot files and persist the new record with status `stopped`.
    ///
    /// A failed download leaves the partial directory in place for
    /// manual inspection.
    pub async fn create_server(&self, config: CreateServerConfig) -> Result<ServerRecord> {
        let id = Uuid::new_v4().to_string();
        let server_dir = self.store.servers_dir().join(&id);
        fs::create_dir_all(&server_dir)?;

        info!(
            log_type = LogType::Supervisor.as_str(),
            "Creating server '{}' (version {}) in {:?}", config.name, config.version, server_dir
        );

        let events = self.events.clone();
        let progress_id = id.clone();
        let binary_file = self
            .downloader
            .download_server(&config.version, &server_dir, &move |progress| {
                events.download(&progress_id, progress);
            })
            .await?;

        let record = ServerRecord {
            id,
            name: config.name,
            version: config.version,
            directory: server_dir.clone(),
            binary_file,
            port: config.port,
            memory: config.memory,
            gamemode: config.gamemode,
            difficulty: config.difficulty,
            max_players: config.max_players,
            motd: config.motd,
            pvp: true,
            command_blocks_enabled: false,
            online_mode: true,
            status: ServerStatus::Stopped,
            last_started: None,
            created: chrono::Utc::now(),
        };

        properties::generate_server_properties(&server_dir, &record)?;
        properties::accept_eula(&server_dir)?;

        self.registry.insert(record.clone())?;
        Ok(record)
    }

    // ------ Lifecycle ------

    /// Start the server. Returns the record in `starting` state without
    /// waiting for the ready marker.
    pub async fn start_server(&self, server_id: &str) -> Result<ServerRecord> {
        let _guard = self.op_locks.guard(server_id).await;
        self.start_server_locked(server_id).await
    }

    async fn start_server_locked(&self, server_id: &str) -> Result<ServerRecord> {
        let record = self.registry.get(server_id)?;

        // Reconcile tracked state against actual liveness before anything
        // else; a stale entry from a crash must not block a fresh start.
        match self.processes.reconcile(server_id) {
            Liveness::Alive => {
                return Err(BoardError::AlreadyRunning(server_id.to_string()));
            }
            Liveness::NotTracked | Liveness::Purged => {}
        }

        // Self-heal persisted status drift from an abnormal shutdown.
        if record.status != ServerStatus::Stopped {
            debug!(
                log_type = LogType::Supervisor.as_str(),
                "Server '{}' has inconsistent status {}, resetting to stopped",
                record.name,
                record.status
            );
            let previous = self.registry.set_status(server_id, ServerStatus::Stopped)?;
            if previous != ServerStatus::Stopped {
                self.events.status(server_id, ServerStatus::Stopped);
            }
        }

        let binary = record.binary_path();
        if !binary.is_file() {
            return Err(BoardError::BinaryMissing(binary));
        }

        self.spawn_process(&record).await
    }

    async fn spawn_process(&self, record: &ServerRecord) -> Result<ServerRecord> {
        let java_path = self.store.java_path();
        let server_id = record.id.clone();

        debug!(
            log_type = LogType::Supervisor.as_str(),
            "Spawning '{}' with runtime {}", record.name, java_path
        );

        let mut child = Command::new(&java_path)
            .arg(format!("-Xmx{}M", record.memory))
            .arg(format!("-Xms{}M", record.memory.min(1024)))
            .arg("-jar")
            .arg(&record.binary_file)
            .arg("nogui")
            .current_dir(&record.directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BoardError::process(format!("Failed to start process: {e}")))?;

        let pid = child.id();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BoardError::process("Child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BoardError::process("Child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BoardError::process("Child stderr unavailable"))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(STDIN_CHANNEL_CAPACITY);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let (exit_tx, exit_rx) = watch::channel(false);

        // Stdin writer: the only task holding the pipe. A closed channel
        // or a write failure ends it, which SendCommand surfaces as
        // InputClosed.
        tokio::spawn(async move {
            while let Some(input) = stdin_rx.recv().await {
                if stdin.write_all(input.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Exit watcher: owns the child, reaps it and finalizes the
        // stopped transition unless a stop operation got there first.
        let monitor = {
            let processes = self.processes.clone();
            let registry = self.registry.clone();
            let events = self.events.clone();
            let op_locks = self.op_locks.clone();
            let server_id = server_id.clone();

            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx.recv() => {
                        if let Err(e) = child.start_kill() {
                            warn!(
                                log_type = LogType::Supervisor.as_str(),
                                "Failed to kill '{}': {}", server_id, e
                            );
                        }
                        child.wait().await
                    }
                };

                let code = match &status {
                    Ok(exit) => exit
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown (terminated by signal)".to_string()),
                    Err(_) => "unknown".to_string(),
                };
                events.output(&server_id, format!("Server process exited with code {code}"));
                let _ = exit_tx.send(true);

                // Serialize the crash transition against control
                // operations; an in-flight stop finalizes first and this
                // becomes a no-op.
                let _guard = op_locks.guard(&server_id).await;
                finalize_exit(&processes, &registry, &events, &server_id);
            })
        };

        self.processes.insert(
            &server_id,
            ProcessEntry {
                pid,
                stdin_tx,
                kill_tx,
                exit_rx,
                watcher: monitor,
            },
        );

        let updated = self.registry.mark_starting(&server_id)?;
        self.events.status(&server_id, ServerStatus::Starting);

        // Output watchers attach after the status flip so the ready
        // marker can only ever observe a `starting` record.
        {
            let events = self.events.clone();
            let registry = self.registry.clone();
            let ready = self.ready.clone();
            let server_id = server_id.clone();

            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut started = false;
                while let Ok(Some(line)) = lines.next_line().await {
                    events.output(&server_id, line.clone());

                    if !started && ready.is_ready_marker(&line) {
                        started = true;
                        let mut became_running = false;
                        let result = registry.update(&server_id, |record| {
                            if record.status == ServerStatus::Starting {
                                record.status = ServerStatus::Running;
                                became_running = true;
                            }
                        });
                        match result {
                            Ok(_) if became_running => {
                                debug!(
                                    log_type = LogType::Supervisor.as_str(),
                                    "Server '{}' is ready", server_id
                                );
                                events.status(&server_id, ServerStatus::Running);
                            }
                            Ok(_) => {}
                            Err(e) => warn!(
                                log_type = LogType::Supervisor.as_str(),
                                "Could not persist running status for '{}': {}", server_id, e
                            ),
                        }
                    }
                }
            });
        }

        {
            let events = self.events.clone();
            let server_id = server_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    events.output(&server_id, line);
                }
            });
        }

        Ok(updated)
    }

    /// Stop the server, gracefully first, then by force once the timeout
    /// elapses. Resolves once the server reaches `stopped`.
    pub async fn stop_server(&self, server_id: &str) -> Result<ServerRecord> {
        let _guard = self.op_locks.guard(server_id).await;
        self.stop_server_locked(server_id).await
    }

    async fn stop_server_locked(&self, server_id: &str) -> Result<ServerRecord> {
        let record = self.registry.get(server_id)?;

        if !self.processes.contains(server_id) {
            return Err(BoardError::NotRunning(server_id.to_string()));
        }

        info!(
            log_type = LogType::Supervisor.as_str(),
            "Stopping server '{}'", record.name
        );

        let previous = self.registry.set_status(server_id, ServerStatus::Stopping)?;
        if previous != ServerStatus::Stopping {
            self.events.status(server_id, ServerStatus::Stopping);
        }

        if let Some(stdin_tx) = self.processes.stdin_sender(server_id) {
            let _ = stdin_tx.send(format!("{STOP_COMMAND}\n")).await;
        }

        let Some(mut exit_rx) = self.processes.exit_receiver(server_id) else {
            // Exit watcher finalized between the contains check and here.
            return self.registry.get(server_id);
        };

        tokio::select! {
            _ = exit_rx.wait_for(|exited| *exited) => {
                finalize_exit(&self.processes, &self.registry, &self.events, server_id);
            }
            _ = tokio::time::sleep(self.stop_timeout) => {
                warn!(
                    log_type = LogType::Supervisor.as_str(),
                    "Server '{}' did not stop within {:?}, killing", record.name, self.stop_timeout
                );
                if let Some(kill_tx) = self.processes.kill_sender(server_id) {
                    let _ = kill_tx.send(()).await;
                }
                if finalize_exit(&self.processes, &self.registry, &self.events, server_id) {
                    self.events
                        .output(server_id, "Server forcefully terminated after timeout");
                }
            }
        }

        self.registry.get(server_id)
    }

    /// Stop (if tracked) then start, strictly sequential: the new
    /// process is not spawned until the old entry is fully purged.
    pub async fn restart_server(&self, server_id: &str) -> Result<ServerRecord> {
        let _guard = self.op_locks.guard(server_id).await;

        if self.processes.contains(server_id) {
            self.stop_server_locked(server_id).await?;
        }
        self.start_server_locked(server_id).await
    }

    /// Stop the server if needed, remove its directory (best effort) and
    /// drop the record.
    pub async fn delete_server(&self, server_id: &str) -> Result<DeleteReceipt> {
        let _guard = self.op_locks.guard(server_id).await;
        let record = self.registry.get(server_id)?;

        if self.processes.contains(server_id) {
            if let Err(e) = self.stop_server_locked(server_id).await {
                warn!(
                    log_type = LogType::Supervisor.as_str(),
                    "Graceful stop of '{}' failed during delete, killing: {}", record.name, e
                );
                if let Some(kill_tx) = self.processes.kill_sender(server_id) {
                    let _ = kill_tx.send(()).await;
                }
                finalize_exit(&self.processes, &self.registry, &self.events, server_id);
            }
        }

        if let Err(e) = fs::remove_dir_all(&record.directory) {
            error!(
                log_type = LogType::Supervisor.as_str(),
                "Failed to delete server directory {:?}: {}", record.directory, e
            );
        }

        self.registry.remove(server_id)?;
        self.op_locks.forget(server_id);

        Ok(DeleteReceipt {
            id: server_id.to_string(),
            deleted: true,
        })
    }

    /// Write a command line to the server's stdin. Success means the
    /// write was accepted, not that the server processed it.
    pub async fn send_command(&self, server_id: &str, command: &str) -> Result<bool> {
        self.registry.get(server_id)?;

        let stdin_tx = self
            .processes
            .stdin_sender(server_id)
            .ok_or_else(|| BoardError::NotRunning(server_id.to_string()))?;

        let line = if command.ends_with('\n') {
            command.to_string()
        } else {
            format!("{command}\n")
        };

        stdin_tx
            .send(line)
            .await
            .map_err(|_| BoardError::InputClosed(server_id.to_string()))?;

        self.events.output(server_id, format!("> {command}"));
        Ok(true)
    }

    // ------ Settings ------

    /// Apply new settings to a stopped server, renaming its directory if
    /// the name changed (picking `name-1`, `name-2`, … on collision) and
    /// rewriting the affected keys of `server.properties`. The updated
    /// record carries the resolved directory.
    pub async fn update_server_settings(
        &self,
        server_id: &str,
        settings: ServerSettings,
    ) -> Result<ServerRecord> {
        let _guard = self.op_locks.guard(server_id).await;
        let record = self.registry.get(server_id)?;

        if self.processes.contains(server_id) {
            return Err(BoardError::ServerMustBeStopped);
        }

        let mut directory = record.directory.clone();
        if settings.name != record.name {
            let parent = directory
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| self.store.servers_dir());
            let folder_name = properties::sanitize_folder_name(&settings.name);
            let mut new_directory = parent.join(&folder_name);

            if new_directory.exists() && new_directory != directory {
                let mut counter = 0;
                loop {
                    counter += 1;
                    let candidate = parent.join(format!("{folder_name}-{counter}"));
                    if !candidate.exists() {
                        new_directory = candidate;
                        break;
                    }
                }
            }

            if new_directory != directory {
                fs::rename(&directory, &new_directory)?;
                debug!(
                    log_type = LogType::Supervisor.as_str(),
                    "Renamed server directory {:?} -> {:?}", directory, new_directory
                );
                directory = new_directory;
            }
        }

        let updated = self.registry.update(server_id, |record| {
            record.name = settings.name.clone();
            record.directory = directory.clone();
            record.port = settings.port;
            record.memory = settings.memory;
            record.gamemode = settings.gamemode.clone();
            record.difficulty = settings.difficulty.clone();
            record.max_players = settings.max_players;
            record.motd = settings.motd.clone();
            record.pvp = settings.pvp;
            record.command_blocks_enabled = settings.command_blocks_enabled;
            record.online_mode = settings.online_mode;
        })?;

        properties::update_server_properties(
            &updated.directory.join("server.properties"),
            &properties::settings_properties(&updated),
        )?;

        Ok(updated)
    }

    // ------ Stats ------

    /// Live status as seen from the server's wire protocol, degrading to
    /// defaults when the server is not running or not answering.
    pub async fn query_status(&self, server_id: &str) -> Result<QueryStatus> {
        let record = self.registry.get(server_id)?;
        let offline = QueryStatus::offline(&record);

        if record.status != ServerStatus::Running {
            return Ok(offline);
        }

        match self.query.ping("127.0.0.1", record.port).await {
            Ok(ping) => Ok(QueryStatus::from_ping(ping)),
            Err(e) => {
                debug!(
                    log_type = LogType::Query.as_str(),
                    "Status query for '{}' failed: {}", server_id, e
                );
                if self.processes.contains(server_id) {
                    Ok(offline.not_responding())
                } else {
                    Ok(offline)
                }
            }
        }
    }

    /// Snapshot combining the record, its uptime and the live query.
    pub async fn get_server_stats(&self, server_id: &str) -> Result<StatsSnapshot> {
        let record = self.registry.get(server_id)?;
        let query = self.query_status(server_id).await?;

        let uptime_seconds = record
            .last_started
            .map(|started| (chrono::Utc::now() - started).num_seconds().max(0) as u64)
            .unwrap_or(0);

        Ok(StatsSnapshot {
            uptime_seconds,
            status: record.status,
            version: record.version,
            port: record.port,
            memory: record.memory,
            gamemode: record.gamemode,
            difficulty: record.difficulty,
            max_players: record.max_players,
            players_online: query.players_online,
            players_max: query.players_max,
            online: query.online,
            motd: query.motd,
        })
    }

    // ------ Reconciliation & shutdown ------

    /// Sweep the process table for entries whose process died without the
    /// exit watcher firing (host restarts, watcher failures) and correct
    /// the drift: purge the entry, force the record to `stopped` and emit
    /// exactly one status change if it was not already stopped.
    pub async fn cleanup_dead_processes(&self) {
        for server_id in self.processes.dead_ids() {
            // An operation in flight for this id will reconcile on its own.
            let Some(_guard) = self.op_locks.try_guard(&server_id) else {
                continue;
            };

            if self.processes.reconcile(&server_id) != Liveness::Purged {
                continue;
            }

            debug!(
                log_type = LogType::Supervisor.as_str(),
                "Removed dead process entry for '{}'", server_id
            );

            match self.registry.set_status(&server_id, ServerStatus::Stopped) {
                Ok(previous) => {
                    if previous != ServerStatus::Stopped {
                        self.events.status(&server_id, ServerStatus::Stopped);
                    }
                }
                Err(e) => warn!(
                    log_type = LogType::Supervisor.as_str(),
                    "Could not persist stopped status for '{}': {}", server_id, e
                ),
            }
        }
    }

    /// Run the dead-process sweep once now and then on a fixed interval
    /// until `shutdown_all` aborts it.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let interval = self.cleanup_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                supervisor.cleanup_dead_processes().await;
            }
        });

        if let Some(previous) = self.cleanup_task.lock().unwrap().replace(task) {
            previous.abort();
        }
    }

    /// Stop every tracked server sequentially. A failing stop escalates
    /// to a direct kill and never blocks the remaining ids. Also releases
    /// the periodic cleanup task.
    pub async fn shutdown_all(&self) {
        info!(
            log_type = LogType::Supervisor.as_str(),
            "Shutting down all running servers"
        );

        self.cleanup_dead_processes().await;

        for server_id in self.processes.ids() {
            let _guard = self.op_locks.guard(&server_id).await;
            match self.stop_server_locked(&server_id).await {
                Ok(_) => debug!(
                    log_type = LogType::Supervisor.as_str(),
                    "Stopped server '{}'", server_id
                ),
                Err(e) => {
                    warn!(
                        log_type = LogType::Supervisor.as_str(),
                        "Error stopping server '{}', killing: {}", server_id, e
                    );
                    if let Some(kill_tx) = self.processes.kill_sender(&server_id) {
                        let _ = kill_tx.send(()).await;
                    }
                    finalize_exit(&self.processes, &self.registry, &self.events, &server_id);
                }
            }
        }

        if let Some(task) = self.cleanup_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("processes", &self.processes)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

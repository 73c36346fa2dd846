#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

use mineboard::{
    BoardError, ConfigStore, CreateServerConfig, MockDownloader, Registry, ServerRecord,
    ServerStatus, Supervisor, SupervisorEvent,
};

const WAIT: Duration = Duration::from_secs(10);

/// A shell script standing in for the Java runtime: prints the vanilla
/// ready banner, echoes commands and exits cleanly on `stop`.
const WELL_BEHAVED_SERVER: &str = r#"#!/bin/sh
echo 'Starting fake server'
echo 'Done (1.002s)! For help, type "help"'
while IFS= read -r line; do
  case "$line" in
    stop) echo 'Stopping the server'; exit 0 ;;
    *) echo "[Server] $line" ;;
  esac
done
exit 0
"#;

/// A runtime that never reacts to the graceful stop command.
const STUBBORN_SERVER: &str = r#"#!/bin/sh
echo 'Done (1.002s)! For help, type "help"'
while true; do sleep 1; done
"#;

fn install_fake_runtime(store: &ConfigStore, temp: &TempDir, script: &str) {
    let path = temp.path().join("fake-java");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    store
        .set_java_path(Some(path.to_string_lossy().to_string()))
        .unwrap();
}

async fn seeded_supervisor(
    temp: &TempDir,
    script: &str,
    stop_timeout: Duration,
) -> (Arc<Supervisor>, ServerRecord) {
    let store = Arc::new(ConfigStore::open(temp.path()).unwrap());
    install_fake_runtime(&store, temp, script);

    let registry = Arc::new(Registry::load(store).unwrap());
    let supervisor = Arc::new(
        Supervisor::new(registry, Arc::new(MockDownloader::new()))
            .with_stop_timeout(stop_timeout),
    );

    let record = supervisor
        .create_server(CreateServerConfig {
            name: "Integration".to_string(),
            version: "1.20.1".to_string(),
            port: 25565,
            memory: 1024,
            gamemode: "survival".to_string(),
            difficulty: "normal".to_string(),
            max_players: 20,
            motd: None,
        })
        .await
        .unwrap();

    (supervisor, record)
}

async fn wait_for_status(
    events: &mut broadcast::Receiver<SupervisorEvent>,
    server_id: &str,
    expected: ServerStatus,
) {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(SupervisorEvent::StatusChange { server_id: id, status })
                    if id == server_id && status == expected =>
                {
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("event stream ended while waiting for {expected}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for status {expected}"));
}

fn drain_outputs(events: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<String> {
    let mut outputs = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::Output { text, .. } = event {
            outputs.push(text);
        }
    }
    outputs
}

#[tokio::test]
async fn test_created_server_is_populated_and_stopped() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;

    assert_eq!(record.status, ServerStatus::Stopped);
    assert_eq!(record.binary_file, "server.jar");
    assert!(record.binary_path().is_file());
    assert!(record.directory.join("server.properties").is_file());
    assert!(record.directory.join("eula.txt").is_file());

    let eula = fs::read_to_string(record.directory.join("eula.txt")).unwrap();
    assert!(eula.contains("eula=true"));

    let listed = supervisor.list_servers();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);
}

#[tokio::test]
async fn test_full_lifecycle_start_command_stop_delete() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;
    let mut events = supervisor.subscribe();

    // Start: returns immediately in `starting`, then the ready banner
    // flips it to `running`.
    let started = supervisor.start_server(&record.id).await.unwrap();
    assert_eq!(started.status, ServerStatus::Starting);
    assert!(started.last_started.is_some());
    assert!(supervisor.is_server_running(&record.id));

    wait_for_status(&mut events, &record.id, ServerStatus::Starting).await;
    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;
    assert_eq!(
        supervisor.get_server(&record.id).unwrap().status,
        ServerStatus::Running
    );

    // Commands reach the child and are echoed as output.
    assert!(supervisor.send_command(&record.id, "say hi").await.unwrap());

    // Graceful stop: stopping then stopped, no forced-kill line.
    supervisor.stop_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Stopped).await;

    let stopped = supervisor.get_server(&record.id).unwrap();
    assert_eq!(stopped.status, ServerStatus::Stopped);
    assert!(!supervisor.is_server_running(&record.id));

    let outputs = drain_outputs(&mut events);
    assert!(
        !outputs.iter().any(|o| o.contains("forcefully terminated")),
        "graceful stop must not force-kill: {outputs:?}"
    );

    // Delete removes the directory and the record.
    let receipt = supervisor.delete_server(&record.id).await.unwrap();
    assert!(receipt.deleted);
    assert!(!record.directory.exists());
    assert!(supervisor.list_servers().is_empty());
}

#[tokio::test]
async fn test_command_echo_is_emitted_while_running() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;
    let mut events = supervisor.subscribe();

    supervisor.start_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;

    supervisor.send_command(&record.id, "say hi").await.unwrap();

    let echoed = timeout(WAIT, async {
        loop {
            if let Ok(SupervisorEvent::Output { text, .. }) = events.recv().await
                && text.contains("say hi")
            {
                break text;
            }
        }
    })
    .await
    .expect("no output echoing the command");
    assert!(echoed.contains("say hi"));

    supervisor.stop_server(&record.id).await.unwrap();
}

#[tokio::test]
async fn test_double_start_fails_with_already_running() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;

    let first = supervisor.start_server(&record.id).await;
    let second = supervisor.start_server(&record.id).await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(BoardError::AlreadyRunning(_))));

    supervisor.stop_server(&record.id).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_starts_yield_exactly_one_success() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;

    let (a, b) = tokio::join!(
        supervisor.start_server(&record.id),
        supervisor.start_server(&record.id),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one start must win: {a:?} / {b:?}");
    assert!(
        [&a, &b]
            .iter()
            .any(|r| matches!(r, Err(BoardError::AlreadyRunning(_)))),
        "the loser must fail with AlreadyRunning"
    );

    supervisor.stop_server(&record.id).await.unwrap();
}

#[tokio::test]
async fn test_stop_timeout_escalates_to_forced_kill() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) =
        seeded_supervisor(&temp, STUBBORN_SERVER, Duration::from_millis(500)).await;
    let mut events = supervisor.subscribe();

    supervisor.start_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;

    let begun = std::time::Instant::now();
    let stopped = supervisor.stop_server(&record.id).await.unwrap();
    assert!(begun.elapsed() < Duration::from_secs(5));

    assert_eq!(stopped.status, ServerStatus::Stopped);
    assert!(!supervisor.is_server_running(&record.id));

    let forced = timeout(WAIT, async {
        loop {
            if let Ok(SupervisorEvent::Output { text, .. }) = events.recv().await
                && text.contains("forcefully terminated")
            {
                break;
            }
        }
    })
    .await;
    assert!(forced.is_ok(), "expected a forced-termination output line");
}

#[tokio::test]
async fn test_stop_twice_fails_with_not_running_and_stays_silent() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;
    let mut events = supervisor.subscribe();

    supervisor.start_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;

    supervisor.stop_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Stopped).await;

    let result = supervisor.stop_server(&record.id).await;
    assert!(matches!(result, Err(BoardError::NotRunning(_))));

    // The failed second stop must not emit another transition.
    let extra_status_events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, SupervisorEvent::StatusChange { .. }))
        .collect();
    assert!(
        extra_status_events.is_empty(),
        "unexpected events: {extra_status_events:?}"
    );
}

#[tokio::test]
async fn test_restart_stops_and_starts_sequentially() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;
    let mut events = supervisor.subscribe();

    supervisor.start_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;

    let restarted = supervisor.restart_server(&record.id).await.unwrap();
    assert_eq!(restarted.status, ServerStatus::Starting);
    assert!(supervisor.is_server_running(&record.id));

    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;
    supervisor.stop_server(&record.id).await.unwrap();
}

#[tokio::test]
async fn test_crash_is_detected_and_reconciled() {
    let temp = TempDir::new().unwrap();
    let (supervisor, record) = seeded_supervisor(&temp, WELL_BEHAVED_SERVER, WAIT).await;
    let mut events = supervisor.subscribe();

    supervisor.start_server(&record.id).await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Running).await;

    // The server exiting on its own (a "stop" typed into its console)
    // must be observed as a normal transition to stopped.
    supervisor.send_command(&record.id, "stop").await.unwrap();
    wait_for_status(&mut events, &record.id, ServerStatus::Stopped).await;

    assert!(!supervisor.is_server_running(&record.id));
    assert_eq!(
        supervisor.get_server(&record.id).unwrap().status,
        ServerStatus::Stopped
    );
}

#[tokio::test]
async fn test_shutdown_all_stops_every_server() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::open(temp.path()).unwrap());
    install_fake_runtime(&store, &temp, WELL_BEHAVED_SERVER);

    let registry = Arc::new(Registry::load(store).unwrap());
    let supervisor = Arc::new(
        Supervisor::new(registry, Arc::new(MockDownloader::new()))
            .with_stop_timeout(Duration::from_secs(5)),
    );

    let mut ids = Vec::new();
    for name in ["One", "Two"] {
        let record = supervisor
            .create_server(CreateServerConfig {
                name: name.to_string(),
                version: "1.20.1".to_string(),
                port: 25565,
                memory: 1024,
                gamemode: "survival".to_string(),
                difficulty: "normal".to_string(),
                max_players: 20,
                motd: None,
            })
            .await
            .unwrap();
        supervisor.start_server(&record.id).await.unwrap();
        ids.push(record.id);
    }
    assert!(supervisor.has_running_servers());

    supervisor.shutdown_all().await;

    assert!(!supervisor.has_running_servers());
    for id in ids {
        assert_eq!(
            supervisor.get_server(&id).unwrap().status,
            ServerStatus::Stopped
        );
    }
}

#[tokio::test]
async fn test_download_progress_events_are_forwarded() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::open(temp.path()).unwrap());
    let registry = Arc::new(Registry::load(store).unwrap());
    let supervisor = Arc::new(Supervisor::new(registry, Arc::new(MockDownloader::new())));

    let mut events = supervisor.subscribe();
    let record = supervisor
        .create_server(CreateServerConfig {
            name: "Progress".to_string(),
            version: "1.20.1".to_string(),
            port: 25565,
            memory: 1024,
            gamemode: "survival".to_string(),
            difficulty: "normal".to_string(),
            max_players: 20,
            motd: None,
        })
        .await
        .unwrap();

    let mut percentages = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::DownloadProgress { server_id, progress } = event {
            assert_eq!(server_id, record.id);
            percentages.push(progress.percentage);
        }
    }
    assert_eq!(percentages.first(), Some(&0));
    assert_eq!(percentages.last(), Some(&100));
}

#[tokio::test]
async fn test_failed_download_leaves_partial_directory() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::open(temp.path()).unwrap());
    let servers_dir = store.servers_dir();
    let registry = Arc::new(Registry::load(store).unwrap());
    let supervisor = Arc::new(Supervisor::new(registry, Arc::new(MockDownloader::failing())));

    let result = supervisor
        .create_server(CreateServerConfig {
            name: "Broken".to_string(),
            version: "0.0.0".to_string(),
            port: 25565,
            memory: 1024,
            gamemode: "survival".to_string(),
            difficulty: "normal".to_string(),
            max_players: 20,
            motd: None,
        })
        .await;

    assert!(matches!(result, Err(BoardError::DownloadFailed(_))));
    assert!(supervisor.list_servers().is_empty());
    // The allocated directory stays behind for inspection.
    assert_eq!(fs::read_dir(&servers_dir).unwrap().count(), 1);
}

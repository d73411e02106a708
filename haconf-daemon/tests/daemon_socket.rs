use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use haconf_daemon::{request_status, request_stop, request_sync, DaemonError};
use haconf_instance::InstanceOptions;
use serde_json::Value;
use tempfile::TempDir;

const STATE: &str = "\
hosts:
  - hostname: echo.local
    paths:
      - path: /
        backend: default_echo_8080
backends:
  - id: default_echo_8080
    endpoints:
      - ip: 10.0.0.1
        port: 8080
";

fn options_in(dir: &Path) -> InstanceOptions {
    InstanceOptions {
        state_file: dir.join("state.yaml"),
        config_file: dir.join("haproxy.cfg"),
        config_dir: dir.to_path_buf(),
        maps_dir: dir.join("maps"),
        run_dir: dir.join("run"),
        backend_server_slots_increment: 4,
        ..InstanceOptions::default()
    }
}

async fn status(socket: PathBuf) -> Result<Value, DaemonError> {
    tokio::task::spawn_blocking(move || request_status(&socket))
        .await
        .expect("join")
}

/// Poll `status` until `done` holds, for at most ~10s.
async fn wait_for_status(socket: &Path, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..100 {
        if let Ok(payload) = status(socket.to_path_buf()).await {
            if done(&payload) {
                return payload;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("daemon never reached the expected status");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_runs_startup_socket_and_watcher_cycles() {
    let dir = TempDir::new().expect("tempdir");
    let options = options_in(dir.path());
    fs::write(&options.state_file, STATE).expect("state");
    let socket = options.socket_path();

    let daemon = tokio::spawn(haconf_daemon::run(options.clone()));

    let payload = wait_for_status(&socket, |s| s["cycles"].as_u64() >= Some(1)).await;
    assert_eq!(payload["last_cycle"]["source"], "startup");
    assert_eq!(payload["last_cycle"]["outcome"], "reloaded");
    assert!(options.config_file.exists());

    let sync_socket = socket.clone();
    let summary = tokio::task::spawn_blocking(move || request_sync(&sync_socket))
        .await
        .expect("join")
        .expect("sync");
    assert_eq!(summary["source"], "socket");
    assert_eq!(summary["success"], true);
    assert_eq!(summary["outcome"], "unchanged");

    fs::write(&options.state_file, STATE.replace("10.0.0.1", "10.0.0.9")).expect("rewrite");
    let payload = wait_for_status(&socket, |s| s["last_cycle"]["source"] == "watcher").await;
    assert_eq!(payload["last_cycle"]["success"], true);
    let cfg = fs::read_to_string(&options.config_file).expect("cfg");
    assert!(cfg.contains("10.0.0.9:8080"));

    let stop_socket = socket.clone();
    tokio::task::spawn_blocking(move || request_stop(&stop_socket))
        .await
        .expect("join")
        .expect("stop");
    tokio::time::timeout(Duration::from_secs(10), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("clean shutdown");
    assert!(!socket.exists());
}

#[tokio::test]
async fn broken_template_aborts_before_binding() {
    let dir = TempDir::new().expect("tempdir");
    let mut options = options_in(dir.path());
    options.templates.haproxy = Some(dir.path().join("missing.tera"));

    let err = haconf_daemon::run(options.clone()).await.unwrap_err();
    assert!(matches!(err, DaemonError::Template(_)));
    assert!(!options.socket_path().exists());
}

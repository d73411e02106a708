use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use haconf_core::{state, Config};
use haconf_instance::{Instance, InstanceOptions, Tick, Timer};

use crate::error::{io_err, DaemonError};
use crate::paths::{state_dir, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

struct CycleJob {
    source: &'static str,
    respond_to: oneshot::Sender<Result<CycleSummary, String>>,
}

/// Result of one daemon-driven cycle, as reported over the control socket.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    /// What asked for the cycle: `startup`, `watcher`, `resync` or `socket`.
    pub source: String,
    pub outcome: String,
    pub message: String,
    pub success: bool,
    pub timings: Vec<Tick>,
    pub duration_ms: u128,
    pub finished_at_unix: u64,
}

#[derive(Debug, Default)]
struct CycleHistory {
    cycles: u64,
    failures: u64,
    last_cycle: Option<CycleSummary>,
    last_error: Option<String>,
}

type SharedHistory = Arc<RwLock<CycleHistory>>;

/// Fixed facts reported by `status`.
#[derive(Debug, Clone)]
struct DaemonInfo {
    started_at_unix: u64,
    socket: PathBuf,
    state_file: PathBuf,
    config_file: PathBuf,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(options: InstanceOptions) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options))
}

/// Run the daemon until ctrl-c or a `stop` request.
///
/// Templates are parsed before anything else; a parse failure is returned
/// without binding the socket or running a cycle.
pub async fn run(options: InstanceOptions) -> Result<(), DaemonError> {
    let mut instance = Instance::new(options.clone());
    instance.parse_templates()?;
    ensure_run_dir(&options.run_dir)?;

    let info = DaemonInfo {
        started_at_unix: unix_seconds_now(),
        socket: options.socket_path(),
        state_file: options.state_file.clone(),
        config_file: options.config_file.clone(),
    };
    let history: SharedHistory = Arc::new(RwLock::new(CycleHistory::default()));
    let resync_every = options
        .resync_interval_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let (cycle_tx, cycle_rx) = mpsc::channel::<CycleJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let state_file = options.state_file.clone();
        let cycle_tx = cycle_tx.clone();
        tokio::spawn(async move {
            let result = watcher_task(state_file, cycle_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let history = history.clone();
        tokio::spawn(async move {
            let result = cycle_processor_task(instance, history, cycle_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let history = history.clone();
        let cycle_tx = cycle_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(info, history, cycle_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let resync_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let cycle_tx = cycle_tx.clone();
        tokio::spawn(async move {
            let result = resync_task(resync_every, cycle_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };
    drop(cycle_tx);

    let (watcher_result, processor_result, socket_result, resync_result, signal_result) = tokio::join!(
        watcher_handle,
        processor_handle,
        socket_handle,
        resync_handle,
        signal_handle
    );

    handle_join("watcher", watcher_result)?;
    handle_join("cycle_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("resync", resync_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn watcher_task(
    state_file: PathBuf,
    cycle_tx: mpsc::Sender<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let dir = state_dir(&state_file);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    // Events arrive with real paths (e.g. /private/var/... on macOS).
    let dir = fs::canonicalize(&dir).map_err(|e| io_err(&dir, e))?;
    let Some(file_name) = state_file.file_name() else {
        return Err(DaemonError::Protocol(format!(
            "desired state path has no file name: {}",
            state_file.display()
        )));
    };
    let watched = dir.join(file_name);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %dir.display(), "watching desired state directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if !event.paths.iter().any(|path| is_state_file(path, &watched)) {
                    continue;
                }
                if !should_process_event(&mut debounce, &watched, Instant::now()) {
                    continue;
                }

                match enqueue_cycle(&cycle_tx, "watcher").await {
                    Ok(summary) => {
                        tracing::info!(
                            outcome = %summary.outcome,
                            duration_ms = summary.duration_ms,
                            "watcher-triggered cycle completed",
                        );
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "watcher-triggered cycle failed");
                    }
                }
            }
        }
    }

    Ok(())
}

async fn resync_task(
    every: Option<Duration>,
    cycle_tx: mpsc::Sender<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(every) = every else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(err) = enqueue_cycle(&cycle_tx, "resync").await {
                    tracing::error!(error = %err, "periodic resync failed");
                }
            }
        }
    }
    Ok(())
}

/// Owns the instance; every cycle runs here, one at a time.
async fn cycle_processor_task(
    instance: Instance,
    history: SharedHistory,
    mut cycle_rx: mpsc::Receiver<CycleJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (mut instance, first) = run_cycle(instance, "startup").await?;
    if let Err(err) = &first {
        tracing::warn!(error = %err, "startup cycle failed");
    }
    record_cycle(&history, &first).await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = cycle_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let (returned, outcome) = run_cycle(instance, job.source).await?;
                instance = returned;
                record_cycle(&history, &outcome).await;
                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

/// Moves the instance onto the blocking pool for one cycle and back.
async fn run_cycle(
    instance: Instance,
    source: &'static str,
) -> Result<(Instance, Result<CycleSummary, String>), DaemonError> {
    tokio::task::spawn_blocking(move || {
        let mut instance = instance;
        let outcome = cycle_blocking(&mut instance, source).map_err(|err| err.to_string());
        (instance, outcome)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("cycle task join error: {err}")))
}

fn cycle_blocking(instance: &mut Instance, source: &'static str) -> Result<CycleSummary, DaemonError> {
    let started = std::time::Instant::now();
    let desired = state::load_state_at(&instance.options().state_file)?;
    instance.replace_config(Config::from_state(desired));

    let mut timer = Timer::new();
    let outcome = instance.update(&mut timer);
    tracing::debug!(timings = %timer, "cycle checkpoints");

    Ok(CycleSummary {
        source: source.to_string(),
        outcome: outcome.label().to_string(),
        message: outcome.to_string(),
        success: outcome.is_success(),
        timings: timer.ticks().to_vec(),
        duration_ms: started.elapsed().as_millis(),
        finished_at_unix: unix_seconds_now(),
    })
}

async fn record_cycle(history: &SharedHistory, outcome: &Result<CycleSummary, String>) {
    let mut history = history.write().await;
    match outcome {
        Ok(summary) => {
            history.cycles += 1;
            if !summary.success {
                history.failures += 1;
            }
            history.last_cycle = Some(summary.clone());
        }
        Err(err) => {
            history.failures += 1;
            history.last_error = Some(err.clone());
        }
    }
}

async fn socket_server_task(
    info: DaemonInfo,
    history: SharedHistory,
    cycle_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = info.socket.clone();
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let info = info.clone();
                let history = history.clone();
                let cycle_tx = cycle_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, info, history, cycle_tx, shutdown_tx).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    info: DaemonInfo,
    history: SharedHistory,
    cycle_tx: mpsc::Sender<CycleJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&info, &history).await),
            "sync" => match enqueue_cycle(&cycle_tx, "socket").await {
                Ok(summary) => DaemonResponse::ok(json!(summary)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(info: &DaemonInfo, history: &SharedHistory) -> Value {
    let history = history.read().await;
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": info.started_at_unix,
        "cycles": history.cycles,
        "failures": history.failures,
        "last_cycle": history.last_cycle,
        "last_error": history.last_error,
        "socket": info.socket.display().to_string(),
        "state_file": info.state_file.display().to_string(),
        "config_file": info.config_file.display().to_string(),
    })
}

async fn enqueue_cycle(
    cycle_tx: &mpsc::Sender<CycleJob>,
    source: &'static str,
) -> Result<CycleSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    cycle_tx
        .send(CycleJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("cycle response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Only one directory is watched, so the file name is enough.
fn is_state_file(path: &Path, watched: &Path) -> bool {
    path.file_name().is_some() && path.file_name() == watched.file_name()
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_run_dir(run_dir: &Path) -> Result<(), DaemonError> {
    if !run_dir.exists() {
        fs::create_dir_all(run_dir).map_err(|e| io_err(run_dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the `fmt` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

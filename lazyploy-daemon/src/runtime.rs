use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use lazyploy_core::{config, AgentConfig};
use lazyploy_sync::HttpArtifactSource;

use crate::catalog::HttpBuildCatalog;
use crate::error::{io_err, DaemonError};
use crate::host;
use crate::orchestrator::{Orchestrator, SyncSnapshot};
use crate::reporter::HttpStatusReporter;

/// A manual "check now" request; answered with the snapshot after the tick.
type SyncRequest = oneshot::Sender<SyncSnapshot>;

/// Start the agent runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load the config, wire the HTTP collaborators and run until shutdown.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = Arc::new(config::load_at(&home)?);
    let orchestrator = build_orchestrator(config).await?;
    run_with(home, orchestrator).await
}

async fn build_orchestrator(config: Arc<AgentConfig>) -> Result<Orchestrator, DaemonError> {
    let host = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || host::discover(&config))
            .await
            .map_err(|err| DaemonError::Protocol(format!("host discovery join error: {err}")))?
    };
    tracing::info!(hostname = %host.hostname, address = %host.address, "host identity");

    let timeout = config.http_timeout();
    let catalog = Arc::new(HttpBuildCatalog::new(config.catalog_url.clone(), timeout));
    let reporter = Arc::new(HttpStatusReporter::new(config.catalog_url.clone(), timeout));
    let source = Arc::new(HttpArtifactSource::new(timeout));
    Ok(Orchestrator::new(config, host, catalog, reporter, source)?)
}

/// Run a prepared orchestrator: control loop, control socket, signals.
pub async fn run_with(home: PathBuf, orchestrator: Orchestrator) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let (sync_tx, sync_rx) = mpsc::channel::<SyncRequest>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let snapshots = orchestrator.subscribe();

    let loop_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = control_loop(orchestrator, sync_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    #[cfg(unix)]
    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result =
                socket::serve(home, snapshots, sync_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };
    #[cfg(not(unix))]
    drop((snapshots, sync_tx));

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = shutdown_signal() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received shutdown signal, stopping agent");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("signal handler failed: {err}"))),
                    }
                }
            }
        })
    };

    #[cfg(unix)]
    {
        let (loop_result, socket_result, signal_result) =
            tokio::join!(loop_handle, socket_handle, signal_handle);
        handle_join("control_loop", loop_result)?;
        handle_join("socket_server", socket_result)?;
        handle_join("signal_handler", signal_result)?;
    }
    #[cfg(not(unix))]
    {
        let (loop_result, signal_result) = tokio::join!(loop_handle, signal_handle);
        handle_join("control_loop", loop_result)?;
        handle_join("signal_handler", signal_result)?;
    }
    Ok(())
}

async fn control_loop(
    mut orchestrator: Orchestrator,
    mut sync_rx: mpsc::Receiver<SyncRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let first_tick = Instant::now() + orchestrator.config().initial_delay();
    let mut interval = tokio::time::interval_at(first_tick, orchestrator.config().tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let snapshots = orchestrator.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            exit = orchestrator.next_exit() => orchestrator.handle_exit(exit),
            Some(reply) = sync_rx.recv() => {
                tick_dropping_requests(&mut orchestrator, &snapshots, &mut sync_rx).await;
                let _ = reply.send(orchestrator.snapshot());
            }
            _ = interval.tick() => {
                tick_dropping_requests(&mut orchestrator, &snapshots, &mut sync_rx).await;
            }
        }
    }

    match orchestrator.shutdown().await {
        Ok(outcome) => tracing::info!(?outcome, "supervised process stopped"),
        Err(err) => {
            tracing::error!(error = %err, "could not stop supervised process");
            return Err(err.into());
        }
    }
    Ok(())
}

/// Run one tick. Sync requests arriving meanwhile are answered with the
/// in-flight snapshot (`busy` set during a sequence) and never queued.
async fn tick_dropping_requests(
    orchestrator: &mut Orchestrator,
    snapshots: &watch::Receiver<SyncSnapshot>,
    sync_rx: &mut mpsc::Receiver<SyncRequest>,
) {
    let tick = orchestrator.tick();
    tokio::pin!(tick);
    loop {
        tokio::select! {
            _ = &mut tick => break,
            Some(reply) = sync_rx.recv() => {
                let snapshot = snapshots.borrow().clone();
                tracing::debug!(phase = %snapshot.phase, "sync requested mid-tick; not queued");
                let _ = reply.send(snapshot);
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod socket {
    use std::fs;
    use std::io::ErrorKind;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::path::{Path, PathBuf};

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::unix::OwnedWriteHalf;
    use tokio::net::{UnixListener, UnixStream};
    use tokio::sync::{broadcast, mpsc, oneshot, watch};

    use super::SyncRequest;
    use crate::error::{io_err, DaemonError};
    use crate::orchestrator::SyncSnapshot;
    use crate::paths::socket_path;
    use crate::protocol::{DaemonRequest, DaemonResponse};

    pub(super) async fn serve(
        home: PathBuf,
        snapshots: watch::Receiver<SyncSnapshot>,
        sync_tx: mpsc::Sender<SyncRequest>,
        shutdown_tx: broadcast::Sender<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError> {
        let socket = socket_path(&home);
        prepare_socket_for_bind(&socket)?;
        let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
        set_socket_permissions(&socket)?;
        tracing::info!(socket = %socket.display(), "control socket listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                    let snapshots = snapshots.clone();
                    let sync_tx = sync_tx.clone();
                    let shutdown_tx = shutdown_tx.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_client(stream, snapshots, sync_tx, shutdown_tx).await {
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

    /// Commands the control socket understands.
    #[derive(Debug, Clone, Copy)]
    enum Control {
        Status,
        Sync,
        Stop,
    }

    impl Control {
        fn parse(line: &str) -> Result<Self, String> {
            let request: DaemonRequest =
                serde_json::from_str(line).map_err(|err| format!("invalid request JSON: {err}"))?;
            match request.cmd.as_str() {
                "status" => Ok(Control::Status),
                "sync" => Ok(Control::Sync),
                "stop" => Ok(Control::Stop),
                other => Err(format!("unknown command '{other}'")),
            }
        }
    }

    async fn handle_client(
        stream: UnixStream,
        snapshots: watch::Receiver<SyncSnapshot>,
        sync_tx: mpsc::Sender<SyncRequest>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_err("control socket read", e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let command = Control::parse(&line);
            let stopping = matches!(command, Ok(Control::Stop));
            let response = match command {
                Err(message) => DaemonResponse::error(message),
                Ok(Control::Status) => {
                    let snapshot = snapshots.borrow().clone();
                    DaemonResponse::ok(serde_json::to_value(snapshot)?)
                }
                Ok(Control::Sync) => match request_tick(&sync_tx).await {
                    Ok(snapshot) => DaemonResponse::ok(serde_json::to_value(snapshot)?),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                Ok(Control::Stop) => {
                    tracing::info!("stop requested over control socket");
                    let _ = shutdown_tx.send(());
                    DaemonResponse::ok(json!({ "stopping": true }))
                }
            };
            write_response(&mut writer, &response).await?;
            if stopping {
                break;
            }
        }
        Ok(())
    }

    /// Queue a tick on the control loop and wait for the snapshot after it.
    async fn request_tick(sync_tx: &mpsc::Sender<SyncRequest>) -> Result<SyncSnapshot, DaemonError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        sync_tx
            .send(reply_tx)
            .await
            .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;
        reply_rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("sync response"))
    }

    async fn write_response(
        writer: &mut OwnedWriteHalf,
        response: &DaemonResponse,
    ) -> Result<(), DaemonError> {
        let mut payload = serde_json::to_string(response)?;
        payload.push('\n');
        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| io_err("control socket write", e))
    }

    fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
        if !socket.exists() {
            return Ok(());
        }

        match StdUnixStream::connect(socket) {
            Ok(_) => {
                return Err(DaemonError::Protocol(format!(
                    "agent socket already in use: {}",
                    socket.display()
                )));
            }
            Err(err) => {
                tracing::warn!(
                    socket = %socket.display(),
                    error = %err,
                    "removing stale agent socket before bind",
                );
            }
        }

        match fs::remove_file(socket) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(socket, err)),
        }
    }

    fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = config::lazyploy_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

fn handle_join(
    task: &str,
    joined: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

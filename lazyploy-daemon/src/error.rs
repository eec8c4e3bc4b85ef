use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its control socket.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Core(#[from] lazyploy_core::CoreError),

    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("agent is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

/// The catalog could not answer this tick.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the child-process lifecycle.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {path}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a process is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("process {pid} did not exit after a forced kill")]
    ProcessWontDie { pid: u32 },

    #[error("could not prepare executable: {0}")]
    Prepare(#[from] lazyploy_sync::SyncError),
}

impl SupervisorError {
    pub fn category(&self) -> &'static str {
        match self {
            SupervisorError::SpawnFailed { .. } | SupervisorError::AlreadyRunning { .. } => {
                "SpawnFailed"
            }
            SupervisorError::ProcessWontDie { .. } => "ProcessWontDie",
            SupervisorError::Prepare(err) => err.category(),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

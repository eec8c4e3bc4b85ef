//! Error types for lazyploy-sync.

use std::path::PathBuf;

use thiserror::Error;

use lazyploy_core::{BuildId, CoreError, Platform};

/// All errors that can arise while fetching, installing or preparing a build.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The archive could not be streamed into the temp area.
    #[error("download of build {build} failed: {reason}")]
    DownloadFailed { build: BuildId, reason: String },

    /// The finished download could not be moved next to the build directory.
    #[error("moving archive for build {build} to {path} failed: {source}")]
    MoveFailed {
        build: BuildId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unpacking the archive (or preparing its directory) failed.
    #[error("extracting build {build} failed: {reason}")]
    ExtractFailed { build: BuildId, reason: String },

    /// None of the candidate directories held a matching binary.
    #[error("no executable for {platform} in build {build} (searched {searched:?})")]
    ExecutableNotFound {
        build: BuildId,
        platform: Platform,
        searched: Vec<PathBuf>,
    },

    /// The platform tag has no known packaging convention.
    #[error("unsupported platform '{0}'")]
    UnsupportedPlatform(Platform),

    /// An error from the core crate (store scan).
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (completion marker).
    #[error("marker JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Short category label surfaced in the agent's status string.
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::DownloadFailed { .. } => "DownloadFailed",
            SyncError::MoveFailed { .. } => "MoveFailed",
            SyncError::ExtractFailed { .. } | SyncError::Json(_) => "ExtractFailed",
            SyncError::ExecutableNotFound { .. } | SyncError::UnsupportedPlatform(_) => {
                "ExecutableNotFound"
            }
            SyncError::Core(_) | SyncError::Io { .. } => "IoFailed",
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

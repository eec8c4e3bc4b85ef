//! Artifact fetching and installation.
//!
//! ## `fetch_and_install` protocol
//!
//! 1. Stream the archive into `<storage>/temp/` (never into the builds root).
//! 2. Move the finished archive to `<builds_root>/<id>.zip` (rename, retried,
//!    copy fallback across filesystems).
//! 3. Remove any existing `<builds_root>/<id>/` left by an earlier attempt.
//! 4. Unpack entry by entry into a fresh `<builds_root>/<id>/`.
//! 5. Write the completion marker, then drop the archive.
//!
//! A failure at any step leaves other build directories untouched and no
//! marker for `<id>`, so [`LocalBuildStore`](lazyploy_core::LocalBuildStore)
//! never reports a half-installed build.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use lazyploy_core::{BuildDescriptor, BuildId, BuildLayout};

use crate::error::SyncError;
use crate::{extract, marker};

const MOVE_ATTEMPTS: usize = 3;
const MOVE_RETRY_DELAY: Duration = Duration::from_millis(200);
const COPY_BUFFER: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where build archives come from.
pub trait ArtifactSource: Send + Sync {
    /// Open a byte stream for the archive of `descriptor`.
    fn open(&self, descriptor: &BuildDescriptor) -> Result<Box<dyn Read + Send>, SyncError>;
}

/// Streams archives over HTTP from `descriptor.artifact_url`.
#[derive(Clone)]
pub struct HttpArtifactSource {
    agent: ureq::Agent,
}

impl HttpArtifactSource {
    /// `timeout` bounds connecting and each individual read, not the whole
    /// transfer, so large archives on slow links still complete.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        Self { agent }
    }
}

impl ArtifactSource for HttpArtifactSource {
    fn open(&self, descriptor: &BuildDescriptor) -> Result<Box<dyn Read + Send>, SyncError> {
        let url = descriptor.artifact_url.as_str();
        tracing::debug!("requesting archive {url}");
        match self.agent.get(url).call() {
            Ok(response) => Ok(Box::new(response.into_reader())),
            Err(ureq::Error::Status(code, _)) => Err(SyncError::DownloadFailed {
                build: descriptor.id,
                reason: format!("{url} answered HTTP {code}"),
            }),
            Err(err) => Err(SyncError::DownloadFailed {
                build: descriptor.id,
                reason: format!("{url}: {err}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A complete archive sitting next to its future build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArchive {
    pub build: BuildId,
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// A build whose directory is fully extracted and marked complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBuild {
    pub build: BuildId,
    pub dir: PathBuf,
    pub entries: usize,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Downloads and unpacks builds into the layout's builds root.
#[derive(Clone)]
pub struct ArtifactFetcher {
    layout: BuildLayout,
    source: Arc<dyn ArtifactSource>,
    attempts: u32,
}

impl ArtifactFetcher {
    pub fn new(layout: BuildLayout, source: Arc<dyn ArtifactSource>, attempts: u32) -> Self {
        Self {
            layout,
            source,
            attempts: attempts.max(1),
        }
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Download then install; the two halves are also exposed so callers can
    /// report progress between them.
    pub fn fetch_and_install(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<InstalledBuild, SyncError> {
        let archive = self.download(descriptor)?;
        self.install(&archive)
    }

    /// Steps 1–2: stream into the temp area, then move beside the build dir.
    pub fn download(&self, descriptor: &BuildDescriptor) -> Result<DownloadedArchive, SyncError> {
        let temp_dir = self.layout.temp_dir();
        fs::create_dir_all(&temp_dir).map_err(|e| SyncError::DownloadFailed {
            build: descriptor.id,
            reason: format!("cannot create {}: {e}", temp_dir.display()),
        })?;
        clear_stale_downloads(&temp_dir);

        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.download_once(descriptor, &temp_dir) {
                Ok((tmp, sha256, bytes)) => {
                    tracing::info!(
                        "downloaded build {} ({bytes} bytes, sha256 {sha256})",
                        descriptor.id
                    );
                    let path = self.layout.archive_path(descriptor.id);
                    persist_archive(tmp, &path, descriptor.id)?;
                    return Ok(DownloadedArchive {
                        build: descriptor.id,
                        path,
                        sha256,
                        bytes,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        "download attempt {attempt}/{} for build {} failed: {err}",
                        self.attempts,
                        descriptor.id
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| SyncError::DownloadFailed {
            build: descriptor.id,
            reason: "no attempts left".into(),
        }))
    }

    fn download_once(
        &self,
        descriptor: &BuildDescriptor,
        temp_dir: &Path,
    ) -> Result<(NamedTempFile, String, u64), SyncError> {
        let failed = |reason: String| SyncError::DownloadFailed {
            build: descriptor.id,
            reason,
        };

        let mut reader = self.source.open(descriptor)?;
        let mut tmp = NamedTempFile::new_in(temp_dir)
            .map_err(|e| failed(format!("cannot create temp file: {e}")))?;

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        let mut buffer = vec![0_u8; COPY_BUFFER];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(failed(format!("stream error after {written} bytes: {e}"))),
            };
            hasher.update(&buffer[..read]);
            tmp.write_all(&buffer[..read])
                .map_err(|e| failed(format!("write to temp file failed: {e}")))?;
            written += read as u64;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| failed(format!("flush temp file failed: {e}")))?;

        if written == 0 {
            return Err(failed("empty archive".into()));
        }
        Ok((tmp, hex::encode(hasher.finalize()), written))
    }

    /// Steps 3–5: wipe any earlier attempt, unpack, mark complete.
    pub fn install(&self, archive: &DownloadedArchive) -> Result<InstalledBuild, SyncError> {
        let build = archive.build;
        let dir = self.layout.build_dir(build);
        let failed = |reason: String| SyncError::ExtractFailed { build, reason };

        match fs::remove_dir_all(&dir) {
            Ok(()) => tracing::info!("removed stale directory for build {build}"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(failed(format!("cannot remove {}: {e}", dir.display()))),
        }
        fs::create_dir_all(&dir).map_err(|e| failed(format!("cannot create {}: {e}", dir.display())))?;

        let entries = extract::unpack(&archive.path, &dir)
            .map_err(|e| failed(format!("{}: {e}", archive.path.display())))?;

        marker::write(&self.layout, build, &archive.sha256)
            .map_err(|e| failed(format!("writing completion marker: {e}")))?;

        if let Err(e) = fs::remove_file(&archive.path) {
            tracing::warn!("could not remove archive {}: {e}", archive.path.display());
        }

        tracing::info!("installed build {build} ({entries} entries) at {}", dir.display());
        Ok(InstalledBuild {
            build,
            dir,
            entries,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Only one download is ever in flight, so anything left in the temp area
/// belongs to an interrupted run.
fn clear_stale_downloads(temp_dir: &Path) {
    let Ok(entries) = fs::read_dir(temp_dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => tracing::debug!("removed stale download {}", path.display()),
            Err(e) => tracing::warn!("cannot remove stale download {}: {e}", path.display()),
        }
    }
}

/// Rename the finished download over `dest`, retrying transient failures and
/// falling back to copy + rename when the temp area is on another filesystem.
fn persist_archive(tmp: NamedTempFile, dest: &Path, build: BuildId) -> Result<(), SyncError> {
    let move_failed = |source: io::Error| SyncError::MoveFailed {
        build,
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(move_failed)?;
    }

    let mut tmp = tmp;
    let mut last_err = None;
    for attempt in 1..=MOVE_ATTEMPTS {
        match tmp.persist(dest) {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!(
                    "moving archive to {} failed (attempt {attempt}/{MOVE_ATTEMPTS}): {}",
                    dest.display(),
                    err.error
                );
                last_err = Some(err.error);
                tmp = err.file;
                std::thread::sleep(MOVE_RETRY_DELAY);
            }
        }
    }

    // Cross-device: copy beside the destination, then rename into place.
    let staging = dest.with_extension("zip.partial");
    let copied = fs::copy(tmp.path(), &staging).and_then(|_| fs::rename(&staging, dest));
    match copied {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&staging);
            Err(move_failed(last_err.unwrap_or(err)))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

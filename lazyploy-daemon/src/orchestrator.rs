//! Sync orchestrator: the per-tick decision and the stop → fetch → extract →
//! start pipeline.
//!
//! ```text
//!            ┌──────────── catalog down / nothing newer ───────────┐
//!            ▼                                                      │
//! Idle/Running ──tick──▶ CheckingRemote ──target == installed──▶ Starting ──▶ Running
//!                               │                                   ▲
//!                               └─target > installed─▶ StoppingOld ─▶ Fetching ─▶ Extracting
//!                                                  (any failure ─▶ Errored, retried next tick)
//! ```
//!
//! All transitions run on the caller's task; the orchestrator is driven by
//! one control loop and never shared.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use lazyploy_core::{AgentConfig, BuildDescriptor, BuildId, BuildLayout, CoreError, LocalBuildStore};
use lazyploy_sync::{
    launch_args, patch_ports, resolve_executable, ArtifactFetcher, ArtifactSource, PatchResult,
    SyncError,
};

use crate::catalog::BuildCatalog;
use crate::error::{CatalogError, SupervisorError};
use crate::host::HostIdentity;
use crate::reporter::{StatusReport, StatusReporter};
use crate::supervisor::{LaunchSpec, ProcessExit, ProcessSupervisor, StopOutcome};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Idle,
    CheckingRemote,
    StoppingOld,
    Fetching,
    Extracting,
    Starting,
    Running,
    Errored,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncPhase::Idle => "Idle",
            SyncPhase::CheckingRemote => "CheckingRemote",
            SyncPhase::StoppingOld => "StoppingOld",
            SyncPhase::Fetching => "Fetching",
            SyncPhase::Extracting => "Extracting",
            SyncPhase::Starting => "Starting",
            SyncPhase::Running => "Running",
            SyncPhase::Errored => "Errored",
        };
        f.write_str(label)
    }
}

/// Published after every transition; what `lazyploy status` shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub phase: SyncPhase,
    pub status: String,
    pub installed_build_id: i64,
    pub target_build_id: Option<i64>,
    pub pid: Option<u32>,
    pub busy: bool,
    pub updated_at_unix: u64,
}

/// A failed pipeline step, already reduced to what the operator sees.
#[derive(Debug)]
struct StepFailure {
    category: &'static str,
    message: String,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl From<SyncError> for StepFailure {
    fn from(err: SyncError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<SupervisorError> for StepFailure {
    fn from(err: SupervisorError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for StepFailure {
    fn from(err: CoreError) -> Self {
        Self {
            category: "IoFailed",
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for StepFailure {
    fn from(err: tokio::task::JoinError) -> Self {
        Self {
            category: "IoFailed",
            message: format!("background task failed: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: Arc<AgentConfig>,
    host: HostIdentity,
    catalog: Arc<dyn BuildCatalog>,
    reports: mpsc::UnboundedSender<StatusReport>,
    fetcher: ArtifactFetcher,
    store: LocalBuildStore,
    supervisor: ProcessSupervisor,
    installed: Option<BuildId>,
    target: Option<BuildId>,
    phase: SyncPhase,
    status: String,
    busy: bool,
    snapshot_tx: watch::Sender<SyncSnapshot>,
}

impl Orchestrator {
    /// Reads the installed build once; boots in `Idle`. Must be called from
    /// within a tokio runtime (the reporter worker lives on its blocking pool).
    pub fn new(
        config: Arc<AgentConfig>,
        host: HostIdentity,
        catalog: Arc<dyn BuildCatalog>,
        reporter: Arc<dyn StatusReporter>,
        source: Arc<dyn ArtifactSource>,
    ) -> Result<Self, CoreError> {
        let layout = BuildLayout::from_config(&config);
        let store = LocalBuildStore::new(layout.clone());
        let installed = store.installed_build_id()?;
        let fetcher = ArtifactFetcher::new(layout, source, config.download_attempts);
        let status = match installed {
            Some(id) => format!("build {id} installed"),
            None => "no build installed".to_string(),
        };
        tracing::info!(
            project = %config.project,
            platform = %config.platform,
            installed = BuildId::or_sentinel(installed),
            "orchestrator ready",
        );

        let (snapshot_tx, _) = watch::channel(SyncSnapshot {
            phase: SyncPhase::Idle,
            status: status.clone(),
            installed_build_id: BuildId::or_sentinel(installed),
            target_build_id: None,
            pid: None,
            busy: false,
            updated_at_unix: unix_seconds_now(),
        });

        Ok(Self {
            config,
            host,
            catalog,
            reports: spawn_report_worker(reporter),
            fetcher,
            store,
            supervisor: ProcessSupervisor::new(),
            installed,
            target: None,
            phase: SyncPhase::Idle,
            status,
            busy: false,
            snapshot_tx,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn installed(&self) -> Option<BuildId> {
        self.installed
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Next child exit, for the control loop's `select!`.
    pub async fn next_exit(&mut self) -> ProcessExit {
        self.supervisor.next_exit().await
    }

    /// Apply a child exit observed by the control loop.
    pub fn handle_exit(&mut self, exit: ProcessExit) {
        let code = exit.code;
        if self.supervisor.on_exit(exit) && self.phase == SyncPhase::Running {
            let build = BuildId::or_sentinel(self.installed);
            self.transition(
                SyncPhase::Idle,
                format!("build {build} exited (code {code:?}); restarting on next tick"),
            );
        }
    }

    /// One control-loop tick.
    pub async fn tick(&mut self) {
        if self.supervisor.poll_exits() && self.phase == SyncPhase::Running {
            self.transition(SyncPhase::Idle, "process exited".to_string());
        }
        self.report();
        if self.busy {
            tracing::debug!("sync in flight; tick ignored");
            return;
        }

        self.transition(SyncPhase::CheckingRemote, "checking catalog".to_string());
        let catalog = self.catalog.clone();
        let project = self.config.project.clone();
        let platform = self.config.platform.clone();
        let answer = tokio::task::spawn_blocking(move || {
            catalog.latest_completed_build(&project, &platform)
        })
        .await
        .unwrap_or_else(|err| Err(CatalogError::Unavailable(format!("catalog task failed: {err}"))));

        match answer {
            Err(err) => self.catalog_unavailable(err),
            Ok(None) => {
                self.target = None;
                match self.installed {
                    Some(id) => self.ensure_running(id),
                    None => self.transition(
                        SyncPhase::Idle,
                        "no completed build in catalog".to_string(),
                    ),
                }
            }
            Ok(Some(descriptor)) => {
                self.target = Some(descriptor.id);
                match self.installed {
                    Some(id) if descriptor.id == id => self.ensure_running(id),
                    Some(id) if descriptor.id < id => {
                        tracing::warn!(
                            installed = %id,
                            catalog = %descriptor.id,
                            "catalog points at an older build; keeping the installed one",
                        );
                        self.ensure_running(id);
                    }
                    _ => self.sync_to(descriptor).await,
                }
            }
        }
    }

    /// Stop the child for agent shutdown.
    pub async fn shutdown(&mut self) -> Result<StopOutcome, SupervisorError> {
        let outcome = self
            .supervisor
            .stop(self.config.stop_timeout(), self.config.kill_timeout())
            .await?;
        self.transition(SyncPhase::Idle, "agent stopped".to_string());
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn catalog_unavailable(&mut self, err: CatalogError) {
        match self.installed {
            None => {
                tracing::info!(error = %err, "catalog unreachable and nothing installed");
                self.transition(SyncPhase::Idle, format!("CatalogUnavailable: {err}"));
            }
            Some(id) => {
                tracing::warn!(error = %err, build = %id, "catalog unreachable; keeping current build");
                if !self.supervisor.is_running() {
                    if let Err(failure) = self.start(id) {
                        self.fail(failure);
                        return;
                    }
                }
                self.transition(
                    SyncPhase::Running,
                    format!("CatalogUnavailable: {err}; keeping build {id}"),
                );
            }
        }
    }

    fn ensure_running(&mut self, build: BuildId) {
        if self.supervisor.is_running() {
            self.transition(SyncPhase::Running, format!("build {build} up to date"));
            return;
        }
        if let Err(failure) = self.start(build) {
            self.fail(failure);
        }
    }

    async fn sync_to(&mut self, target: BuildDescriptor) {
        self.busy = true;
        let result = self.run_pipeline(&target).await;
        self.busy = false;
        if let Err(failure) = result {
            tracing::error!(build = %target.id, %failure, "sync failed");
            self.fail(failure);
        }
    }

    async fn run_pipeline(&mut self, target: &BuildDescriptor) -> Result<(), StepFailure> {
        let id = target.id;
        let from = BuildId::or_sentinel(self.installed);

        self.transition(SyncPhase::StoppingOld, format!("stopping build {from} for {id}"));
        let stopped = self
            .supervisor
            .stop(self.config.stop_timeout(), self.config.kill_timeout())
            .await?;
        tracing::info!(outcome = ?stopped, "previous instance stopped");

        self.transition(SyncPhase::Fetching, format!("downloading build {id}"));
        let fetcher = self.fetcher.clone();
        let descriptor = target.clone();
        let archive = tokio::task::spawn_blocking(move || fetcher.download(&descriptor)).await??;

        self.transition(
            SyncPhase::Extracting,
            format!("extracting build {id} ({} bytes)", archive.bytes),
        );
        let fetcher = self.fetcher.clone();
        tokio::task::spawn_blocking(move || fetcher.install(&archive)).await??;

        self.installed = self.store.installed_build_id()?;
        if self.installed != Some(id) {
            return Err(StepFailure {
                category: "ExtractFailed",
                message: format!(
                    "build {id} extracted but store reports {}",
                    BuildId::or_sentinel(self.installed)
                ),
            });
        }
        self.start(id)
    }

    fn start(&mut self, build: BuildId) -> Result<(), StepFailure> {
        self.transition(SyncPhase::Starting, format!("starting build {build}"));
        let layout = self.fetcher.layout();
        let program = resolve_executable(layout, build)?;
        let cwd = layout.build_dir(build);

        if let Some(relative) = &self.config.config_patch_path {
            let path = cwd.join(relative);
            if let PatchResult::Written { .. } =
                patch_ports(&path, self.config.port, self.config.query_port)?
            {
                tracing::info!(path = %path.display(), "ports written to build config");
            }
        }

        let spec = LaunchSpec {
            program,
            args: launch_args(&self.config, build, &self.host.hostname),
            cwd,
            family: self.config.platform.family(),
        };
        let pid = self.supervisor.start(&spec)?;
        self.transition(SyncPhase::Running, format!("running build {build} (pid {pid})"));
        Ok(())
    }

    fn fail(&mut self, failure: StepFailure) {
        self.transition(SyncPhase::Errored, failure.to_string());
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    fn transition(&mut self, phase: SyncPhase, status: String) {
        if phase != self.phase {
            tracing::info!(from = %self.phase, to = %phase, %status, "sync phase changed");
        }
        self.phase = phase;
        self.status = status;
        self.snapshot_tx.send_replace(SyncSnapshot {
            phase,
            status: self.status.clone(),
            installed_build_id: BuildId::or_sentinel(self.installed),
            target_build_id: self.target.map(|id| id.0),
            pid: self.supervisor.pid(),
            busy: self.busy,
            updated_at_unix: unix_seconds_now(),
        });
        self.report();
    }

    fn report(&self) {
        let report = StatusReport {
            hostname: self.host.hostname.clone(),
            address: self.host.address.clone(),
            project: self.config.project.0.clone(),
            platform: self.config.platform.0.clone(),
            installed_build_id: BuildId::or_sentinel(self.installed),
            state_label: self.phase.to_string(),
            status: self.status.clone(),
        };
        // The worker only goes away with the orchestrator.
        let _ = self.reports.send(report);
    }
}

/// One blocking worker delivers reports in the order they were produced, so
/// the remote record always ends on the latest state.
fn spawn_report_worker(reporter: Arc<dyn StatusReporter>) -> mpsc::UnboundedSender<StatusReport> {
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusReport>();
    drop(tokio::task::spawn_blocking(move || {
        while let Some(report) = rx.blocking_recv() {
            reporter.report(&report);
        }
    }));
    tx
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_labels_match_wire_names() {
        assert_eq!(SyncPhase::CheckingRemote.to_string(), "CheckingRemote");
        assert_eq!(
            serde_json::to_value(SyncPhase::StoppingOld).unwrap(),
            serde_json::json!("StoppingOld")
        );
    }

    #[test]
    fn failures_render_with_category_prefix() {
        let failure = StepFailure::from(SyncError::DownloadFailed {
            build: BuildId(4),
            reason: "HTTP 404".into(),
        });
        assert_eq!(
            failure.to_string(),
            "DownloadFailed: download of build 4 failed: HTTP 404"
        );
    }
}

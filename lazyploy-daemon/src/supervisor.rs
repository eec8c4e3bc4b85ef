//! Zero-or-one supervised child process.
//!
//! The child's exit is observed by a watcher task and delivered back as a
//! [`ProcessExit`] event over a channel; only [`ProcessSupervisor::on_exit`]
//! clears the running slot, and it does so once per process generation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use lazyploy_core::PlatformFamily;
use lazyploy_sync::ensure_executable;

use crate::error::SupervisorError;

/// What to run, resolved fresh for every start.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub family: PlatformFamily,
}

/// Exit notification for one started process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub generation: u64,
    pub pid: u32,
    /// `None` when the process was ended by a signal or `wait` failed.
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Graceful,
    Killed,
}

struct RunningProcess {
    generation: u64,
    pid: u32,
    program: PathBuf,
    kill_tx: Option<oneshot::Sender<()>>,
}

pub struct ProcessSupervisor {
    current: Option<RunningProcess>,
    next_generation: u64,
    exit_tx: mpsc::UnboundedSender<ProcessExit>,
    exit_rx: mpsc::UnboundedReceiver<ProcessExit>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            current: None,
            next_generation: 1,
            exit_tx,
            exit_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().map(|p| p.pid)
    }

    pub fn program(&self) -> Option<&Path> {
        self.current.as_ref().map(|p| p.program.as_path())
    }

    /// Spawn `spec`. Must be called from within a tokio runtime.
    pub fn start(&mut self, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
        if let Some(running) = &self.current {
            return Err(SupervisorError::AlreadyRunning { pid: running.pid });
        }
        ensure_executable(&spec.program, spec.family)?;

        let spawn_failed = |source: std::io::Error| SupervisorError::SpawnFailed {
            path: spec.program.clone(),
            source,
        };
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;
        let Some(pid) = child.id() else {
            return Err(spawn_failed(std::io::Error::other(
                "process exited before its pid was read",
            )));
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(pid, "{line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(pid, "{line}");
                }
            });
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(err) = child.start_kill() {
                        tracing::warn!(pid, error = %err, "forced kill failed");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    tracing::warn!(pid, error = %err, "waiting on child failed");
                    None
                }
            };
            let _ = exit_tx.send(ProcessExit {
                generation,
                pid,
                code,
            });
        });

        tracing::info!(
            pid,
            program = %spec.program.display(),
            args = ?spec.args,
            "started process",
        );
        self.current = Some(RunningProcess {
            generation,
            pid,
            program: spec.program.clone(),
            kill_tx: Some(kill_tx),
        });
        Ok(pid)
    }

    /// Apply an exit event. Returns `true` if it ended the current process;
    /// events from earlier generations are ignored.
    pub fn on_exit(&mut self, exit: ProcessExit) -> bool {
        match &self.current {
            Some(running) if running.generation == exit.generation => {
                tracing::info!(pid = exit.pid, code = ?exit.code, "process exited");
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Apply every exit event already queued, without waiting.
    pub fn poll_exits(&mut self) -> bool {
        let mut cleared = false;
        while let Ok(exit) = self.exit_rx.try_recv() {
            cleared |= self.on_exit(exit);
        }
        cleared
    }

    /// Next exit event. Cancel-safe, for use as a `select!` branch.
    pub async fn next_exit(&mut self) -> ProcessExit {
        match self.exit_rx.recv().await {
            Some(exit) => exit,
            // The supervisor holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Ask the process to terminate, wait up to `grace`, then force-kill and
    /// wait up to `kill_timeout`. Idempotent when nothing is running.
    pub async fn stop(
        &mut self,
        grace: Duration,
        kill_timeout: Duration,
    ) -> Result<StopOutcome, SupervisorError> {
        self.poll_exits();
        let Some(pid) = self.pid() else {
            return Ok(StopOutcome::NotRunning);
        };

        match request_termination(pid).await {
            Ok(()) => {
                if self.wait_for_exit(grace).await {
                    return Ok(StopOutcome::Graceful);
                }
                tracing::warn!(pid, ?grace, "process ignored termination request");
            }
            Err(reason) => tracing::warn!(pid, %reason, "termination request failed"),
        }

        if let Some(kill) = self.current.as_mut().and_then(|p| p.kill_tx.take()) {
            let _ = kill.send(());
        }
        if self.wait_for_exit(kill_timeout).await {
            tracing::warn!(pid, "process force-killed");
            return Ok(StopOutcome::Killed);
        }
        Err(SupervisorError::ProcessWontDie { pid })
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.current.is_some() {
            match tokio::time::timeout_at(deadline, self.exit_rx.recv()).await {
                Ok(Some(exit)) => {
                    self.on_exit(exit);
                }
                Ok(None) | Err(_) => return false,
            }
        }
        true
    }
}

#[cfg(unix)]
async fn request_termination(pid: u32) -> Result<(), String> {
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .await
        .map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("kill -TERM {pid} exited with {:?}", status.code()))
    }
}

#[cfg(not(unix))]
async fn request_termination(pid: u32) -> Result<(), String> {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status()
        .await
        .map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("taskkill /PID {pid} exited with {:?}", status.code()))
    }
}

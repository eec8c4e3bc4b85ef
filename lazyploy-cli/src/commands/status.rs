//! `lazyploy status`: what the running agent is doing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use lazyploy_daemon::{request_status, DaemonError, SyncPhase, SyncSnapshot};

/// Arguments for `lazyploy status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;

        let snapshot = match request_status(&home) {
            Ok(snapshot) => snapshot,
            Err(DaemonError::DaemonNotRunning { socket }) => {
                if self.json {
                    let payload = serde_json::json!({
                        "running": false,
                        "socket": socket.display().to_string(),
                    });
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&payload)
                            .context("failed to render status JSON")?
                    );
                } else {
                    println!("agent is not running (no socket at {})", socket.display());
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query agent status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_table(&snapshot);
        Ok(())
    }
}

fn print_table(snapshot: &SyncSnapshot) {
    println!(
        "lazyploy v{} | {}",
        env!("CARGO_PKG_VERSION"),
        phase_label(snapshot.phase)
    );

    let rows = vec![
        StatusRow {
            field: "status",
            value: snapshot.status.clone(),
        },
        StatusRow {
            field: "installed",
            value: build_cell(Some(snapshot.installed_build_id)),
        },
        StatusRow {
            field: "catalog",
            value: build_cell(snapshot.target_build_id),
        },
        StatusRow {
            field: "pid",
            value: snapshot
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
        },
        StatusRow {
            field: "updated",
            value: i64::try_from(snapshot.updated_at_unix)
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn build_cell(id: Option<i64>) -> String {
    match id {
        Some(id) if id >= 0 => id.to_string(),
        _ => "none".to_string(),
    }
}

/// Phase name coloured by health.
pub(crate) fn phase_label(phase: SyncPhase) -> String {
    let label = phase.to_string().to_uppercase();
    match phase {
        SyncPhase::Running => label.green().bold().to_string(),
        SyncPhase::Errored => label.red().bold().to_string(),
        SyncPhase::Idle => label.bright_black().bold().to_string(),
        _ => label.yellow().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_build_renders_as_none() {
        assert_eq!(build_cell(Some(-1)), "none");
        assert_eq!(build_cell(None), "none");
        assert_eq!(build_cell(Some(42)), "42");
    }
}

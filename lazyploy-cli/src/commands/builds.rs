//! `lazyploy builds`: complete builds in local storage.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use lazyploy_core::{config, BuildLayout, LocalBuildStore};
use lazyploy_sync::resolve_executable;

/// Arguments for `lazyploy builds`.
#[derive(Args, Debug)]
pub struct BuildsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct BuildEntry {
    id: i64,
    active: bool,
    installed_at: Option<String>,
    archive_sha256: Option<String>,
    executable: Option<String>,
    problem: Option<String>,
}

#[derive(Tabled)]
struct BuildRow {
    #[tabled(rename = "build")]
    build: String,
    #[tabled(rename = "installed")]
    installed: String,
    #[tabled(rename = "sha256")]
    sha256: String,
    #[tabled(rename = "executable")]
    executable: String,
}

impl BuildsArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let agent = config::load_at(&home).context("failed to load config")?;
        let layout = BuildLayout::from_config(&agent);
        let store = LocalBuildStore::new(layout.clone());

        let ids = store
            .installed_builds()
            .with_context(|| format!("failed to scan {}", layout.builds_root().display()))?;
        let newest = ids.last().copied();

        // Newest first; it is the one the agent runs.
        let entries: Vec<BuildEntry> = ids
            .iter()
            .rev()
            .map(|&id| {
                let marker = store.marker(id);
                let (executable, problem) = match resolve_executable(&layout, id) {
                    Ok(path) => (Some(path.display().to_string()), None),
                    Err(err) => (None, Some(format!("{}: {err}", err.category()))),
                };
                BuildEntry {
                    id: id.0,
                    active: Some(id) == newest,
                    installed_at: marker.as_ref().map(|m| m.installed_at.to_rfc3339()),
                    archive_sha256: marker.map(|m| m.archive_sha256),
                    executable,
                    problem,
                }
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&entries).context("failed to render builds JSON")?
            );
            return Ok(());
        }

        println!(
            "{} / {} | {} builds in {}",
            agent.project,
            agent.platform,
            entries.len(),
            layout.builds_root().display()
        );
        if entries.is_empty() {
            println!("No complete builds installed.");
            return Ok(());
        }

        let rows: Vec<BuildRow> = entries
            .into_iter()
            .map(|entry| BuildRow {
                build: if entry.active {
                    format!("{} {}", entry.id, "(active)".green())
                } else {
                    entry.id.to_string()
                },
                installed: entry.installed_at.unwrap_or_else(|| "-".to_string()),
                sha256: entry
                    .archive_sha256
                    .map(|sha| sha.chars().take(12).collect())
                    .unwrap_or_else(|| "-".to_string()),
                executable: match (entry.executable, entry.problem) {
                    (Some(path), _) => path,
                    (None, Some(problem)) => problem.red().to_string(),
                    (None, None) => "-".to_string(),
                },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

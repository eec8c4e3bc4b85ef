//! `lazyploy init --project <name> --platform <platform> [...]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use lazyploy_core::{config, AgentConfig, PlatformFamily};

/// Write the agent configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Catalog project name (e.g. "GenericShooter").
    #[arg(long, short = 'p')]
    pub project: String,

    /// Catalog platform tag: LinuxServer | WindowsServer | Linux | Win64 | ...
    #[arg(long)]
    pub platform: String,

    /// Base URL of the catalog / status service.
    #[arg(long)]
    pub url: Option<String>,

    /// Build storage root. Defaults to ~/.lazyploy/storage
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Game port passed to the server and written to the patched config.
    #[arg(long)]
    pub port: Option<u16>,

    /// Query port passed to the server and written to the patched config.
    #[arg(long)]
    pub query_port: Option<u16>,

    /// key=value config file inside each build whose ports are rewritten
    /// before launch, relative to the build directory.
    #[arg(long)]
    pub config_patch_path: Option<PathBuf>,

    /// Overwrite an existing config.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "config already exists at {}; pass --force to overwrite",
                path.display()
            );
        }

        let storage = self
            .storage_dir
            .unwrap_or_else(|| config::default_storage_dir(&home));
        let mut agent = AgentConfig::new(self.project, self.platform, storage);
        if let Some(url) = self.url {
            agent.catalog_url = url;
        }
        if let Some(port) = self.port {
            agent.port = port;
        }
        if let Some(query_port) = self.query_port {
            agent.query_port = query_port;
        }
        agent.config_patch_path = self.config_patch_path;

        let agent = agent.validate().context("invalid configuration")?;
        if agent.platform.family() == PlatformFamily::Unsupported {
            eprintln!(
                "warning: platform '{}' has no known executable layout; builds will not start",
                agent.platform
            );
        }

        let saved = config::save_at(&home, &agent)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!(
            "✓ Configured '{}' on '{}' against {}",
            agent.project, agent.platform, agent.catalog_url
        );
        println!("  Saved to: {}", saved.display());
        println!("  Builds under: {}", agent.storage_dir.display());
        Ok(())
    }
}

//! lazyploy: keeps one game-server build per machine current and running.
//!
//! # Usage
//!
//! ```text
//! lazyploy init --project <name> --platform <platform> [--url <catalog>] [--force]
//! lazyploy run
//! lazyploy status [--json]
//! lazyploy sync
//! lazyploy stop
//! lazyploy builds [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{builds::BuildsArgs, init::InitArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "lazyploy",
    version,
    about = "Deploy the latest catalog build of a game server and keep it running",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.lazyploy/config.yaml.
    Init(InitArgs),

    /// Run the agent in the foreground (control loop + socket server).
    Run,

    /// Show the running agent's sync state.
    Status(StatusArgs),

    /// Ask the running agent to check the catalog now.
    Sync,

    /// Ask the running agent to stop its server and exit.
    Stop,

    /// List complete builds in local storage.
    Builds(BuildsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Run => commands::agent::run(),
        Commands::Status(args) => args.run(),
        Commands::Sync => commands::agent::sync(),
        Commands::Stop => commands::agent::stop(),
        Commands::Builds(args) => args.run(),
    }
}

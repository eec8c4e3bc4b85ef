//! `lazyploy run|sync|stop`: agent lifecycle over the control socket.

use anyhow::{Context, Result};
use colored::Colorize;

use lazyploy_daemon::{request_stop, request_sync, start_blocking, DaemonError};

use super::status::phase_label;

/// Run the agent in the foreground until `stop`, ctrl-c or SIGTERM.
pub fn run() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    start_blocking(&home).context("agent exited with error")?;
    Ok(())
}

pub fn sync() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match request_sync(&home) {
        Ok(snapshot) => {
            println!("{} {}", phase_label(snapshot.phase), snapshot.status);
            if snapshot.busy {
                println!("{}", "a sync is already in progress".yellow());
            }
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("agent is not running; start it with 'lazyploy run'");
        }
        Err(err) => return Err(err).context("failed to request sync"),
    }
    Ok(())
}

pub fn stop() -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    match request_stop(&home) {
        Ok(()) => println!("agent stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("agent is not running"),
        Err(err) => return Err(err).context("failed to stop agent"),
    }
    Ok(())
}

//! Per-platform launch preparation: argument list and execute bits.

use std::path::Path;

use lazyploy_core::{AgentConfig, BuildId, PlatformFamily};

use crate::error::{io_err, SyncError};

/// Arguments passed to the build's executable.
///
/// Identity and verbosity flags come first, then the platform's network
/// flags, then the operator's `extra_args` verbatim.
pub fn launch_args(config: &AgentConfig, build: BuildId, hostname: &str) -> Vec<String> {
    let mut args = vec![
        "-log".to_string(),
        format!("-LogVerbosity={}", config.log_verbosity),
        format!("-SessionName={hostname}"),
        format!("-BuildId={build}"),
    ];

    let family = config.platform.family();
    let server_flags = match family {
        PlatformFamily::DedicatedServer | PlatformFamily::LinuxClient => true,
        PlatformFamily::Windows => is_server_tag(&config.platform.0),
        PlatformFamily::Unsupported => false,
    };
    if server_flags {
        args.push("-unattended".to_string());
        args.push(format!("-Port={}", config.port));
        args.push(format!("-QueryPort={}", config.query_port));
    } else if family == PlatformFamily::Windows {
        args.push(format!("-Port={}", config.port));
    }

    args.extend(config.extra_args.iter().cloned());
    args
}

fn is_server_tag(tag: &str) -> bool {
    tag.to_ascii_lowercase().ends_with("server")
}

/// Make sure `path` carries execute bits when the platform ships binaries
/// without them (archives built on Windows often drop the mode).
pub fn ensure_executable(path: &Path, family: PlatformFamily) -> Result<(), SyncError> {
    if !family.needs_exec_bit() {
        return Ok(());
    }
    set_exec_bits(path)
}

#[cfg(unix)]
fn set_exec_bits(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    let mode = meta.permissions().mode();
    if mode & 0o111 == 0o111 {
        return Ok(());
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o755))
        .map_err(|e| io_err(path, e))?;
    tracing::debug!("marked {} executable", path.display());
    Ok(())
}

#[cfg(not(unix))]
fn set_exec_bits(path: &Path) -> Result<(), SyncError> {
    std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(platform: &str) -> AgentConfig {
        let mut config = AgentConfig::new("Shooter", platform, "/srv/storage");
        config.port = 7000;
        config.query_port = 27000;
        config
    }

    #[test]
    fn server_args_carry_both_ports() {
        let args = launch_args(&config("LinuxServer"), BuildId(6), "node-1");
        assert_eq!(
            args,
            vec![
                "-log",
                "-LogVerbosity=Log",
                "-SessionName=node-1",
                "-BuildId=6",
                "-unattended",
                "-Port=7000",
                "-QueryPort=27000",
            ]
        );
    }

    #[test]
    fn windows_client_only_gets_game_port() {
        let args = launch_args(&config("WindowsNoEditor"), BuildId(2), "pc");
        assert!(args.contains(&"-Port=7000".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-QueryPort")));
        assert!(!args.contains(&"-unattended".to_string()));
    }

    #[test]
    fn windows_server_matches_linux_server_flags() {
        let args = launch_args(&config("WindowsServer"), BuildId(2), "pc");
        assert!(args.contains(&"-QueryPort=27000".to_string()));
        assert!(args.contains(&"-unattended".to_string()));
    }

    #[test]
    fn extra_args_come_last() {
        let mut cfg = config("Linux");
        cfg.extra_args = vec!["-nosteam".into(), "-fps=30".into()];
        let args = launch_args(&cfg, BuildId(1), "h");
        assert_eq!(&args[args.len() - 2..], &["-nosteam", "-fps=30"]);
    }

    #[test]
    #[cfg(unix)]
    fn exec_bits_are_added_for_linux_families() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::TempDir::new().unwrap();
        let bin = tmp.path().join("ShooterServer");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();

        ensure_executable(&bin, PlatformFamily::Windows).unwrap();
        let mode = std::fs::metadata(&bin).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0, "windows family leaves modes alone");

        ensure_executable(&bin, PlatformFamily::DedicatedServer).unwrap();
        let mode = std::fs::metadata(&bin).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

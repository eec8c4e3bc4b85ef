//! Port substitution in the build's generated key=value config file.
//!
//! ## `patch_ports` protocol
//!
//! 1. Read the file (missing file → [`PatchResult::Missing`]).
//! 2. Normalise CRLF to LF.
//! 3. Rewrite every `Port=` and `QueryPort=` line to the configured values.
//! 4. Compare with what is on disk → skip if identical.
//! 5. Write to `<path>.lazyploy.tmp`, rename over the original.
//!
//! Applying the patch twice with the same ports yields the same file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{io_err, SyncError};

/// Outcome of a patch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    /// Ports changed and the file was rewritten.
    Written { path: PathBuf },
    /// The file already carried these ports.
    Unchanged { path: PathBuf },
    /// There is no such file in this build.
    Missing { path: PathBuf },
}

static PORT_RE: OnceLock<Regex> = OnceLock::new();
static QUERY_PORT_RE: OnceLock<Regex> = OnceLock::new();

fn port_re() -> &'static Regex {
    PORT_RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*Port[ \t]*=.*$").expect("valid Port pattern"))
}

fn query_port_re() -> &'static Regex {
    QUERY_PORT_RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*QueryPort[ \t]*=.*$").expect("valid QueryPort pattern")
    })
}

/// Pure text rewrite; exposed for tests and dry runs.
pub fn rewrite_ports(content: &str, port: u16, query_port: u16) -> String {
    let normalized = content.replace("\r\n", "\n");
    let with_port = port_re().replace_all(&normalized, format!("Port={port}").as_str());
    query_port_re()
        .replace_all(&with_port, format!("QueryPort={query_port}").as_str())
        .into_owned()
}

/// Rewrite the ports in `path` in place.
pub fn patch_ports(path: &Path, port: u16, query_port: u16) -> Result<PatchResult, SyncError> {
    let original = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config to patch at {}", path.display());
            return Ok(PatchResult::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(io_err(path, e)),
    };

    let patched = rewrite_ports(&original, port, query_port);
    if patched == original {
        return Ok(PatchResult::Unchanged {
            path: path.to_path_buf(),
        });
    }

    let tmp = PathBuf::from(format!("{}.lazyploy.tmp", path.display()));
    std::fs::write(&tmp, &patched).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }

    tracing::info!(
        "patched ports in {} (Port={port}, QueryPort={query_port})",
        path.display()
    );
    Ok(PatchResult::Written {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = "[URL]\nPort=7777\n\n[OnlineSubsystemSteam]\nGameServerQueryPort=1\nQueryPort=27015\nbEnabled=true\n";

    #[test]
    fn rewrites_only_exact_keys() {
        let out = rewrite_ports(SAMPLE, 7100, 27100);
        assert!(out.contains("\nPort=7100\n"));
        assert!(out.contains("\nQueryPort=27100\n"));
        assert!(out.contains("GameServerQueryPort=1"), "prefix keys untouched");
        assert!(out.contains("bEnabled=true"));
    }

    #[test]
    fn indented_keys_and_crlf_are_handled() {
        let out = rewrite_ports("  Port = 1\r\nQueryPort=2\r\n", 9, 10);
        assert_eq!(out, "Port=9\nQueryPort=10\n");
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Engine.ini");
        fs::write(&path, SAMPLE).unwrap();

        let first = patch_ports(&path, 7200, 27200).unwrap();
        assert!(matches!(first, PatchResult::Written { .. }));
        let after_first = fs::read_to_string(&path).unwrap();

        let second = patch_ports(&path, 7200, 27200).unwrap();
        assert!(matches!(second, PatchResult::Unchanged { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = patch_ports(&tmp.path().join("absent.ini"), 1, 2).unwrap();
        assert!(matches!(result, PatchResult::Missing { .. }));
    }

    #[test]
    fn tmp_file_removed_after_patch() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Game.ini");
        fs::write(&path, "Port=1\n").unwrap();
        patch_ports(&path, 2, 3).unwrap();
        let tmp_path = PathBuf::from(format!("{}.lazyploy.tmp", path.display()));
        assert!(!tmp_path.exists());
    }
}

use std::path::{Path, PathBuf};

use lazyploy_core::config::lazyploy_root;

pub const DAEMON_SOCKET: &str = "lazyployd.sock";

/// `<home>/.lazyploy/lazyployd.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    lazyploy_root(home).join(DAEMON_SOCKET)
}

//! # lazyploy-sync
//!
//! Everything between "the catalog says build N" and "this binary can be
//! launched": download into the temp area, move beside the builds root,
//! unpack, mark complete, resolve the executable and prepare its launch.
//!
//! The daemon calls [`ArtifactFetcher::fetch_and_install`] from a blocking
//! task, then [`resolve_executable`], [`patch_ports`] and [`launch_args`].

pub mod config_patch;
pub mod error;
mod extract;
pub mod fetcher;
pub mod launch;
mod marker;
pub mod resolve;

pub use config_patch::{patch_ports, rewrite_ports, PatchResult};
pub use error::SyncError;
pub use fetcher::{
    ArtifactFetcher, ArtifactSource, DownloadedArchive, HttpArtifactSource, InstalledBuild,
};
pub use launch::{ensure_executable, launch_args};
pub use resolve::resolve_executable;

//! Local build storage.
//!
//! # Storage layout
//!
//! ```text
//! <storage_root>/
//!   temp/                         (in-flight downloads, never scanned)
//!   <project>/<platform>/
//!     <build_id>/                 (one extracted build)
//!       .lazyploy-installed       (completion marker, JSON)
//!     <build_id>.zip              (archive awaiting extraction)
//! ```
//!
//! A build counts as installed only when its directory name parses as a
//! [`BuildId`] *and* it contains a readable completion marker. Anything else
//! under the builds root (partial extractions, archives, stray folders) is
//! skipped.

use std::path::{Path, PathBuf};

use crate::config::AgentConfig;
use crate::error::{io_err, CoreError};
use crate::types::{BuildId, CompletionMarker, Platform, PlatformFamily, ProjectName};

/// File written inside a build directory once extraction has finished.
pub const COMPLETION_MARKER: &str = ".lazyploy-installed";

/// Directory for in-flight downloads, relative to the storage root.
pub const TEMP_DIR: &str = "temp";

pub const ARCHIVE_EXTENSION: &str = "zip";

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Pure path arithmetic for one project/platform pair. No I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    storage_root: PathBuf,
    project: ProjectName,
    platform: Platform,
}

impl BuildLayout {
    pub fn new(storage_root: impl Into<PathBuf>, project: ProjectName, platform: Platform) -> Self {
        Self {
            storage_root: storage_root.into(),
            project,
            platform,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.storage_dir.clone(),
            config.project.clone(),
            config.platform.clone(),
        )
    }

    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// `<storage>/<project>/<platform>/`
    pub fn builds_root(&self) -> PathBuf {
        self.storage_root.join(&self.project.0).join(&self.platform.0)
    }

    /// `<storage>/temp/`
    pub fn temp_dir(&self) -> PathBuf {
        self.storage_root.join(TEMP_DIR)
    }

    /// `<storage>/<project>/<platform>/<id>/`
    pub fn build_dir(&self, id: BuildId) -> PathBuf {
        self.builds_root().join(id.to_string())
    }

    /// `<storage>/<project>/<platform>/<id>.zip`; sibling of [`Self::build_dir`].
    pub fn archive_path(&self, id: BuildId) -> PathBuf {
        self.builds_root()
            .join(format!("{id}.{ARCHIVE_EXTENSION}"))
    }

    /// `<build>/<project>/Binaries/<Linux|Win64>/`
    pub fn project_binaries_dir(&self, id: BuildId, family: PlatformFamily) -> PathBuf {
        self.build_dir(id)
            .join(&self.project.0)
            .join("Binaries")
            .join(family.binaries_dir_name())
    }

    /// `<build>/Engine/Binaries/<Linux|Win64>/`
    pub fn engine_binaries_dir(&self, id: BuildId, family: PlatformFamily) -> PathBuf {
        self.build_dir(id)
            .join("Engine")
            .join("Binaries")
            .join(family.binaries_dir_name())
    }

    pub fn marker_path(&self, id: BuildId) -> PathBuf {
        self.build_dir(id).join(COMPLETION_MARKER)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Read-only view over the builds root.
#[derive(Debug, Clone)]
pub struct LocalBuildStore {
    layout: BuildLayout,
}

impl LocalBuildStore {
    pub fn new(layout: BuildLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Highest installed build, or `None` when nothing is installed.
    pub fn installed_build_id(&self) -> Result<Option<BuildId>, CoreError> {
        Ok(self.installed_builds()?.into_iter().max())
    }

    /// Every complete build present, ascending.
    pub fn installed_builds(&self) -> Result<Vec<BuildId>, CoreError> {
        let root = self.layout.builds_root();
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&root, err)),
        };

        let mut ids: Vec<BuildId> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str()?.parse::<BuildId>().ok())
            .filter(|id| self.is_complete(*id))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Whether the directory for `id` carries a marker naming that build.
    pub fn is_complete(&self, id: BuildId) -> bool {
        matches!(self.marker(id), Some(marker) if marker.build_id == id)
    }

    /// Read the completion marker for `id`, if present and parseable.
    pub fn marker(&self, id: BuildId) -> Option<CompletionMarker> {
        let contents = std::fs::read_to_string(self.layout.marker_path(id)).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

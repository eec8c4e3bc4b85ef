//! Domain types shared by every lazyploy crate.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of one immutable build. Totally ordered; "latest" is the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub i64);

impl BuildId {
    /// Wire value reported when nothing is installed.
    pub const NOT_INSTALLED: i64 = -1;

    /// Render an optional installed id the way the status service expects.
    pub fn or_sentinel(id: Option<BuildId>) -> i64 {
        id.map(|b| b.0).unwrap_or(Self::NOT_INSTALLED)
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for BuildId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Returned when a string is not a plain decimal build id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a build id: {0:?}")]
pub struct ParseBuildIdError(pub String);

impl FromStr for BuildId {
    type Err = ParseBuildIdError;

    /// Only plain non-negative decimal names are build ids; `"-1"`, `"+3"` and
    /// `" 4"` are rejected so stray directories never count as builds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseBuildIdError(s.to_owned()));
        }
        s.parse::<i64>()
            .map(Self)
            .map_err(|_| ParseBuildIdError(s.to_owned()))
    }
}

/// A strongly-typed project name (e.g. `GenericShooter`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName(pub String);

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Platform tag as published by the catalog (e.g. `WindowsServer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(pub String);

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Platform {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Platform {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Platform {
    /// Packaging family that decides executable lookup and launch flags.
    pub fn family(&self) -> PlatformFamily {
        let tag = self.0.to_ascii_lowercase();
        if tag == "linuxserver" {
            PlatformFamily::DedicatedServer
        } else if tag.starts_with("windows") || tag.starts_with("win64") {
            PlatformFamily::Windows
        } else if tag.starts_with("linux") {
            PlatformFamily::LinuxClient
        } else {
            PlatformFamily::Unsupported
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Packaging convention of a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    /// Linux dedicated server: `<Project>Server` under the project binaries.
    DedicatedServer,
    /// Linux client build: any file named after the project.
    LinuxClient,
    /// Windows targets: first `.exe` in the project, then the engine host.
    Windows,
    Unsupported,
}

impl PlatformFamily {
    /// Name of the per-platform binaries directory inside a build.
    pub fn binaries_dir_name(self) -> &'static str {
        match self {
            PlatformFamily::Windows => "Win64",
            _ => "Linux",
        }
    }

    /// Whether the resolved binary must get its execute bits before launch.
    pub fn needs_exec_bit(self) -> bool {
        matches!(
            self,
            PlatformFamily::DedicatedServer | PlatformFamily::LinuxClient
        )
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformFamily::DedicatedServer => write!(f, "dedicated-server"),
            PlatformFamily::LinuxClient => write!(f, "linux-client"),
            PlatformFamily::Windows => write!(f, "windows"),
            PlatformFamily::Unsupported => write!(f, "unsupported"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The catalog's answer for one tick: the build that should be installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub id: BuildId,
    pub project: ProjectName,
    pub platform: Platform,
    /// Readiness label reported by the catalog (e.g. `completed`).
    pub status: String,
    /// Where the archive for this build can be streamed from.
    pub artifact_url: String,
}

/// Contents of the marker written once a build directory is fully extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub build_id: BuildId,
    pub archive_sha256: String,
    pub installed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_id_parses_only_plain_digits() {
        assert_eq!("42".parse::<BuildId>().unwrap(), BuildId(42));
        assert!("-1".parse::<BuildId>().is_err());
        assert!("+3".parse::<BuildId>().is_err());
        assert!("12.zip".parse::<BuildId>().is_err());
        assert!("".parse::<BuildId>().is_err());
        assert!("temp".parse::<BuildId>().is_err());
    }

    #[test]
    fn build_id_orders_numerically() {
        let mut ids: Vec<BuildId> = ["10", "9", "100"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![BuildId(9), BuildId(10), BuildId(100)]);
    }

    #[test]
    fn sentinel_for_missing_build() {
        assert_eq!(BuildId::or_sentinel(None), -1);
        assert_eq!(BuildId::or_sentinel(Some(BuildId(7))), 7);
    }

    #[test]
    fn platform_families() {
        assert_eq!(
            Platform::from("LinuxServer").family(),
            PlatformFamily::DedicatedServer
        );
        assert_eq!(Platform::from("Linux").family(), PlatformFamily::LinuxClient);
        assert_eq!(
            Platform::from("LinuxNoEditor").family(),
            PlatformFamily::LinuxClient
        );
        assert_eq!(
            Platform::from("WindowsServer").family(),
            PlatformFamily::Windows
        );
        assert_eq!(
            Platform::from("WindowsNoEditor").family(),
            PlatformFamily::Windows
        );
        assert_eq!(Platform::from("PS5").family(), PlatformFamily::Unsupported);
    }

    #[test]
    fn newtype_display() {
        assert_eq!(ProjectName::from("GenericShooter").to_string(), "GenericShooter");
        assert_eq!(Platform::from("WindowsServer").to_string(), "WindowsServer");
        assert_eq!(BuildId(5).to_string(), "5");
    }
}

//! Agent configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.lazyploy/
//!   config.yaml   (mode 0600, written by `lazyploy init`)
//!   storage/      (default build storage root)
//! ```
//!
//! # API pattern
//!
//! Every function touching disk has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! The loaded [`AgentConfig`] is immutable; components receive it behind an
//! `Arc` at construction and never write back to it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::{Platform, ProjectName};

pub const CONFIG_FILE: &str = "config.yaml";

// ---------------------------------------------------------------------------
// Config struct
// ---------------------------------------------------------------------------

/// Everything the agent needs to know, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the catalog / status service, always ending in `/`.
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    pub project: ProjectName,
    pub platform: Platform,
    /// Root under which `<project>/<platform>/<build>/` and `temp/` live.
    pub storage_dir: PathBuf,

    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_query_port")]
    pub query_port: u16,
    /// Generated key=value config file, relative to the build directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_patch_path: Option<PathBuf>,

    #[serde(default = "default_log_verbosity")]
    pub log_verbosity: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

fn default_catalog_url() -> String {
    "http://localhost/".to_string()
}
fn default_tick_interval_secs() -> u64 {
    5
}
fn default_initial_delay_secs() -> u64 {
    1
}
fn default_stop_timeout_secs() -> u64 {
    30
}
fn default_kill_timeout_secs() -> u64 {
    10
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_download_attempts() -> u32 {
    3
}
fn default_port() -> u16 {
    7777
}
fn default_query_port() -> u16 {
    27015
}
fn default_log_verbosity() -> String {
    "Log".to_string()
}

impl AgentConfig {
    /// A config with every optional field at its default.
    pub fn new(
        project: impl Into<ProjectName>,
        platform: impl Into<Platform>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog_url: default_catalog_url(),
            project: project.into(),
            platform: platform.into(),
            storage_dir: storage_dir.into(),
            tick_interval_secs: default_tick_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            kill_timeout_secs: default_kill_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            download_attempts: default_download_attempts(),
            port: default_port(),
            query_port: default_query_port(),
            config_patch_path: None,
            log_verbosity: default_log_verbosity(),
            extra_args: Vec::new(),
            hostname: None,
            address: None,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Normalise and check the fields that would otherwise fail late.
    pub fn validate(mut self) -> Result<Self, CoreError> {
        if self.project.0.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "project",
                reason: "must not be empty".into(),
            });
        }
        if self.platform.0.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "platform",
                reason: "must not be empty".into(),
            });
        }
        if !(self.catalog_url.starts_with("http://") || self.catalog_url.starts_with("https://"))
        {
            return Err(CoreError::InvalidConfig {
                field: "catalog_url",
                reason: format!("expected an http(s) URL, got '{}'", self.catalog_url),
            });
        }
        if !self.catalog_url.ends_with('/') {
            self.catalog_url.push('/');
        }
        if self.tick_interval_secs == 0 {
            return Err(CoreError::InvalidConfig {
                field: "tick_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.download_attempts == 0 {
            return Err(CoreError::InvalidConfig {
                field: "download_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.lazyploy/`
pub fn lazyploy_root(home: &Path) -> PathBuf {
    home.join(".lazyploy")
}

/// `<home>/.lazyploy/config.yaml`; pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    lazyploy_root(home).join(CONFIG_FILE)
}

/// `<home>/.lazyploy/storage`; default storage root for `lazyploy init`.
pub fn default_storage_dir(home: &Path) -> PathBuf {
    lazyploy_root(home).join("storage")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load and validate the config from `<home>/.lazyploy/config.yaml`.
///
/// Returns `CoreError::ConfigNotFound` if absent,
/// `CoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<AgentConfig, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(CoreError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: AgentConfig =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse { path, source: e })?;
    config.validate()
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<AgentConfig, CoreError> {
    load_at(&home()?)
}

/// Atomically save the config to `<home>/.lazyploy/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &AgentConfig) -> Result<PathBuf, CoreError> {
    let root = lazyploy_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_extension("yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &AgentConfig) -> Result<PathBuf, CoreError> {
    save_at(&home()?, config)
}

pub fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(home: &Path) -> AgentConfig {
        AgentConfig::new("GenericShooter", "WindowsServer", default_storage_dir(home))
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let home = TempDir::new().unwrap();
        let mut config = sample(home.path());
        config.catalog_url = "http://catalog.internal/".into();
        config.extra_args = vec!["-nosteam".into()];
        config.config_patch_path = Some(PathBuf::from("Saved/Config/Game.ini"));

        save_at(home.path(), &config).unwrap();
        let loaded = load_at(home.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_config_is_reported() {
        let home = TempDir::new().unwrap();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, CoreError::ConfigNotFound { .. }));
    }

    #[test]
    fn omitted_fields_fall_back_to_defaults() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "project: GenericShooter\nplatform: LinuxServer\nstorage_dir: /srv/builds\n",
        )
        .unwrap();

        let loaded = load_at(home.path()).unwrap();
        assert_eq!(loaded.tick_interval_secs, 5);
        assert_eq!(loaded.port, 7777);
        assert_eq!(loaded.query_port, 27015);
        assert_eq!(loaded.catalog_url, "http://localhost/");
    }

    #[test]
    fn malformed_yaml_reports_path() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "project: [unterminated").unwrap();

        let err = load_at(home.path()).unwrap_err();
        match err {
            CoreError::Parse { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn validate_appends_trailing_slash() {
        let home = TempDir::new().unwrap();
        let mut config = sample(home.path());
        config.catalog_url = "https://deploy.example.com".into();
        let config = config.validate().unwrap();
        assert_eq!(config.catalog_url, "https://deploy.example.com/");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let home = TempDir::new().unwrap();

        let mut config = sample(home.path());
        config.catalog_url = "ftp://nope".into();
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { field: "catalog_url", .. })
        ));

        let mut config = sample(home.path());
        config.tick_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { field: "tick_interval_secs", .. })
        ));

        let mut config = sample(home.path());
        config.project = ProjectName::from(" ");
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { field: "project", .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn saved_config_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let home = TempDir::new().unwrap();
        let path = save_at(home.path(), &sample(home.path())).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!path.with_extension("yaml.tmp").exists());
    }
}

//! Executable resolution inside an installed build.
//!
//! | family            | searched, in order                         | match                    |
//! |-------------------|--------------------------------------------|--------------------------|
//! | `DedicatedServer` | `<build>/<Project>/Binaries/Linux/`        | name contains `<P>Server`|
//! | `LinuxClient`     | `<build>/<Project>/Binaries/Linux/`        | name contains `<P>`      |
//! | `Windows`         | project `Binaries/Win64/`, then `Engine/Binaries/Win64/` | `*.exe`    |
//!
//! The first matching file in directory-listing order wins; listings are not
//! sorted.

use std::fs;
use std::path::{Path, PathBuf};

use lazyploy_core::{BuildId, BuildLayout, PlatformFamily};

use crate::error::SyncError;

pub const SERVER_SUFFIX: &str = "Server";

type NameMatcher = Box<dyn Fn(&str) -> bool>;

/// Resolve the binary to launch for `build`.
pub fn resolve_executable(layout: &BuildLayout, build: BuildId) -> Result<PathBuf, SyncError> {
    let family = layout.platform().family();
    let project = layout.project().0.as_str();

    let candidates: Vec<(PathBuf, NameMatcher)> = match family {
        PlatformFamily::DedicatedServer => {
            let needle = format!("{project}{SERVER_SUFFIX}");
            vec![(
                layout.project_binaries_dir(build, family),
                Box::new(move |name: &str| name.contains(&needle)) as NameMatcher,
            )]
        }
        PlatformFamily::LinuxClient => {
            let needle = project.to_string();
            vec![(
                layout.project_binaries_dir(build, family),
                Box::new(move |name: &str| name.contains(&needle)) as NameMatcher,
            )]
        }
        PlatformFamily::Windows => vec![
            (layout.project_binaries_dir(build, family), Box::new(is_exe) as NameMatcher),
            (layout.engine_binaries_dir(build, family), Box::new(is_exe) as NameMatcher),
        ],
        PlatformFamily::Unsupported => {
            return Err(SyncError::UnsupportedPlatform(layout.platform().clone()))
        }
    };

    let mut searched = Vec::with_capacity(candidates.len());
    for (dir, matches) in candidates {
        if let Some(found) = first_match(&dir, matches.as_ref()) {
            tracing::debug!("resolved executable {} for build {build}", found.display());
            return Ok(found);
        }
        searched.push(dir);
    }

    Err(SyncError::ExecutableNotFound {
        build,
        platform: layout.platform().clone(),
        searched,
    })
}

fn is_exe(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("exe"))
        .unwrap_or(false)
}

/// First regular file in `dir` whose name satisfies `matches`. A missing or
/// unreadable directory simply has no match.
fn first_match(dir: &Path, matches: &dyn Fn(&str) -> bool) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .find(|e| e.file_name().to_str().map(matches).unwrap_or(false))
        .map(|e| e.path())
}

//! Completion marker; written last, after a build directory is fully
//! extracted. Uses the same `.tmp` + rename pattern as the config file.

use chrono::Utc;

use lazyploy_core::{BuildId, BuildLayout, CompletionMarker};

use crate::error::{io_err, SyncError};

/// Write `<build_dir>/.lazyploy-installed` for `build`.
pub(crate) fn write(
    layout: &BuildLayout,
    build: BuildId,
    archive_sha256: &str,
) -> Result<CompletionMarker, SyncError> {
    let marker = CompletionMarker {
        build_id: build,
        archive_sha256: archive_sha256.to_string(),
        installed_at: Utc::now(),
    };
    let path = layout.marker_path(build);
    let json = serde_json::to_string_pretty(&marker)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyploy_core::LocalBuildStore;
    use tempfile::TempDir;

    #[test]
    fn marker_is_read_back_by_store() {
        let tmp = TempDir::new().unwrap();
        let layout = BuildLayout::new(tmp.path(), "P".into(), "Linux".into());
        std::fs::create_dir_all(layout.build_dir(BuildId(3))).unwrap();

        let written = write(&layout, BuildId(3), "cafe").unwrap();
        let store = LocalBuildStore::new(layout.clone());
        assert_eq!(store.marker(BuildId(3)), Some(written));
        assert!(!layout.marker_path(BuildId(3)).with_extension("tmp").exists());
    }

    #[test]
    fn missing_build_dir_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let layout = BuildLayout::new(tmp.path(), "P".into(), "Linux".into());
        let err = write(&layout, BuildId(1), "cafe").unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }
}

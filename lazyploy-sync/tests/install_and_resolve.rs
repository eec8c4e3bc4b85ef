use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazyploy_core::{BuildDescriptor, BuildId, BuildLayout, LocalBuildStore, PlatformFamily};
use lazyploy_sync::{
    launch_args, patch_ports, resolve_executable, ArtifactFetcher, ArtifactSource, PatchResult,
    SyncError,
};
use rstest::rstest;
use tempfile::TempDir;
use zip::write::FileOptions;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Serves `<dir>/<id>.zip` from disk, as a build server's artifact store would.
struct DirSource {
    dir: PathBuf,
}

impl ArtifactSource for DirSource {
    fn open(&self, d: &BuildDescriptor) -> Result<Box<dyn Read + Send>, SyncError> {
        let path = self.dir.join(format!("{}.zip", d.id));
        fs::File::open(&path)
            .map(|f| Box::new(f) as Box<dyn Read + Send>)
            .map_err(|e| SyncError::DownloadFailed {
                build: d.id,
                reason: format!("{}: {e}", path.display()),
            })
    }
}

fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, FileOptions::default().unix_permissions(0o755))
            .expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    let bytes = writer.finish().expect("finish").into_inner();
    fs::write(path, bytes).expect("write archive");
}

fn descriptor(id: i64, platform: &str) -> BuildDescriptor {
    BuildDescriptor {
        id: BuildId(id),
        project: "GenericShooter".into(),
        platform: platform.into(),
        status: "completed".into(),
        artifact_url: format!("file://{id}.zip"),
    }
}

#[rstest]
#[case::windows_project_binary(
    "WindowsServer",
    &["GenericShooter/Binaries/Win64/GenericShooterServer.exe", "Engine/Binaries/Win64/Crash.exe"],
    "GenericShooter/Binaries/Win64/GenericShooterServer.exe"
)]
#[case::windows_engine_fallback(
    "WindowsNoEditor",
    &["GenericShooter/Binaries/Win64/readme.txt", "Engine/Binaries/Win64/GenericShooter.exe"],
    "Engine/Binaries/Win64/GenericShooter.exe"
)]
#[case::linux_server(
    "LinuxServer",
    &["GenericShooter/Binaries/Linux/GenericShooterServer"],
    "GenericShooter/Binaries/Linux/GenericShooterServer"
)]
#[case::linux_client(
    "Linux",
    &["GenericShooter/Binaries/Linux/GenericShooter-Linux-Shipping"],
    "GenericShooter/Binaries/Linux/GenericShooter-Linux-Shipping"
)]
fn fetched_build_resolves_platform_executable(
    #[case] platform: &str,
    #[case] files: &[&str],
    #[case] expected: &str,
) {
    init_logging();
    let server = TempDir::new().expect("server");
    let storage = TempDir::new().expect("storage");
    let entries: Vec<(&str, &[u8])> = files.iter().map(|f| (*f, b"bin".as_slice())).collect();
    write_archive(&server.path().join("12.zip"), &entries);

    let layout = BuildLayout::new(storage.path(), "GenericShooter".into(), platform.into());
    let source = Arc::new(DirSource {
        dir: server.path().to_path_buf(),
    });
    let fetcher = ArtifactFetcher::new(layout.clone(), source, 2);
    let installed = fetcher
        .fetch_and_install(&descriptor(12, platform))
        .expect("install");

    let exe = resolve_executable(&layout, installed.build).expect("resolve");
    assert_eq!(exe, layout.build_dir(BuildId(12)).join(expected));
}

#[test]
fn newer_build_installs_beside_older_one() {
    init_logging();
    let server = TempDir::new().expect("server");
    let storage = TempDir::new().expect("storage");
    let binary = "GenericShooter/Binaries/Linux/GenericShooterServer";
    write_archive(&server.path().join("5.zip"), &[(binary, b"five")]);
    write_archive(&server.path().join("6.zip"), &[(binary, b"six")]);

    let layout = BuildLayout::new(storage.path(), "GenericShooter".into(), "LinuxServer".into());
    let fetcher = ArtifactFetcher::new(
        layout.clone(),
        Arc::new(DirSource {
            dir: server.path().to_path_buf(),
        }),
        1,
    );
    fetcher
        .fetch_and_install(&descriptor(5, "LinuxServer"))
        .expect("install 5");
    fetcher
        .fetch_and_install(&descriptor(6, "LinuxServer"))
        .expect("install 6");

    let store = LocalBuildStore::new(layout.clone());
    assert_eq!(store.installed_builds().expect("scan"), vec![BuildId(5), BuildId(6)]);
    assert_eq!(store.installed_build_id().expect("scan"), Some(BuildId(6)));
    assert_eq!(
        fs::read(layout.build_dir(BuildId(5)).join(binary)).expect("read 5"),
        b"five"
    );
    let exe = resolve_executable(&layout, BuildId(6)).expect("resolve");
    assert!(exe.starts_with(layout.build_dir(BuildId(6))));
}

#[test]
fn missing_artifact_leaves_no_build_behind() {
    init_logging();
    let server = TempDir::new().expect("server");
    let storage = TempDir::new().expect("storage");
    let layout = BuildLayout::new(storage.path(), "GenericShooter".into(), "LinuxServer".into());
    let fetcher = ArtifactFetcher::new(
        layout.clone(),
        Arc::new(DirSource {
            dir: server.path().to_path_buf(),
        }),
        2,
    );

    let err = fetcher
        .fetch_and_install(&descriptor(8, "LinuxServer"))
        .expect_err("no archive on server");
    assert_eq!(err.category(), "DownloadFailed");
    assert!(!layout.build_dir(BuildId(8)).exists());
    assert_eq!(
        LocalBuildStore::new(layout).installed_build_id().expect("scan"),
        None
    );
}

#[test]
fn installed_server_gets_patched_config_and_args() {
    init_logging();
    let storage = TempDir::new().expect("storage");
    let layout = BuildLayout::new(storage.path(), "GenericShooter".into(), "LinuxServer".into());
    let cfg_path = layout
        .build_dir(BuildId(3))
        .join("GenericShooter/Saved/Config/LinuxServer/Engine.ini");
    fs::create_dir_all(cfg_path.parent().expect("parent")).expect("mkdir");
    fs::write(&cfg_path, "[URL]\nPort=7777\nQueryPort=27015\n").expect("write ini");

    let mut config = lazyploy_core::AgentConfig::new(
        "GenericShooter",
        "LinuxServer",
        storage.path(),
    );
    config.port = 7810;
    config.query_port = 27810;

    let result = patch_ports(&cfg_path, config.port, config.query_port).expect("patch");
    assert!(matches!(result, PatchResult::Written { .. }));
    let text = fs::read_to_string(&cfg_path).expect("read ini");
    assert!(text.contains("Port=7810"));
    assert!(text.contains("QueryPort=27810"));

    assert_eq!(config.platform.family(), PlatformFamily::DedicatedServer);
    let args = launch_args(&config, BuildId(3), "node-a");
    assert!(args.contains(&"-Port=7810".to_string()));
    assert!(args.contains(&"-QueryPort=27810".to_string()));
    assert!(args.contains(&"-BuildId=3".to_string()));
}

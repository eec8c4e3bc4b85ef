use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::Utc;
use predicates::str::contains;

use lazyploy_core::{config, BuildId, BuildLayout, CompletionMarker};
use tempfile::TempDir;

fn lazyploy_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("lazyploy"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

fn init(home: &Path) {
    lazyploy_cmd(home)
        .args([
            "init",
            "--project",
            "GenericShooter",
            "--platform",
            "LinuxServer",
            "--url",
            "http://catalog.internal:8080",
            "--port",
            "7000",
        ])
        .assert()
        .success()
        .stdout(contains("GenericShooter"));
}

/// Lay out a build directory as the installer leaves it.
fn fake_build(layout: &BuildLayout, id: i64, complete: bool) {
    let dir = layout.build_dir(BuildId(id));
    let bin = dir.join("GenericShooter/Binaries/Linux");
    fs::create_dir_all(&bin).expect("binaries dir");
    fs::write(bin.join("GenericShooterServer"), "#!/bin/sh\n").expect("binary");
    if complete {
        let marker = CompletionMarker {
            build_id: BuildId(id),
            archive_sha256: format!("{id:064}"),
            installed_at: Utc::now(),
        };
        fs::write(
            layout.marker_path(BuildId(id)),
            serde_json::to_string(&marker).expect("marker json"),
        )
        .expect("marker");
    }
}

#[test]
fn init_writes_normalised_config() {
    let home = TempDir::new().expect("home");
    init(home.path());

    let saved = config::load_at(home.path()).expect("config loads");
    assert_eq!(saved.project.0, "GenericShooter");
    assert_eq!(saved.platform.0, "LinuxServer");
    assert_eq!(saved.catalog_url, "http://catalog.internal:8080/");
    assert_eq!(saved.port, 7000);
    assert_eq!(saved.query_port, 27015);
    assert_eq!(saved.storage_dir, config::default_storage_dir(home.path()));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().expect("home");
    init(home.path());

    lazyploy_cmd(home.path())
        .args(["init", "--project", "Other", "--platform", "Win64"])
        .assert()
        .failure()
        .stderr(contains("--force"));
    assert_eq!(
        config::load_at(home.path()).expect("config").project.0,
        "GenericShooter"
    );

    lazyploy_cmd(home.path())
        .args(["init", "--project", "Other", "--platform", "Win64", "--force"])
        .assert()
        .success();
    assert_eq!(config::load_at(home.path()).expect("config").project.0, "Other");
}

#[test]
fn init_rejects_non_http_url() {
    let home = TempDir::new().expect("home");
    lazyploy_cmd(home.path())
        .args([
            "init",
            "--project",
            "GenericShooter",
            "--platform",
            "LinuxServer",
            "--url",
            "ftp://catalog",
        ])
        .assert()
        .failure()
        .stderr(contains("catalog_url"));
    assert!(!config::config_path_at(home.path()).exists());
}

#[test]
fn builds_json_lists_complete_builds_newest_first() {
    let home = TempDir::new().expect("home");
    init(home.path());
    let layout = BuildLayout::from_config(&config::load_at(home.path()).expect("config"));
    fake_build(&layout, 3, true);
    fake_build(&layout, 4, false);
    fake_build(&layout, 5, true);

    let assert = lazyploy_cmd(home.path())
        .args(["builds", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let builds: serde_json::Value = serde_json::from_str(&stdout).expect("parse builds json");
    let builds = builds.as_array().expect("array");

    let ids: Vec<i64> = builds.iter().map(|b| b["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![5, 3], "incomplete build 4 must be hidden");
    assert_eq!(builds[0]["active"], true);
    assert_eq!(builds[1]["active"], false);
    assert!(builds[0]["executable"]
        .as_str()
        .unwrap()
        .ends_with("GenericShooterServer"));
    assert_eq!(builds[0]["archive_sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn builds_without_config_points_at_init() {
    let home = TempDir::new().expect("home");
    lazyploy_cmd(home.path())
        .arg("builds")
        .assert()
        .failure()
        .stderr(contains("lazyploy init"));
}

#[test]
#[cfg(unix)]
fn status_and_stop_without_agent_report_not_running() {
    let home = TempDir::new().expect("home");
    init(home.path());

    let assert = lazyploy_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let payload: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status json");
    assert_eq!(payload["running"], false);
    assert!(payload["socket"]
        .as_str()
        .unwrap()
        .ends_with("lazyployd.sock"));

    lazyploy_cmd(home.path())
        .arg("stop")
        .assert()
        .success()
        .stdout(contains("not running"));
    lazyploy_cmd(home.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(contains("not running"));
}

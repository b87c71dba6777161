use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn mirror_cmd(root: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("blog-mirror");
    cmd.current_dir(root)
        .env("MIRROR_ROOT", root)
        .env("MIRROR_HOME", root)
        .env("MIRROR_CONFIG_PATH", root.join("absent.toml"))
        .env_remove("MIRROR_DATA_DIR")
        .env_remove("MIRROR_LOGS_DIR");
    cmd
}

#[test]
fn status_on_empty_archive_reports_missing_state() {
    let tmp = tempdir().expect("tempdir");

    mirror_cmd(tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("status: issues found"))
        .stdout(predicate::str::contains("posts.count=0"))
        .stdout(predicate::str::contains("missing posts archive"));
}

#[test]
fn status_json_is_machine_readable() {
    let tmp = tempdir().expect("tempdir");

    let output = mirror_cmd(tmp.path())
        .args(["--json", "status"])
        .output()
        .expect("run status");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["command"], "status");
    assert_eq!(report["ok"], false);
    assert!(report["details"].as_array().is_some_and(|d| !d.is_empty()));
}

#[test]
fn verify_on_empty_archive_is_clean() {
    let tmp = tempdir().expect("tempdir");

    mirror_cmd(tmp.path())
        .args(["verify", "--strict"])
        .assert()
        .success()
        .stdout(predicate::str::contains("assets.referenced=0"));
}

#[test]
fn verify_strict_flags_missing_archived_image() {
    let tmp = tempdir().expect("tempdir");
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).expect("mkdir data");
    fs::write(
        data.join("posts.json"),
        r#"[{"id":7,"title":"t","date":"2024-01-01","tags":[],"contentBlocks":[
            {"type":"image","src":"data/archive/blog/7_abc_a.jpg",
             "originalSrc":"https://e.com/a.jpg"}
        ],"sourceUrl":"https://e.com/7"}]"#,
    )
    .expect("write posts");

    mirror_cmd(tmp.path())
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("assets.missing=1"));

    mirror_cmd(tmp.path())
        .args(["verify", "--strict"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("missing asset post:7"));
}

#[test]
fn invalid_base_url_is_fatal_before_any_request() {
    let tmp = tempdir().expect("tempdir");

    mirror_cmd(tmp.path())
        .env("MIRROR_BASE_URL", "ftp://example.com")
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config invalid"));
    assert!(!tmp.path().join("data/posts.json").exists());
}

#[test]
fn conflicting_sync_modes_are_rejected() {
    let tmp = tempdir().expect("tempdir");

    mirror_cmd(tmp.path())
        .args(["sync", "--full", "--profile-only"])
        .assert()
        .failure();
}

use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

const RELAY_ENV: &[&str] = &[
    "RELAY_STORAGE_DIR",
    "RELAY_SOURCE_DIR",
    "RELAY_CHANNEL",
    "RELAY_CATCHUP_LIMIT",
    "BOTAPI_TOKEN",
    "BOTAPI_CHAT_ID",
    "BOTAPI_BASE_URL",
    "WEBHOOK_URL",
    "WEBHOOK_CHAT_ID",
];

fn relay() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("channel-relay"));
    for key in RELAY_ENV {
        cmd.env_remove(key);
    }
    cmd.env("NO_COLOR", "1").env("RUST_LOG", "warn");
    cmd
}

fn export_dir(lines: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("media")).unwrap();
    fs::write(dir.path().join("messages.jsonl"), lines.join("\n") + "\n").unwrap();
    fs::write(dir.path().join("events.jsonl"), "").unwrap();
    dir
}

fn status_json(storage: &TempDir) -> Value {
    let output = relay()
        .arg("status")
        .arg("--json")
        .arg("--storage-dir")
        .arg(storage.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "status failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("status json")
}

#[test]
fn status_of_empty_storage() {
    let storage = TempDir::new().unwrap();
    let report = status_json(&storage);
    assert_eq!(report["records"], 0);
    assert!(report["catchUp"].is_null());
    assert_eq!(report["platforms"].as_array().unwrap().len(), 0);
}

#[test]
fn catch_up_writes_records_and_reports_counts() {
    let storage = TempDir::new().unwrap();
    let source = export_dir(&[
        r#"{"id": 1, "date": 100, "text": "first"}"#,
        r#"{"id": 2, "date": 200, "text": "second"}"#,
    ]);

    relay()
        .arg("catch-up")
        .arg("--storage-dir")
        .arg(storage.path())
        .arg("--source-dir")
        .arg(source.path())
        .assert()
        .success()
        .stdout(contains("2 new, 0 updated, 0 skipped"));

    assert!(storage.path().join("post_1.json").exists());
    let report = status_json(&storage);
    assert_eq!(report["records"], 2);
    assert_eq!(report["catchUp"]["status"], "completed");
    assert_eq!(report["catchUp"]["newPosts"], 2);
}

#[test]
fn status_shows_platform_backlog() {
    let storage = TempDir::new().unwrap();
    let source = export_dir(&[
        r#"{"id": 1, "date": 100, "text": "first"}"#,
        r#"{"id": 2, "date": 200, "text": "second"}"#,
    ]);
    relay()
        .env("RELAY_SOURCE_DIR", source.path())
        .env("RELAY_STORAGE_DIR", storage.path())
        .arg("catch-up")
        .assert()
        .success();
    fs::write(
        storage.path().join("webhook_processed.json"),
        r#"{"updatedAt": "2026-01-01T00:00:00Z", "posts": {"1": {"date": 100}}}"#,
    )
    .unwrap();

    let report = status_json(&storage);
    let platforms = report["platforms"].as_array().unwrap();
    assert_eq!(platforms.len(), 1);
    assert_eq!(platforms[0]["platform"], "webhook");
    assert_eq!(platforms[0]["processed"], 1);
    assert_eq!(platforms[0]["backlog"], 1);

    relay()
        .arg("status")
        .arg("--storage-dir")
        .arg(storage.path())
        .assert()
        .success()
        .stdout(contains("completed"))
        .stdout(contains("webhook"));
}

#[test]
fn sync_without_token_names_the_missing_variable() {
    let storage = TempDir::new().unwrap();
    relay()
        .arg("sync")
        .arg("botapi")
        .arg("--storage-dir")
        .arg(storage.path())
        .assert()
        .failure()
        .stderr(contains("BOTAPI_TOKEN"));
}

#[test]
fn sync_rejects_unknown_platform() {
    let storage = TempDir::new().unwrap();
    relay()
        .arg("sync")
        .arg("fax")
        .arg("--storage-dir")
        .arg(storage.path())
        .assert()
        .failure()
        .stderr(contains("unknown platform"));
}

#[test]
fn ingest_requires_a_source_directory() {
    let storage = TempDir::new().unwrap();
    relay()
        .arg("ingest")
        .arg("--storage-dir")
        .arg(storage.path())
        .assert()
        .failure()
        .stderr(contains("RELAY_SOURCE_DIR"));
}

#[test]
fn test_connection_requires_webhook_url() {
    relay()
        .arg("test-connection")
        .arg("webhook")
        .assert()
        .failure()
        .stderr(contains("WEBHOOK_URL"));
}

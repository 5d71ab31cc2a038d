//! Smoke tests -- verify the binary runs and subcommands are wired.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    Command::cargo_bin("vehguard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("anomaly detection"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("vehguard")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("vehguard"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["run", "init-db", "check", "recent", "simulate"] {
        Command::cargo_bin("vehguard")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_simulate_prints_json_lines() {
    let out = Command::cargo_bin("vehguard")
        .unwrap()
        .env_remove("VEHGUARD_CONFIG")
        .args(["simulate", "--vehicles", "2", "--events", "10", "--seed", "7", "--start-ms", "1700000000000"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"kafkaTimestamp\"").and(predicates::str::contains("\"sigName\"")))
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 10);
    for line in text.lines() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(v["vin"].as_str().unwrap().starts_with("1HGCM82633A"));
    }
}

#[test]
fn test_init_db_and_recent_with_config() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("anomalies.db");
    let cfg = dir.path().join("vehguard.toml");
    std::fs::write(
        &cfg,
        format!("[relational]\npath = {:?}\ntable = \"anomaly_data\"\n", db.display().to_string()),
    )
    .unwrap();

    Command::cargo_bin("vehguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("init-db")
        .assert()
        .success()
        .stdout(predicates::str::contains("anomaly_data"));
    assert!(db.exists());

    Command::cargo_bin("vehguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("recent")
        .assert()
        .success()
        .stdout(predicates::str::contains("No anomalies stored."));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    std::fs::write(&cfg, "[detection]\nwindow_ms = 10\n").unwrap();

    Command::cargo_bin("vehguard")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("init-db")
        .assert()
        .failure();
}

#[test]
fn test_bad_env_config_is_reported_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    std::fs::write(&cfg, "[detection]\nwindow_ms = 10\n").unwrap();

    Command::cargo_bin("vehguard")
        .unwrap()
        .env("VEHGUARD_CONFIG", &cfg)
        .env_remove("RUST_LOG")
        .args(["simulate", "--events", "1"])
        .assert()
        .success()
        .stderr(predicates::str::contains("VEHGUARD_CONFIG set but file could not be loaded"));
}

//! Binary-level tests that never touch the network.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("nostr-sync").unwrap();
    cmd.arg("--data-dir").arg(data_dir).env("RUST_LOG", "warn");
    cmd
}

#[test]
fn init_then_status_shows_identity() {
    let dir = tempdir().unwrap();

    cli(dir.path())
        .args(["init", "--relay", "wss://relay.example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Identity initialized"));

    cli(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Public key:"))
        .stdout(predicate::str::contains("wss://relay.example.com"));
}

#[test]
fn second_init_fails() {
    let dir = tempdir().unwrap();
    cli(dir.path()).arg("init").assert().success();

    cli(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn status_before_init_suggests_init() {
    let dir = tempdir().unwrap();
    cli(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("NOT INITIALIZED"));
}

#[test]
fn follow_rejects_malformed_pubkey() {
    let dir = tempdir().unwrap();
    cli(dir.path())
        .args(["follow", "not-hex"])
        .assert()
        .failure();
}

#[test]
fn network_commands_need_relays() {
    let dir = tempdir().unwrap();
    cli(dir.path()).arg("init").assert().success();

    cli(dir.path())
        .args(["--wait-secs", "0", "profile", "publish", "--name", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No relays configured"));
}

//! CLI subprocess integration tests.
//!
//! These tests invoke the `bagprep` binary as a subprocess and verify
//! exit codes, stdout content, and JSON output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const ID: &str = "mds2-2000";

fn bagprep_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bagprep"));
    cmd.env_remove("BAGPREP_CONFIG");
    cmd.env_remove("BAGPREP_LOG");
    cmd
}

/// A review area holding two files and the POD record that declares them.
fn write_review(root: &Path) -> PathBuf {
    let review = root.join("review");
    fs::create_dir_all(review.join("sub")).unwrap();
    fs::write(review.join("a.csv"), b"x,y\n1,2\n").unwrap();
    fs::write(review.join("sub/b.txt"), b"hello").unwrap();
    let pod = serde_json::json!({
        "identifier": ID,
        "title": "CLI trials",
        "distribution": [
            {"downloadURL": format!("https://data.nist.gov/od/ds/{ID}/a.csv")},
            {"downloadURL": format!("https://data.nist.gov/od/ds/{ID}/sub/b.txt")}
        ]
    });
    fs::write(review.join("_pod.json"), pod.to_string()).unwrap();
    review
}

fn bag_args(cmd: &mut Command, root: &Path) {
    cmd.arg(ID)
        .arg("--review")
        .arg(root.join("review"))
        .arg("--workdir")
        .arg(root.join("work"));
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad JSON ({e}): {stdout}"))
}

#[test]
fn cli_version_exits_zero() {
    let output = bagprep_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("bagprep"));
}

#[test]
fn cli_help_lists_commands() {
    let output = bagprep_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["prepare", "preserve", "inspect", "verify", "serialize"] {
        assert!(stdout.contains(cmd), "help must list '{cmd}'");
    }
}

#[test]
fn cli_unknown_examine_mode_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_review(dir.path());
    let mut cmd = bagprep_bin();
    cmd.arg("prepare");
    bag_args(&mut cmd, dir.path());
    let output = cmd.args(["--examine", "eventually"]).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_prepare_without_workdir_is_config_error() {
    let output = bagprep_bin().args(["prepare", ID]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("config error"));
}

#[test]
fn cli_missing_config_file_is_config_error() {
    let output = bagprep_bin()
        .args(["--config", "/nonexistent/bagprep.toml", "prepare", ID])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_prepare_then_inspect() {
    let dir = tempfile::tempdir().unwrap();
    write_review(dir.path());

    let mut cmd = bagprep_bin();
    cmd.args(["--json", "prepare"]);
    bag_args(&mut cmd, dir.path());
    let output = cmd.args(["--examine", "sync"]).output().unwrap();
    assert!(
        output.status.success(),
        "prepare failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = stdout_json(&output);
    assert_eq!(json["status"], "prepared");
    assert_eq!(json["data_files"], 2);
    assert_eq!(json["examine"], "sync");

    let mut cmd = bagprep_bin();
    cmd.arg("inspect");
    bag_args(&mut cmd, dir.path());
    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let rec = stdout_json(&output);
    assert_eq!(rec["title"], "CLI trials");
    let comps = rec["components"].as_array().unwrap();
    let a = comps.iter().find(|c| c["filepath"] == "a.csv").unwrap();
    assert_eq!(a["size"], 8);
}

#[test]
fn cli_inspect_without_working_bag_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = bagprep_bin();
    cmd.arg("inspect");
    bag_args(&mut cmd, dir.path());
    let output = cmd.output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn cli_preserve_verify_and_serialize() {
    let dir = tempfile::tempdir().unwrap();
    write_review(dir.path());
    let out = dir.path().join("out");

    let mut cmd = bagprep_bin();
    cmd.args(["--json", "preserve"]);
    bag_args(&mut cmd, dir.path());
    let output = cmd.arg("--dest").arg(&out).arg("--serialize").output().unwrap();
    assert!(
        output.status.success(),
        "preserve failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = stdout_json(&output);
    let bag = PathBuf::from(json["bag"].as_str().unwrap());
    assert_eq!(bag, out.join("mds2-2000.1_0_0.mbag0_4-0"));
    let archive = PathBuf::from(json["archive"].as_str().unwrap());
    assert!(archive.is_file());
    assert!(bag.join("data/sub/b.txt").is_file());

    let output = bagprep_bin()
        .args(["--json", "verify"])
        .arg(&bag)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_json(&output)["valid"], true);

    fs::write(bag.join("data/a.csv"), b"tampered").unwrap();
    let output = bagprep_bin().arg("verify").arg(&bag).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stdout).contains("a.csv"));

    let dest = dir.path().join("archives");
    let output = bagprep_bin()
        .arg("serialize")
        .arg(&bag)
        .arg("--dest")
        .arg(&dest)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dest.join("mds2-2000.1_0_0.mbag0_4-0.tar").is_file());
}

#[test]
fn cli_preserve_twice_advances_sequence() {
    let dir = tempfile::tempdir().unwrap();
    write_review(dir.path());
    let out = dir.path().join("out");
    for _ in 0..2 {
        let mut cmd = bagprep_bin();
        cmd.arg("preserve");
        bag_args(&mut cmd, dir.path());
        let output = cmd.arg("--dest").arg(&out).output().unwrap();
        assert!(output.status.success());
    }
    assert!(out.join("mds2-2000.1_0_0.mbag0_4-0").is_dir());
    assert!(out.join("mds2-2000.1_0_0.mbag0_4-1").is_dir());
}

#[test]
fn cli_cache_requires_services() {
    let output = bagprep_bin().args(["cache", ID]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_completions_bash() {
    let output = bagprep_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("bagprep"));
}

#[test]
fn cli_man_pages_written() {
    let dir = tempfile::tempdir().unwrap();
    let output = bagprep_bin()
        .arg("man-pages")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dir.path().join("bagprep.1").is_file());
    assert!(dir.path().join("bagprep-preserve.1").is_file());
}

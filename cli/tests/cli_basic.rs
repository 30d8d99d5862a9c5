//! End-to-end CLI smoke tests exercising the `photocopy` binary against a
//! real temp directory tree, driven through `assert_cmd`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

#[test]
fn test_help() {
    Command::cargo_bin("photocopy")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Organize photos and videos"));
}

#[test]
fn test_version() {
    Command::cargo_bin("photocopy")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("photocopy"));
}

#[test]
fn test_copy_help() {
    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["copy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--template"));
}

#[test]
fn test_scan_reports_files_as_json() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("photo.jpg"), b"not a real jpeg, no exif").unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["scan", "--json"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("total_files"))
        .stdout(predicate::str::contains("\"total_files\": 1"));
}

#[test]
fn test_validate_reports_failures_for_missing_date() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("photo.jpg"), b"no exif date here").unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["validate", "--template", "{year}/{name}{ext}", "--require-date", "--json"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"failed\": 1"));
}

#[test]
fn test_validate_rejects_invalid_template() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("photo.jpg"), b"data").unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["validate", "--template", "{not_a_real_token}/{name}{ext}"])
        .arg(dir.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("invalid_arguments"));
}

#[test]
fn test_copy_moves_files_into_templated_destination() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.jpg"), b"fake jpeg bytes").unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["copy", "--template", "flat/{name}{ext}", "--json"])
        .arg(src.path())
        .arg(dst.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"processed\": 1"));

    assert!(dst.path().join("flat/a.jpg").exists());
    assert!(src.path().join("a.jpg").exists(), "copy must leave the source file in place");
}

#[test]
fn test_move_removes_source_file() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.jpg"), b"fake jpeg bytes").unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["move", "--template", "flat/{name}{ext}", "--json"])
        .arg(src.path())
        .arg(dst.path())
        .assert()
        .success();

    assert!(dst.path().join("flat/a.jpg").exists());
    assert!(!src.path().join("a.jpg").exists(), "move must remove the source file");
}

#[test]
fn test_rollback_list_on_empty_log_dir() {
    let log_dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["rollback", "--list", "--json"])
        .arg(log_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_rollback_undoes_a_copy() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let log_dir = tempfile::tempdir().unwrap();
    fs::write(src.path().join("a.jpg"), b"fake jpeg bytes").unwrap();

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["copy", "--template", "flat/{name}{ext}", "--log-dir"])
        .arg(log_dir.path())
        .arg(src.path())
        .arg(dst.path())
        .assert()
        .success();

    let log_file = fs::read_dir(log_dir.path())
        .unwrap()
        .find_map(|entry| entry.ok())
        .expect("copy must have written a transaction log");

    Command::cargo_bin("photocopy")
        .unwrap()
        .args(["rollback", "--yes", "--json"])
        .arg(log_file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"files_restored\": 1"));

    assert!(!dst.path().join("flat/a.jpg").exists());
}

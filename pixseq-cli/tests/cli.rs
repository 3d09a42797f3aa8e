//! Runs the `pixseq` binary end to end.

mod common;

use common::{pixseq_bin, write_stack};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::tempdir;

fn pixseq(shm: &Path, args: &[&str]) -> Output {
    Command::new(pixseq_bin())
        .args(args)
        .env("PIXSEQ_SHM_DIR", shm)
        .output()
        .unwrap()
}

#[test]
fn import_prints_one_line_per_channel() {
    let dir = tempdir().unwrap();
    let shm = dir.path().join("shm");
    let a = dir.path().join("a.tif");
    let b = dir.path().join("b.tif");
    write_stack(&a, 3, 2, 8);
    write_stack(&b, 2, 2, 8);

    let output = pixseq(
        &shm,
        &[
            "import",
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            "--mode",
            "fret",
            "--workers",
            "2",
        ],
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 4, "{stdout}");
    assert!(lines.contains(&"a.tif\tDonor\t3x2x4\tcomplete\t0..=2053"));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("b.tif\tAcceptor\t2x2x4\tcomplete\t")));
    assert!(stderr.contains("progress: 100%"));

    // Every shared region is gone once the process exits.
    assert_eq!(std::fs::read_dir(&shm).unwrap().count(), 0);
}

#[test]
fn import_with_append_collects_files_in_one_dataset() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.tif");
    write_stack(&a, 2, 2, 2);

    let output = pixseq(
        &dir.path().join("shm"),
        &[
            "import",
            a.to_str().unwrap(),
            "--channel",
            "AA",
            "--append",
            "run1",
            "--in-process",
        ],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("run1\tAA\t2x2x2\tcomplete"), "{stdout}");
}

#[test]
fn import_of_missing_file_fails() {
    let dir = tempdir().unwrap();
    let output = pixseq(
        &dir.path().join("shm"),
        &["import", dir.path().join("nope.tif").to_str().unwrap()],
    );
    assert!(!output.status.success());
}

#[test]
fn info_reports_planned_channels_as_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("alex.tif");
    write_stack(&path, 11, 4, 6);

    let output = pixseq(
        &dir.path().join("shm"),
        &["info", path.to_str().unwrap(), "--mode", "alex", "--json"],
    );
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["channel_shape"], serde_json::json!([5, 4, 3]));
    assert_eq!(value["unpaired_frames"], 1);
    assert_eq!(
        value["channels"],
        serde_json::json!(["dd", "da", "ad", "aa"])
    );
    assert_eq!(value["descriptor"]["n_frames"], 11);
    assert_eq!(value["descriptor"]["sample_type"], "u16");
}

#[test]
fn info_rejects_odd_width_for_fret() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("odd.tif");
    write_stack(&path, 2, 2, 5);

    let output = pixseq(
        &dir.path().join("shm"),
        &["info", path.to_str().unwrap(), "--mode", "fret"],
    );
    assert!(!output.status.success());
}

#[test]
fn worker_rejects_malformed_job() {
    let dir = tempdir().unwrap();
    let mut child = Command::new(pixseq_bin())
        .arg("worker")
        .env("PIXSEQ_SHM_DIR", dir.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"{\"not\": \"a job\"}")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

fn rca_ingest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rca-ingest");
    path
}

fn run_cli(args: &[&str]) -> Output {
    Command::new(rca_ingest_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run rca-ingest")
}

#[test]
fn test_help_lists_flags() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--bucket",
        "--prefix",
        "--collection",
        "--local-dir",
        "--no-delete-local",
        "--dry-run",
        "--workers",
    ] {
        assert!(stdout.contains(flag), "missing {} in help:\n{}", flag, stdout);
    }
}

#[test]
fn test_bucket_is_required() {
    let output = run_cli(&["--prefix", "rcas/"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--bucket"), "stderr: {}", stderr);
}

#[test]
fn test_overlap_not_smaller_than_size_is_rejected() {
    let output = run_cli(&[
        "--bucket",
        "rca-docs",
        "--chunk-size",
        "100",
        "--chunk-overlap",
        "100",
        "--dry-run",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("chunk_overlap"), "stderr: {}", stderr);
}

#[test]
fn test_cli_overrides_config_file() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("rca-ingest.toml");
    fs::write(&config_path, "[chunking]\nchunk_size = 200\nchunk_overlap = 50\n").unwrap();

    let output = run_cli(&[
        "--bucket",
        "rca-docs",
        "--config",
        config_path.to_str().unwrap(),
        "--chunk-overlap",
        "300",
        "--dry-run",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("chunk_overlap (300)"), "stderr: {}", stderr);
}

#[test]
fn test_unparseable_config_file_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("broken.toml");
    fs::write(&config_path, "[chunking\nchunk_size = ").unwrap();

    let output = run_cli(&[
        "--bucket",
        "rca-docs",
        "--config",
        config_path.to_str().unwrap(),
        "--dry-run",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"), "stderr: {}", stderr);
}

#[test]
fn test_zero_workers_rejected() {
    let output = run_cli(&["--bucket", "rca-docs", "--workers", "0", "--dry-run"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("workers"), "stderr: {}", stderr);
}

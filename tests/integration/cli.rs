//! End-to-end runs of the `cosim` binary

use std::process::Command;

fn cosim() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cosim"));
    cmd.env_remove("COSIM_MODE_OVERRIDE").env_remove("COSIM_LOG");
    cmd
}

#[test]
fn test_vadd_simulation() {
    let output = cosim().args(["vadd", "--n", "64"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("elapsed:"));
    assert!(stdout.contains("PASS (64 elements)"));
}

#[test]
fn test_vadd_isolated_device() {
    let output = cosim()
        .args(["vadd", "--n", "128", "--bitstream", "vadd.xclbin"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("PASS (128 elements)"));
}

#[test]
fn test_vadd_unknown_bitstream_in_process_fails() {
    let output = cosim()
        .args(["vadd", "--bitstream", "mystery.xclbin", "--no-isolate"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown bitstream"));
}

#[test]
fn test_pipeline_join_order() {
    let output = cosim()
        .args(["pipeline", "--stages", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let order: Vec<&str> = stdout.lines().map(|l| l.split_whitespace().nth(1).unwrap_or("")).collect();
    assert_eq!(order, vec!["producer(3)", "worker[0]", "worker[1]", "worker[2]"]);
}

#[test]
fn test_pipeline_sequential_from_env() {
    let output = cosim()
        .env("COSIM_MODE_OVERRIDE", "1")
        .args(["pipeline", "--stages", "2", "--mode", "detach"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    // producer is forced inline too, so it runs first
    assert!(stdout.lines().next().unwrap_or("").contains("producer(2)"));
    assert_eq!(stdout.lines().count(), 3);
}

#[test]
fn test_config_init_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cosim.toml");
    let output = cosim()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("run_in_new_process = true"));
}

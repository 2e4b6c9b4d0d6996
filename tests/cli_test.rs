// ABOUTME: End-to-end tests for the pgcat binary
// ABOUTME: Runs scenarios and configuration commands in an isolated HOME

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn pgcat(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pgcat"));
    cmd.env("HOME", home)
        .env_remove("RUST_LOG")
        .env_remove("PGCAT_CONFIG");
    cmd
}

#[test]
fn test_run_bundled_scenario() {
    let home = tempdir().unwrap();
    let scenario = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/coherence.toml");

    let output = pgcat(home.path())
        .arg("run")
        .arg(&scenario)
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stdout: {}\nstderr: {}", stdout, stderr);
    assert!(stdout.contains("ignored 16384 (cache not initialized)"));
    assert!(stdout.contains("-- decoded output for walsender"));
    assert!(stdout.contains("All 20 steps passed"));
    assert!(!stdout.contains("MISMATCH"));
}

#[test]
fn test_run_reports_mismatch() {
    let home = tempdir().unwrap();
    let scenario = home.path().join("mismatch.toml");
    fs::write(
        &scenario,
        r#"
[[steps]]
session = "a"
action = "create"
relation = "public.orders"

[[steps]]
session = "a"
action = "check"
relation = "public.orders"
expect = true
"#,
    )
    .unwrap();

    let output = pgcat(home.path())
        .arg("run")
        .arg(&scenario)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("MISMATCH"));
    assert!(stderr.contains("1 step(s) did not match their expectation"));
}

#[test]
fn test_config_show_uses_file() {
    let home = tempdir().unwrap();
    let config_dir = home.path().join(".pgcat");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        "[plugin]\nmodule = \"$libdir/decoder\"\n",
    )
    .unwrap();

    let output = pgcat(home.path())
        .arg("config")
        .arg("show")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("module = \"$libdir/decoder\""));
    assert!(stdout.contains("symbol = \"_PG_output_plugin_init\""));
    assert!(stdout.contains("level = \"info\""));
}

#[test]
fn test_plugin_check_reports_missing_library() {
    let home = tempdir().unwrap();
    let libdir = tempdir().unwrap();

    let output = pgcat(home.path())
        .arg("plugin")
        .arg("check")
        .arg("--libdir")
        .arg(libdir.path())
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("could not access file"), "stderr: {}", stderr);
}

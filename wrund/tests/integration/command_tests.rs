use std::process::{Command, Output};

use crate::common::{SettingsDir, assert_contains, assert_not_contains, init_test_logging};

const WRUN_VARS: &[&str] = &[
    "WRUN_HOST",
    "WRUN_PORT",
    "WRUN_EXECUTABLE_PATH",
    "WRUN_CAPTURE_STDERR",
    "WRUN_SHARED_SECRET",
    "WRUN_IO_TIMEOUT",
    "WRUN_LOG_LEVEL",
];

fn wrund() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wrund"));
    for var in WRUN_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_wrund_help_lists_subcommands() {
    init_test_logging();
    crate::test_log!("TEST START: test_wrund_help_lists_subcommands");

    let output = wrund().arg("--help").output().expect("Failed to run wrund --help");
    assert!(output.status.success(), "wrund --help failed");

    let text = stdout(&output);
    assert_contains(&text, "remote executable runner");
    assert_contains(&text, "run");
    assert_contains(&text, "check");
    crate::test_log!("TEST PASS: test_wrund_help_lists_subcommands");
}

#[test]
fn test_wrund_version() {
    init_test_logging();
    let output = wrund().arg("--version").output().expect("Failed to run wrund --version");
    assert!(output.status.success());
    assert_contains(&stdout(&output), env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_check_prints_effective_settings_with_secret_masked() {
    init_test_logging();
    crate::test_log!("TEST START: test_check_prints_effective_settings_with_secret_masked");

    let dir = SettingsDir::new();
    let path = dir.write(
        "wrund.toml",
        r#"
executable_path = "jobs"
port = 4444
capture_stderr = true
shared_secret = "do-not-print-me"
io_timeout = "90s"
"#,
    );

    let output = wrund()
        .arg("check")
        .arg(&path)
        .output()
        .expect("Failed to run wrund check");
    assert!(output.status.success(), "check failed: {}", stderr(&output));

    let text = stdout(&output);
    assert_not_contains(&text, "do-not-print-me");

    let json: serde_json::Value = serde_json::from_str(&text).expect("check output is JSON");
    assert_eq!(json["port"], 4444);
    assert_eq!(json["host"], "localhost");
    assert_eq!(json["capture_stderr"], true);
    assert_eq!(json["shared_secret"], "***");
    assert_eq!(json["io_timeout"], "1m 30s");
    let base = std::path::PathBuf::from(json["executable_path"].as_str().unwrap());
    assert_eq!(base, dir.jobs());
    crate::test_log!("TEST PASS: test_check_prints_effective_settings_with_secret_masked");
}

#[test]
fn test_check_applies_environment_overrides() {
    init_test_logging();
    let dir = SettingsDir::new();
    let path = dir.write("wrund.toml", "executable_path = \"jobs\"\n");

    let output = wrund()
        .arg("check")
        .arg(&path)
        .env("WRUN_PORT", "5555")
        .env("WRUN_HOST", "0.0.0.0")
        .output()
        .expect("Failed to run wrund check");
    assert!(output.status.success(), "check failed: {}", stderr(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["port"], 5555);
    assert_eq!(json["host"], "0.0.0.0");
}

#[test]
fn test_check_reports_invalid_environment() {
    init_test_logging();
    let dir = SettingsDir::new();
    let path = dir.write("wrund.toml", "executable_path = \"jobs\"\n");

    let output = wrund()
        .arg("check")
        .arg(&path)
        .env("WRUN_PORT", "not-a-port")
        .output()
        .expect("Failed to run wrund check");
    assert!(!output.status.success());
    assert_contains(&stderr(&output), "WRUN_PORT");
}

#[test]
fn test_check_rejects_missing_base_directory() {
    init_test_logging();
    crate::test_log!("TEST START: test_check_rejects_missing_base_directory");

    let dir = SettingsDir::new();
    let path = dir.write("wrund.toml", "executable_path = \"no-such-dir\"\n");

    let output = wrund()
        .arg("check")
        .arg(&path)
        .output()
        .expect("Failed to run wrund check");
    assert!(!output.status.success());
    let text = stderr(&output);
    assert_contains(&text, "is not a directory");
    assert_contains(&text, "[WRUN-E004]");
    assert_contains(&text, "Ensure executable_path points to an existing directory");
    crate::test_log!("TEST PASS: test_check_rejects_missing_base_directory");
}

#[test]
fn test_check_rejects_missing_settings_file() {
    init_test_logging();
    let dir = SettingsDir::new();
    let output = wrund()
        .arg("check")
        .arg(dir.dir.path().join("absent.toml"))
        .output()
        .expect("Failed to run wrund check");
    assert!(!output.status.success());
    let text = stderr(&output);
    assert_contains(&text, "not found");
    assert_contains(&text, "Remediation steps:");
    assert_contains(&text, "Check the settings path passed to wrund");
}

#[test]
fn test_run_fails_fast_on_invalid_settings() {
    init_test_logging();
    let dir = SettingsDir::new();
    let path = dir.write("wrund.toml", "executable_path = \"jobs\"\nport = 0\n");

    let output = wrund()
        .arg("run")
        .arg(&path)
        .output()
        .expect("Failed to run wrund run");
    assert!(!output.status.success());
    assert_contains(&stderr(&output), "port must be between 1 and 65535");
}

#[cfg(unix)]
fn wait_with_timeout(
    child: &mut std::process::Child,
    limit: std::time::Duration,
) -> std::process::ExitStatus {
    use std::time::{Duration, Instant};

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().expect("Failed to poll wrund") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("wrund did not exit within {limit:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_serves_then_exits_cleanly_on_sigterm() {
    use std::process::Stdio;
    use std::time::Duration;
    use wrun_common::Proxy;

    init_test_logging();
    crate::test_log!("TEST START: test_run_serves_then_exits_cleanly_on_sigterm");

    let dir = SettingsDir::new();
    dir.write_job("sample", "#!/bin/sh\necho \"served $1\"\n");
    let port = crate::common::free_port();
    let path = dir.write(
        "wrund.toml",
        &format!("executable_path = \"jobs\"\nhost = \"127.0.0.1\"\nport = {port}\n"),
    );

    let mut child = wrund()
        .arg("run")
        .arg(&path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn wrund run");

    let proxy = Proxy::new("127.0.0.1", port);
    let mut served = None;
    for _ in 0..100 {
        match proxy.run("sample", ["P1"], "").await {
            Ok(result) => {
                served = Some(result);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    let Some(result) = served else {
        let _ = child.kill();
        panic!("wrund never answered on port {port}");
    };
    assert_eq!(result.stdout, "served P1\n");
    assert_eq!(result.returncode, 0);

    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .expect("Failed to run kill");
    assert!(killed.success());

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.success(), "wrund exited with {status}");
    crate::test_log!("TEST PASS: test_run_serves_then_exits_cleanly_on_sigterm");
}

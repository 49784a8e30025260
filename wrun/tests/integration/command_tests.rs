use std::process::Output;

use tokio::process::Command;

use crate::common::{FakeRemote, assert_contains, init_test_logging};

fn wrun(port: u16) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wrun"));
    cmd.env_remove("WRUN_HOST")
        .env_remove("WRUN_PORT")
        .env_remove("WRUN_SHARED_SECRET")
        .env_remove("WRUN_LOG")
        .args(["--host", "127.0.0.1", "--timeout", "10s"])
        .arg("--port")
        .arg(port.to_string());
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_wrun_help_includes_description() {
    init_test_logging();
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_wrun"))
        .arg("--help")
        .output()
        .expect("Failed to run wrun --help");
    assert!(output.status.success(), "wrun --help failed");
    let text = stdout(&output);
    assert_contains(&text, "run an executable on a remote wrund server");
    assert_contains(&text, "--stdin-file");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_output_and_success_exit() {
    init_test_logging();
    crate::test_log!("TEST START: test_remote_output_and_success_exit");

    let remote = FakeRemote::start(None).await;
    let output = wrun(remote.port())
        .args(["echo", "a", "-b", "--c"])
        .output()
        .await
        .expect("Failed to run wrun");

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "a -b --c\n");

    remote.shutdown().await;
    crate::test_log!("TEST PASS: test_remote_output_and_success_exit");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_returncode_becomes_exit_status() {
    init_test_logging();
    let remote = FakeRemote::start(None).await;
    let output = wrun(remote.port())
        .arg("fail")
        .output()
        .await
        .expect("Failed to run wrun");

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout(&output), "partial\n");
    assert_contains(&stderr(&output), "bad things");

    remote.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_json_output() {
    init_test_logging();
    let remote = FakeRemote::start(None).await;
    let output = wrun(remote.port())
        .args(["--json", "fail"])
        .output()
        .await
        .expect("Failed to run wrun");

    assert_eq!(output.status.code(), Some(3));
    let json: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).expect("stdout is JSON");
    assert_eq!(json["stdout"], "partial\n");
    assert_eq!(json["stderr"], "bad things\n");
    assert_eq!(json["returncode"], 3);

    remote.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stdin_text_and_file() {
    init_test_logging();
    let remote = FakeRemote::start(None).await;

    let output = wrun(remote.port())
        .args(["--stdin", "inline input\n", "cat"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "inline input\n");

    let dir = tempfile::TempDir::new().unwrap();
    let input = dir.path().join("input.txt");
    std::fs::write(&input, "from a file\nsecond line\n").unwrap();
    let output = wrun(remote.port())
        .arg("--stdin-file")
        .arg(&input)
        .arg("cat")
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "from a file\nsecond line\n");

    remote.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_remote_executable_exits_one() {
    init_test_logging();
    let remote = FakeRemote::start(None).await;
    let output = wrun(remote.port())
        .arg("nothing-here")
        .output()
        .await
        .expect("Failed to run wrun");

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert_contains(&stderr(&output), "communication with 127.0.0.1:");

    remote.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_server_exits_one() {
    init_test_logging();
    crate::test_log!("TEST START: test_unreachable_server_exits_one");

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let output = wrun(port)
        .args(["echo", "hi"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(1));
    let text = stderr(&output);
    assert_contains(&text, "WRUN-E100");
    assert_contains(&text, "Remediation steps:");
    assert_contains(&text, "Check that wrund is running on the remote machine");
    crate::test_log!("TEST PASS: test_unreachable_server_exits_one");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_secret_from_environment() {
    init_test_logging();
    let remote = FakeRemote::start(Some("env-secret")).await;

    let output = wrun(remote.port())
        .env("WRUN_SHARED_SECRET", "env-secret")
        .args(["echo", "signed"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "signed\n");

    let output = wrun(remote.port())
        .args(["echo", "unsigned"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(1));

    remote.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_response_timeout_flag_is_accepted() {
    init_test_logging();
    let remote = FakeRemote::start(None).await;

    let output = wrun(remote.port())
        .args(["--response-timeout", "5s", "echo", "bounded"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "bounded\n");

    let output = wrun(remote.port())
        .args(["--response-timeout", "soon", "echo", "x"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(2));
    assert_contains(&stderr(&output), "--response-timeout");

    remote.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_secret_reports_remediation() {
    init_test_logging();
    let output = wrun(1)
        .args(["--secret", "", "echo", "x"])
        .output()
        .await
        .expect("Failed to run wrun");
    assert_eq!(output.status.code(), Some(1));
    let text = stderr(&output);
    assert_contains(&text, "[WRUN-E402]");
    assert_contains(&text, "Use a non-empty shared secret");
}

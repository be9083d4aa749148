#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::Command;

fn missing_socket() -> PathBuf {
    std::env::temp_dir().join(format!(
        "slcli-missing-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

#[test]
fn send_without_device_times_out_with_124() {
    let output = Command::new(env!("CARGO_BIN_EXE_sensorlink"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg("--timeout")
        .arg("500ms")
        .arg(missing_socket())
        .arg("location")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn unknown_command_alias_returns_64() {
    let output = Command::new(env!("CARGO_BIN_EXE_sensorlink"))
        .arg("send")
        .arg(missing_socket())
        .arg("launch")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("picture"));
}

#[test]
fn unbounded_capture_is_rejected_before_connecting() {
    let output = Command::new(env!("CARGO_BIN_EXE_sensorlink"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(missing_socket())
        .arg("audio")
        .arg("500")
        .arg("-1")
        .arg("-1")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn kill_requires_a_task_id() {
    let output = Command::new(env!("CARGO_BIN_EXE_sensorlink"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(missing_socket())
        .arg("kill")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_sensorlink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

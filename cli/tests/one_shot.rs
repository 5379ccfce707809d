mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{json_lines, pkgpilot, stderr, stdout};

#[test]
fn echo_streams_output_then_result() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "echo", "--", "first", "second"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(stdout(&output).starts_with("first\nsecond\n"));
}

#[test]
fn json_mode_keeps_stdout_machine_readable() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "--json", "echo", "--", "-o", "*:shared=True"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        json_lines(&output),
        vec![json!({ "status": "success", "result": ["-o", "*:shared=True"] })]
    );
    assert!(stderr(&output).contains("*:shared=True"));
}

#[test]
fn failure_exits_one_with_report() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "fail", "--set", "message=recipe not found"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("recipe not found"), "{err}");
    assert!(err.contains("error: anyhow::Error: fail operation"), "{err}");
}

#[test]
fn panic_is_reported_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "--json", "panic", "--set", "message=boom"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let lines = json_lines(&output);
    assert_eq!(lines[0]["status"], "failure");
    assert_eq!(lines[0]["error"]["kind"], "panic");
    assert_eq!(lines[0]["error"]["message"], "boom");
    assert!(stderr(&output).contains("before panic"));
}

#[test]
fn unknown_operation_fails_uniformly() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "--json", "no-such-op"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(
        json_lines(&output)[0]["error"]["kind"],
        "OperationError::UnknownOperation"
    );
}

#[test]
fn timeout_kills_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "--timeout-ms", "300", "sleep", "--set", "ms=30000"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3), "{}", stderr(&output));
    assert!(stderr(&output).contains("timed out"));
}

#[test]
fn timed_runs_print_duration_block() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args(["run", "--timed", "echo", "--", "x"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    let out = stdout(&output);
    assert!(out.contains("echo completed in "), "{out}");
    assert_eq!(out.matches("----------------------------------------").count(), 2);
}

#[test]
fn render_prints_equivalent_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let output = pkgpilot(dir.path())
        .args([
            "render",
            "install",
            "--recipe",
            "recipes/zlib",
            "--env",
            "CONAN_USER_HOME=/tmp/home",
            "--",
            "-o",
            "*:shared=True",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output).trim_end(),
        "env CONAN_USER_HOME=/tmp/home conan install recipes/zlib -o '*:shared=True'"
    );
}

#[test]
fn config_file_in_working_directory_is_used() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("pkgpilot.toml"),
        "[worker]\ntool_program = \"conan2\"\n",
    )
    .unwrap();
    let output = pkgpilot(dir.path())
        .args(["render", "create"])
        .output()
        .unwrap();
    assert_eq!(stdout(&output).trim_end(), "conan2 create");
}

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::BufReader;

use pkgpilot_core::api::{Message, MessageSink, ParameterBundle, WorkerConfig, WorkerHarness};
use pkgpilot_core::channel::FrameReader;
use pkgpilot_core::harness::install_panic_capture;
use pkgpilot_core::protocol::{Decoded, Frame};
use pkgpilot_plugins::{build_operations, build_queries};

fn harness() -> WorkerHarness {
    WorkerHarness::with_ambient(
        WorkerConfig::default(),
        vec![
            ("PATH".into(), std::env::var("PATH").unwrap_or_default()),
            ("CONAN_USER_HOME".into(), "/ambient/home".into()),
            ("LANG".into(), "C".into()),
        ],
    )
}

async fn run(bundle: ParameterBundle, queries: bool) -> (Message, Vec<Message>) {
    install_panic_capture();
    let cfg = WorkerConfig::default();
    let registry = if queries {
        build_queries(&cfg).unwrap()
    } else {
        build_operations(&cfg).unwrap()
    };
    let op = registry.resolve(&bundle.operation);

    let (client, server) = tokio::io::duplex(256 * 1024);
    let sink = MessageSink::spawn(bundle.invocation_id.clone(), server);
    let terminal = harness().run(bundle, op.as_ref(), sink).await;

    let mut reader = FrameReader::new(BufReader::new(client));
    let mut messages = Vec::new();
    while let Some(decoded) = reader.next().await.unwrap() {
        if let Decoded::Frame(Frame::Message { message, .. }) = decoded.unwrap() {
            messages.push(message);
        }
    }
    (terminal, messages)
}

fn failure_kind(message: &Message) -> &str {
    match message {
        Message::Failure(report) => &report.kind,
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_streams_arguments() {
    let (terminal, messages) = run(ParameterBundle::new("echo").args(["a", "b"]), false).await;
    assert_eq!(terminal, Message::success(json!(["a", "b"])));
    assert_eq!(
        messages,
        vec![
            Message::stdout("a"),
            Message::stdout("b"),
            terminal.clone(),
            Message::End
        ]
    );
}

#[tokio::test]
async fn env_hides_ambient_tool_variables_and_applies_bundle_changes() {
    let bundle = ParameterBundle::new("env")
        .args(["CONAN_USER_HOME", "CONAN_NON_INTERACTIVE", "LANG", "EXTRA"])
        .env("EXTRA", "1")
        .unset("LANG");
    let (terminal, _) = run(bundle, false).await;
    assert_eq!(
        terminal,
        Message::success(json!({
            "CONAN_USER_HOME": null,
            "CONAN_NON_INTERACTIVE": "1",
            "LANG": null,
            "EXTRA": "1",
        }))
    );
}

#[tokio::test]
async fn fail_reports_error_chain() {
    let bundle = ParameterBundle::new("fail").named("message", "recipe not found");
    let (terminal, messages) = run(bundle, false).await;
    assert_eq!(failure_kind(&terminal), "anyhow::Error");
    let Message::Failure(report) = &terminal else { unreachable!() };
    assert!(report.stack.iter().any(|l| l.contains("recipe not found")));
    assert_eq!(messages[0], Message::stderr("recipe not found"));
}

#[tokio::test]
async fn panic_keeps_partial_output() {
    let (terminal, messages) = run(ParameterBundle::new("panic"), false).await;
    assert_eq!(failure_kind(&terminal), "panic");
    assert_eq!(messages[0], Message::stdout("before panic"));
    assert_eq!(messages.last(), Some(&Message::End));
}

#[tokio::test]
async fn sleep_validates_its_argument() {
    let (terminal, _) = run(ParameterBundle::new("sleep").named("ms", "soon"), false).await;
    assert_eq!(failure_kind(&terminal), "OperationError::InvalidArgument");

    let (terminal, _) = run(ParameterBundle::new("sleep").named("ms", "10"), false).await;
    assert_eq!(terminal, Message::success(json!({ "slept_ms": 10 })));
}

#[cfg(unix)]
#[tokio::test]
async fn exec_streams_child_output_and_maps_exit_codes() {
    let bundle = ParameterBundle::new("exec")
        .named("program", "/bin/sh")
        .args(["-c", "echo out; echo err >&2; printf tail"]);
    let (terminal, messages) = run(bundle, false).await;
    assert!(matches!(terminal, Message::Success { .. }), "{terminal:?}");
    assert!(messages.contains(&Message::stdout("out")));
    assert!(messages.contains(&Message::stdout("tail")));
    assert!(messages.contains(&Message::stderr("err")));

    let bundle = ParameterBundle::new("exec")
        .named("program", "/bin/sh")
        .args(["-c", "exit 4"]);
    let (terminal, _) = run(bundle, false).await;
    assert_eq!(failure_kind(&terminal), "OperationError::ToolExit");
}

#[cfg(unix)]
#[tokio::test]
async fn exec_runs_in_the_bundle_cwd() {
    let dir = std::env::temp_dir();
    let bundle = ParameterBundle::new("exec")
        .named("program", "/bin/sh")
        .args(["-c", "pwd"])
        .cwd(&dir);
    let (_, messages) = run(bundle, false).await;
    let expected = dir.canonicalize().unwrap();
    let printed = messages
        .iter()
        .find_map(|m| match m {
            Message::Stdout { text } => Some(std::path::PathBuf::from(text)),
            _ => None,
        })
        .unwrap();
    assert_eq!(printed.canonicalize().unwrap(), expected);
}

#[tokio::test]
async fn missing_program_is_a_spawn_failure() {
    let bundle = ParameterBundle::new("exec").named("program", "/definitely/not/here");
    let (terminal, _) = run(bundle, false).await;
    assert_eq!(failure_kind(&terminal), "OperationError::ToolSpawn");
}

#[tokio::test]
async fn queries_answer_from_parameters() {
    let (terminal, _) = run(ParameterBundle::new("ping"), true).await;
    assert_eq!(terminal, Message::success(json!("pong")));

    let bundle = ParameterBundle::new("get_env").named("key", json!(["CONAN_USER_HOME", "CONAN_NON_INTERACTIVE"]));
    let (terminal, _) = run(bundle, true).await;
    assert_eq!(
        terminal,
        Message::success(json!({ "CONAN_USER_HOME": null, "CONAN_NON_INTERACTIVE": "1" }))
    );

    let (terminal, _) = run(ParameterBundle::new("get_env"), true).await;
    assert_eq!(failure_kind(&terminal), "OperationError::MissingArgument");
}

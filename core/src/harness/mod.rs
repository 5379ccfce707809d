//! Scope that wraps exactly one invocation inside a worker process.
//!
//! Whatever the body does, the harness emits exactly one terminal message
//! for it. In one-shot mode it also ends and closes the channel.

mod context;
mod env;
mod failure;

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::Instrument;

use crate::bundle::ParameterBundle;
use crate::channel::MessageSink;
use crate::config::WorkerConfig;
use crate::operation::Operation;
use crate::protocol::Message;

pub use context::InvocationContext;
pub use env::InvocationEnv;
pub use failure::{install_panic_capture, report_operation_error, report_panic, PANIC_KIND};

pub const TIMING_DELIMITER: &str = "----------------------------------------";

pub struct WorkerHarness {
    cfg: WorkerConfig,
    ambient: Option<Vec<(String, String)>>,
}

impl WorkerHarness {
    pub fn new(cfg: WorkerConfig) -> Self {
        Self { cfg, ambient: None }
    }

    /// Uses a fixed environment snapshot instead of the live process
    /// environment.
    pub fn with_ambient(cfg: WorkerConfig, ambient: Vec<(String, String)>) -> Self {
        Self {
            cfg,
            ambient: Some(ambient),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.cfg
    }

    fn ambient(&self) -> Vec<(String, String)> {
        match &self.ambient {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        }
    }

    /// Runs `op` and emits its terminal message, which is also returned.
    /// Errors and panics inside the body never escape.
    pub async fn execute(
        &self,
        mut bundle: ParameterBundle,
        op: &dyn Operation,
        sink: &MessageSink,
    ) -> Message {
        let span = tracing::info_span!(
            target: "pkgpilot.harness",
            "invocation",
            operation = %bundle.operation,
            invocation = %bundle.invocation_id,
        );

        async move {
            let (env, scrubbed) = InvocationEnv::prepare(self.ambient(), &self.cfg, &mut bundle);
            if !scrubbed.is_empty() {
                tracing::debug!(target: "pkgpilot.harness", scrubbed = ?scrubbed, "cleared ambient tool variables");
            }

            let operation = bundle.operation.clone();
            let started = bundle.timed.then(Instant::now);
            let mut ctx = InvocationContext::new(bundle, env, sink);

            let result = AssertUnwindSafe(op.invoke(&mut ctx)).catch_unwind().await;
            ctx.finish();
            drop(ctx);

            let terminal = match result {
                Ok(Ok(payload)) => {
                    if let Some(started) = started {
                        emit_timing(sink, &operation, started.elapsed());
                    }
                    tracing::debug!(target: "pkgpilot.harness", "invocation succeeded");
                    Message::success(payload)
                }
                Ok(Err(err)) => {
                    tracing::warn!(target: "pkgpilot.harness", error = %err, kind = err.kind(), "invocation failed");
                    Message::Failure(report_operation_error(&err))
                }
                Err(payload) => {
                    let report = report_panic(payload);
                    tracing::error!(target: "pkgpilot.harness", message = %report.message, "invocation panicked");
                    Message::Failure(report)
                }
            };

            if sink.send(terminal.clone()).is_err() {
                tracing::warn!(target: "pkgpilot.harness", "channel closed before terminal message");
            }
            terminal
        }
        .instrument(span)
        .await
    }

    /// One-shot scope: execute, send `End`, close the channel and wait for
    /// it to flush.
    pub async fn run(&self, bundle: ParameterBundle, op: &dyn Operation, sink: MessageSink) -> Message {
        let terminal = self.execute(bundle, op, &sink).await;
        let _ = sink.send(Message::End);
        sink.close().await;
        terminal
    }
}

fn emit_timing(sink: &MessageSink, operation: &str, elapsed: Duration) {
    let _ = sink.send(Message::stdout(TIMING_DELIMITER));
    let _ = sink.send(Message::stdout(format!(
        "{operation} completed in {:.2}s",
        elapsed.as_secs_f64()
    )));
    let _ = sink.send(Message::stdout(TIMING_DELIMITER));
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::io::BufReader;

    use super::*;
    use crate::channel::FrameReader;
    use crate::error::OperationError;
    use crate::protocol::{Decoded, Frame};

    struct Scripted;

    #[async_trait]
    impl Operation for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
            match ctx.require_named("mode")? {
                "ok" => {
                    write!(ctx.stdout(), "partial").unwrap();
                    ctx.log().info("working");
                    Ok(json!({ "home": ctx.env().get("CONAN_HOME") }))
                }
                "err" => {
                    ctx.stderr().line("about to fail").unwrap();
                    Err(OperationError::ToolExit {
                        program: "conan".into(),
                        code: 6,
                    })
                }
                _ => panic!("scripted panic"),
            }
        }
    }

    async fn run_mode(mode: &str, timed: bool) -> (Message, Vec<Frame>) {
        install_panic_capture();
        let (client, server) = tokio::io::duplex(256 * 1024);
        let bundle = ParameterBundle::new("scripted").named("mode", mode).timed(timed);
        let id = bundle.invocation_id.clone();
        let sink = MessageSink::spawn(id.clone(), server);
        let harness = WorkerHarness::with_ambient(
            WorkerConfig::default(),
            vec![("CONAN_HOME".into(), "/ambient".into())],
        );
        let terminal = harness.run(bundle, &Scripted, sink).await;

        let mut reader = FrameReader::new(BufReader::new(client));
        let mut frames = Vec::new();
        while let Some(decoded) = reader.next().await.unwrap() {
            match decoded.unwrap() {
                Decoded::Frame(frame) => {
                    if let Frame::Message { invocation, .. } = &frame {
                        assert_eq!(invocation, &id);
                    }
                    frames.push(frame);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        (terminal, frames)
    }

    fn messages(frames: Vec<Frame>) -> Vec<Message> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                Frame::Message { message, .. } => Some(message),
                Frame::Ack { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn success_flushes_partial_output_before_terminal() {
        let (terminal, frames) = run_mode("ok", false).await;
        assert_eq!(terminal, Message::success(json!({ "home": null })));

        let msgs = messages(frames);
        assert!(matches!(msgs[0], Message::LogLine { .. }));
        assert_eq!(msgs[1], Message::stdout("partial"));
        assert_eq!(msgs[2], terminal);
        assert_eq!(msgs[3], Message::End);
        assert_eq!(msgs.len(), 4);
    }

    #[tokio::test]
    async fn timed_invocations_bracket_the_duration() {
        let (_, frames) = run_mode("ok", true).await;
        let msgs = messages(frames);
        let stdout: Vec<&str> = msgs
            .iter()
            .filter_map(|m| match m {
                Message::Stdout { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout.len(), 4);
        assert_eq!(stdout[1], TIMING_DELIMITER);
        assert!(stdout[2].starts_with("scripted completed in "));
        assert_eq!(stdout[3], TIMING_DELIMITER);
    }

    #[tokio::test]
    async fn errors_become_a_single_failure() {
        let (terminal, frames) = run_mode("err", true).await;
        let Message::Failure(report) = &terminal else {
            panic!("expected failure, got {terminal:?}");
        };
        assert_eq!(report.kind, "OperationError::ToolExit");
        assert!(!report.stack.is_empty());

        let msgs = messages(frames);
        assert_eq!(msgs.iter().filter(|m| m.is_terminal()).count(), 1);
        assert_eq!(msgs[0], Message::stderr("about to fail"));
        // no timing block on failure
        assert!(!msgs.contains(&Message::stdout(TIMING_DELIMITER)));
        assert_eq!(msgs.last(), Some(&Message::End));
    }

    #[tokio::test]
    async fn panics_are_reported_not_propagated() {
        let (terminal, _) = run_mode("boom", false).await;
        match terminal {
            Message::Failure(report) => {
                assert_eq!(report.kind, PANIC_KIND);
                assert_eq!(report.message, "scripted panic");
                assert!(report.stack.len() > 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_argument_is_a_failure() {
        install_panic_capture();
        let (_client, server) = tokio::io::duplex(64 * 1024);
        let sink = MessageSink::spawn("x", server);
        let harness = WorkerHarness::with_ambient(WorkerConfig::default(), vec![]);
        let terminal = harness
            .execute(ParameterBundle::new("scripted"), &Scripted, &sink)
            .await;
        match terminal {
            Message::Failure(report) => assert_eq!(report.kind, "OperationError::MissingArgument"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

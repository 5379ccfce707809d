//! Long-lived worker that answers many short queries over one channel.
//!
//! Requests arrive one per line on the worker's stdin; replies and acks go
//! out as frames on its stdout. Dispatch is strictly sequential, so replies
//! come back in request order.

mod client;
mod request;

use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::bundle::ParameterBundle;
use crate::channel::MessageSink;
use crate::harness::WorkerHarness;
use crate::operation::OperationRegistry;
use crate::protocol::{FailureReport, Message};

pub use client::{QueryClient, QueryReply};
pub use request::QueryRequest;

pub const UNKNOWN_COMMAND_KIND: &str = "unknown_command";
pub const INVALID_REQUEST_KIND: &str = "invalid_request";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Ready,
    Dispatching,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Dispatching => "dispatching",
            ServerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The `end` request arrived.
    Shutdown,
    /// The request channel closed without `end`.
    EndOfInput,
    /// Reading the request channel failed.
    ReadError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeSummary {
    pub requests: u64,
    pub failures: u64,
    pub cause: StopCause,
}

pub struct QueryServer {
    registry: OperationRegistry,
    harness: WorkerHarness,
    session: String,
    state: ServerState,
}

impl QueryServer {
    pub fn new(registry: OperationRegistry, harness: WorkerHarness, session: impl Into<String>) -> Self {
        Self {
            registry,
            harness,
            session: session.into(),
            state: ServerState::Starting,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    fn transition(&mut self, next: ServerState) {
        tracing::trace!(target: "pkgpilot.server", from = %self.state, to = %next, "state change");
        self.state = next;
    }

    /// Serves requests until `end` or end of input, then sends `End` and
    /// closes `sink`. Every other line gets exactly one reply followed by an
    /// ack carrying its sequence number.
    pub async fn serve<R>(&mut self, mut requests: R, sink: MessageSink) -> ServeSummary
    where
        R: AsyncBufRead + Unpin,
    {
        tracing::info!(
            target: "pkgpilot.server",
            session = %self.session,
            handlers = self.registry.len(),
            "query server started"
        );

        let mut buf = Vec::new();
        let mut seq: u64 = 0;
        let mut failures: u64 = 0;

        let cause = loop {
            self.transition(ServerState::Ready);
            buf.clear();
            match requests.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    tracing::warn!(target: "pkgpilot.server", session = %self.session, "request channel closed without shutdown request");
                    break StopCause::EndOfInput;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(target: "pkgpilot.server", session = %self.session, error = %e, "failed to read request");
                    break StopCause::ReadError;
                }
            }

            seq += 1;
            self.transition(ServerState::Dispatching);

            let line = match std::str::from_utf8(trim_line_end(&buf)) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(target: "pkgpilot.server", seq, error = %e, "request is not valid UTF-8");
                    let _ = sink.send(Message::Failure(FailureReport::new(
                        INVALID_REQUEST_KIND,
                        format!("request is not valid UTF-8: {e}"),
                    )));
                    failures += 1;
                    let _ = sink.ack(seq);
                    continue;
                }
            };

            let request = match QueryRequest::parse(line) {
                Ok(request) if request.is_shutdown() => {
                    let _ = sink.ack(seq);
                    break StopCause::Shutdown;
                }
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(target: "pkgpilot.server", seq, error = %e, "rejected request");
                    let _ = sink.send(Message::Failure(FailureReport::new(
                        INVALID_REQUEST_KIND,
                        format!("{e}: {line:?}"),
                    )));
                    failures += 1;
                    let _ = sink.ack(seq);
                    continue;
                }
            };

            let terminal = self.dispatch(seq, request, &sink).await;
            if !matches!(terminal, Message::Success { .. }) {
                failures += 1;
            }
            let _ = sink.ack(seq);
        };

        self.transition(ServerState::Stopping);
        let _ = sink.send(Message::End);
        sink.close().await;

        tracing::info!(
            target: "pkgpilot.server",
            session = %self.session,
            requests = seq,
            failures,
            cause = ?cause,
            "query server stopped"
        );
        ServeSummary {
            requests: seq,
            failures,
            cause,
        }
    }

    async fn dispatch(&self, seq: u64, request: QueryRequest, sink: &MessageSink) -> Message {
        let Some(handler) = self.registry.get(&request.command) else {
            tracing::warn!(target: "pkgpilot.server", seq, command = %request.command, "unknown command");
            let terminal = Message::Failure(FailureReport::new(
                UNKNOWN_COMMAND_KIND,
                format!("unknown command: {}", request.command),
            ));
            let _ = sink.send(terminal.clone());
            return terminal;
        };

        let mut bundle = ParameterBundle::new(request.command.clone());
        bundle.invocation_id = format!("{}:{seq}", self.session);
        bundle.named = request.named();
        self.harness.execute(bundle, handler.as_ref(), sink).await
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

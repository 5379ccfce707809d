use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::FailureReport;

/// How an invocation ended, as seen by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    /// The body failed; the worker reported why.
    Failure(FailureReport),
    /// The worker or its channel went away without a terminal message.
    TransportFailure { exit_code: Option<i32> },
    /// Frames from another invocation showed up on this channel.
    Contaminated { expected: String, found: String },
    /// The reader was stopped before a terminal message arrived.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Human-readable description for anything but success.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Success(_) => "success".to_string(),
            Outcome::Failure(report) => report.to_string(),
            Outcome::TransportFailure {
                exit_code: Some(code),
            } => format!("worker exited with code {code} without a result"),
            Outcome::TransportFailure { exit_code: None } => {
                "worker channel closed without a result".to_string()
            }
            Outcome::Contaminated { expected, found } => {
                format!("channel for {expected} received frames from {found}")
            }
            Outcome::Cancelled => "cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    End,
    Stopped,
    TransportLost { exit_code: Option<i32> },
    Contaminated { expected: String, found: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Stdout(String),
    Stderr(String),
    Log(String),
    Complete(Outcome),
    Ack(u64),
    Closed(CloseReason),
}

/// Controller-side callbacks, invoked on whatever context drains the
/// notification queue.
pub trait ReplyHandler {
    fn on_stdout(&mut self, _text: &str) {}

    fn on_stderr(&mut self, _text: &str) {}

    fn on_log(&mut self, _text: &str) {}

    fn on_complete(&mut self, outcome: &Outcome);

    fn on_ack(&mut self, _seq: u64) {}

    fn on_closed(&mut self, _reason: &CloseReason) {}
}

pub fn dispatch(notification: &Notification, handler: &mut dyn ReplyHandler) {
    match notification {
        Notification::Stdout(text) => handler.on_stdout(text),
        Notification::Stderr(text) => handler.on_stderr(text),
        Notification::Log(text) => handler.on_log(text),
        Notification::Complete(outcome) => handler.on_complete(outcome),
        Notification::Ack(seq) => handler.on_ack(*seq),
        Notification::Closed(reason) => handler.on_closed(reason),
    }
}

/// Drains notifications into `handler` until the reader reports it closed.
pub async fn pump(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    handler: &mut dyn ReplyHandler,
) -> Option<CloseReason> {
    while let Some(notification) = rx.recv().await {
        dispatch(&notification, handler);
        if let Notification::Closed(reason) = notification {
            return Some(reason);
        }
    }
    None
}

/// Blocking variant of [`pump`] for a primary thread that is not running
/// inside the async runtime (a UI event loop, for example).
pub fn pump_blocking(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    handler: &mut dyn ReplyHandler,
) -> Option<CloseReason> {
    while let Some(notification) = rx.blocking_recv() {
        dispatch(&notification, handler);
        if let Notification::Closed(reason) = notification {
            return Some(reason);
        }
    }
    None
}

/// Handler that records everything it sees. Handy for tests and for
/// callers that only want the final result.
#[derive(Debug, Default, Clone)]
pub struct CollectingHandler {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub log: Vec<String>,
    pub outcomes: Vec<Outcome>,
    pub acks: Vec<u64>,
    pub closed: Option<CloseReason>,
}

impl ReplyHandler for CollectingHandler {
    fn on_stdout(&mut self, text: &str) {
        self.stdout.push(text.to_string());
    }

    fn on_stderr(&mut self, text: &str) {
        self.stderr.push(text.to_string());
    }

    fn on_log(&mut self, text: &str) {
        self.log.push(text.to_string());
    }

    fn on_complete(&mut self, outcome: &Outcome) {
        self.outcomes.push(outcome.clone());
    }

    fn on_ack(&mut self, seq: u64) {
        self.acks.push(seq);
    }

    fn on_closed(&mut self, reason: &CloseReason) {
        self.closed = Some(reason.clone());
    }
}

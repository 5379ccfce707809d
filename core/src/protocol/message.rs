use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Stdout {
        text: String,
    },
    Stderr {
        text: String,
    },
    LogLine {
        text: String,
    },
    Success {
        #[serde(default)]
        payload: Value,
    },
    Failure(FailureReport),
    End,
}

impl Message {
    pub(crate) const KNOWN_TYPES: [&'static str; 6] =
        ["stdout", "stderr", "log_line", "success", "failure", "end"];

    pub fn stdout(text: impl Into<String>) -> Self {
        Message::Stdout { text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Message::Stderr { text: text.into() }
    }

    pub fn log(text: impl Into<String>) -> Self {
        Message::LogLine { text: text.into() }
    }

    pub fn success(payload: Value) -> Self {
        Message::Success { payload }
    }

    /// `Success` and `Failure` end an invocation's logical result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Success { .. } | Message::Failure(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Stdout { .. } => "stdout",
            Message::Stderr { .. } => "stderr",
            Message::LogLine { .. } => "log_line",
            Message::Success { .. } => "success",
            Message::Failure(_) => "failure",
            Message::End => "end",
        }
    }
}

/// Which informational stream a line of text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
    Log,
}

impl StreamKind {
    pub fn message(self, text: String) -> Message {
        match self {
            StreamKind::Stdout => Message::Stdout { text },
            StreamKind::Stderr => Message::Stderr { text },
            StreamKind::Log => Message::LogLine { text },
        }
    }
}

/// Plain-text rendering of an error raised inside a worker.
///
/// Only pre-formatted text crosses the process boundary; presentation is left
/// to whoever displays it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub message: String,
    pub kind: String,
    #[serde(default)]
    pub stack: Vec<String>,
}

impl FailureReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            stack: Vec::new(),
        }
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

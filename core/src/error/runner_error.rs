// core/src/error/runner_error.rs
use thiserror::Error;

use super::{ProtocolError, ReaderError};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to resolve worker executable")]
    WorkerProgram(#[source] std::io::Error),

    #[error("failed to spawn worker process: {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("failed to hand parameters to worker")]
    Handoff(#[source] std::io::Error),

    #[error("failed to encode parameters")]
    Encode(#[source] ProtocolError),

    #[error("worker did not exit within {ms}ms")]
    ExitTimeout { ms: u64 },

    #[error(transparent)]
    Reader(#[from] ReaderError),
}

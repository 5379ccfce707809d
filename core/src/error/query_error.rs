// core/src/error/query_error.rs
use thiserror::Error;

use super::{RequestError, RunnerError};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to start query server")]
    Start(#[from] RunnerError),

    #[error("invalid request")]
    Request(#[from] RequestError),

    #[error("failed to write request to query server")]
    Write(#[source] std::io::Error),

    #[error("query server is gone (exit code {exit_code:?})")]
    ServerGone { exit_code: Option<i32> },

    #[error("query timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("reply stream contaminated: expected {expected}, found {found}")]
    Contaminated { expected: String, found: String },
}

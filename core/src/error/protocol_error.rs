// core/src/error/protocol_error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json frame")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("failed to encode frame")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("empty request")]
    Empty,

    #[error("invalid command name: {0:?}")]
    InvalidCommand(String),

    #[error("request must be a single line")]
    Multiline,
}

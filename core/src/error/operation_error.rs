// core/src/error/operation_error.rs
use thiserror::Error;

/// Errors raised by invocation bodies. They never leave the worker process as
/// values; the harness renders them into a `FailureReport`.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("missing argument: {0}")]
    MissingArgument(String),

    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("failed to launch `{program}`")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with status {code}")]
    ToolExit { program: String, code: i32 },

    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OperationError {
    /// Type name carried in `Failure.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::UnknownOperation(_) => "OperationError::UnknownOperation",
            OperationError::MissingArgument(_) => "OperationError::MissingArgument",
            OperationError::InvalidArgument { .. } => "OperationError::InvalidArgument",
            OperationError::ToolSpawn { .. } => "OperationError::ToolSpawn",
            OperationError::ToolExit { .. } => "OperationError::ToolExit",
            OperationError::Io(_) => "std::io::Error",
            OperationError::Other(_) => "anyhow::Error",
        }
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        OperationError::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

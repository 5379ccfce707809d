use thiserror::Error;

use pkgpilot_core::api::{ConfigError, QueryError, RegistryError, RunnerError};

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    /// The operation or a query reported `Failure`.
    pub const FAILURE: i32 = 1;
    /// The worker died, the channel broke, or setup failed.
    pub const TRANSPORT: i32 = 2;
    pub const TIMEOUT: i32 = 3;
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid {flag} value {value:?}: expected NAME=VALUE")]
    InvalidPair { flag: &'static str, value: String },

    #[error("failed to build operation registry")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("failed to set up logging: {0}")]
    Logging(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Query(QueryError::Timeout { .. }) => exit_code::TIMEOUT,
            CliError::Runner(RunnerError::ExitTimeout { .. }) => exit_code::TIMEOUT,
            _ => exit_code::TRANSPORT,
        }
    }
}

mod config_error;
mod operation_error;
mod protocol_error;
mod query_error;
mod reader_error;
mod registry_error;
mod runner_error;

pub use config_error::ConfigError;
pub use operation_error::OperationError;
pub use protocol_error::{ProtocolError, RequestError};
pub use query_error::QueryError;
pub use reader_error::ReaderError;
pub use registry_error::RegistryError;
pub use runner_error::RunnerError;

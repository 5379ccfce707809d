//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `pkgpilot_core::api` instead of reaching into internal modules.

pub use crate::bundle::{quote_arg, ParameterBundle, OPTION_WILDCARD};
pub use crate::channel::{ChannelClosed, InvocationLog, MessageSink, OutputStream};
pub use crate::config::{
    load, load_default, load_from, AppConfig, LoggingConfig, RunnerConfig, ServerConfig, WorkerConfig,
};
pub use crate::error::{
    ConfigError, OperationError, QueryError, ReaderError, RegistryError, RunnerError,
};
pub use crate::harness::{InvocationContext, InvocationEnv, WorkerHarness};
pub use crate::operation::{Operation, OperationRegistry, SHUTDOWN_COMMAND};
pub use crate::protocol::{FailureReport, Message};
pub use crate::reader::{
    pump, pump_blocking, CloseReason, CollectingHandler, Notification, Outcome, ReplyHandler,
};
pub use crate::runner::{InvocationReport, OneShotRunner, RunningInvocation, WorkerCommand};
pub use crate::server::{QueryClient, QueryReply, QueryRequest};

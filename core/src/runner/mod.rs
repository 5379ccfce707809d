//! Controller side of the worker process boundary.

pub mod exit;
mod oneshot;
mod process;

pub use oneshot::{InvocationReport, OneShotRunner, RunningInvocation};
pub use process::{WorkerCommand, WorkerMode, WorkerProcess};

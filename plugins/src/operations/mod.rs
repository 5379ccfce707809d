//! Built-in one-shot operations.
//!
//! Each tool subcommand runs the wrapped package manager; `exec` runs any
//! program. The rest are small diagnostics that exercise each path through
//! the harness.

mod basic;
mod exec;

pub use basic::{EchoOperation, EnvOperation, FailOperation, PanicOperation, SleepOperation};
pub use exec::{ExecOperation, TOOL_SUBCOMMANDS};

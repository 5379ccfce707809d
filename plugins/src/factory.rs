use std::sync::Arc;

use pkgpilot_core::api::{OperationRegistry, RegistryError, WorkerConfig};

use crate::operations::{
    EchoOperation, EnvOperation, ExecOperation, FailOperation, PanicOperation, SleepOperation,
    TOOL_SUBCOMMANDS,
};
use crate::queries::{EchoQuery, GetEnvQuery, PingQuery, ToolVersionQuery};

/// Operations a one-shot worker can run.
pub fn build_operations(cfg: &WorkerConfig) -> Result<OperationRegistry, RegistryError> {
    let mut registry = OperationRegistry::new()
        .with(Arc::new(EchoOperation))?
        .with(Arc::new(EnvOperation))?
        .with(Arc::new(FailOperation))?
        .with(Arc::new(PanicOperation))?
        .with(Arc::new(SleepOperation))?
        .with(Arc::new(ExecOperation::exec()))?;
    for subcommand in TOOL_SUBCOMMANDS {
        registry.register(Arc::new(ExecOperation::tool(
            cfg.tool_program.clone(),
            *subcommand,
        )))?;
    }
    Ok(registry)
}

/// Handlers served by the persistent query worker.
pub fn build_queries(cfg: &WorkerConfig) -> Result<OperationRegistry, RegistryError> {
    OperationRegistry::new()
        .with(Arc::new(PingQuery))?
        .with(Arc::new(EchoQuery))?
        .with(Arc::new(GetEnvQuery))?
        .with(Arc::new(ToolVersionQuery::new(cfg.tool_program.clone())))
}

use pkgpilot_core::api::AppConfig;
use pkgpilot_core::protocol::Message;
use pkgpilot_core::worker;
use pkgpilot_plugins::{build_operations, build_queries};

use super::cli::WorkerCommands;
use crate::error::{exit_code, CliError};

/// Worker entry points. A failed operation is still a clean worker exit:
/// the failure travels over the channel.
pub async fn run(command: WorkerCommands, cfg: AppConfig) -> Result<i32, CliError> {
    match command {
        WorkerCommands::Run { invocation } => {
            let registry = build_operations(&cfg.worker)?;
            let terminal = worker::run_one_shot(&registry, &cfg.worker, &invocation).await;
            if let Message::Failure(report) = &terminal {
                tracing::debug!(target: "pkgpilot.harness", kind = %report.kind, "invocation reported failure");
            }
        }
        WorkerCommands::Serve { session } => {
            let registry = build_queries(&cfg.worker)?;
            let summary = worker::serve(registry, &cfg.worker, &session).await;
            tracing::debug!(target: "pkgpilot.server", requests = summary.requests, cause = ?summary.cause, "worker done");
        }
    }
    Ok(exit_code::SUCCESS)
}

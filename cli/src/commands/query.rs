use std::time::Duration;

use pkgpilot_core::api::{AppConfig, QueryClient, QueryRequest, WorkerCommand};

use super::cli::QueryArgs;
use super::run::{outcome_exit_code, outcome_json, print_outcome};
use crate::error::{exit_code, CliError};

/// Starts one query worker, sends every request through it in order and
/// shuts it down. The exit code is the worst result seen.
pub async fn run(args: QueryArgs, mut cfg: AppConfig, command: WorkerCommand) -> Result<i32, CliError> {
    if let Some(ms) = args.timeout_ms {
        cfg.server.request_timeout_ms = ms.max(1);
    }
    let requests = args
        .requests
        .iter()
        .map(|raw| QueryRequest::parse(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CliError::Query(e.into()))?;

    let mut client = QueryClient::start(
        &command,
        cfg.server.clone(),
        Duration::from_millis(cfg.runner.drain_grace_ms),
    )
    .await?;

    let mut worst = exit_code::SUCCESS;
    for request in &requests {
        if request.is_shutdown() {
            break;
        }
        let reply = match client.query(request).await {
            Ok(reply) => reply,
            Err(e) => {
                // Leave the server to kill-on-drop; it may be wedged.
                drop(client);
                return Err(e.into());
            }
        };
        for line in reply.stdout.iter().chain(&reply.stderr).chain(&reply.log) {
            eprintln!("{line}");
        }
        if args.json {
            println!("{}", outcome_json(&reply.outcome));
        } else {
            print_outcome(&reply.outcome, false);
        }
        worst = worst.max(outcome_exit_code(&reply.outcome));
    }

    let server_exit = client.shutdown().await?;
    if server_exit.is_some_and(|code| code != 0) {
        tracing::warn!(target: "pkgpilot.cli", exit_code = ?server_exit, "query worker exited abnormally");
    }
    Ok(worst)
}

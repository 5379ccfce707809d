//! Entry points run inside worker processes. Stdout carries protocol frames
//! only; diagnostics go to stderr through tracing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};

use crate::bundle::ParameterBundle;
use crate::channel::MessageSink;
use crate::config::WorkerConfig;
use crate::harness::{install_panic_capture, WorkerHarness};
use crate::operation::OperationRegistry;
use crate::protocol::{FailureReport, Message};
use crate::server::{QueryServer, ServeSummary};

pub const INVALID_BUNDLE_KIND: &str = "invalid_bundle";

/// One-shot worker: reads the parameter bundle from stdin, runs the named
/// operation and streams the result to stdout.
pub async fn run_one_shot(registry: &OperationRegistry, cfg: &WorkerConfig, invocation_id: &str) -> Message {
    install_panic_capture();
    run_one_shot_on(
        registry,
        WorkerHarness::new(cfg.clone()),
        invocation_id,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

pub async fn run_one_shot_on<R, W>(
    registry: &OperationRegistry,
    harness: WorkerHarness,
    invocation_id: &str,
    mut input: R,
    output: W,
) -> Message
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let sink = MessageSink::spawn(invocation_id, output);

    let bundle = match read_bundle(&mut input, invocation_id).await {
        Ok(bundle) => bundle,
        Err(reason) => {
            tracing::error!(target: "pkgpilot.harness", invocation = %invocation_id, "{reason}");
            let terminal = Message::Failure(FailureReport::new(INVALID_BUNDLE_KIND, reason));
            let _ = sink.send(terminal.clone());
            let _ = sink.send(Message::End);
            sink.close().await;
            return terminal;
        }
    };

    let op = registry.resolve(&bundle.operation);
    harness.run(bundle, op.as_ref(), sink).await
}

async fn read_bundle<R>(input: &mut R, invocation_id: &str) -> Result<ParameterBundle, String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .await
        .map_err(|e| format!("failed to read parameters: {e}"))?;
    if read == 0 || line.trim().is_empty() {
        return Err("no parameters received".to_string());
    }
    let bundle: ParameterBundle =
        serde_json::from_str(line.trim_end()).map_err(|e| format!("malformed parameters: {e}"))?;
    if bundle.invocation_id != invocation_id {
        return Err(format!(
            "parameters belong to invocation {}, not {invocation_id}",
            bundle.invocation_id
        ));
    }
    Ok(bundle)
}

/// Persistent query worker: serves requests from stdin until `end`.
pub async fn serve(registry: OperationRegistry, cfg: &WorkerConfig, session: &str) -> ServeSummary {
    install_panic_capture();
    let sink = MessageSink::spawn(session, tokio::io::stdout());
    let mut server = QueryServer::new(registry, WorkerHarness::new(cfg.clone()), session);
    server.serve(BufReader::new(tokio::io::stdin()), sink).await
}

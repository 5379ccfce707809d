use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::mpsc;

use crate::bundle::ParameterBundle;
use crate::channel::FrameReader;
use crate::config::RunnerConfig;
use crate::error::{ProtocolError, RunnerError};
use crate::reader::{
    pump, Notification, Outcome, ReaderHandle, ReaderMode, ReaderOptions, ReplyHandler,
    ReplyReader,
};

use super::process::{WorkerCommand, WorkerMode, WorkerProcess};

/// Runs each invocation in its own worker process.
pub struct OneShotRunner {
    cfg: RunnerConfig,
    command: WorkerCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub invocation_id: String,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub violations: u64,
    /// The worker was killed for exceeding the invocation timeout.
    pub timed_out: bool,
    /// The caller cancelled the invocation and the worker was killed.
    pub cancelled: bool,
}

impl OneShotRunner {
    pub fn new(cfg: RunnerConfig, command: WorkerCommand) -> Self {
        Self { cfg, command }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.cfg
    }

    /// Starts a worker for `bundle` and hands it the parameters. The returned
    /// handle's reader is already consuming the worker's output.
    pub async fn spawn(&self, bundle: &ParameterBundle) -> Result<RunningInvocation, RunnerError> {
        let mut process = self.command.spawn(WorkerMode::Run {
            invocation: bundle.invocation_id.clone(),
        })?;

        if let Err(e) = hand_off(&mut process, bundle).await {
            process.kill();
            return Err(e);
        }

        let stdout = process.take_stdout()?;
        let (reader, notifications) = attach_reader(
            stdout,
            ReaderOptions::new(ReaderMode::OneShot, bundle.invocation_id.clone())
                .exit_signal(process.exit_signal())
                .drain_grace(Duration::from_millis(self.cfg.drain_grace_ms)),
        );

        tracing::info!(
            target: "pkgpilot.runner",
            invocation = %bundle.invocation_id,
            operation = %bundle.operation,
            pid = ?process.pid(),
            "invocation started"
        );

        Ok(RunningInvocation {
            invocation_id: bundle.invocation_id.clone(),
            process,
            reader: Some(reader),
            notifications,
            kill_grace: Duration::from_millis(self.cfg.kill_grace_ms),
            timed_out: false,
            cancelled: false,
        })
    }

    /// Spawns, streams everything into `handler` and waits for the worker.
    /// An invocation that outlives `runner.invocation_timeout_ms` is killed.
    pub async fn run(
        &self,
        bundle: &ParameterBundle,
        handler: &mut dyn ReplyHandler,
    ) -> Result<InvocationReport, RunnerError> {
        self.run_until(bundle, handler, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also kills the worker when `cancel`
    /// resolves first.
    pub async fn run_until<F>(
        &self,
        bundle: &ParameterBundle,
        handler: &mut dyn ReplyHandler,
        cancel: F,
    ) -> Result<InvocationReport, RunnerError>
    where
        F: Future<Output = ()>,
    {
        let mut running = self.spawn(bundle).await?;
        let timeout = Duration::from_millis(self.cfg.invocation_timeout_ms);

        let interrupted = {
            let drained = tokio::time::timeout(timeout, pump(running.notifications(), &mut *handler));
            tokio::select! {
                res = drained => res.is_err().then_some(Interrupt::Timeout),
                () = cancel => Some(Interrupt::Cancelled),
            }
        };

        if let Some(interrupt) = interrupted {
            match interrupt {
                Interrupt::Timeout => tracing::warn!(
                    target: "pkgpilot.runner",
                    invocation = %bundle.invocation_id,
                    timeout_ms = self.cfg.invocation_timeout_ms,
                    "invocation timed out, killing worker"
                ),
                Interrupt::Cancelled => tracing::info!(
                    target: "pkgpilot.runner",
                    invocation = %bundle.invocation_id,
                    "invocation cancelled, killing worker"
                ),
            }
            running.kill();
            running.timed_out = interrupt == Interrupt::Timeout;
            running.cancelled = interrupt == Interrupt::Cancelled;
            let grace = running.kill_grace;
            let _ = tokio::time::timeout(grace, pump(running.notifications(), handler)).await;
        }

        running.finish().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Timeout,
    Cancelled,
}

async fn hand_off(process: &mut WorkerProcess, bundle: &ParameterBundle) -> Result<(), RunnerError> {
    let mut line = serde_json::to_string(bundle)
        .map_err(|e| RunnerError::Encode(ProtocolError::Encode(e)))?;
    line.push('\n');

    let mut stdin = process.take_stdin()?;
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(RunnerError::Handoff)?;
    stdin.flush().await.map_err(RunnerError::Handoff)?;
    // Dropping stdin closes it; the worker reads exactly one line.
    Ok(())
}

fn attach_reader(
    stdout: ChildStdout,
    opts: ReaderOptions,
) -> (ReaderHandle, mpsc::UnboundedReceiver<Notification>) {
    ReplyReader::spawn(FrameReader::new(BufReader::new(stdout)), opts)
}

/// One worker process executing one invocation.
pub struct RunningInvocation {
    invocation_id: String,
    process: WorkerProcess,
    reader: Option<ReaderHandle>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    kill_grace: Duration,
    timed_out: bool,
    cancelled: bool,
}

impl RunningInvocation {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// The reader attached to the worker's output.
    pub fn reader(&self) -> Option<&ReaderHandle> {
        self.reader.as_ref()
    }

    /// Notifications for the controller's primary context.
    pub fn notifications(&mut self) -> &mut mpsc::UnboundedReceiver<Notification> {
        &mut self.notifications
    }

    /// Kills the worker. The reader then reports a transport failure unless
    /// a terminal message already arrived.
    pub fn kill(&mut self) {
        self.process.kill();
    }

    pub async fn wait_exit(&mut self, timeout: Duration) -> Result<Option<i32>, RunnerError> {
        self.process.wait_exit(timeout).await
    }

    /// Joins the reader and reaps the worker, both bounded by the kill
    /// grace period. A worker that lingers after its reader finished is
    /// killed.
    pub async fn finish(mut self) -> Result<InvocationReport, RunnerError> {
        let grace = self.kill_grace;
        let report = match self.reader.take() {
            Some(reader) => match reader.join(grace).await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(target: "pkgpilot.runner", invocation = %self.invocation_id, error = %e, "reader did not finish");
                    self.process.kill();
                    None
                }
            },
            None => None,
        };

        let exit_code = match self.process.wait_exit(grace).await {
            Ok(code) => code,
            Err(_) => {
                tracing::warn!(target: "pkgpilot.runner", invocation = %self.invocation_id, "worker lingering after end of stream, killing");
                self.process.kill();
                self.process.wait_exit(grace).await?
            }
        };

        let (outcome, violations) = match report {
            Some(report) => (report.outcome, report.violations),
            None => (None, 0),
        };
        let outcome = match outcome {
            Some(Outcome::TransportFailure { .. }) | None if self.cancelled => Outcome::Cancelled,
            Some(Outcome::TransportFailure { exit_code: None }) | None => {
                Outcome::TransportFailure { exit_code }
            }
            Some(outcome) => outcome,
        };

        tracing::info!(
            target: "pkgpilot.runner",
            invocation = %self.invocation_id,
            exit_code = ?exit_code,
            success = outcome.is_success(),
            "invocation finished"
        );

        Ok(InvocationReport {
            invocation_id: self.invocation_id.clone(),
            outcome,
            exit_code,
            violations,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
        })
    }
}

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use crate::config::AppConfig;
use crate::error::RunnerError;

use super::exit::normalize_exit;

/// Which entry point the worker process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// One invocation, parameters read from stdin.
    Run { invocation: String },
    /// Persistent query server, requests read from stdin line by line.
    Serve { session: String },
}

impl WorkerMode {
    fn args(&self) -> [&str; 4] {
        match self {
            WorkerMode::Run { invocation } => ["worker", "run", "--invocation", invocation.as_str()],
            WorkerMode::Serve { session } => ["worker", "serve", "--session", session.as_str()],
        }
    }

    fn id(&self) -> &str {
        match self {
            WorkerMode::Run { invocation } => invocation,
            WorkerMode::Serve { session } => session,
        }
    }
}

/// How to launch a worker: the executable, the arguments that precede the
/// worker subcommand, and the tool namespace to keep out of its
/// environment.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
    tool_env_prefix: String,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, tool_env_prefix: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            tool_env_prefix: tool_env_prefix.into(),
        }
    }

    /// `runner.worker_bin` when configured, otherwise the running executable.
    pub fn resolve(cfg: &AppConfig) -> Result<Self, RunnerError> {
        let program = match &cfg.runner.worker_bin {
            Some(bin) => PathBuf::from(bin),
            None => std::env::current_exe().map_err(RunnerError::WorkerProgram)?,
        };
        Ok(Self::new(program, cfg.worker.tool_env_prefix.clone()))
    }

    /// Arguments placed before `worker ...`, e.g. `--config <path>`.
    pub fn leading_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn command(&self, mode: &WorkerMode) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(mode.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.tool_env_prefix.is_empty() {
            for (key, _) in std::env::vars_os() {
                if key.to_string_lossy().starts_with(&self.tool_env_prefix) {
                    cmd.env_remove(&key);
                }
            }
        }
        cmd.env("RUST_BACKTRACE", "1");
        cmd
    }

    pub fn spawn(&self, mode: WorkerMode) -> Result<WorkerProcess, RunnerError> {
        let mut child = self.command(&mode).spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(
            target: "pkgpilot.runner",
            pid = ?pid,
            id = %mode.id(),
            program = %self.program.display(),
            "worker spawned"
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, pid));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, pid, kill_rx, exit_tx));

        Ok(WorkerProcess {
            pid,
            stdin,
            stdout,
            kill_tx: Some(kill_tx),
            exit_rx,
        })
    }
}

/// A spawned worker. The child itself is owned by a supervisor task that
/// reaps it and publishes its exit code. Dropping this handle kills the
/// worker if it is still running.
pub struct WorkerProcess {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl WorkerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin, RunnerError> {
        self.stdin.take().ok_or(RunnerError::MissingPipe("stdin"))
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout, RunnerError> {
        self.stdout.take().ok_or(RunnerError::MissingPipe("stdout"))
    }

    /// Receives `Some(code)` once the worker has exited.
    pub fn exit_signal(&self) -> watch::Receiver<Option<i32>> {
        self.exit_rx.clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    /// Hard cancellation. Has no effect once the worker has exited.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Waits up to `timeout` for the worker to exit. `Ok(None)` means it was
    /// reaped without a usable status.
    pub async fn wait_exit(&mut self, timeout: Duration) -> Result<Option<i32>, RunnerError> {
        let mut rx = self.exit_rx.clone();
        let wait = async move {
            loop {
                if let Some(code) = *rx.borrow_and_update() {
                    return Some(code);
                }
                if rx.changed().await.is_err() {
                    return *rx.borrow();
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| RunnerError::ExitTimeout {
                ms: timeout.as_millis() as u64,
            })
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.exit_code().is_none() {
            self.kill();
        }
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<i32>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = kill_rx => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            tracing::info!(target: "pkgpilot.runner", pid = ?pid, "killing worker");
            if let Err(e) = child.start_kill() {
                tracing::warn!(target: "pkgpilot.runner", pid = ?pid, error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => {
            let code = normalize_exit(status);
            tracing::debug!(target: "pkgpilot.runner", pid = ?pid, exit_code = code, "worker exited");
            let _ = exit_tx.send(Some(code));
        }
        Err(e) => {
            // Dropping the sender without a value tells waiters the status is unknown.
            tracing::error!(target: "pkgpilot.runner", pid = ?pid, error = %e, "failed to reap worker");
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "pkgpilot.worker", pid = ?pid, "{line}");
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "pkgpilot.worker", pid = ?pid, error = %e, "worker stderr closed");
                break;
            }
        }
    }
}

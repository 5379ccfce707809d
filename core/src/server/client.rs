use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::FrameReader;
use crate::config::ServerConfig;
use crate::error::QueryError;
use crate::reader::{
    CloseReason, Notification, Outcome, ReaderHandle, ReaderMode, ReaderOptions, ReplyReader,
};
use crate::runner::{WorkerCommand, WorkerMode, WorkerProcess};

use super::QueryRequest;

/// Result of one query together with the output it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryReply {
    pub outcome: Outcome,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub log: Vec<String>,
}

/// Output seen since the last terminal message.
#[derive(Debug, Default)]
struct PendingOutput {
    stdout: Vec<String>,
    stderr: Vec<String>,
    log: Vec<String>,
}

type RequestWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Controller-side handle on a persistent query server.
///
/// Replies are matched to requests by position: the server answers in
/// request order, so the n-th terminal message belongs to the n-th request.
pub struct QueryClient {
    session: String,
    cfg: ServerConfig,
    writer: Option<RequestWriter>,
    process: Option<WorkerProcess>,
    reader: Option<ReaderHandle>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    sent: u64,
    acked: u64,
    completed: u64,
    current: PendingOutput,
    closed: Option<CloseReason>,
}

impl QueryClient {
    /// Spawns `<worker> worker serve` and attaches a stream-mode reader to it.
    pub async fn start(
        command: &WorkerCommand,
        cfg: ServerConfig,
        drain_grace: Duration,
    ) -> Result<Self, QueryError> {
        let session = Uuid::new_v4().to_string();
        let mut process = command.spawn(WorkerMode::Serve {
            session: session.clone(),
        })?;
        let stdin = process.take_stdin()?;
        let stdout = process.take_stdout()?;
        let opts = ReaderOptions::new(ReaderMode::Stream, session.clone())
            .exit_signal(process.exit_signal())
            .drain_grace(drain_grace);

        tracing::info!(target: "pkgpilot.server", session = %session, pid = ?process.pid(), "query server spawned");
        let mut client = Self::connect(session, cfg, Box::new(stdin), BufReader::new(stdout), opts);
        client.process = Some(process);
        Ok(client)
    }

    /// Attaches to an already running server over arbitrary pipes.
    pub fn connect<R>(
        session: String,
        cfg: ServerConfig,
        writer: RequestWriter,
        replies: R,
        opts: ReaderOptions,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (reader, notifications) = ReplyReader::spawn(FrameReader::new(replies), opts);
        Self {
            session,
            cfg,
            writer: Some(writer),
            process: None,
            reader: Some(reader),
            notifications,
            sent: 0,
            acked: 0,
            completed: 0,
            current: PendingOutput::default(),
            closed: None,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(WorkerProcess::pid)
    }

    /// Writes one request and returns its sequence number without waiting.
    pub async fn send(&mut self, request: &QueryRequest) -> Result<u64, QueryError> {
        if let Some(reason) = &self.closed {
            return Err(self.gone(reason.clone()));
        }
        let mut line = request.encode()?;
        line.push('\n');
        let writer = self.writer.as_mut().ok_or(QueryError::ServerGone {
            exit_code: None,
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(QueryError::Write)?;
        writer.flush().await.map_err(QueryError::Write)?;
        self.sent += 1;
        tracing::debug!(target: "pkgpilot.server", session = %self.session, seq = self.sent, command = %request.command, "request sent");
        Ok(self.sent)
    }

    /// Sends `request` and waits until the server has consumed it. The reply
    /// itself is discarded.
    pub async fn send_join(&mut self, request: &QueryRequest) -> Result<u64, QueryError> {
        let seq = self.send(request).await?;
        let timeout = Duration::from_millis(self.cfg.request_timeout_ms);
        self.bounded(timeout, |client| client.acked >= seq).await?;
        Ok(seq)
    }

    /// Sends `request` and returns its reply, bounded by
    /// `server.request_timeout_ms`.
    pub async fn query(&mut self, request: &QueryRequest) -> Result<QueryReply, QueryError> {
        let seq = self.send(request).await?;
        let ms = self.cfg.request_timeout_ms;
        tokio::time::timeout(Duration::from_millis(ms), self.await_reply(seq))
            .await
            .map_err(|_| QueryError::Timeout { ms })?
    }

    /// Sends `end`, waits for the server to acknowledge it and exit, and
    /// returns its exit code. A server that does not exit within
    /// `server.shutdown_timeout_ms` is killed.
    pub async fn shutdown(mut self) -> Result<Option<i32>, QueryError> {
        let timeout = Duration::from_millis(self.cfg.shutdown_timeout_ms);

        if self.closed.is_none() {
            match self.send(&QueryRequest::shutdown()).await {
                Ok(seq) => {
                    let acked = self
                        .bounded(timeout, |client| {
                            client.acked >= seq && client.closed.is_some()
                        })
                        .await;
                    if let Err(e) = acked {
                        tracing::warn!(target: "pkgpilot.server", session = %self.session, error = %e, "server did not acknowledge shutdown");
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "pkgpilot.server", session = %self.session, error = %e, "could not send shutdown request");
                }
            }
        }
        // Closing stdin also stops a server that missed the request.
        self.writer = None;

        if let Some(reader) = self.reader.take() {
            if self.closed.is_none() {
                reader.stop();
            }
            if let Err(e) = reader.join(timeout).await {
                tracing::warn!(target: "pkgpilot.server", session = %self.session, error = %e, "reader did not finish");
            }
        }

        let Some(mut process) = self.process.take() else {
            return Ok(None);
        };
        let exit_code = match process.wait_exit(timeout).await {
            Ok(code) => code,
            Err(_) => {
                tracing::warn!(target: "pkgpilot.server", session = %self.session, "query server did not exit, killing");
                process.kill();
                process
                    .wait_exit(timeout)
                    .await
                    .map_err(|_| QueryError::Timeout {
                        ms: self.cfg.shutdown_timeout_ms,
                    })?
            }
        };
        tracing::info!(target: "pkgpilot.server", session = %self.session, exit_code = ?exit_code, "query server stopped");
        Ok(exit_code)
    }

    async fn await_reply(&mut self, seq: u64) -> Result<QueryReply, QueryError> {
        loop {
            if let Some(reason) = &self.closed {
                return Err(self.gone(reason.clone()));
            }
            let notification = self.next_notification().await?;
            if let Some((n, reply)) = self.absorb(notification) {
                if n == seq {
                    return Ok(reply);
                }
                tracing::debug!(target: "pkgpilot.server", seq = n, "discarding reply of an earlier request");
            }
        }
    }

    async fn bounded<F>(&mut self, timeout: Duration, done: F) -> Result<(), QueryError>
    where
        F: Fn(&Self) -> bool,
    {
        let ms = timeout.as_millis() as u64;
        tokio::time::timeout(timeout, async {
            while !done(&*self) {
                if let Some(reason) = &self.closed {
                    return Err(self.gone(reason.clone()));
                }
                let notification = self.next_notification().await?;
                self.absorb(notification);
            }
            Ok::<(), QueryError>(())
        })
        .await
        .map_err(|_| QueryError::Timeout { ms })?
    }

    async fn next_notification(&mut self) -> Result<Notification, QueryError> {
        match self.notifications.recv().await {
            Some(notification) => Ok(notification),
            None => {
                let reason = CloseReason::TransportLost { exit_code: None };
                self.closed = Some(reason.clone());
                Err(self.gone(reason))
            }
        }
    }

    /// Folds one notification into the client's bookkeeping. Returns the
    /// reply when it completes a request.
    fn absorb(&mut self, notification: Notification) -> Option<(u64, QueryReply)> {
        match notification {
            Notification::Stdout(text) => self.current.stdout.push(text),
            Notification::Stderr(text) => self.current.stderr.push(text),
            Notification::Log(text) => self.current.log.push(text),
            Notification::Complete(outcome) => {
                self.completed += 1;
                let output = std::mem::take(&mut self.current);
                let reply = QueryReply {
                    outcome,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    log: output.log,
                };
                return Some((self.completed, reply));
            }
            Notification::Ack(seq) => self.acked = self.acked.max(seq),
            Notification::Closed(reason) => {
                tracing::debug!(target: "pkgpilot.server", session = %self.session, reason = ?reason, "reply channel closed");
                self.closed = Some(reason);
            }
        }
        None
    }

    fn gone(&self, reason: CloseReason) -> QueryError {
        match reason {
            CloseReason::Contaminated { expected, found } => {
                QueryError::Contaminated { expected, found }
            }
            CloseReason::TransportLost { exit_code } => QueryError::ServerGone { exit_code },
            CloseReason::End | CloseReason::Stopped => QueryError::ServerGone {
                exit_code: self.process.as_ref().and_then(WorkerProcess::exit_code),
            },
        }
    }
}

//! Controller-side consumer of a worker channel.
//!
//! A reader runs on its own task, turns frames into [`Notification`]s and
//! hands them to the controller through an unbounded queue. It stops on
//! `End`, on an explicit [`ReaderHandle::stop`], on contamination, or when
//! the worker goes away, whichever comes first.

mod notify;

use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::FrameReader;
use crate::error::{ProtocolError, ReaderError};
use crate::protocol::{Decoded, Frame, Message};

pub use notify::{
    dispatch, pump, pump_blocking, CloseReason, CollectingHandler, Notification, Outcome,
    ReplyHandler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    /// One invocation per channel: the first terminal message wins.
    OneShot,
    /// Many requests per channel: every terminal completes one request.
    Stream,
}

pub struct ReaderOptions {
    pub mode: ReaderMode,
    /// Invocation (or server session) id every frame must carry.
    pub expected: String,
    /// Publishes the worker's exit code once it has exited.
    pub exit: Option<watch::Receiver<Option<i32>>>,
    /// How long to keep reading buffered frames after the worker exits.
    pub drain_grace: Duration,
}

impl ReaderOptions {
    pub fn new(mode: ReaderMode, expected: impl Into<String>) -> Self {
        Self {
            mode,
            expected: expected.into(),
            exit: None,
            drain_grace: Duration::from_millis(500),
        }
    }

    pub fn exit_signal(mut self, exit: watch::Receiver<Option<i32>>) -> Self {
        self.exit = Some(exit);
        self
    }

    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReaderReport {
    /// Final result in one-shot mode; `None` in stream mode.
    pub outcome: Option<Outcome>,
    pub close: CloseReason,
    pub terminals: u64,
    pub violations: u64,
}

pub struct ReaderHandle {
    stop_tx: mpsc::UnboundedSender<Message>,
    task: JoinHandle<ReaderReport>,
}

impl ReaderHandle {
    /// Feeds a synthetic `End` into the reader so its loop exits even when
    /// nothing is in flight.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(Message::End);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the reader to finish. Elapsing `timeout` is reported as
    /// [`ReaderError::Timeout`] and the reader task is aborted.
    pub async fn join(mut self, timeout: Duration) -> Result<ReaderReport, ReaderError> {
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(ReaderError::Join(e.to_string())),
            Err(_) => {
                self.task.abort();
                Err(ReaderError::Timeout {
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

pub struct ReplyReader;

impl ReplyReader {
    pub fn spawn<R>(
        frames: FrameReader<R>,
        opts: ReaderOptions,
    ) -> (ReaderHandle, mpsc::UnboundedReceiver<Notification>)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let state = ReaderState {
            mode: opts.mode,
            expected: opts.expected,
            tx,
            terminal: None,
            terminals: 0,
            violations: 0,
        };
        let task = tokio::spawn(read_loop(frames, state, stop_rx, opts.exit, opts.drain_grace));
        (ReaderHandle { stop_tx, task }, rx)
    }
}

struct ReaderState {
    mode: ReaderMode,
    expected: String,
    tx: mpsc::UnboundedSender<Notification>,
    terminal: Option<Outcome>,
    terminals: u64,
    violations: u64,
}

enum Step {
    Continue,
    Close(CloseReason),
}

impl ReaderState {
    fn notify(&self, notification: Notification) {
        // The controller may have stopped listening; keep draining anyway so
        // the worker never blocks on a full pipe.
        let _ = self.tx.send(notification);
    }

    fn violation(&mut self, detail: &str) {
        self.violations += 1;
        tracing::warn!(target: "pkgpilot.reader", expected = %self.expected, "protocol violation: {detail}");
    }

    fn check_invocation(&self, found: &str) -> Step {
        if found == self.expected {
            Step::Continue
        } else {
            tracing::error!(
                target: "pkgpilot.reader",
                expected = %self.expected,
                found = %found,
                "frame from another invocation on this channel"
            );
            Step::Close(CloseReason::Contaminated {
                expected: self.expected.clone(),
                found: found.to_string(),
            })
        }
    }

    fn handle(&mut self, decoded: Result<Decoded, ProtocolError>) -> Step {
        match decoded {
            Ok(Decoded::Frame(Frame::Ack { seq })) => {
                self.notify(Notification::Ack(seq));
                Step::Continue
            }
            Ok(Decoded::Frame(Frame::Message {
                invocation,
                message,
            })) => match self.check_invocation(&invocation) {
                Step::Continue => self.handle_message(message),
                close => close,
            },
            Ok(Decoded::UnknownMessage {
                invocation,
                type_name,
            }) => match self.check_invocation(&invocation) {
                Step::Continue => {
                    self.violation(&format!("unknown message type {type_name:?} ignored"));
                    Step::Continue
                }
                close => close,
            },
            Ok(Decoded::UnknownFrame(tag)) => {
                self.violation(&format!("unknown frame {tag:?} ignored"));
                Step::Continue
            }
            Err(e) => {
                self.violation(&format!("undecodable line ignored: {e}"));
                Step::Continue
            }
        }
    }

    fn handle_message(&mut self, message: Message) -> Step {
        if self.mode == ReaderMode::OneShot && self.terminal.is_some() && message != Message::End {
            self.violation(&format!(
                "{} message after terminal message ignored",
                message.type_name()
            ));
            return Step::Continue;
        }

        match message {
            Message::Stdout { text } => self.notify(Notification::Stdout(text)),
            Message::Stderr { text } => self.notify(Notification::Stderr(text)),
            Message::LogLine { text } => self.notify(Notification::Log(text)),
            Message::Success { payload } => self.complete(Outcome::Success(payload)),
            Message::Failure(report) => self.complete(Outcome::Failure(report)),
            Message::End => return Step::Close(CloseReason::End),
        }
        Step::Continue
    }

    fn complete(&mut self, outcome: Outcome) {
        self.terminals += 1;
        if self.mode == ReaderMode::OneShot {
            self.terminal = Some(outcome.clone());
        }
        self.notify(Notification::Complete(outcome));
    }

    fn finish(mut self, close: CloseReason) -> ReaderReport {
        let outcome = match self.mode {
            ReaderMode::Stream => None,
            ReaderMode::OneShot => Some(match self.terminal.take() {
                Some(outcome) => outcome,
                None => {
                    let outcome = match &close {
                        CloseReason::End => {
                            self.violation("end of stream without a terminal message");
                            Outcome::TransportFailure { exit_code: None }
                        }
                        CloseReason::Stopped => Outcome::Cancelled,
                        CloseReason::TransportLost { exit_code } => Outcome::TransportFailure {
                            exit_code: *exit_code,
                        },
                        CloseReason::Contaminated { expected, found } => Outcome::Contaminated {
                            expected: expected.clone(),
                            found: found.clone(),
                        },
                    };
                    self.notify(Notification::Complete(outcome.clone()));
                    outcome
                }
            }),
        };
        self.notify(Notification::Closed(close.clone()));
        tracing::debug!(
            target: "pkgpilot.reader",
            expected = %self.expected,
            close = ?close,
            violations = self.violations,
            "reader finished"
        );
        ReaderReport {
            outcome,
            close,
            terminals: self.terminals,
            violations: self.violations,
        }
    }
}

enum Event {
    Stop,
    Frame(std::io::Result<Option<Result<Decoded, ProtocolError>>>),
    Exited(Option<i32>),
}

async fn read_loop<R>(
    mut frames: FrameReader<R>,
    mut state: ReaderState,
    mut stop_rx: mpsc::UnboundedReceiver<Message>,
    mut exit: Option<watch::Receiver<Option<i32>>>,
    drain_grace: Duration,
) -> ReaderReport
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let watching_exit = exit.is_some();
    let close = loop {
        let event = tokio::select! {
            biased;
            Some(_) = stop_rx.recv() => Event::Stop,
            next = frames.next() => Event::Frame(next),
            code = wait_exit(&mut exit), if watching_exit => Event::Exited(code),
        };

        match event {
            Event::Stop => {
                tracing::debug!(target: "pkgpilot.reader", expected = %state.expected, "reader stopped");
                break CloseReason::Stopped;
            }
            Event::Frame(Ok(Some(decoded))) => {
                if let Step::Close(reason) = state.handle(decoded) {
                    break reason;
                }
            }
            Event::Frame(Ok(None)) => {
                let exit_code = match exit.as_mut() {
                    Some(rx) => tokio::time::timeout(drain_grace, exited(rx))
                        .await
                        .ok()
                        .flatten(),
                    None => None,
                };
                break CloseReason::TransportLost { exit_code };
            }
            Event::Frame(Err(e)) => {
                tracing::warn!(target: "pkgpilot.reader", error = %e, "channel read failed");
                break CloseReason::TransportLost { exit_code: None };
            }
            Event::Exited(code) => {
                tracing::debug!(target: "pkgpilot.reader", exit_code = ?code, "worker exited, draining channel");
                break drain(&mut frames, &mut state, drain_grace)
                    .await
                    .unwrap_or(CloseReason::TransportLost { exit_code: code });
            }
        }
    };
    state.finish(close)
}

/// Reads whatever the worker left in the pipe after it exited.
async fn drain<R>(
    frames: &mut FrameReader<R>,
    state: &mut ReaderState,
    grace: Duration,
) -> Option<CloseReason>
where
    R: AsyncBufRead + Unpin,
{
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, frames.next()).await {
            Ok(Ok(Some(decoded))) => {
                if let Step::Close(reason) = state.handle(decoded) {
                    return Some(reason);
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => return None,
        }
    }
}

async fn wait_exit(exit: &mut Option<watch::Receiver<Option<i32>>>) -> Option<i32> {
    match exit.as_mut() {
        Some(rx) => exited(rx).await,
        None => std::future::pending().await,
    }
}

async fn exited(rx: &mut watch::Receiver<Option<i32>>) -> Option<i32> {
    loop {
        if let Some(code) = *rx.borrow_and_update() {
            return Some(code);
        }
        if rx.changed().await.is_err() {
            return *rx.borrow();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageSink;
    use crate::protocol::{encode_frame, FailureReport};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

    const WAIT: Duration = Duration::from_secs(5);

    fn reader(
        client: DuplexStream,
        mode: ReaderMode,
        expected: &str,
    ) -> (ReaderHandle, mpsc::UnboundedReceiver<Notification>) {
        ReplyReader::spawn(
            FrameReader::new(BufReader::new(client)),
            ReaderOptions::new(mode, expected),
        )
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<Notification>) -> CollectingHandler {
        let mut handler = CollectingHandler::default();
        tokio::time::timeout(WAIT, pump(rx, &mut handler))
            .await
            .expect("reader closed in time");
        handler
    }

    #[tokio::test]
    async fn one_shot_stream_is_forwarded_in_order() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::OneShot, "inv");
        let sink = MessageSink::spawn("inv", server);
        sink.send(Message::stdout("a")).unwrap();
        sink.send(Message::log("b")).unwrap();
        sink.send(Message::stderr("c")).unwrap();
        sink.send(Message::success(json!([1, 2]))).unwrap();
        sink.send(Message::End).unwrap();
        sink.close().await;

        let seen = collect(&mut rx).await;
        assert_eq!(seen.stdout, vec!["a"]);
        assert_eq!(seen.log, vec!["b"]);
        assert_eq!(seen.stderr, vec!["c"]);
        assert_eq!(seen.outcomes, vec![Outcome::Success(json!([1, 2]))]);
        assert_eq!(seen.closed, Some(CloseReason::End));

        let report = handle.join(WAIT).await.unwrap();
        assert_eq!(report.outcome, Some(Outcome::Success(json!([1, 2]))));
        assert_eq!(report.violations, 0);
    }

    #[tokio::test]
    async fn first_terminal_wins_and_later_messages_are_violations() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::OneShot, "inv");
        let sink = MessageSink::spawn("inv", server);
        sink.send(Message::success(json!("first"))).unwrap();
        sink.send(Message::Failure(FailureReport::new("late", "late"))).unwrap();
        sink.send(Message::stdout("late output")).unwrap();
        sink.send(Message::End).unwrap();
        sink.close().await;

        let seen = collect(&mut rx).await;
        assert_eq!(seen.outcomes, vec![Outcome::Success(json!("first"))]);
        assert!(seen.stdout.is_empty());

        let report = handle.join(WAIT).await.unwrap();
        assert_eq!(report.violations, 2);
        assert_eq!(report.terminals, 1);
    }

    #[tokio::test]
    async fn unknown_types_and_garbage_are_skipped() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::OneShot, "inv");
        server
            .write_all(b"{\"frame\":\"message\",\"invocation\":\"inv\",\"message\":{\"type\":\"progress\"}}\n")
            .await
            .unwrap();
        server.write_all(b"not json at all\n").await.unwrap();
        let end = encode_frame(&Frame::message("inv", Message::success(json!(null)))).unwrap();
        server.write_all(end.as_bytes()).await.unwrap();
        let end = encode_frame(&Frame::message("inv", Message::End)).unwrap();
        server.write_all(end.as_bytes()).await.unwrap();

        let seen = collect(&mut rx).await;
        assert_eq!(seen.outcomes, vec![Outcome::Success(json!(null))]);
        let report = handle.join(WAIT).await.unwrap();
        assert_eq!(report.violations, 2);
    }

    #[tokio::test]
    async fn eof_without_terminal_is_a_transport_failure() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::OneShot, "inv");
        let sink = MessageSink::spawn("inv", server);
        sink.send(Message::stdout("partial work")).unwrap();
        sink.close().await;

        let seen = collect(&mut rx).await;
        assert_eq!(
            seen.outcomes,
            vec![Outcome::TransportFailure { exit_code: None }]
        );
        assert_eq!(
            seen.closed,
            Some(CloseReason::TransportLost { exit_code: None })
        );
        handle.join(WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn exit_signal_ends_reader_even_if_pipe_stays_open() {
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (handle, mut rx) = ReplyReader::spawn(
            FrameReader::new(BufReader::new(client)),
            ReaderOptions::new(ReaderMode::OneShot, "inv")
                .exit_signal(exit_rx)
                .drain_grace(Duration::from_millis(50)),
        );
        exit_tx.send(Some(137)).unwrap();

        let seen = collect(&mut rx).await;
        assert_eq!(
            seen.outcomes,
            vec![Outcome::TransportFailure {
                exit_code: Some(137)
            }]
        );
        handle.join(WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn frames_from_another_invocation_are_fatal() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::OneShot, "current");
        let stale = MessageSink::spawn("previous", server);
        stale.send(Message::stdout("left over")).unwrap();
        stale.send(Message::success(json!(1))).unwrap();

        let seen = collect(&mut rx).await;
        assert!(seen.stdout.is_empty());
        assert_eq!(
            seen.outcomes,
            vec![Outcome::Contaminated {
                expected: "current".into(),
                found: "previous".into()
            }]
        );
        let report = handle.join(WAIT).await.unwrap();
        assert!(matches!(report.close, CloseReason::Contaminated { .. }));
        stale.close().await;
    }

    #[tokio::test]
    async fn stop_exits_idle_reader() {
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::Stream, "session");
        handle.stop();
        let seen = collect(&mut rx).await;
        assert_eq!(seen.closed, Some(CloseReason::Stopped));
        let report = handle.join(WAIT).await.unwrap();
        assert_eq!(report.outcome, None);
    }

    #[tokio::test]
    async fn stop_before_result_cancels_one_shot() {
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::OneShot, "inv");
        handle.stop();
        let seen = collect(&mut rx).await;
        assert_eq!(seen.outcomes, vec![Outcome::Cancelled]);
    }

    #[tokio::test]
    async fn stream_mode_completes_every_request() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (handle, mut rx) = reader(client, ReaderMode::Stream, "session");
        let sink = MessageSink::spawn("session", server);
        for i in 0..3u64 {
            sink.send(Message::success(json!(i))).unwrap();
            sink.ack(i + 1).unwrap();
        }
        sink.send(Message::End).unwrap();
        sink.close().await;

        let seen = collect(&mut rx).await;
        assert_eq!(
            seen.outcomes,
            (0..3u64).map(|i| Outcome::Success(json!(i))).collect::<Vec<_>>()
        );
        assert_eq!(seen.acks, vec![1, 2, 3]);
        let report = handle.join(WAIT).await.unwrap();
        assert_eq!(report.terminals, 3);
        assert_eq!(report.violations, 0);
    }

    #[tokio::test]
    async fn join_times_out_distinctly() {
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let (handle, _rx) = reader(client, ReaderMode::OneShot, "inv");
        let err = handle.join(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ReaderError::Timeout { ms: 20 }));
    }
}

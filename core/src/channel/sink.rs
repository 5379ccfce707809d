use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::protocol::{encode_frame, Frame, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message channel closed")]
pub struct ChannelClosed;

enum SinkCommand {
    Frame(Frame),
    Close(oneshot::Sender<()>),
}

/// Writing end of a message channel.
///
/// Frames are queued and written by a dedicated task, one JSON line each,
/// flushed as they go. `close` waits until everything queued before it has
/// been written.
#[derive(Clone)]
pub struct MessageSink {
    invocation: Arc<str>,
    tx: mpsc::UnboundedSender<SinkCommand>,
    writer: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl MessageSink {
    pub fn spawn<W>(invocation: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<SinkCommand>();
        let handle = tokio::spawn(write_frames(writer, rx));
        Self {
            invocation: Arc::from(invocation.into()),
            tx,
            writer: Arc::new(std::sync::Mutex::new(Some(handle))),
        }
    }

    pub fn invocation(&self) -> &str {
        &self.invocation
    }

    pub fn send(&self, message: Message) -> Result<(), ChannelClosed> {
        let frame = Frame::message(self.invocation.as_ref(), message);
        self.tx
            .send(SinkCommand::Frame(frame))
            .map_err(|_| ChannelClosed)
    }

    pub fn ack(&self, seq: u64) -> Result<(), ChannelClosed> {
        self.tx
            .send(SinkCommand::Frame(Frame::Ack { seq }))
            .map_err(|_| ChannelClosed)
    }

    /// Closes the channel for writing and waits for pending frames to flush.
    /// Later sends on any clone fail with [`ChannelClosed`].
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(SinkCommand::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let handle = self.writer.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn write_frames<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<SinkCommand>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut broken = false;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SinkCommand::Frame(frame) => {
                if broken {
                    continue;
                }
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(target: "pkgpilot.channel", error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &line).await {
                    // Reader is gone; keep draining so senders never block.
                    tracing::warn!(target: "pkgpilot.channel", error = %e, "channel write failed");
                    broken = true;
                }
            }
            SinkCommand::Close(done) => {
                rx.close();
                // Frames that raced the close are still delivered.
                while let Ok(SinkCommand::Frame(frame)) = rx.try_recv() {
                    if broken {
                        break;
                    }
                    if let Ok(line) = encode_frame(&frame) {
                        broken = write_line(&mut writer, &line).await.is_err();
                    }
                }
                let _ = writer.flush().await;
                let _ = writer.shutdown().await;
                let _ = done.send(());
                return;
            }
        }
    }
    let _ = writer.flush().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

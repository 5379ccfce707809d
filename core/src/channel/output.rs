use std::fmt;
use std::sync::Arc;

use super::sink::{ChannelClosed, MessageSink};
use crate::protocol::{Message, StreamKind};

/// Line-buffered text stream over a [`MessageSink`].
///
/// Partial writes accumulate until a line terminator arrives; each complete
/// line becomes one message without its terminator. Whatever is left when
/// the stream finishes (or drops) goes out as a final message.
pub struct OutputStream {
    kind: StreamKind,
    sink: MessageSink,
    pending: String,
}

impl OutputStream {
    pub fn new(kind: StreamKind, sink: MessageSink) -> Self {
        Self {
            kind,
            sink,
            pending: String::new(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn write_text(&mut self, text: &str) -> Result<(), ChannelClosed> {
        self.pending.push_str(text);
        while let Some(pos) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.sink.send(self.kind.message(line))?;
        }
        Ok(())
    }

    pub fn line(&mut self, text: &str) -> Result<(), ChannelClosed> {
        self.write_text(text)?;
        self.write_text("\n")
    }

    pub fn finish(&mut self) -> Result<(), ChannelClosed> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.pending);
        self.sink.send(self.kind.message(rest))
    }
}

impl fmt::Write for OutputStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_text(s).map_err(|_| fmt::Error)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Per-invocation logger. Lines go to the channel as `LogLine` messages and
/// are mirrored to `tracing` in the worker process.
#[derive(Clone)]
pub struct InvocationLog {
    sink: MessageSink,
    operation: Arc<str>,
}

impl InvocationLog {
    pub fn new(sink: MessageSink, operation: &str) -> Self {
        Self {
            sink,
            operation: Arc::from(operation),
        }
    }

    pub fn info(&self, msg: &str) {
        tracing::info!(target: "pkgpilot.invocation", operation = %self.operation, "{msg}");
        self.emit("INFO", msg);
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(target: "pkgpilot.invocation", operation = %self.operation, "{msg}");
        self.emit("WARN", msg);
    }

    pub fn error(&self, msg: &str) {
        tracing::error!(target: "pkgpilot.invocation", operation = %self.operation, "{msg}");
        self.emit("ERROR", msg);
    }

    fn emit(&self, level: &str, msg: &str) {
        let ts = chrono::Local::now().format("%H:%M:%S");
        for line in msg.lines() {
            let _ = self
                .sink
                .send(Message::log(format!("{ts} {level:<5} {line}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use super::*;
    use crate::channel::FrameReader;
    use crate::protocol::{Decoded, Frame};
    use pretty_assertions::assert_eq;
    use tokio::io::BufReader;

    async fn collect(client: tokio::io::DuplexStream) -> Vec<Message> {
        let mut reader = FrameReader::new(BufReader::new(client));
        let mut out = Vec::new();
        while let Some(decoded) = reader.next().await.unwrap() {
            if let Decoded::Frame(Frame::Message { message, .. }) = decoded.unwrap() {
                out.push(message);
            }
        }
        out
    }

    #[tokio::test]
    async fn partial_writes_coalesce_into_one_line() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink = MessageSink::spawn("inv", server);
        {
            let mut out = OutputStream::new(StreamKind::Stdout, sink.clone());
            out.write_text("abc").unwrap();
            out.write_text("def\n").unwrap();
        }
        sink.close().await;
        assert_eq!(collect(client).await, vec![Message::stdout("abcdef")]);
    }

    #[tokio::test]
    async fn crlf_and_multiple_lines_split_correctly() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink = MessageSink::spawn("inv", server);
        {
            let mut err = OutputStream::new(StreamKind::Stderr, sink.clone());
            write!(err, "one\r\ntwo\n\nthr").unwrap();
            err.write_text("ee").unwrap();
            err.finish().unwrap();
        }
        sink.close().await;
        assert_eq!(
            collect(client).await,
            vec![
                Message::stderr("one"),
                Message::stderr("two"),
                Message::stderr(""),
                Message::stderr("three"),
            ]
        );
    }

    #[tokio::test]
    async fn log_lines_are_stamped_and_split() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink = MessageSink::spawn("inv", server);
        InvocationLog::new(sink.clone(), "install").warn("first\nsecond");
        sink.close().await;

        let msgs = collect(client).await;
        assert_eq!(msgs.len(), 2);
        for (msg, expected) in msgs.iter().zip(["first", "second"]) {
            match msg {
                Message::LogLine { text } => {
                    assert!(text.contains("WARN"));
                    assert!(text.ends_with(expected));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}

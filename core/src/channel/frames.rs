use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::error::ProtocolError;
use crate::protocol::{decode_frame, Decoded};

/// Reading end of a message channel.
pub struct FrameReader<R> {
    lines: Lines<R>,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Next decoded line. `Ok(None)` means the writer is gone.
    /// Blank lines are skipped.
    pub async fn next(&mut self) -> std::io::Result<Option<Result<Decoded, ProtocolError>>> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) => {
                    let trimmed = line.trim_end_matches('\r');
                    if trimmed.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(decode_frame(trimmed)));
                }
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Message;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Message { invocation: String, message: Message },
    /// Request number `seq` was consumed by the query server.
    Ack { seq: u64 },
}

impl Frame {
    pub fn message(invocation: impl Into<String>, message: Message) -> Self {
        Frame::Message {
            invocation: invocation.into(),
            message,
        }
    }
}

/// Result of decoding one line. Unknown message types are surfaced instead of
/// rejected so readers can log and skip them.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Frame(Frame),
    UnknownMessage {
        invocation: String,
        type_name: String,
    },
    UnknownFrame(String),
}

pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_frame(line: &str) -> Result<Decoded, ProtocolError> {
    let raw: Value = serde_json::from_str(line).map_err(ProtocolError::InvalidJson)?;

    let frame_tag = raw.get("frame").and_then(Value::as_str);
    match frame_tag {
        Some("message") | Some("ack") => {}
        Some(other) => return Ok(Decoded::UnknownFrame(other.to_string())),
        None => return Err(ProtocolError::SchemaMismatch("missing frame tag".into())),
    }

    if frame_tag == Some("message") {
        let type_name = raw
            .get("message")
            .and_then(|m| m.get("type"))
            .and_then(Value::as_str);
        if let Some(type_name) = type_name {
            if !Message::KNOWN_TYPES.contains(&type_name) {
                let invocation = raw
                    .get("invocation")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Ok(Decoded::UnknownMessage {
                    invocation,
                    type_name: type_name.to_string(),
                });
            }
        }
    }

    serde_json::from_value::<Frame>(raw)
        .map(Decoded::Frame)
        .map_err(|e| ProtocolError::SchemaMismatch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn encoded_frame_is_single_terminated_line() {
        let frame = Frame::message("inv-1", Message::stdout("multi\nline"));
        let line = encode_frame(&frame).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(
            decode_frame(line.trim_end()).unwrap(),
            Decoded::Frame(frame)
        );
    }

    #[test]
    fn ack_frames_decode() {
        let decoded = decode_frame(r#"{"frame":"ack","seq":7}"#).unwrap();
        assert_eq!(decoded, Decoded::Frame(Frame::Ack { seq: 7 }));
    }

    #[test]
    fn unknown_message_type_is_reported_not_rejected() {
        let decoded =
            decode_frame(r#"{"frame":"message","invocation":"a","message":{"type":"progress","pct":3}}"#)
                .unwrap();
        assert_eq!(
            decoded,
            Decoded::UnknownMessage {
                invocation: "a".into(),
                type_name: "progress".into()
            }
        );
    }

    #[test]
    fn unknown_frame_tag_is_reported() {
        let decoded = decode_frame(r#"{"frame":"heartbeat"}"#).unwrap();
        assert_eq!(decoded, Decoded::UnknownFrame("heartbeat".into()));
    }

    #[test]
    fn garbage_lines_are_errors() {
        assert!(matches!(
            decode_frame("Traceback (most recent call last):"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"stdout"}"#),
            Err(ProtocolError::SchemaMismatch(_))
        ));
    }
}

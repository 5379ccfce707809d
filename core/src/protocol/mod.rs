//! Values exchanged between the controller and worker processes.
//!
//! Each channel carries newline-delimited JSON frames. A frame is either a
//! [`Message`] stamped with the invocation it belongs to, or a transport-level
//! acknowledgment used by the persistent query server.

mod frame;
mod message;

pub use frame::{decode_frame, encode_frame, Decoded, Frame};
pub use message::{FailureReport, Message, StreamKind};

//! Channel endpoints: a frame sink on the writing side, line-coalescing
//! output streams layered over it, and a frame reader on the receiving side.

mod frames;
mod output;
mod sink;

pub use frames::FrameReader;
pub use output::{InvocationLog, OutputStream};
pub use sink::{ChannelClosed, MessageSink};

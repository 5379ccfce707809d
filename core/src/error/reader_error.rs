// core/src/error/reader_error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader did not finish within {ms}ms")]
    Timeout { ms: u64 },

    #[error("reader task failed: {0}")]
    Join(String),
}

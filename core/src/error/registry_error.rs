// core/src/error/registry_error.rs
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation name is reserved: {0}")]
    Reserved(String),

    #[error("invalid operation name: {0:?}")]
    InvalidName(String),

    #[error("operation registered twice: {0}")]
    Duplicate(String),
}

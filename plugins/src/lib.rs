pub mod factory;
pub mod operations;
pub mod queries;

pub use factory::{build_operations, build_queries};

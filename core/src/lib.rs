pub mod api;
pub mod bundle;
pub mod channel;
pub mod config;
pub mod error;
pub mod harness;
pub mod operation;
pub mod protocol;
pub mod reader;
pub mod runner;
pub mod server;
pub mod worker;

pub mod cli;
pub mod query;
pub mod run;
pub mod worker;

pub mod backend;
pub mod cli;
pub mod config;
pub mod infra;
pub mod logging;
pub mod output;
pub mod secrets;

pub mod cli;
pub mod config;
pub mod model;
pub mod queue;
pub mod storage;

pub use config::Configuration;

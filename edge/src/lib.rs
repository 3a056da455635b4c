mod bench;
pub mod cli;
mod client;
pub mod config;
pub mod data;
mod error;

pub use bench::Benchmark;
pub use client::{EdgeClient, connect_with_retry, exchange, request};
pub use config::ClientConfig;
pub use error::{EdgeErr, Result};

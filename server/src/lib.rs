pub mod config;
mod error;
pub mod fleet;
mod server;
mod session;
mod signal;

pub use config::ServerConfig;
pub use error::{Result, ServerErr};
pub use server::InferenceServer;
pub use session::run_session;
pub use signal::ShutdownSignal;

use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Inference server failures, everything but `Config` stays within a session.
#[derive(Debug)]
pub enum ServerErr {
    /// The tail can't be set up: no split point, missing weights or cache.
    Configuration(MlErr),
    /// The forward pass over the tail failed.
    Compute(MlErr),
    /// The client sent a truncated or malformed frame, or one the tail can't take.
    Protocol(io::Error),
    /// The configuration file can't be read.
    Config(String),
    Io(io::Error),
}

impl ServerErr {
    /// Classifies an error raised while exchanging frames.
    ///
    /// # Arguments
    /// * `err` - The error returned by the channel.
    ///
    /// # Returns
    /// `Protocol` for truncated or malformed frames, `Io` otherwise.
    pub fn from_wire(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Self::Protocol(err),
            _ => Self::Io(err),
        }
    }

    /// Creates a `Protocol` error with the given message.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ServerErr::Protocol(_))
    }
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Configuration(e) => write!(f, "configuration error: {e}"),
            ServerErr::Compute(e) => write!(f, "compute error: {e}"),
            ServerErr::Protocol(e) => write!(f, "protocol error: {e}"),
            ServerErr::Config(msg) => write!(f, "invalid configuration file: {msg}"),
            ServerErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Configuration(e) | ServerErr::Compute(e) => Some(e),
            ServerErr::Protocol(e) | ServerErr::Io(e) => Some(e),
            ServerErr::Config(_) => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for ServerErr {
    /// Errors raised while setting the model up, forward passes map theirs
    /// to `Compute` where they run.
    fn from(value: MlErr) -> Self {
        Self::Configuration(value)
    }
}

impl From<serde_json::Error> for ServerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) | ServerErr::Protocol(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

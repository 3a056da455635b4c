use std::{error::Error, fmt, io};

use machine_learning::MlErr;

/// The edge module's result type.
pub type Result<T> = std::result::Result<T, EdgeErr>;

/// Edge client failures.
#[derive(Debug)]
pub enum EdgeErr {
    /// The model can't be set up: no split point, missing weights or cache.
    Configuration(MlErr),
    /// A forward pass failed.
    Compute(MlErr),
    /// The server answered with a truncated or malformed frame.
    Protocol(io::Error),
    /// The server address isn't of the form `host:port`.
    Address { addr: String, source: io::Error },
    /// `infer_local` was called without a full model.
    NoFullModel,
    Io(io::Error),
}

impl EdgeErr {
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

    pub fn is_protocol(&self) -> bool {
        matches!(self, EdgeErr::Protocol(_))
    }
}

impl fmt::Display for EdgeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeErr::Configuration(e) => write!(f, "configuration error: {e}"),
            EdgeErr::Compute(e) => write!(f, "compute error: {e}"),
            EdgeErr::Protocol(e) => write!(f, "protocol error: {e}"),
            EdgeErr::Address { addr, source } => {
                write!(f, "invalid server address {addr}: {source}")
            }
            EdgeErr::NoFullModel => write!(
                f,
                "configuration error: running locally needs the checkpoint of the full model"
            ),
            EdgeErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for EdgeErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EdgeErr::Configuration(e) | EdgeErr::Compute(e) => Some(e),
            EdgeErr::Protocol(e) | EdgeErr::Io(e) => Some(e),
            EdgeErr::Address { source, .. } => Some(source),
            EdgeErr::NoFullModel => None,
        }
    }
}

impl From<io::Error> for EdgeErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for EdgeErr {
    /// Errors raised while setting the model up, forward passes map theirs
    /// to `Compute` where they run.
    fn from(value: MlErr) -> Self {
        Self::Configuration(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<EdgeErr> for io::Error {
    fn from(value: EdgeErr) -> Self {
        match value {
            EdgeErr::Io(e) | EdgeErr::Protocol(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

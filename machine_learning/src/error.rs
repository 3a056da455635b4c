use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    NoSplitPoint {
        architecture: String,
    },
    MissingClassifier {
        architecture: String,
    },
    InvalidStage {
        stage: String,
        reason: String,
    },
    MissingWeights {
        name: String,
    },
    WeightShape {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    BoundaryMismatch {
        head: Vec<usize>,
        tail: Vec<usize>,
    },
    MissingPartition {
        architecture: String,
    },
    UnknownArchitecture(String),
    InvalidCacheKey(String),
    Checkpoint(String),
    ShapeMismatch {
        stage: String,
        got: Vec<usize>,
        expected: String,
    },
    Image(String),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::NoSplitPoint { architecture } => format!(
                "The {architecture} graph has no pool-downsample stage to split at"
            ),
            MlErr::MissingClassifier { architecture } => {
                format!("The {architecture} graph doesn't end with a classifier stage")
            }
            MlErr::InvalidStage { stage, reason } => {
                format!("The stage {stage} is invalid: {reason}")
            }
            MlErr::MissingWeights { name } => {
                format!("The checkpoint has no tensor named {name}")
            }
            MlErr::WeightShape {
                name,
                got,
                expected,
            } => format!(
                "The checkpoint tensor {name} has shape {got:?}, expected {expected:?}"
            ),
            MlErr::BoundaryMismatch { head, tail } => format!(
                "The head outputs {head:?} but the tail expects {tail:?}"
            ),
            MlErr::MissingPartition { architecture } => format!(
                "There's no cached partition nor checkpoint for {architecture}"
            ),
            MlErr::UnknownArchitecture(architecture) => {
                format!("Unknown architecture {architecture}")
            }
            MlErr::InvalidCacheKey(architecture) => format!(
                "The architecture name {architecture:?} can't be used as a cache file name"
            ),
            MlErr::Checkpoint(msg) => format!("Failed to read the checkpoint: {msg}"),
            MlErr::ShapeMismatch {
                stage,
                got,
                expected,
            } => format!("The stage {stage} got an input of shape {got:?}, expected {expected}"),
            MlErr::Image(msg) => format!("Failed to load the image: {msg}"),
            MlErr::Io(e) => format!("io error: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<safetensors::SafeTensorError> for MlErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Checkpoint(value.to_string())
    }
}

impl From<image::ImageError> for MlErr {
    fn from(value: image::ImageError) -> Self {
        Self::Image(value.to_string())
    }
}

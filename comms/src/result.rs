use std::{fmt, io};

use crate::{DType, Tensor};

/// The diagnosis predicted by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Normal,
    Pneumonia,
    Other(i64),
}

impl Label {
    /// Returns the class id of this label.
    pub fn id(self) -> i64 {
        match self {
            Label::Normal => 0,
            Label::Pneumonia => 1,
            Label::Other(id) => id,
        }
    }
}

impl From<i64> for Label {
    fn from(id: i64) -> Self {
        match id {
            0 => Label::Normal,
            1 => Label::Pneumonia,
            id => Label::Other(id),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Normal => write!(f, "normal"),
            Label::Pneumonia => write!(f, "pneumonia"),
            Label::Other(id) => write!(f, "class {id}"),
        }
    }
}

/// The answer of the server for a single session.
///
/// On the wire a result is a rank 1 `i64` tensor holding one class id per
/// batch row; `raw` keeps that tensor when the result was decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub label: Label,
    pub raw: Option<Tensor>,
}

impl InferenceResult {
    /// Creates a new `InferenceResult` for a single prediction.
    pub fn new(label: Label) -> Self {
        Self { label, raw: None }
    }

    /// Encodes a batch of predicted class ids as the wire tensor.
    ///
    /// # Arguments
    /// * `ids` - One class id per batch row.
    pub fn labels_tensor(ids: &[i64]) -> io::Result<Tensor> {
        Tensor::from_i64(vec![ids.len()], ids)
    }

    /// Returns the wire tensor of this result.
    pub fn to_tensor(&self) -> io::Result<Tensor> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => Self::labels_tensor(&[self.label.id()]),
        }
    }
}

impl TryFrom<Tensor> for InferenceResult {
    type Error = io::Error;

    /// Decodes a received result tensor, the label is the first class id.
    fn try_from(tensor: Tensor) -> io::Result<Self> {
        if tensor.rank() != 1 || tensor.dtype() != DType::I64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "expected a rank 1 I64 result, got shape {:?} of {:?}",
                    tensor.shape(),
                    tensor.dtype()
                ),
            ));
        }

        let ids = tensor.to_i64_vec()?;
        let label = Label::from(ids[0]);

        Ok(Self {
            label,
            raw: Some(tensor),
        })
    }
}

use ndarray::{Array, Dimension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActFn {
    Relu,
}
use ActFn::*;

impl ActFn {
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Relu => x.max(0.),
        }
    }

    /// Applies this function elementwise, consuming `x`.
    pub fn apply<D: Dimension>(&self, x: Array<f32, D>) -> Array<f32, D> {
        x.mapv_into(|v| self.f(v))
    }
}

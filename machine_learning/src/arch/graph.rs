use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use super::{
    Sequential,
    layers::StageKind,
    weights::{ParamVisitor, WeightSource},
};
use crate::Result;

/// A named node of a `NetworkGraph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    #[serde(flatten)]
    pub kind: StageKind,
}

impl Stage {
    pub fn new<S: Into<String>>(name: S, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        self.kind.output_shape(&self.name, input)
    }

    /// Returns the output shape for `input` together with the operations it takes.
    pub fn flops(&self, input: &[usize]) -> Result<(Vec<usize>, u64)> {
        let output = self.output_shape(input)?;
        let flops = self.kind.flops(input, &output);
        Ok((output, flops))
    }

    pub fn forward(&self, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.kind.forward(&self.name, x)
    }

    /// Visits every parameter tensor of this stage under `<stage>.<param>` names.
    pub fn visit_params<'a>(&'a self, visitor: &mut ParamVisitor<'a, '_>) {
        self.kind.visit_params(&self.name, visitor);
    }

    pub fn load_params(&mut self, src: &mut dyn WeightSource) -> Result<()> {
        self.kind.load_params(&self.name, src)
    }

    pub fn is_pool_downsample(&self) -> bool {
        matches!(self.kind, StageKind::PoolDownsample(_))
    }

    pub fn is_classifier(&self) -> bool {
        matches!(self.kind, StageKind::Classifier(_))
    }
}

/// A layered network, in the order its stages are traversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkGraph {
    pub architecture: String,
    /// The shape of a single request, batch dimension included.
    pub input_shape: Vec<usize>,
    pub stages: Vec<Stage>,
}

impl NetworkGraph {
    pub fn new<S: Into<String>>(architecture: S, input_shape: Vec<usize>, stages: Vec<Stage>) -> Self {
        Self {
            architecture: architecture.into(),
            input_shape,
            stages,
        }
    }

    /// Returns the index of the first `pool-downsample` stage, if any.
    pub fn split_point(&self) -> Option<usize> {
        self.stages.iter().position(Stage::is_pool_downsample)
    }

    /// Fills in the parameters of every stage from `src`.
    pub fn load_params(&mut self, src: &mut dyn WeightSource) -> Result<()> {
        self.stages
            .iter_mut()
            .try_for_each(|stage| stage.load_params(src))
    }

    /// Builds the unsplit model.
    pub fn to_sequential(&self) -> Result<Sequential> {
        Sequential::new(
            self.architecture.clone(),
            self.input_shape.clone(),
            self.stages.clone(),
        )
    }
}

mod conv;
mod dense;
mod dense_block;
mod norm;
mod pool;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

pub use conv::Conv2d;
pub use dense::Dense;
pub use dense_block::{DenseBlock, DenseLayer};
pub use norm::BatchNorm2d;
pub use pool::{AvgPool2d, MaxPool2d, global_avg_pool};

use super::{
    activations::ActFn,
    weights::{ParamVisitor, WeightSource},
};
use crate::{MlErr, Result};

/// What a stage computes, together with its hyper-parameters.
///
/// Serialized with a `kind` tag, e.g. `{"kind": "pool-downsample", "kernel": 3, "stride": 2}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StageKind {
    Conv(Conv2d),
    PoolDownsample(MaxPool2d),
    Norm(BatchNorm2d),
    Activation { function: ActFn },
    Dense(Dense),
    Classifier(Dense),
    AvgPool(AvgPool2d),
    GlobalAvgPool,
    Flatten,
    DenseBlock(DenseBlock),
}
use StageKind::*;

impl StageKind {
    pub fn relu() -> Self {
        Activation {
            function: ActFn::Relu,
        }
    }

    /// Returns the serialized tag of this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            Conv(_) => "conv",
            PoolDownsample(_) => "pool-downsample",
            Norm(_) => "norm",
            Activation { .. } => "activation",
            Dense(_) => "dense",
            Classifier(_) => "classifier",
            AvgPool(_) => "avg-pool",
            GlobalAvgPool => "global-avg-pool",
            Flatten => "flatten",
            DenseBlock(_) => "dense-block",
        }
    }

    /// Returns the amount of parameters of this stage.
    pub fn size(&self) -> usize {
        match self {
            Conv(l) => l.size(),
            Norm(l) => l.size(),
            Dense(l) | Classifier(l) => l.size(),
            DenseBlock(l) => l.size(),
            _ => 0,
        }
    }

    /// Infers the output shape of this stage.
    ///
    /// # Arguments
    /// * `name` - The name of the stage, for error reporting.
    /// * `input` - The shape of the input, batch dimension included.
    ///
    /// # Returns
    /// The output shape or an `InvalidStage` error if this stage can't take `input`.
    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            Conv(l) => l.output_shape(name, input),
            PoolDownsample(l) => l.output_shape(name, input),
            Norm(l) => l.output_shape(name, input),
            Activation { .. } => Ok(input.to_vec()),
            Dense(l) | Classifier(l) => l.output_shape(name, input),
            AvgPool(l) => l.output_shape(name, input),
            GlobalAvgPool => {
                expect_rank(name, input, 4)?;
                Ok(vec![input[0], input[1], 1, 1])
            }
            Flatten => {
                expect_min_rank(name, input, 2)?;
                Ok(vec![input[0], input[1..].iter().product()])
            }
            DenseBlock(l) => l.output_shape(name, input),
        }
    }

    /// Counts the operations of this stage for one forward pass.
    ///
    /// Convolutions and dense layers count one per multiply-accumulate, norms
    /// two per element and average pools one per window element. Max pools,
    /// activations and reshapes count nothing.
    ///
    /// # Arguments
    /// * `input` - The shape this stage is fed, as accepted by `output_shape`.
    /// * `output` - The shape `output_shape` inferred for it.
    pub fn flops(&self, input: &[usize], output: &[usize]) -> u64 {
        match self {
            Conv(l) => l.flops(output),
            Norm(l) => l.flops(input),
            Dense(l) | Classifier(l) => l.flops(input),
            AvgPool(l) => numel(output) * (l.kernel * l.kernel) as u64,
            GlobalAvgPool => numel(input),
            DenseBlock(l) => l.flops(input),
            PoolDownsample(_) | Activation { .. } | Flatten => 0,
        }
    }

    pub fn forward(&self, name: &str, x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let y = match self {
            Conv(l) => l.forward(name, to_4d(name, x)?)?.into_dyn(),
            PoolDownsample(l) => l.forward(to_4d(name, x)?).into_dyn(),
            Norm(l) => l.forward(name, to_4d(name, x)?)?.into_dyn(),
            Activation { function } => function.apply(x),
            Dense(l) | Classifier(l) => l.forward(name, to_2d(name, x)?)?.into_dyn(),
            AvgPool(l) => l.forward(to_4d(name, x)?).into_dyn(),
            GlobalAvgPool => global_avg_pool(to_4d(name, x)?).into_dyn(),
            Flatten => {
                let shape = self.output_shape(name, x.shape())?;
                x.to_shape((shape[0], shape[1]))
                    .map_err(|e| invalid_stage(name, e.to_string()))?
                    .into_owned()
                    .into_dyn()
            }
            DenseBlock(l) => l.forward(to_4d(name, x)?)?.into_dyn(),
        };

        Ok(y)
    }

    pub fn visit_params<'a>(&'a self, name: &str, visitor: &mut ParamVisitor<'a, '_>) {
        match self {
            Conv(l) => l.visit_params(name, visitor),
            Norm(l) => l.visit_params(name, visitor),
            Dense(l) | Classifier(l) => l.visit_params(name, visitor),
            DenseBlock(l) => l.visit_params(name, visitor),
            _ => {}
        }
    }

    pub fn load_params(&mut self, name: &str, src: &mut dyn WeightSource) -> Result<()> {
        match self {
            Conv(l) => l.load_params(name, src),
            Norm(l) => l.load_params(name, src),
            Dense(l) | Classifier(l) => l.load_params(name, src),
            DenseBlock(l) => l.load_params(name, src),
            _ => Ok(()),
        }
    }
}

pub(crate) fn relu<D: Dimension>(x: Array<f32, D>) -> Array<f32, D> {
    ActFn::Relu.apply(x)
}

pub(crate) fn invalid_stage<S: Into<String>>(name: &str, reason: S) -> MlErr {
    MlErr::InvalidStage {
        stage: name.to_string(),
        reason: reason.into(),
    }
}

fn numel(shape: &[usize]) -> u64 {
    shape.iter().map(|&d| d as u64).product()
}

fn expect_rank(name: &str, input: &[usize], rank: usize) -> Result<()> {
    if input.len() != rank {
        return Err(MlErr::ShapeMismatch {
            stage: name.to_string(),
            got: input.to_vec(),
            expected: format!("a rank {rank} input"),
        });
    }

    Ok(())
}

fn expect_min_rank(name: &str, input: &[usize], rank: usize) -> Result<()> {
    if input.len() < rank {
        return Err(MlErr::ShapeMismatch {
            stage: name.to_string(),
            got: input.to_vec(),
            expected: format!("at least a rank {rank} input"),
        });
    }

    Ok(())
}

/// Output size of a sliding window along one axis.
fn window_out(name: &str, size: usize, kernel: usize, stride: usize, padding: usize) -> Result<usize> {
    if kernel == 0 || stride == 0 {
        return Err(invalid_stage(name, "kernel and stride must be positive"));
    }

    let padded = size + 2 * padding;
    if padded < kernel {
        return Err(invalid_stage(
            name,
            format!("kernel {kernel} is larger than the padded input {padded}"),
        ));
    }

    Ok((padded - kernel) / stride + 1)
}

fn to_4d(name: &str, x: ArrayD<f32>) -> Result<Array4<f32>> {
    let shape = x.shape().to_vec();
    x.into_dimensionality::<Ix4>()
        .map_err(|_| MlErr::ShapeMismatch {
            stage: name.to_string(),
            got: shape,
            expected: "a rank 4 input".to_string(),
        })
}

fn to_2d(name: &str, x: ArrayD<f32>) -> Result<Array2<f32>> {
    let shape = x.shape().to_vec();
    x.into_dimensionality::<Ix2>()
        .map_err(|_| MlErr::ShapeMismatch {
            stage: name.to_string(),
            got: shape,
            expected: "a rank 2 input".to_string(),
        })
}

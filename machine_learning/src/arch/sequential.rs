use log::debug;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

use super::{Stage, weights::ParamVisitor};
use crate::{MlErr, Result, loader};

/// A sequential model: an ordered run of stages together with the input shape it accepts.
///
/// Both halves of a partition are `Sequential`s, as is the unsplit model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequential {
    architecture: String,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    stages: Vec<Stage>,
}

impl Sequential {
    /// Creates a new `Sequential`, inferring the shape every stage produces.
    ///
    /// # Arguments
    /// * `architecture` - The name of the network this model belongs to.
    /// * `input_shape` - The shape of the accepted input, batch dimension included.
    /// * `stages` - The stages the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance or an error if some stage can't take its input.
    pub fn new(architecture: String, input_shape: Vec<usize>, stages: Vec<Stage>) -> Result<Self> {
        let output_shape = stages
            .iter()
            .try_fold(input_shape.clone(), |shape, stage| stage.output_shape(&shape))?;

        Ok(Self {
            architecture,
            input_shape,
            output_shape,
            stages,
        })
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.stages.iter().map(|s| s.kind.size()).sum()
    }

    /// Returns the operations of every stage for one forward pass of `input_shape`.
    pub fn stage_flops(&self) -> Result<Vec<(&str, u64)>> {
        let mut shape = self.input_shape.clone();

        self.stages
            .iter()
            .map(|stage| {
                let (output, flops) = stage.flops(&shape)?;
                shape = output;
                Ok((stage.name.as_str(), flops))
            })
            .collect()
    }

    /// Returns the operations one forward pass takes, see `StageKind::flops`.
    pub fn flops(&self) -> Result<u64> {
        Ok(self.stage_flops()?.iter().map(|(_, flops)| flops).sum())
    }

    pub fn visit_params<'a>(&'a self, visitor: &mut ParamVisitor<'a, '_>) {
        for stage in &self.stages {
            stage.visit_params(visitor);
        }
    }

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `x` - The input, its shape must be exactly `input_shape`.
    ///
    /// # Returns
    /// The output of the last stage or an error if occurred.
    pub fn forward(&self, mut x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if x.shape() != self.input_shape.as_slice() {
            return Err(MlErr::ShapeMismatch {
                stage: self.architecture.clone(),
                got: x.shape().to_vec(),
                expected: format!("{:?}", self.input_shape),
            });
        }

        for stage in &self.stages {
            x = stage.forward(x)?;
            debug!(stage = stage.name.as_str(); "forwarded stage");
        }

        Ok(x)
    }

    /// Runs the model and takes the arg max of every batch row.
    ///
    /// # Returns
    /// One class id per batch row.
    pub fn predict(&self, x: ArrayD<f32>) -> Result<Vec<i64>> {
        let y = self.forward(x)?;
        let rows = y.shape()[0];
        let y = y
            .to_shape((rows, y.len() / rows))
            .map_err(|e| MlErr::InvalidStage {
                stage: self.architecture.clone(),
                reason: e.to_string(),
            })?;

        let ids = y
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                        if v > best.1 { (i, v) } else { best }
                    })
                    .0 as i64
            })
            .collect();

        Ok(ids)
    }

    /// Serializes this model into a self-describing blob.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        loader::encode_blob(self)
    }

    /// Deserializes a model written by `to_blob`.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        loader::decode_blob(blob)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;
    use crate::arch::{
        layers::{Dense, StageKind},
        weights::MapWeights,
    };

    fn classifier(weights: Vec<f32>, biases: Vec<f32>) -> Sequential {
        let mut stage = Stage::new("classifier", StageKind::Classifier(Dense::new(2, 2)));
        stage
            .load_params(&mut MapWeights::new([
                ("classifier.weight", weights),
                ("classifier.bias", biases),
            ]))
            .unwrap();

        Sequential::new("toy".to_string(), vec![2, 2], vec![stage]).unwrap()
    }

    #[test]
    fn predict_takes_the_arg_max_per_row() {
        let model = classifier(vec![1.0, 0.0, 0.0, 1.0], vec![0.0, 0.0]);
        let x = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![3.0, 1.0, -1.0, 2.0]).unwrap();

        assert_eq!(model.predict(x).unwrap(), vec![0, 1]);
    }

    #[test]
    fn forward_rejects_other_shapes() {
        let model = classifier(vec![0.0; 4], vec![0.0; 2]);
        let x = ArrayD::zeros(IxDyn(&[1, 2]));

        assert!(matches!(model.forward(x), Err(MlErr::ShapeMismatch { .. })));
    }

    #[test]
    fn shapes_are_inferred_on_creation() {
        let model = classifier(vec![0.0; 4], vec![0.0; 2]);
        assert_eq!(model.output_shape(), &[2, 2]);
        assert_eq!(model.size(), 6);

        let stages = model.stages().to_vec();
        assert!(Sequential::new("toy".to_string(), vec![2, 3], stages).is_err());
    }
}

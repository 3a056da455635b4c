use ndarray::{linalg, prelude::*};
use serde::{Deserialize, Serialize};

use super::{expect_rank, invalid_stage};
use crate::{
    Result,
    arch::weights::{ParamVisitor, WeightSource},
};

/// A fully connected layer over `(batch, features)` inputs.
///
/// The parameters are laid out as the checkpoint stores them: an `(out, in)`
/// weight matrix followed by `out` biases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub in_features: usize,
    pub out_features: usize,
    #[serde(skip)]
    params: Vec<f32>,
}

impl Dense {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            params: Vec::new(),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        (self.in_features + 1) * self.out_features
    }

    pub fn flops(&self, input: &[usize]) -> u64 {
        (input[0] * self.in_features * self.out_features) as u64
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(name, input, 2)?;

        if input[1] != self.in_features {
            return Err(invalid_stage(
                name,
                format!("expects {} features, got {}", self.in_features, input[1]),
            ));
        }

        Ok(vec![input[0], self.out_features])
    }

    pub fn forward(&self, name: &str, x: Array2<f32>) -> Result<Array2<f32>> {
        let (w, b) = self.view_params(name)?;
        let mut z = Array2::zeros((x.nrows(), self.out_features));

        linalg::general_mat_mul(1.0, &x, &w.t(), 0.0, &mut z);
        z += &b;
        Ok(z)
    }

    pub fn visit_params<'a>(&'a self, prefix: &str, visitor: &mut ParamVisitor<'a, '_>) {
        if self.params.len() != self.size() {
            return;
        }

        let (w, b) = self.params.split_at(self.size() - self.out_features);
        visitor(
            format!("{prefix}.weight"),
            vec![self.out_features, self.in_features],
            w,
        );
        visitor(format!("{prefix}.bias"), vec![self.out_features], b);
    }

    pub fn load_params(&mut self, prefix: &str, src: &mut dyn WeightSource) -> Result<()> {
        let shape = [self.out_features, self.in_features];
        let mut params = src.fetch(&format!("{prefix}.weight"), &shape)?;
        params.extend(src.fetch(&format!("{prefix}.bias"), &[self.out_features])?);

        self.params = params;
        Ok(())
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params(&self, name: &str) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)> {
        if self.params.len() != self.size() {
            return Err(invalid_stage(name, "parameters are not loaded"));
        }

        let w_size = self.size() - self.out_features;
        let dim = (self.out_features, self.in_features);
        let weights = ArrayView2::from_shape(dim, &self.params[..w_size])
            .map_err(|e| invalid_stage(name, e.to_string()))?;
        let biases = ArrayView1::from(&self.params[w_size..]);
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::weights::MapWeights;

    #[test]
    fn forward_uses_checkpoint_layout() {
        let mut dense = Dense::new(2, 3);
        dense
            .load_params(
                "fc",
                &mut MapWeights::new([
                    ("fc.weight", vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]),
                    ("fc.bias", vec![0.0, 0.0, -1.0]),
                ]),
            )
            .unwrap();

        let x = array![[2.0, 3.0]];
        let y = dense.forward("fc", x).unwrap();
        assert_eq!(y, array![[2.0, 3.0, 4.0]]);
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let dense = Dense::new(4, 2);
        assert!(dense.output_shape("fc", &[1, 3]).is_err());
        assert!(dense.output_shape("fc", &[1, 4, 1]).is_err());
    }
}

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::{expect_rank, invalid_stage, numel};
use crate::{
    Result,
    arch::weights::{ParamVisitor, WeightSource},
};

const PARAM_NAMES: [&str; 4] = ["weight", "bias", "running_mean", "running_var"];

fn default_eps() -> f32 {
    1e-5
}

/// Batch normalization in inference mode, using the running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNorm2d {
    pub channels: usize,
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// gamma, beta, running mean and running variance, `channels` values each.
    #[serde(skip)]
    params: Vec<f32>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            eps: default_eps(),
            params: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        PARAM_NAMES.len() * self.channels
    }

    /// A scale and a shift per element.
    pub fn flops(&self, input: &[usize]) -> u64 {
        2 * numel(input)
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(name, input, 4)?;

        if input[1] != self.channels {
            return Err(invalid_stage(
                name,
                format!("expects {} channels, got {}", self.channels, input[1]),
            ));
        }

        Ok(input.to_vec())
    }

    pub fn forward(&self, name: &str, mut x: Array4<f32>) -> Result<Array4<f32>> {
        if self.params.len() != self.size() {
            return Err(invalid_stage(name, "parameters are not loaded"));
        }

        let c = self.channels;
        let (gamma, rest) = self.params.split_at(c);
        let (beta, rest) = rest.split_at(c);
        let (mean, var) = rest.split_at(c);

        for mut batch in x.outer_iter_mut() {
            for (ch, mut plane) in batch.outer_iter_mut().enumerate() {
                let scale = gamma[ch] / (var[ch] + self.eps).sqrt();
                let shift = beta[ch] - mean[ch] * scale;
                plane.mapv_inplace(|v| v * scale + shift);
            }
        }

        Ok(x)
    }

    pub fn visit_params<'a>(&'a self, prefix: &str, visitor: &mut ParamVisitor<'a, '_>) {
        if self.params.len() != self.size() {
            return;
        }

        for (param, values) in PARAM_NAMES.iter().zip(self.params.chunks(self.channels)) {
            visitor(format!("{prefix}.{param}"), vec![self.channels], values);
        }
    }

    pub fn load_params(&mut self, prefix: &str, src: &mut dyn WeightSource) -> Result<()> {
        let mut params = Vec::with_capacity(self.size());

        for param in PARAM_NAMES {
            params.extend(src.fetch(&format!("{prefix}.{param}"), &[self.channels])?);
        }

        self.params = params;
        Ok(())
    }
}

use ndarray::{linalg, parallel::prelude::*, prelude::*};
use serde::{Deserialize, Serialize};

use super::{expect_rank, invalid_stage, numel, window_out};
use crate::{
    Result,
    arch::weights::{ParamVisitor, WeightSource},
};

/// A 2d convolution over `(batch, channels, height, width)` inputs.
///
/// The weights are stored flat in the checkpoint layout `(out, in, kernel, kernel)`,
/// followed by the biases when the layer has them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    #[serde(default = "one")]
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
    #[serde(default)]
    pub bias: bool,
    #[serde(skip)]
    params: Vec<f32>,
}

fn one() -> usize {
    1
}

impl Conv2d {
    /// Creates a new `Conv2d` without parameters, these are filled in with `load_params`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        bias: bool,
    ) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
            bias,
            params: Vec::new(),
        }
    }

    fn weight_shape(&self) -> Vec<usize> {
        vec![self.out_channels, self.in_channels, self.kernel, self.kernel]
    }

    fn weight_size(&self) -> usize {
        self.out_channels * self.in_channels * self.kernel * self.kernel
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.weight_size() + if self.bias { self.out_channels } else { 0 }
    }

    fn split_params(&self) -> Option<(&[f32], &[f32])> {
        (self.params.len() == self.size()).then(|| self.params.split_at(self.weight_size()))
    }

    /// One multiply-accumulate per kernel weight and output element.
    pub fn flops(&self, output: &[usize]) -> u64 {
        numel(output) * (self.in_channels * self.kernel * self.kernel) as u64
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(name, input, 4)?;

        if input[1] != self.in_channels {
            return Err(invalid_stage(
                name,
                format!("expects {} channels, got {}", self.in_channels, input[1]),
            ));
        }

        let oh = window_out(name, input[2], self.kernel, self.stride, self.padding)?;
        let ow = window_out(name, input[3], self.kernel, self.stride, self.padding)?;
        Ok(vec![input[0], self.out_channels, oh, ow])
    }

    /// Lowers each input into columns and multiplies them by the kernel matrix.
    pub fn forward(&self, name: &str, x: Array4<f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = x.dim();
        let (k, s, p) = (self.kernel, self.stride, self.padding);
        let oh = (h + 2 * p - k) / s + 1;
        let ow = (w + 2 * p - k) / s + 1;

        let (weights, biases) = self
            .split_params()
            .ok_or_else(|| invalid_stage(name, "parameters are not loaded"))?;
        let kernels = ArrayView2::from_shape((self.out_channels, c * k * k), weights)
            .map_err(|e| invalid_stage(name, e.to_string()))?;

        let mut out = Array4::zeros((n, self.out_channels, oh, ow));
        let mut cols = Array2::<f32>::zeros((c * k * k, oh * ow));
        let mut res = Array2::<f32>::zeros((self.out_channels, oh * ow));

        for (xb, mut ob) in x.outer_iter().zip(out.outer_iter_mut()) {
            cols.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(row, mut col)| {
                    let ci = row / (k * k);
                    let ki = (row / k) % k;
                    let kj = row % k;

                    for oy in 0..oh {
                        let iy = (oy * s + ki) as isize - p as isize;
                        for ox in 0..ow {
                            let ix = (ox * s + kj) as isize - p as isize;
                            let inside = iy >= 0 && ix >= 0 && (iy as usize) < h && (ix as usize) < w;

                            col[oy * ow + ox] = if inside {
                                xb[[ci, iy as usize, ix as usize]]
                            } else {
                                0.0
                            };
                        }
                    }
                });

            linalg::general_mat_mul(1.0, &kernels, &cols, 0.0, &mut res);

            for (oc, (mut dst, src)) in ob.outer_iter_mut().zip(res.outer_iter()).enumerate() {
                let b = if self.bias { biases[oc] } else { 0.0 };
                dst.iter_mut().zip(src.iter()).for_each(|(d, &v)| *d = v + b);
            }
        }

        Ok(out)
    }

    pub fn visit_params<'a>(&'a self, prefix: &str, visitor: &mut ParamVisitor<'a, '_>) {
        let Some((weights, biases)) = self.split_params() else {
            return;
        };

        visitor(format!("{prefix}.weight"), self.weight_shape(), weights);

        if self.bias {
            visitor(format!("{prefix}.bias"), vec![self.out_channels], biases);
        }
    }

    pub fn load_params(&mut self, prefix: &str, src: &mut dyn WeightSource) -> Result<()> {
        let mut params = src.fetch(&format!("{prefix}.weight"), &self.weight_shape())?;

        if self.bias {
            params.extend(src.fetch(&format!("{prefix}.bias"), &[self.out_channels])?);
        }

        self.params = params;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::weights::MapWeights;

    #[test]
    fn identity_kernel_keeps_input() {
        let mut conv = Conv2d::new(1, 1, 3, 1, 1, false);
        let mut kernel = vec![0.0; 9];
        kernel[4] = 1.0;
        conv.load_params("c", &mut MapWeights::new([("c.weight", kernel)]))
            .unwrap();

        let x = Array4::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| (i * 4 + j) as f32);
        assert_eq!(conv.forward("c", x.clone()).unwrap(), x);
    }

    #[test]
    fn strided_sum_with_bias() {
        let mut conv = Conv2d::new(2, 1, 2, 2, 0, true);
        conv.load_params(
            "c",
            &mut MapWeights::new([("c.weight", vec![1.0; 8]), ("c.bias", vec![0.5])]),
        )
        .unwrap();

        let x = Array4::ones((1, 2, 4, 4));
        let y = conv.forward("c", x).unwrap();

        assert_eq!(y.dim(), (1, 1, 2, 2));
        assert!(y.iter().all(|&v| v == 8.5));
    }

    #[test]
    fn output_shape_follows_stride_and_padding() {
        let conv = Conv2d::new(1, 64, 7, 2, 3, false);
        let shape = conv.output_shape("conv0", &[1, 1, 256, 256]).unwrap();
        assert_eq!(shape, vec![1, 64, 128, 128]);

        assert!(conv.output_shape("conv0", &[1, 3, 256, 256]).is_err());
    }
}

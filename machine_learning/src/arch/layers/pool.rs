use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::{expect_rank, window_out};
use crate::Result;

/// The down-sampling max pool that marks the split boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub kernel: usize,
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
}

impl MaxPool2d {
    pub fn new(kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel,
            stride,
            padding,
        }
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        pooled_shape(name, input, self.kernel, self.stride, self.padding)
    }

    /// Padded positions never win the max.
    pub fn forward(&self, x: Array4<f32>) -> Array4<f32> {
        pool(x, self.kernel, self.stride, self.padding, |window| {
            window.fold(f32::NEG_INFINITY, |acc, v| acc.max(v))
        })
    }
}

/// Average pooling, padded positions count as zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvgPool2d {
    pub kernel: usize,
    pub stride: usize,
    #[serde(default)]
    pub padding: usize,
}

impl AvgPool2d {
    pub fn new(kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            kernel,
            stride,
            padding,
        }
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        pooled_shape(name, input, self.kernel, self.stride, self.padding)
    }

    pub fn forward(&self, x: Array4<f32>) -> Array4<f32> {
        let area = (self.kernel * self.kernel) as f32;
        pool(x, self.kernel, self.stride, self.padding, |window| {
            window.sum::<f32>() / area
        })
    }
}

/// Averages every channel plane down to a single value, `(n, c, h, w) -> (n, c, 1, 1)`.
pub fn global_avg_pool(x: Array4<f32>) -> Array4<f32> {
    let (n, c, h, w) = x.dim();
    let area = (h * w) as f32;

    Array4::from_shape_fn((n, c, 1, 1), |(b, ch, _, _)| {
        x.slice(s![b, ch, .., ..]).sum() / area
    })
}

fn pooled_shape(
    name: &str,
    input: &[usize],
    kernel: usize,
    stride: usize,
    padding: usize,
) -> Result<Vec<usize>> {
    expect_rank(name, input, 4)?;

    let oh = window_out(name, input[2], kernel, stride, padding)?;
    let ow = window_out(name, input[3], kernel, stride, padding)?;
    Ok(vec![input[0], input[1], oh, ow])
}

fn pool<F>(x: Array4<f32>, k: usize, s: usize, p: usize, reduce: F) -> Array4<f32>
where
    F: Fn(&mut dyn Iterator<Item = f32>) -> f32,
{
    let (n, c, h, w) = x.dim();
    let oh = (h + 2 * p - k) / s + 1;
    let ow = (w + 2 * p - k) / s + 1;

    Array4::from_shape_fn((n, c, oh, ow), |(b, ch, oy, ox)| {
        let plane = x.slice(s![b, ch, .., ..]);
        let mut window = (0..k).flat_map(|ki| (0..k).map(move |kj| (ki, kj))).filter_map(|(ki, kj)| {
            let iy = (oy * s + ki).checked_sub(p)?;
            let ix = (ox * s + kj).checked_sub(p)?;
            plane.get((iy, ix)).copied()
        });

        reduce(&mut window)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_pool_picks_window_maximum() {
        let x = Array4::from_shape_fn((1, 1, 4, 4), |(_, _, i, j)| (i * 4 + j) as f32);
        let y = MaxPool2d::new(2, 2, 0).forward(x);

        assert_eq!(y.dim(), (1, 1, 2, 2));
        assert_eq!(y.into_raw_vec_and_offset().0, vec![5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn padded_max_pool_halves_resolution() {
        let pool = MaxPool2d::new(3, 2, 1);
        assert_eq!(
            pool.output_shape("pool0", &[1, 64, 128, 128]).unwrap(),
            vec![1, 64, 64, 64]
        );

        let x = Array4::from_elem((1, 1, 4, 4), -2.0);
        assert!(pool.forward(x).iter().all(|&v| v == -2.0));
    }

    #[test]
    fn avg_pool_and_global_avg_pool() {
        let x = Array4::from_shape_fn((1, 1, 2, 2), |(_, _, i, j)| (i * 2 + j) as f32);

        let y = AvgPool2d::new(2, 2, 0).forward(x.clone());
        assert_eq!(y[[0, 0, 0, 0]], 1.5);

        let y = global_avg_pool(x);
        assert_eq!(y.dim(), (1, 1, 1, 1));
        assert_eq!(y[[0, 0, 0, 0]], 1.5);
    }
}

use ndarray::{concatenate, prelude::*};
use serde::{Deserialize, Serialize};

use super::{BatchNorm2d, Conv2d, expect_rank, invalid_stage, relu};
use crate::{
    Result,
    arch::weights::{ParamVisitor, WeightSource},
};

/// A bottleneck layer: `norm1 -> relu -> conv1 (1x1) -> norm2 -> relu -> conv2 (3x3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub name: String,
    pub norm1: BatchNorm2d,
    pub conv1: Conv2d,
    pub norm2: BatchNorm2d,
    pub conv2: Conv2d,
}

impl DenseLayer {
    /// Creates the `index`-th layer of a block fed by `in_channels` channels.
    pub fn new(index: usize, in_channels: usize, growth_rate: usize, bn_size: usize) -> Self {
        let bottleneck = bn_size * growth_rate;

        Self {
            name: format!("denselayer{}", index + 1),
            norm1: BatchNorm2d::new(in_channels),
            conv1: Conv2d::new(in_channels, bottleneck, 1, 1, 0, false),
            norm2: BatchNorm2d::new(bottleneck),
            conv2: Conv2d::new(bottleneck, growth_rate, 3, 1, 1, false),
        }
    }

    fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let name = &self.name;
        let shape = self.norm1.output_shape(name, input)?;
        let shape = self.conv1.output_shape(name, &shape)?;
        let shape = self.norm2.output_shape(name, &shape)?;
        self.conv2.output_shape(name, &shape)
    }

    /// Counts the operations of this layer, `input` being a shape it accepts.
    fn flops(&self, input: &[usize]) -> u64 {
        let mut mid = input.to_vec();
        mid[1] = self.conv1.out_channels;
        let mut out = input.to_vec();
        out[1] = self.conv2.out_channels;

        self.norm1.flops(input)
            + self.conv1.flops(&mid)
            + self.norm2.flops(&mid)
            + self.conv2.flops(&out)
    }

    fn forward(&self, x: ArrayView4<f32>) -> Result<Array4<f32>> {
        let name = &self.name;
        let x = relu(self.norm1.forward(name, x.to_owned())?);
        let x = self.conv1.forward(name, x)?;
        let x = relu(self.norm2.forward(name, x)?);
        self.conv2.forward(name, x)
    }
}

/// A dense block, every layer sees the concatenation of the block input and
/// all the previous layer outputs along the channel axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseBlock {
    pub layers: Vec<DenseLayer>,
}

impl DenseBlock {
    pub fn new(num_layers: usize, in_channels: usize, growth_rate: usize, bn_size: usize) -> Self {
        let layers = (0..num_layers)
            .map(|i| DenseLayer::new(i, in_channels + i * growth_rate, growth_rate, bn_size))
            .collect();

        Self { layers }
    }

    pub fn size(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.norm1.size() + l.conv1.size() + l.norm2.size() + l.conv2.size())
            .sum()
    }

    pub fn output_shape(&self, name: &str, input: &[usize]) -> Result<Vec<usize>> {
        expect_rank(name, input, 4)?;
        let mut shape = input.to_vec();

        for layer in &self.layers {
            let new = layer.output_shape(&shape)?;
            if new[2..] != shape[2..] {
                return Err(invalid_stage(
                    name,
                    format!("{} changes the spatial size to {:?}", layer.name, &new[2..]),
                ));
            }

            shape[1] += new[1];
        }

        Ok(shape)
    }

    pub fn flops(&self, input: &[usize]) -> u64 {
        let mut shape = input.to_vec();

        self.layers
            .iter()
            .map(|layer| {
                let flops = layer.flops(&shape);
                shape[1] += layer.conv2.out_channels;
                flops
            })
            .sum()
    }

    pub fn forward(&self, x: Array4<f32>) -> Result<Array4<f32>> {
        let mut features = x;

        for layer in &self.layers {
            let new = layer.forward(features.view())?;
            features = concatenate(Axis(1), &[features.view(), new.view()])
                .map_err(|e| invalid_stage(&layer.name, e.to_string()))?;
        }

        Ok(features)
    }

    pub fn visit_params<'a>(&'a self, prefix: &str, visitor: &mut ParamVisitor<'a, '_>) {
        for layer in &self.layers {
            let prefix = format!("{prefix}.{}", layer.name);
            layer.norm1.visit_params(&format!("{prefix}.norm1"), visitor);
            layer.conv1.visit_params(&format!("{prefix}.conv1"), visitor);
            layer.norm2.visit_params(&format!("{prefix}.norm2"), visitor);
            layer.conv2.visit_params(&format!("{prefix}.conv2"), visitor);
        }
    }

    pub fn load_params(&mut self, prefix: &str, src: &mut dyn WeightSource) -> Result<()> {
        for layer in &mut self.layers {
            let prefix = format!("{prefix}.{}", layer.name);
            layer.norm1.load_params(&format!("{prefix}.norm1"), src)?;
            layer.conv1.load_params(&format!("{prefix}.conv1"), src)?;
            layer.norm2.load_params(&format!("{prefix}.norm2"), src)?;
            layer.conv2.load_params(&format!("{prefix}.conv2"), src)?;
        }

        Ok(())
    }
}

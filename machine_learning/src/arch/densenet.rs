//! DenseNet graphs, with the same stage names as the torchvision models so
//! their checkpoints load as they are.

use super::{
    NetworkGraph, Stage,
    layers::{AvgPool2d, BatchNorm2d, Conv2d, Dense, DenseBlock, MaxPool2d, StageKind},
};
use crate::{MlErr, Result};

/// The hyper-parameters of a DenseNet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseNetConfig {
    pub growth_rate: usize,
    pub block_config: Vec<usize>,
    pub num_init_features: usize,
    pub bn_size: usize,
    pub in_channels: usize,
    pub num_classes: usize,
    /// Side of the square input images.
    pub input_size: usize,
}

impl DenseNetConfig {
    fn preset(block_config: Vec<usize>) -> Self {
        Self {
            growth_rate: 32,
            block_config,
            num_init_features: 64,
            bn_size: 4,
            in_channels: 1,
            num_classes: 2,
            input_size: 256,
        }
    }

    pub fn densenet121() -> Self {
        Self::preset(vec![6, 12, 24, 16])
    }

    pub fn densenet169() -> Self {
        Self::preset(vec![6, 12, 32, 32])
    }

    pub fn densenet201() -> Self {
        Self::preset(vec![6, 12, 48, 32])
    }

    /// Resolves a preset by its architecture name.
    pub fn from_name(architecture: &str) -> Result<Self> {
        match architecture {
            "densenet121" => Ok(Self::densenet121()),
            "densenet169" => Ok(Self::densenet169()),
            "densenet201" => Ok(Self::densenet201()),
            other => Err(MlErr::UnknownArchitecture(other.to_string())),
        }
    }

    /// Returns the amount of channels the classifier receives.
    pub fn num_features(&self) -> usize {
        let mut channels = self.num_init_features;
        let nblocks = self.block_config.len();

        for (i, &num_layers) in self.block_config.iter().enumerate() {
            channels += num_layers * self.growth_rate;
            if i + 1 != nblocks {
                channels /= 2;
            }
        }

        channels
    }
}

/// Builds the graph of a DenseNet, without parameters.
///
/// # Arguments
/// * `architecture` - The name given to the graph.
/// * `config` - The network hyper-parameters.
pub fn densenet(architecture: &str, config: &DenseNetConfig) -> NetworkGraph {
    let mut channels = config.num_init_features;
    let mut stages = vec![
        Stage::new(
            "features.conv0",
            StageKind::Conv(Conv2d::new(config.in_channels, channels, 7, 2, 3, false)),
        ),
        Stage::new("features.norm0", StageKind::Norm(BatchNorm2d::new(channels))),
        Stage::new("features.relu0", StageKind::relu()),
        Stage::new(
            "features.pool0",
            StageKind::PoolDownsample(MaxPool2d::new(3, 2, 1)),
        ),
    ];

    let nblocks = config.block_config.len();
    for (i, &num_layers) in config.block_config.iter().enumerate() {
        let block = DenseBlock::new(num_layers, channels, config.growth_rate, config.bn_size);
        stages.push(Stage::new(
            format!("features.denseblock{}", i + 1),
            StageKind::DenseBlock(block),
        ));
        channels += num_layers * config.growth_rate;

        if i + 1 == nblocks {
            break;
        }

        let prefix = format!("features.transition{}", i + 1);
        stages.extend([
            Stage::new(format!("{prefix}.norm"), StageKind::Norm(BatchNorm2d::new(channels))),
            Stage::new(format!("{prefix}.relu"), StageKind::relu()),
            Stage::new(
                format!("{prefix}.conv"),
                StageKind::Conv(Conv2d::new(channels, channels / 2, 1, 1, 0, false)),
            ),
            Stage::new(format!("{prefix}.pool"), StageKind::AvgPool(AvgPool2d::new(2, 2, 0))),
        ]);
        channels /= 2;
    }

    stages.extend([
        Stage::new("features.norm5", StageKind::Norm(BatchNorm2d::new(channels))),
        Stage::new("relu", StageKind::relu()),
        Stage::new("avgpool", StageKind::GlobalAvgPool),
        Stage::new("flatten", StageKind::Flatten),
        Stage::new(
            "classifier",
            StageKind::Classifier(Dense::new(channels, config.num_classes)),
        ),
    ]);

    let input_shape = vec![1, config.in_channels, config.input_size, config.input_size];
    NetworkGraph::new(architecture, input_shape, stages)
}

/// Builds the graph of a preset by its name.
pub fn by_name(architecture: &str) -> Result<NetworkGraph> {
    Ok(densenet(architecture, &DenseNetConfig::from_name(architecture)?))
}

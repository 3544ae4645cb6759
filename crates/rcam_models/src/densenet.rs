//! DenseNet-121 backbone and the CheXNet classifier built on it.
//!
//! The layout follows the torchvision DenseNet: a 7×7 stem, four dense blocks
//! separated by transition layers, a final normalization, global average
//! pooling and a linear head. CheXNet replaces the ImageNet head with a
//! 14-way multi-label head followed by a sigmoid.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{
        AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
        MaxPool2dConfig,
    },
    Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use rcam_core::{NoTap, StageTap};
use serde::{Deserialize, Serialize};

use crate::checkpoint;
use crate::norm::FrozenBatchNorm;
use crate::stage::DenseStage;
use crate::state_dict::StateDict;

/// Number of ChestX-ray14 pathology classes.
pub const N_CLASSES: usize = 14;

/// Configuration for a DenseNet classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseNetConfig {
    /// Channels added by every dense layer.
    pub growth_rate: usize,
    /// Number of dense layers in each of the four blocks.
    pub block_config: [usize; 4],
    /// Channels produced by the stem convolution.
    pub num_init_features: usize,
    /// Bottleneck width multiplier (bottleneck = `bn_size * growth_rate`).
    pub bn_size: usize,
    /// Number of output classes.
    pub n_classes: usize,
}

impl Default for DenseNetConfig {
    fn default() -> Self {
        Self::densenet121(N_CLASSES)
    }
}

impl DenseNetConfig {
    /// DenseNet-121 with `n_classes` outputs.
    pub fn densenet121(n_classes: usize) -> Self {
        Self {
            growth_rate: 32,
            block_config: [6, 12, 24, 16],
            num_init_features: 64,
            bn_size: 4,
            n_classes,
        }
    }

    /// Create a custom config.
    pub fn new(
        growth_rate: usize,
        block_config: [usize; 4],
        num_init_features: usize,
        bn_size: usize,
        n_classes: usize,
    ) -> Self {
        Self {
            growth_rate,
            block_config,
            num_init_features,
            bn_size,
            n_classes,
        }
    }

    /// Output channels of each dense block, in stage order.
    ///
    /// For DenseNet-121 this is `[256, 512, 1024, 1024]`.
    pub fn stage_channels(&self) -> [usize; 4] {
        let mut channels = [0; 4];
        let mut features = self.num_init_features;
        for (idx, &n_layers) in self.block_config.iter().enumerate() {
            features += n_layers * self.growth_rate;
            channels[idx] = features;
            if idx + 1 < self.block_config.len() {
                features /= 2;
            }
        }
        channels
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ChexNet<B> {
        ChexNet::new(self.clone(), device)
    }
}

/// Bottleneck layer: BN-ReLU-Conv1×1-BN-ReLU-Conv3×3, concatenated to its input.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: FrozenBatchNorm<B>,
    conv1: Conv2d<B>,
    norm2: FrozenBatchNorm<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> DenseLayer<B> {
    /// Create a new dense layer.
    pub fn new(in_channels: usize, growth_rate: usize, bn_size: usize, device: &B::Device) -> Self {
        let bottleneck = bn_size * growth_rate;

        let norm1 = FrozenBatchNorm::new(in_channels, device);
        let conv1 = Conv2dConfig::new([in_channels, bottleneck], [1, 1])
            .with_bias(false)
            .init(device);
        let norm2 = FrozenBatchNorm::new(bottleneck, device);
        let conv2 = Conv2dConfig::new([bottleneck, growth_rate], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        Self {
            norm1,
            conv1,
            norm2,
            conv2,
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let relu = Relu::new();

        let out = relu.forward(self.norm1.forward(x.clone()));
        let out = self.conv1.forward(out);
        let out = relu.forward(self.norm2.forward(out));
        let new_features = self.conv2.forward(out);

        Tensor::cat(vec![x, new_features], 1)
    }
}

/// A stack of dense layers; the unit that is tapped.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    /// Create a block of `n_layers` layers starting from `in_channels`.
    pub fn new(
        n_layers: usize,
        in_channels: usize,
        growth_rate: usize,
        bn_size: usize,
        device: &B::Device,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|i| DenseLayer::new(in_channels + i * growth_rate, growth_rate, bn_size, device))
            .collect();
        Self { layers }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.layers.iter().fold(x, |out, layer| layer.forward(out))
    }
}

/// Transition between blocks: BN-ReLU-Conv1×1 halving channels, then 2×2 average pool.
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: FrozenBatchNorm<B>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
}

impl<B: Backend> Transition<B> {
    /// Create a new transition layer.
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: FrozenBatchNorm::new(in_channels, device),
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = Relu::new().forward(self.norm.forward(x));
        self.pool.forward(self.conv.forward(out))
    }
}

/// DenseNet feature extractor (everything before the classifier head).
#[derive(Module, Debug)]
pub struct DenseFeatures<B: Backend> {
    conv0: Conv2d<B>,
    norm0: FrozenBatchNorm<B>,
    pool0: MaxPool2d,
    blocks: Vec<DenseBlock<B>>,
    transitions: Vec<Transition<B>>,
    norm5: FrozenBatchNorm<B>,
}

impl<B: Backend> DenseFeatures<B> {
    /// Create the feature extractor described by `config`.
    pub fn new(config: &DenseNetConfig, device: &B::Device) -> Self {
        let conv0 = Conv2dConfig::new([3, config.num_init_features], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let norm0 = FrozenBatchNorm::new(config.num_init_features, device);
        let pool0 = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::with_capacity(config.block_config.len());
        let mut transitions = Vec::with_capacity(config.block_config.len() - 1);
        let mut features = config.num_init_features;

        for (idx, &n_layers) in config.block_config.iter().enumerate() {
            blocks.push(DenseBlock::new(
                n_layers,
                features,
                config.growth_rate,
                config.bn_size,
                device,
            ));
            features += n_layers * config.growth_rate;

            if idx + 1 < config.block_config.len() {
                transitions.push(Transition::new(features, features / 2, device));
                features /= 2;
            }
        }

        let norm5 = FrozenBatchNorm::new(features, device);

        Self {
            conv0,
            norm0,
            pool0,
            blocks,
            transitions,
            norm5,
        }
    }

    /// Forward pass reporting each dense block output to `tap`.
    pub fn forward_tapped(&self, x: Tensor<B, 4>, tap: &mut dyn StageTap<B>) -> Tensor<B, 4> {
        let relu = Relu::new();

        let out = relu.forward(self.norm0.forward(self.conv0.forward(x)));
        let mut out = self.pool0.forward(out);

        for (stage, block) in DenseStage::ALL.iter().zip(&self.blocks) {
            out = tap.on_stage_output(stage.name(), block.forward(out));
            if let Some(transition) = self.transitions.get(stage.index()) {
                out = transition.forward(out);
            }
        }

        self.norm5.forward(out)
    }
}

/// CheXNet: DenseNet-121 features with a multi-label sigmoid head.
#[derive(Module, Debug)]
pub struct ChexNet<B: Backend> {
    features: DenseFeatures<B>,
    gap: AdaptiveAvgPool2d,
    classifier: Linear<B>,
}

impl<B: Backend> ChexNet<B> {
    /// Create a new model.
    pub fn new(config: DenseNetConfig, device: &B::Device) -> Self {
        let features = DenseFeatures::new(&config, device);
        let final_channels = config.stage_channels()[3];
        let gap = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let classifier = LinearConfig::new(final_channels, config.n_classes).init(device);

        Self {
            features,
            gap,
            classifier,
        }
    }

    /// Number of output classes.
    pub fn n_classes(&self) -> usize {
        self.classifier.weight.val().dims()[1]
    }

    /// Logits with every dense block output reported to `tap`.
    pub fn forward_tapped(&self, x: Tensor<B, 4>, tap: &mut dyn StageTap<B>) -> Tensor<B, 2> {
        let out = self.features.forward_tapped(x, tap);
        let out = Relu::new().forward(out);
        let out = self.gap.forward(out);
        let [batch, channels, _, _] = out.dims();
        self.classifier.forward(out.reshape([batch, channels]))
    }

    /// Logits (pre-sigmoid class scores).
    pub fn forward_logits(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_tapped(x, &mut NoTap)
    }

    /// Forward pass returning per-class probabilities.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(x))
    }

    /// Probabilities averaged over a stack of crops of one image.
    ///
    /// # Arguments
    ///
    /// * `crops` - Crops of a single image, shape (n_crops, 3, height, width)
    ///
    /// # Returns
    ///
    /// Tensor of shape (1, n_classes).
    pub fn forward_crops(&self, crops: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(crops).mean_dim(0)
    }
}

impl<B: Backend> DenseLayer<B> {
    fn load_state(mut self, dict: &StateDict, prefix: &str, device: &B::Device) -> checkpoint::Result<Self> {
        self.norm1 = dict.batch_norm(self.norm1, &format!("{prefix}.norm1"), device)?;
        self.conv1 = dict.conv2d(self.conv1, &format!("{prefix}.conv1"), device)?;
        self.norm2 = dict.batch_norm(self.norm2, &format!("{prefix}.norm2"), device)?;
        self.conv2 = dict.conv2d(self.conv2, &format!("{prefix}.conv2"), device)?;
        Ok(self)
    }
}

impl<B: Backend> DenseBlock<B> {
    fn load_state(self, dict: &StateDict, prefix: &str, device: &B::Device) -> checkpoint::Result<Self> {
        let layers = self
            .layers
            .into_iter()
            .enumerate()
            .map(|(idx, layer)| layer.load_state(dict, &format!("{prefix}.layers.{idx}"), device))
            .collect::<checkpoint::Result<Vec<_>>>()?;
        Ok(Self { layers })
    }
}

impl<B: Backend> Transition<B> {
    fn load_state(mut self, dict: &StateDict, prefix: &str, device: &B::Device) -> checkpoint::Result<Self> {
        self.norm = dict.batch_norm(self.norm, &format!("{prefix}.norm"), device)?;
        self.conv = dict.conv2d(self.conv, &format!("{prefix}.conv"), device)?;
        Ok(self)
    }
}

impl<B: Backend> DenseFeatures<B> {
    fn load_state(mut self, dict: &StateDict, prefix: &str, device: &B::Device) -> checkpoint::Result<Self> {
        self.conv0 = dict.conv2d(self.conv0, &format!("{prefix}.conv0"), device)?;
        self.norm0 = dict.batch_norm(self.norm0, &format!("{prefix}.norm0"), device)?;
        self.blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(idx, block)| block.load_state(dict, &format!("{prefix}.blocks.{idx}"), device))
            .collect::<checkpoint::Result<Vec<_>>>()?;
        self.transitions = self
            .transitions
            .into_iter()
            .enumerate()
            .map(|(idx, t)| t.load_state(dict, &format!("{prefix}.transitions.{idx}"), device))
            .collect::<checkpoint::Result<Vec<_>>>()?;
        self.norm5 = dict.batch_norm(self.norm5, &format!("{prefix}.norm5"), device)?;
        Ok(self)
    }
}

impl<B: Backend> ChexNet<B> {
    /// Replace every parameter with its entry in `dict`.
    ///
    /// Keys are record paths such as `features.blocks.0.layers.0.conv1.weight`;
    /// use [`StateDict::from_pytorch`] for dictionaries with PyTorch names.
    ///
    /// # Errors
    ///
    /// [`checkpoint::CheckpointError::MissingKey`] or
    /// [`checkpoint::CheckpointError::ShapeMismatch`] when `dict` does not
    /// describe this architecture.
    pub fn load_state_dict(mut self, dict: &StateDict, device: &B::Device) -> checkpoint::Result<Self> {
        self.features = self.features.load_state(dict, "features", device)?;
        self.classifier = dict.linear(self.classifier, "classifier", device)?;
        Ok(self)
    }
}

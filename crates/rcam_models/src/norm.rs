//! Batch normalization with frozen statistics.

use burn::module::{Param, RunningState};
use burn::prelude::*;

/// Batch normalization that always uses its running statistics.
///
/// Unlike burn's `BatchNorm`, batch statistics are never used, including on
/// autodiff backends.
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    /// Per-channel scale.
    pub gamma: Param<Tensor<B, 1>>,
    /// Per-channel shift.
    pub beta: Param<Tensor<B, 1>>,
    /// Running mean recorded during training.
    pub running_mean: RunningState<Tensor<B, 1>>,
    /// Running variance recorded during training.
    pub running_var: RunningState<Tensor<B, 1>>,
    epsilon: f64,
}

impl<B: Backend> FrozenBatchNorm<B> {
    /// Create an identity normalization over `num_features` channels.
    pub fn new(num_features: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([num_features], device)),
            beta: Param::from_tensor(Tensor::zeros([num_features], device)),
            running_mean: RunningState::new(Tensor::zeros([num_features], device)),
            running_var: RunningState::new(Tensor::ones([num_features], device)),
            epsilon: 1e-5,
        }
    }

    /// Number of normalized channels.
    pub fn num_features(&self) -> usize {
        self.gamma.val().dims()[0]
    }

    /// Normalize an input of shape (batch, channels, height, width).
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let channels = self.num_features();
        let shape = [1, channels, 1, 1];

        let mean = self.running_mean.value().reshape(shape);
        let std = self
            .running_var
            .value()
            .add_scalar(self.epsilon)
            .sqrt()
            .reshape(shape);
        let gamma = self.gamma.val().reshape(shape);
        let beta = self.beta.val().reshape(shape);

        (x - mean) / std * gamma + beta
    }
}

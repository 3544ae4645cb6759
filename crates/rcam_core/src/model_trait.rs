//! Classifier traits for relevance capture.
//!
//! A classifier exposes its internal stages by name and accepts a
//! [`StageTap`] during the forward pass. The tap sees the output of every
//! named stage and returns the tensor the classifier continues with, which
//! lets an explanation capture a stage's activation (and later its gradient)
//! without the classifier knowing anything about explanations.

use burn::prelude::*;

/// Observer invoked with the output of each named stage during a forward pass.
pub trait StageTap<B: Backend> {
    /// Called once per named stage, in execution order.
    ///
    /// # Arguments
    ///
    /// * `stage` - Stage name, one of [`TappableClassifier::stage_names`]
    /// * `output` - The stage output of shape (batch, channels, height, width)
    ///
    /// # Returns
    ///
    /// The tensor the forward pass continues with. Implementations must
    /// return a tensor holding the same values as `output`.
    fn on_stage_output(&mut self, stage: &str, output: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Tap that observes nothing and passes every stage output through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTap;

impl<B: Backend> StageTap<B> for NoTap {
    fn on_stage_output(&mut self, _stage: &str, output: Tensor<B, 4>) -> Tensor<B, 4> {
        output
    }
}

/// Image classifier whose named stages can be tapped.
///
/// Scores returned by [`logits`](Self::logits) are pre-activation class
/// scores; the backward pass of an explanation starts from them.
pub trait TappableClassifier<B: Backend> {
    /// Names of the stages that can be tapped, in execution order.
    fn stage_names(&self) -> Vec<&'static str>;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Forward pass with a tap attached.
    ///
    /// # Arguments
    ///
    /// * `x` - Input images of shape (batch, 3, height, width)
    /// * `tap` - Observer called after every named stage
    ///
    /// # Returns
    ///
    /// Logits of shape (batch, n_classes)
    fn logits_tapped(&self, x: Tensor<B, 4>, tap: &mut dyn StageTap<B>) -> Tensor<B, 2>;

    /// Forward pass without observation.
    fn logits(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.logits_tapped(x, &mut NoTap)
    }

    /// Whether `stage` is one of [`stage_names`](Self::stage_names).
    fn has_stage(&self, stage: &str) -> bool {
        self.stage_names().iter().any(|name| *name == stage)
    }
}

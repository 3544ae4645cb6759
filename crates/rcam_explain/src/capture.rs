//! Stage taps: activation and gradient capture at a named classifier stage.
//!
//! A [`TapInstaller`] validates a stage against a classifier and hands out
//! an immutable [`TapHandle`]. Each explanation request calls
//! [`TapHandle::begin`] to get its own [`StageCapture`], which drives the
//! forward and backward passes and holds the captured tensors.

use std::collections::HashSet;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rcam_core::{CamError, CaptureKind, FeatureShape, Result, StageTap, TappableClassifier};

/// Tracks which stages of one classifier currently carry a tap.
#[derive(Debug, Clone, Default)]
pub struct TapInstaller {
    installed: HashSet<String>,
}

impl TapInstaller {
    /// Create an installer with no taps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a tap on `stage` of `classifier`.
    ///
    /// # Errors
    ///
    /// * [`CamError::InvalidStage`] if the classifier has no such stage
    /// * [`CamError::AlreadyInstalled`] if the stage already carries a tap
    pub fn install<B, M>(&mut self, classifier: &M, stage: &str) -> Result<TapHandle>
    where
        B: Backend,
        M: TappableClassifier<B> + ?Sized,
    {
        if !classifier.has_stage(stage) {
            return Err(CamError::InvalidStage {
                stage: stage.to_string(),
                available: classifier
                    .stage_names()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            });
        }
        if !self.installed.insert(stage.to_string()) {
            return Err(CamError::AlreadyInstalled(stage.to_string()));
        }

        tracing::debug!("Installed tap on stage {}", stage);
        Ok(TapHandle {
            stage: stage.to_string(),
        })
    }

    /// Remove the tap behind `handle`. Returns `false` if it was not installed here.
    pub fn teardown(&mut self, handle: TapHandle) -> bool {
        let removed = self.installed.remove(&handle.stage);
        if removed {
            tracing::debug!("Removed tap from stage {}", handle.stage);
        }
        removed
    }

    /// Whether `stage` currently carries a tap.
    pub fn is_installed(&self, stage: &str) -> bool {
        self.installed.contains(stage)
    }

    /// Number of installed taps.
    pub fn len(&self) -> usize {
        self.installed.len()
    }

    /// Whether no tap is installed.
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

/// Registration of a tap on one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapHandle {
    stage: String,
}

impl TapHandle {
    /// The tapped stage.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Start a request with an empty capture.
    pub fn begin<B: AutodiffBackend>(&self) -> StageCapture<B> {
        StageCapture {
            stage: self.stage.clone(),
            slot: CaptureSlot::default(),
        }
    }
}

/// Latest activation and gradient of the tapped stage.
#[derive(Debug)]
struct CaptureSlot<B: AutodiffBackend> {
    activation: Option<Tensor<B, 4>>,
    gradient: Option<Tensor<B::InnerBackend, 4>>,
}

impl<B: AutodiffBackend> Default for CaptureSlot<B> {
    fn default() -> Self {
        Self {
            activation: None,
            gradient: None,
        }
    }
}

impl<B: AutodiffBackend> CaptureSlot<B> {
    fn clear(&mut self) {
        self.activation = None;
        self.gradient = None;
    }
}

/// Tap handed to the classifier during [`StageCapture::forward`].
struct SlotTap<'a, B: AutodiffBackend> {
    stage: &'a str,
    slot: &'a mut CaptureSlot<B>,
}

impl<B: AutodiffBackend> StageTap<B> for SlotTap<'_, B> {
    fn on_stage_output(&mut self, stage: &str, output: Tensor<B, 4>) -> Tensor<B, 4> {
        if stage != self.stage {
            return output;
        }
        // Same values, but a leaf of the graph so its gradient is retained.
        let leaf = output.detach().require_grad();
        self.slot.activation = Some(leaf.clone());
        leaf
    }
}

/// Per-request capture of one stage's activation and gradient.
///
/// Holds a single slot: every [`forward`](Self::forward) replaces the
/// activation and discards any gradient from an earlier pass.
#[derive(Debug)]
pub struct StageCapture<B: AutodiffBackend> {
    stage: String,
    slot: CaptureSlot<B>,
}

impl<B: AutodiffBackend> StageCapture<B> {
    /// The captured stage.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Run the classifier, capturing the stage output.
    ///
    /// # Returns
    ///
    /// Logits of shape (batch, n_classes), identical to an untapped forward pass.
    ///
    /// # Errors
    ///
    /// [`CamError::MissingCapture`] if the classifier never produced the stage.
    pub fn forward<M>(&mut self, classifier: &M, input: Tensor<B, 4>) -> Result<Tensor<B, 2>>
    where
        M: TappableClassifier<B> + ?Sized,
    {
        self.slot.clear();
        let mut tap = SlotTap {
            stage: &self.stage,
            slot: &mut self.slot,
        };
        let logits = classifier.logits_tapped(input, &mut tap);

        if self.slot.activation.is_none() {
            return Err(CamError::MissingCapture(CaptureKind::Activation));
        }
        Ok(logits)
    }

    /// Backpropagate `objective` and record the gradient at the stage.
    ///
    /// # Errors
    ///
    /// * [`CamError::MissingCapture`] if no forward pass ran, or the
    ///   objective does not depend on the stage output
    /// * [`CamError::ShapeMismatch`] if the gradient shape differs from the activation
    pub fn backward(&mut self, objective: Tensor<B, 1>) -> Result<()> {
        let activation = self
            .slot
            .activation
            .as_ref()
            .ok_or(CamError::MissingCapture(CaptureKind::Activation))?;

        let grads = objective.backward();
        let gradient = activation
            .grad(&grads)
            .ok_or(CamError::MissingCapture(CaptureKind::Gradient))?;

        FeatureShape::from(activation.dims()).ensure_matches(&FeatureShape::from(gradient.dims()))?;
        self.slot.gradient = Some(gradient);
        Ok(())
    }

    /// The latest activation, detached from the graph.
    pub fn get_activation(&self) -> Option<Tensor<B::InnerBackend, 4>> {
        self.slot.activation.as_ref().map(|a| a.clone().inner())
    }

    /// The gradient recorded by the latest backward pass.
    pub fn get_gradient(&self) -> Option<Tensor<B::InnerBackend, 4>> {
        self.slot.gradient.clone()
    }

    /// Shape of the captured activation.
    pub fn shape(&self) -> Option<FeatureShape> {
        self.slot
            .activation
            .as_ref()
            .map(|a| FeatureShape::from(a.dims()))
    }

    /// Consume the capture, returning `(activation, gradient)`.
    pub fn into_parts(self) -> Result<(Tensor<B::InnerBackend, 4>, Tensor<B::InnerBackend, 4>)> {
        let activation = self
            .slot
            .activation
            .ok_or(CamError::MissingCapture(CaptureKind::Activation))?;
        let gradient = self
            .slot
            .gradient
            .ok_or(CamError::MissingCapture(CaptureKind::Gradient))?;
        Ok((activation.inner(), gradient))
    }
}

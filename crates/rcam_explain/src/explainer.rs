//! End-to-end explanation of one image.

use std::marker::PhantomData;

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use image::RgbImage;
use ndarray::Array2;
use rcam_core::{label_class, CamError, Result, TappableClassifier};

use crate::capture::{TapHandle, TapInstaller};
use crate::config::ExplainConfig;
use crate::relevance::{compute_relevance, surface_to_array, ChannelWeighting, RelevanceRule};
use crate::render::{apply_mask, compose_panel, heatmap_image, normalize_and_resize, overlay};

/// Result of explaining one image.
#[derive(Debug, Clone)]
pub struct Explanation {
    /// Per-class probabilities, averaged over the batch.
    pub probabilities: Vec<f32>,
    /// Explained class.
    pub target_class: usize,
    /// Tapped stage.
    pub stage: String,
    /// Rule that produced the surface.
    pub rule: RelevanceRule,
    /// Clamped relevance surface at stage resolution.
    pub surface: Array2<f32>,
    /// Normalized heatmap at output resolution, values in `[0, 1]`.
    pub heatmap: Array2<f32>,
    /// Cutoff used for the mask.
    pub cutoff: f32,
    /// Heatmap thresholded at `cutoff`.
    pub mask: Array2<bool>,
}

impl Explanation {
    /// Colour image of the heatmap.
    pub fn heatmap_image(&self) -> RgbImage {
        heatmap_image(&self.heatmap)
    }

    /// Heatmap blended over `base`; `alpha` is the heatmap weight.
    pub fn overlay(&self, base: &RgbImage, alpha: f32) -> Result<RgbImage> {
        overlay(base, &self.heatmap_image(), alpha)
    }

    /// `base` with everything outside the mask blacked out.
    pub fn masked(&self, base: &RgbImage) -> Result<RgbImage> {
        apply_mask(base, &self.mask)
    }

    /// Original, overlay and masked image side by side.
    pub fn panel(&self, base: &RgbImage, alpha: f32) -> Result<RgbImage> {
        Ok(compose_panel(&[
            base.clone(),
            self.overlay(base, alpha)?,
            self.masked(base)?,
        ]))
    }

    /// Probability of the explained class.
    pub fn target_probability(&self) -> f32 {
        self.probabilities
            .get(self.target_class)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Runs forward, backward, relevance and rendering for a tapped classifier.
///
/// # Example
///
/// ```rust,ignore
/// use rcam_explain::{ExplainConfig, Explainer};
///
/// let explainer = Explainer::new(&model, ExplainConfig::default())?;
/// let explanation = explainer.explain(input, Some(&labels))?;
/// explanation.panel(&image, 0.5)?.save("panel.png")?;
/// ```
pub struct Explainer<'m, B, M>
where
    B: AutodiffBackend,
    M: TappableClassifier<B> + ?Sized,
{
    classifier: &'m M,
    installer: TapInstaller,
    handle: TapHandle,
    config: ExplainConfig,
    _backend: PhantomData<B>,
}

impl<'m, B, M> Explainer<'m, B, M>
where
    B: AutodiffBackend,
    M: TappableClassifier<B> + ?Sized,
{
    /// Tap `config.stage` of `classifier`.
    ///
    /// # Errors
    ///
    /// [`CamError::InvalidStage`] if the classifier has no such stage.
    pub fn new(classifier: &'m M, config: ExplainConfig) -> Result<Self> {
        let mut installer = TapInstaller::new();
        let handle = installer.install(classifier, &config.stage)?;
        Ok(Self {
            classifier,
            installer,
            handle,
            config,
            _backend: PhantomData,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &ExplainConfig {
        &self.config
    }

    /// Explain `input`, choosing the class from the configuration, then
    /// the first positive entry of `label`, then the top prediction.
    ///
    /// An all-zero label (no finding) falls through to the top prediction.
    ///
    /// # Arguments
    ///
    /// * `input` - Preprocessed images of shape (batch, 3, height, width)
    /// * `label` - Optional ground-truth label vector of length n_classes
    pub fn explain(&self, input: Tensor<B, 4>, label: Option<&[f32]>) -> Result<Explanation> {
        let mut capture = self.handle.begin::<B>();
        let logits = capture.forward(self.classifier, input)?;
        let probabilities = mean_probabilities(logits.clone())?;

        let n_classes = probabilities.len();
        let selector = self.config.selector();
        let labelled = match label {
            Some(label) if label.len() != n_classes => {
                return Err(CamError::InvalidShape {
                    expected: format!("label of length {n_classes}"),
                    got: format!("length {}", label.len()),
                });
            }
            Some(label) => label_class(label),
            None => None,
        };
        let target_class = match (selector.class, labelled) {
            (None, Some(class)) => class,
            _ => selector.resolve_class(&probabilities)?,
        };

        let rule = self.config.rule;
        let objective = rule.backward_seed().objective(logits, target_class)?;
        capture.backward(objective)?;

        let (activation, gradient) = capture.into_parts()?;
        let surface = surface_to_array(compute_relevance(activation, gradient, &rule)?)?;
        let heatmap =
            normalize_and_resize(&surface, self.config.output_height, self.config.output_width);
        let (cutoff, mask) = self.config.cutoff.mask(&heatmap);

        tracing::info!(
            "Explained class {} (p={:.4}) at {} with {}: {} of {} pixels above {:.4}",
            target_class,
            probabilities[target_class],
            self.handle.stage(),
            rule,
            mask.iter().filter(|m| **m).count(),
            mask.len(),
            cutoff
        );

        Ok(Explanation {
            probabilities,
            target_class,
            stage: self.handle.stage().to_string(),
            rule,
            surface,
            heatmap,
            cutoff,
            mask,
        })
    }

    /// Explain `input` for an explicit class, ignoring the configured one.
    pub fn explain_class(&self, input: Tensor<B, 4>, class: usize) -> Result<Explanation> {
        let mut config = self.config.clone();
        config.class = Some(class);
        Explainer::<B, M> {
            classifier: self.classifier,
            installer: self.installer.clone(),
            handle: self.handle.clone(),
            config,
            _backend: PhantomData,
        }
        .explain(input, None)
    }

    /// Remove the tap and return the classifier.
    pub fn finish(mut self) -> &'m M {
        self.installer.teardown(self.handle);
        self.classifier
    }
}

fn mean_probabilities<B: AutodiffBackend>(logits: Tensor<B, 2>) -> Result<Vec<f32>> {
    sigmoid(logits.inner())
        .mean_dim(0)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CamError::Other(format!("Failed to read probabilities: {e:?}")))
}

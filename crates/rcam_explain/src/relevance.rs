//! Relevance surfaces from a captured activation and its gradient.
//!
//! Every rule reduces `(activation, gradient)` to one weight per channel;
//! the surface is the channel-weighted activation summed over channels and
//! batch, with negative evidence clamped away.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use ndarray::Array2;
use rcam_core::{CamError, FeatureShape, Result};
use serde::{Deserialize, Serialize};

/// Class weighting of the logits that the backward pass starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackwardSeed {
    /// `1` for the target class, `0` elsewhere.
    OneHot,
    /// `1` for the target class, `-1/N` for each of the `N` other classes.
    Contrastive,
}

impl BackwardSeed {
    /// Per-class seed values for `class` out of `n_classes`.
    pub fn weights(&self, class: usize, n_classes: usize) -> Vec<f32> {
        let others = n_classes.saturating_sub(1).max(1) as f32;
        (0..n_classes)
            .map(|idx| match (self, idx == class) {
                (_, true) => 1.0,
                (BackwardSeed::OneHot, false) => 0.0,
                (BackwardSeed::Contrastive, false) => -1.0 / others,
            })
            .collect()
    }

    /// Scalar objective `sum_j seed_j * logit_j`, summed over the batch.
    ///
    /// # Arguments
    ///
    /// * `logits` - Pre-sigmoid class scores of shape (batch, n_classes)
    /// * `class` - Target class index
    pub fn objective<B: Backend>(&self, logits: Tensor<B, 2>, class: usize) -> Result<Tensor<B, 1>> {
        let [_, n_classes] = logits.dims();
        if class >= n_classes {
            return Err(CamError::InvalidClass { class, n_classes });
        }

        let seed = Tensor::<B, 1>::from_data(
            TensorData::new(self.weights(class, n_classes), [n_classes]),
            &logits.device(),
        )
        .reshape([1, n_classes]);

        Ok((logits * seed).sum())
    }
}

/// Strategy turning an activation and its gradient into channel weights.
pub trait ChannelWeighting {
    /// Channel weights of shape (batch, channels, 1, 1).
    ///
    /// Both inputs have shape (batch, channels, height, width).
    fn weight_channels<B: Backend>(&self, activation: Tensor<B, 4>, gradient: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Seed for the backward pass that produces `gradient`.
    fn backward_seed(&self) -> BackwardSeed;
}

/// Grad-CAM: spatially averaged gradients.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradCam;

impl ChannelWeighting for GradCam {
    fn weight_channels<B: Backend>(&self, _activation: Tensor<B, 4>, gradient: Tensor<B, 4>) -> Tensor<B, 4> {
        gradient.mean_dim(3).mean_dim(2)
    }

    fn backward_seed(&self) -> BackwardSeed {
        BackwardSeed::OneHot
    }
}

/// Grad-CAM++: positive gradients weighted by per-location coefficients.
///
/// `alpha = G^2 / (2 G^2 + sum_hw A G^3)`, zero where the denominator vanishes,
/// and `w_c = sum_hw alpha * relu(G)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradCamPlusPlus;

impl ChannelWeighting for GradCamPlusPlus {
    fn weight_channels<B: Backend>(&self, activation: Tensor<B, 4>, gradient: Tensor<B, 4>) -> Tensor<B, 4> {
        let grad_2 = gradient.clone() * gradient.clone();
        let grad_3 = grad_2.clone() * gradient.clone();

        let spatial_sum = (activation * grad_3).sum_dim(3).sum_dim(2);
        let denominator = grad_2.clone() * 2.0 + spatial_sum;
        let vanishing = denominator.clone().equal_elem(0.0);
        let denominator = denominator.mask_fill(vanishing.clone(), 1.0);
        let alpha = (grad_2 / denominator).mask_fill(vanishing, 0.0);

        (alpha * gradient.clamp_min(0.0)).sum_dim(3).sum_dim(2)
    }

    fn backward_seed(&self) -> BackwardSeed {
        BackwardSeed::OneHot
    }
}

/// Relevance-CAM: spatially pooled `A * G` under a contrastive seed.
///
/// `A * G` is the LRP-0 relevance of the stage for piecewise-linear paths
/// to the output, so its spatial mean is the relevance carried by each
/// channel. The contrastive seed subtracts the evidence shared with other
/// classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceCam;

impl ChannelWeighting for RelevanceCam {
    fn weight_channels<B: Backend>(&self, activation: Tensor<B, 4>, gradient: Tensor<B, 4>) -> Tensor<B, 4> {
        (activation * gradient).mean_dim(3).mean_dim(2)
    }

    fn backward_seed(&self) -> BackwardSeed {
        BackwardSeed::Contrastive
    }
}

/// Available relevance rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelevanceRule {
    /// See [`GradCam`].
    #[serde(rename = "grad-cam")]
    GradCam,
    /// See [`GradCamPlusPlus`].
    #[serde(rename = "grad-cam++")]
    GradCamPlusPlus,
    /// See [`RelevanceCam`].
    #[default]
    #[serde(rename = "relevance-cam")]
    RelevanceCam,
}

impl RelevanceRule {
    /// All rules.
    pub const ALL: [RelevanceRule; 3] = [
        RelevanceRule::GradCam,
        RelevanceRule::GradCamPlusPlus,
        RelevanceRule::RelevanceCam,
    ];

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            RelevanceRule::GradCam => "grad-cam",
            RelevanceRule::GradCamPlusPlus => "grad-cam++",
            RelevanceRule::RelevanceCam => "relevance-cam",
        }
    }
}

impl ChannelWeighting for RelevanceRule {
    fn weight_channels<B: Backend>(&self, activation: Tensor<B, 4>, gradient: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            RelevanceRule::GradCam => GradCam.weight_channels(activation, gradient),
            RelevanceRule::GradCamPlusPlus => GradCamPlusPlus.weight_channels(activation, gradient),
            RelevanceRule::RelevanceCam => RelevanceCam.weight_channels(activation, gradient),
        }
    }

    fn backward_seed(&self) -> BackwardSeed {
        match self {
            RelevanceRule::GradCam => GradCam.backward_seed(),
            RelevanceRule::GradCamPlusPlus => GradCamPlusPlus.backward_seed(),
            RelevanceRule::RelevanceCam => RelevanceCam.backward_seed(),
        }
    }
}

impl fmt::Display for RelevanceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RelevanceRule {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "gradcam" => Ok(RelevanceRule::GradCam),
            "gradcam++" | "gradcampp" | "gradcamplusplus" => Ok(RelevanceRule::GradCamPlusPlus),
            "relevancecam" | "rcam" => Ok(RelevanceRule::RelevanceCam),
            _ => Err(CamError::Other(format!(
                "Unknown relevance rule '{s}': expected one of grad-cam, grad-cam++, relevance-cam"
            ))),
        }
    }
}

/// Compute the relevance surface of a captured stage.
///
/// # Arguments
///
/// * `activation` - Stage output of shape (batch, channels, height, width)
/// * `gradient` - Gradient of the objective w.r.t. the stage output, same shape
/// * `rule` - Channel weighting rule
///
/// # Returns
///
/// Non-negative surface of shape (height, width). A batch of several images
/// yields the sum of their surfaces.
///
/// # Errors
///
/// [`CamError::ShapeMismatch`] if the two shapes differ.
pub fn compute_relevance<B: Backend, R: ChannelWeighting>(
    activation: Tensor<B, 4>,
    gradient: Tensor<B, 4>,
    rule: &R,
) -> Result<Tensor<B, 2>> {
    let shape = FeatureShape::from(activation.dims());
    shape.ensure_matches(&FeatureShape::from(gradient.dims()))?;

    let weights = rule.weight_channels(activation.clone(), gradient);
    let [height, width] = shape.spatial();

    let surface = (activation * weights)
        .sum_dim(1)
        .sum_dim(0)
        .reshape([height, width])
        .clamp_min(0.0);

    Ok(surface)
}

/// Copy a 2D tensor into an `ndarray` for rendering.
pub fn surface_to_array<B: Backend>(surface: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [height, width] = surface.dims();
    let values = surface
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CamError::Other(format!("Failed to read surface: {e:?}")))?;

    Array2::from_shape_vec((height, width), values).map_err(|e| CamError::InvalidShape {
        expected: format!("[{height}, {width}]"),
        got: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use rand::Rng;
    use rand_chacha::ChaCha8Rng;
    use rcam_core::Seed;

    type TestBackend = NdArray;

    fn tensor4(values: Vec<f32>, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn random4(rng: &mut ChaCha8Rng, shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        let n = shape.iter().product();
        tensor4((0..n).map(|_| rng.gen_range(-1.0..1.0)).collect(), shape)
    }

    /// Ones activation of shape 1x2x3x3 and a gradient constant per channel.
    fn per_channel(grad: [f32; 2]) -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 4>) {
        let activation = tensor4(vec![1.0; 18], [1, 2, 3, 3]);
        let gradient: Vec<f32> = grad.iter().flat_map(|&g| vec![g; 9]).collect();
        (activation, tensor4(gradient, [1, 2, 3, 3]))
    }

    fn values(surface: Tensor<TestBackend, 2>) -> Vec<f32> {
        surface.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_cancelling_channels_give_zero_surface() {
        for rule in [RelevanceRule::GradCam, RelevanceRule::RelevanceCam] {
            let (activation, gradient) = per_channel([1.0, -1.0]);
            let surface = compute_relevance(activation, gradient, &rule).unwrap();
            assert_eq!(surface.dims(), [3, 3]);
            assert!(values(surface).iter().all(|v| v.abs() < 1e-6), "{rule}");
        }
    }

    #[test]
    fn test_unbalanced_channels_give_unit_surface() {
        for rule in [RelevanceRule::GradCam, RelevanceRule::RelevanceCam] {
            let (activation, gradient) = per_channel([2.0, -1.0]);
            let surface = compute_relevance(activation, gradient, &rule).unwrap();
            assert!(values(surface).iter().all(|v| (v - 1.0).abs() < 1e-6), "{rule}");
        }
    }

    #[test]
    fn test_grad_cam_plus_plus_weights() {
        let (activation, gradient) = per_channel([1.0, -1.0]);
        let weights = GradCamPlusPlus.weight_channels(activation, gradient);

        // alpha = 1 / (2 + 9) on channel 0; negative gradients contribute nothing.
        let w = weights.into_data().to_vec::<f32>().unwrap();
        assert!((w[0] - 9.0 / 11.0).abs() < 1e-5);
        assert!(w[1].abs() < 1e-6);
    }

    #[test]
    fn test_grad_cam_plus_plus_zero_gradient() {
        let activation = tensor4(vec![1.0; 18], [1, 2, 3, 3]);
        let gradient = tensor4(vec![0.0; 18], [1, 2, 3, 3]);

        let surface = compute_relevance(activation, gradient, &GradCamPlusPlus).unwrap();

        assert!(values(surface).iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_shape_independent_of_channels() {
        let mut rng = Seed::new(7).to_rng();
        for channels in [1, 3, 16] {
            let activation = random4(&mut rng, [1, channels, 5, 4]);
            let gradient = random4(&mut rng, [1, channels, 5, 4]);
            for rule in RelevanceRule::ALL {
                let surface = compute_relevance(activation.clone(), gradient.clone(), &rule).unwrap();
                assert_eq!(surface.dims(), [5, 4]);
            }
        }
    }

    #[test]
    fn test_surface_is_non_negative() {
        let mut rng = Seed::new(42).to_rng();
        for _ in 0..5 {
            let activation = random4(&mut rng, [2, 6, 7, 7]);
            let gradient = random4(&mut rng, [2, 6, 7, 7]);
            for rule in RelevanceRule::ALL {
                let surface = compute_relevance(activation.clone(), gradient.clone(), &rule).unwrap();
                assert!(values(surface).iter().all(|v| *v >= 0.0));
            }
        }
    }

    #[test]
    fn test_different_gradients_give_different_surfaces() {
        let mut rng = Seed::new(3).to_rng();
        let activation = random4(&mut rng, [1, 4, 6, 6]).abs();
        let first = tensor4(
            [vec![1.0; 36], vec![0.0; 36], vec![0.0; 36], vec![0.0; 36]].concat(),
            [1, 4, 6, 6],
        );
        let second = tensor4(
            [vec![0.0; 36], vec![0.0; 36], vec![0.0; 36], vec![1.0; 36]].concat(),
            [1, 4, 6, 6],
        );

        let a = values(compute_relevance(activation.clone(), first, &RelevanceCam).unwrap());
        let b = values(compute_relevance(activation, second, &RelevanceCam).unwrap());

        let diff = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).fold(0.0f32, f32::max);
        assert!(diff > 1e-4);
    }

    #[test]
    fn test_batch_surfaces_are_summed() {
        let (activation, gradient) = per_channel([2.0, -1.0]);
        let activation = Tensor::cat(vec![activation.clone(), activation], 0);
        let gradient = Tensor::cat(vec![gradient.clone(), gradient], 0);

        let surface = compute_relevance(activation, gradient, &GradCam).unwrap();

        assert_eq!(surface.dims(), [3, 3]);
        assert!(values(surface).iter().all(|v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_shape_mismatch() {
        let activation = tensor4(vec![0.0; 18], [1, 2, 3, 3]);
        let gradient = tensor4(vec![0.0; 12], [1, 3, 2, 2]);

        let err = compute_relevance(activation, gradient, &GradCam).unwrap_err();
        assert!(matches!(err, CamError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_seed_weights() {
        assert_eq!(BackwardSeed::OneHot.weights(1, 3), vec![0.0, 1.0, 0.0]);
        assert_eq!(BackwardSeed::Contrastive.weights(0, 3), vec![1.0, -0.5, -0.5]);
        assert_eq!(BackwardSeed::Contrastive.weights(0, 1), vec![1.0]);
    }

    #[test]
    fn test_objective() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 4.0], [1, 3]),
            &device,
        );

        let one_hot: f32 = BackwardSeed::OneHot
            .objective(logits.clone(), 2)
            .unwrap()
            .into_scalar()
            .elem();
        let contrastive: f32 = BackwardSeed::Contrastive
            .objective(logits.clone(), 2)
            .unwrap()
            .into_scalar()
            .elem();

        assert!((one_hot - 4.0).abs() < 1e-6);
        assert!((contrastive - 2.5).abs() < 1e-6);
        assert!(matches!(
            BackwardSeed::OneHot.objective(logits, 3),
            Err(CamError::InvalidClass { class: 3, n_classes: 3 })
        ));
    }

    #[test]
    fn test_rule_parsing() {
        assert_eq!("grad-cam".parse::<RelevanceRule>().unwrap(), RelevanceRule::GradCam);
        assert_eq!("GradCAM++".parse::<RelevanceRule>().unwrap(), RelevanceRule::GradCamPlusPlus);
        assert_eq!("relevance_cam".parse::<RelevanceRule>().unwrap(), RelevanceRule::RelevanceCam);
        assert!("lrp".parse::<RelevanceRule>().is_err());
        assert_eq!(RelevanceRule::default(), RelevanceRule::RelevanceCam);
        assert_eq!(RelevanceRule::GradCamPlusPlus.backward_seed(), BackwardSeed::OneHot);
    }

    #[test]
    fn test_rule_serde_names() {
        let json = serde_json::to_string(&RelevanceRule::GradCamPlusPlus).unwrap();
        assert_eq!(json, "\"grad-cam++\"");
        let rule: RelevanceRule = serde_json::from_str("\"relevance-cam\"").unwrap();
        assert_eq!(rule, RelevanceRule::RelevanceCam);
    }

    #[test]
    fn test_surface_to_array() {
        let surface = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0], [2, 3]),
            &Default::default(),
        );
        let array = surface_to_array(surface).unwrap();
        assert_eq!(array.dim(), (2, 3));
        assert_eq!(array[[1, 2]], 5.0);
    }
}

//! # rcam_explain
//!
//! Relevance-CAM for tappable classifiers.
//!
//! This crate provides:
//! - [`TapInstaller`] / [`StageCapture`]: activation and gradient capture at a named stage
//! - [`compute_relevance`] with the [`GradCam`], [`GradCamPlusPlus`] and
//!   [`RelevanceCam`] channel weightings
//! - [`render`]: normalization, resampling, thresholding and colour output
//! - [`Explainer`]: the whole pipeline for one image

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod capture;
mod config;
mod explainer;
mod relevance;
pub mod render;

pub use capture::{StageCapture, TapHandle, TapInstaller};
pub use config::ExplainConfig;
pub use explainer::{Explainer, Explanation};
pub use relevance::{
    compute_relevance, surface_to_array, BackwardSeed, ChannelWeighting, GradCam,
    GradCamPlusPlus, RelevanceCam, RelevanceRule,
};
pub use render::{
    apply_mask, area_downsample, compose_panel, heatmap_image, normalize, normalize_and_resize,
    overlay, resize_bilinear, seismic, threshold, CutoffPolicy,
};

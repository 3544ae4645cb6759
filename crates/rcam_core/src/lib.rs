//! # rcam_core
//!
//! Core types and traits for rcam, Relevance-CAM explanations for chest X-ray
//! classifiers.
//!
//! This crate provides:
//! - [`CamError`] and the [`Result`] alias shared by the explanation pipeline
//! - [`FeatureShape`] for `(B, C, H, W)` feature map metadata
//! - [`TargetSelector`] naming the tapped stage and the explained class
//! - [`TappableClassifier`] and [`StageTap`], the seam between a classifier and
//!   the capture of its intermediate activations
//! - [`Seed`] for deterministic random number generation
//!
//! ## Shape Convention
//!
//! Feature maps follow the convention `(B, C, H, W)`:
//! - `B`: Batch size (one image per explanation request)
//! - `C`: Channels of the tapped stage
//! - `H`, `W`: Spatial grid of the tapped stage
//!
//! ## Example
//!
//! ```rust,ignore
//! use rcam_core::{FeatureShape, TargetSelector};
//!
//! let selector = TargetSelector::new("denseblock4").with_class(2);
//! let shape = FeatureShape::new(1, 1024, 7, 7);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod model_trait;
mod seed;
mod selector;
mod shape;

pub use error::{CamError, CaptureKind, Result};
pub use model_trait::{NoTap, StageTap, TappableClassifier};
pub use seed::Seed;
pub use selector::{argmax, label_class, TargetSelector};
pub use shape::FeatureShape;

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;
}

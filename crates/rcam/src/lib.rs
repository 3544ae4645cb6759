//! # rcam
//!
//! Relevance-CAM explanations for a DenseNet-121 chest X-ray classifier.
//!
//! - **Models**: CheXNet (DenseNet-121 with a 14-way sigmoid head), checkpoints
//! - **Explainability**: stage taps, Relevance-CAM / Grad-CAM / Grad-CAM++ surfaces
//! - **Rendering**: normalization, resizing, thresholding, heatmap overlays
//! - **Data**: ChestX-ray14 image lists, bounding-box lists, preprocessing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rcam::prelude::*;
//!
//! let model = DenseNetConfig::default()
//!     .init::<Autodiff<NdArray>>(&device)
//!     .load_checkpoint("chexnet.mpk", &device)?;
//!
//! let image = preprocess::load_rgb("00000001_000.png")?;
//! let (input, base) = preprocess::prepare_single(&image, 224, &device)?;
//!
//! let explainer = Explainer::new(&model, ExplainConfig::default())?;
//! let explanation = explainer.explain(input, None)?;
//! explanation.panel(&base, 0.5)?.save("panel.png")?;
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use rcam_core as core;
pub use rcam_data as data;
pub use rcam_explain as explain;
pub use rcam_models as models;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use rcam::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use rcam_core::{
        CamError, FeatureShape, NoTap, Result, Seed, StageTap, TappableClassifier, TargetSelector,
    };

    // Data
    pub use rcam_data::{
        preprocess, read_image_list, ChestXrayDataset, ImageListEntry, CLASS_NAMES,
    };

    // Models
    pub use rcam_models::{ChexNet, DenseNetConfig, DenseStage, ModelCheckpoint};

    // Explain
    pub use rcam_explain::{
        compute_relevance, CutoffPolicy, ExplainConfig, Explainer, Explanation, RelevanceRule,
        StageCapture, TapHandle, TapInstaller,
    };
}

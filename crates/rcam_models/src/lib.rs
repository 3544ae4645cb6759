//! # rcam_models
//!
//! DenseNet-121 / CheXNet classifier for rcam.
//!
//! - [`ChexNet`] - DenseNet-121 features with a 14-way multi-label head
//! - [`DenseStage`] - the four tappable dense block stages
//! - [`FrozenBatchNorm`] - batch normalization pinned to running statistics
//! - [`checkpoint`] - weight persistence and PyTorch name remapping
//! - [`StateDict`] - loading remapped parameter dictionaries (safetensors)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod densenet;
pub mod norm;
pub mod stage;
pub mod state_dict;
mod traits;

pub use checkpoint::{
    load_model, load_pytorch_weights, remap_checkpoint_key, remap_state_dict, save_model,
    CheckpointError, ModelCheckpoint,
};
pub use densenet::{
    ChexNet, DenseBlock, DenseFeatures, DenseLayer, DenseNetConfig, Transition, N_CLASSES,
};
pub use norm::FrozenBatchNorm;
pub use stage::DenseStage;
pub use state_dict::{read_safetensors, StateDict};

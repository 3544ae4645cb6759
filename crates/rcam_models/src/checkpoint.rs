//! Model checkpointing and parameter-name remapping.
//!
//! Weights are stored with Burn's record system in the named MessagePack
//! format (`*.mpk`). Checkpoints exported from the PyTorch CheXNet carry
//! parameter names in the legacy torchvision layout
//! (`module.densenet121.features.denseblock1.denselayer1.norm.1.weight`);
//! [`remap_checkpoint_key`] rewrites them to the paths of [`ChexNet`]
//! (`features.blocks.0.layers.0.norm1.gamma`) so converted tensors line up
//! with this crate's modules.
//!
//! # Example
//!
//! ```rust,ignore
//! use rcam_models::checkpoint::ModelCheckpoint;
//! use rcam_models::DenseNetConfig;
//!
//! let model = DenseNetConfig::default().init::<NdArray>(&device);
//! model.save_checkpoint("chexnet.mpk")?;
//! let model = model.load_checkpoint("chexnet.mpk", &device)?;
//! ```
//!
//! [`ChexNet`]: crate::ChexNet

use std::collections::HashMap;
use std::path::Path;

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::densenet::ChexNet;
use crate::state_dict::{read_safetensors, StateDict};

/// Legacy torchvision names, applied once per key (first match wins).
const LEGACY_RENAMES: [(&str, &str); 4] = [
    ("conv.1", "conv1"),
    ("conv.2", "conv2"),
    ("norm.1", "norm1"),
    ("norm.2", "norm2"),
];

/// Save a model to a named MessagePack checkpoint.
pub fn save_model<B, M>(model: &M, path: impl AsRef<Path>) -> Result<()>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.as_ref().to_path_buf(), &recorder)
        .map_err(|e| CheckpointError::Save(e.to_string()))
}

/// Load weights from a named MessagePack checkpoint into `model`.
pub fn load_model<B, M>(model: M, path: impl AsRef<Path>, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.display().to_string()));
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| CheckpointError::Load(e.to_string()))?;
    tracing::info!("Loaded checkpoint from {:?}", path);
    Ok(model)
}

/// Rewrite one PyTorch CheXNet parameter name into a [`ChexNet`] record path.
///
/// Returns `None` for entries with no counterpart (batch-norm
/// `num_batches_tracked` counters).
///
/// [`ChexNet`]: crate::ChexNet
pub fn remap_checkpoint_key(key: &str) -> Option<String> {
    let key = key.rsplit_once("module.").map_or(key, |(_, rest)| rest);

    let mut key = key.to_string();
    if let Some((old, new)) = LEGACY_RENAMES.iter().find(|(old, _)| key.contains(old)) {
        key = key.replace(old, new);
    }

    let parts: Vec<&str> = key.split('.').collect();
    let (leaf, path) = parts.split_last()?;
    if *leaf == "num_batches_tracked" {
        return None;
    }

    let mut segments: Vec<String> = Vec::with_capacity(path.len() + 3);
    for part in path {
        if *part == "densenet121" {
            continue;
        }
        match indexed_segment(part) {
            Some((name, index)) => {
                segments.push(name.to_string());
                segments.push(index.to_string());
            }
            None => segments.push((*part).to_string()),
        }
    }

    // The PyTorch head is `Sequential(Linear, Sigmoid)`; only the linear has weights.
    if segments.len() >= 2
        && segments[segments.len() - 2] == "classifier"
        && segments[segments.len() - 1] == "0"
    {
        segments.pop();
    }

    let is_norm = segments.last().is_some_and(|module| module.starts_with("norm"));
    let leaf = match *leaf {
        "weight" if is_norm => "gamma",
        "bias" if is_norm => "beta",
        other => other,
    };

    segments.push(leaf.to_string());
    Some(segments.join("."))
}

/// `denseblock3` -> `("blocks", 2)`, `denselayer1` -> `("layers", 0)`,
/// `transition2` -> `("transitions", 1)`.
fn indexed_segment(part: &str) -> Option<(&'static str, usize)> {
    let (name, number) = if let Some(n) = part.strip_prefix("denseblock") {
        ("blocks", n)
    } else if let Some(n) = part.strip_prefix("denselayer") {
        ("layers", n)
    } else if let Some(n) = part.strip_prefix("transition") {
        ("transitions", n)
    } else {
        return None;
    };
    let index = number.parse::<usize>().ok()?.checked_sub(1)?;
    Some((name, index))
}

/// Remap every key of a PyTorch state dict, dropping keys with no counterpart.
pub fn remap_state_dict<V>(state_dict: HashMap<String, V>) -> HashMap<String, V> {
    let total = state_dict.len();
    let remapped: HashMap<String, V> = state_dict
        .into_iter()
        .filter_map(|(key, value)| remap_checkpoint_key(&key).map(|new_key| (new_key, value)))
        .collect();
    tracing::debug!("Remapped {} of {} checkpoint entries", remapped.len(), total);
    remapped
}

/// Load PyTorch CheXNet weights exported to safetensors into `model`.
///
/// Keys are remapped with [`remap_checkpoint_key`] before loading, so the
/// file may keep the original `module.densenet121.*` names.
pub fn load_pytorch_weights<B: Backend>(
    model: ChexNet<B>,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<ChexNet<B>> {
    let path = path.as_ref();
    let dict = StateDict::from_pytorch(read_safetensors(path)?);
    let model = model.load_state_dict(&dict, device)?;
    tracing::info!("Loaded {} PyTorch tensors from {:?}", dict.len(), path);
    Ok(model)
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Error saving checkpoint.
    #[error("Failed to save checkpoint: {0}")]
    Save(String),

    /// Error loading checkpoint.
    #[error("Failed to load checkpoint: {0}")]
    Load(String),

    /// Checkpoint file does not exist.
    #[error("No checkpoint found at {0}")]
    NotFound(String),

    /// A parameter of the model has no entry in the state dict.
    #[error("Missing parameter '{0}' in state dict")]
    MissingKey(String),

    /// A state dict entry has the wrong shape for its parameter.
    #[error("Parameter '{key}' has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Record path of the parameter.
        key: String,
        /// Shape the model expects.
        expected: Vec<usize>,
        /// Shape found in the state dict.
        got: Vec<usize>,
    },
}

/// Extension trait for models to add checkpoint methods.
pub trait ModelCheckpoint<B: Backend>: Module<B> {
    /// Save the model to a checkpoint file.
    fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        save_model::<B, Self>(self, path)
    }

    /// Load model weights from a checkpoint into a copy of this model.
    fn load_checkpoint(&self, path: impl AsRef<Path>, device: &B::Device) -> Result<Self>
    where
        Self: Sized,
    {
        load_model::<B, Self>(self.clone(), path, device)
    }
}

// Implement for all modules
impl<B: Backend, M: Module<B>> ModelCheckpoint<B> for M {}

//! Flat parameter dictionaries.
//!
//! A [`StateDict`] maps record paths (`features.blocks.0.layers.0.conv1.weight`)
//! to tensor data. Dictionaries exported from the PyTorch CheXNet carry legacy
//! names and go through [`StateDict::from_pytorch`], which applies
//! [`remap_checkpoint_key`] to every key. Linear weights keep PyTorch's
//! `[out, in]` layout and are transposed on load.
//!
//! [`remap_checkpoint_key`]: crate::checkpoint::remap_checkpoint_key

use std::collections::HashMap;
use std::path::Path;

use burn::module::{Param, RunningState};
use burn::nn::conv::Conv2d;
use burn::nn::Linear;
use burn::prelude::*;
use safetensors::{Dtype, SafeTensors};

use crate::checkpoint::{remap_state_dict, CheckpointError, Result};
use crate::norm::FrozenBatchNorm;

/// Parameter tensors keyed by record path.
#[derive(Debug, Clone, Default)]
pub struct StateDict {
    tensors: HashMap<String, TensorData>,
}

impl StateDict {
    /// Wrap tensors already keyed by record path.
    pub fn new(tensors: HashMap<String, TensorData>) -> Self {
        Self { tensors }
    }

    /// Wrap tensors keyed by PyTorch CheXNet names, remapping every key.
    pub fn from_pytorch(tensors: HashMap<String, TensorData>) -> Self {
        Self::new(remap_state_dict(tensors))
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the dictionary holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.tensors.contains_key(key)
    }

    fn tensor<B: Backend, const D: usize>(
        &self,
        key: &str,
        dims: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let data = self
            .tensors
            .get(key)
            .ok_or_else(|| CheckpointError::MissingKey(key.to_string()))?;
        if data.shape != dims {
            return Err(CheckpointError::ShapeMismatch {
                key: key.to_string(),
                expected: dims.to_vec(),
                got: data.shape.clone(),
            });
        }
        Ok(Tensor::from_data(data.clone(), device))
    }

    pub(crate) fn conv2d<B: Backend>(
        &self,
        mut conv: Conv2d<B>,
        prefix: &str,
        device: &B::Device,
    ) -> Result<Conv2d<B>> {
        let weight_dims = conv.weight.val().dims();
        let bias_dims = conv.bias.as_ref().map(|bias| bias.val().dims());

        conv.weight = Param::from_tensor(self.tensor(&format!("{prefix}.weight"), weight_dims, device)?);
        if let Some(dims) = bias_dims {
            conv.bias = Some(Param::from_tensor(self.tensor(&format!("{prefix}.bias"), dims, device)?));
        }
        Ok(conv)
    }

    pub(crate) fn linear<B: Backend>(
        &self,
        mut linear: Linear<B>,
        prefix: &str,
        device: &B::Device,
    ) -> Result<Linear<B>> {
        let [d_input, d_output] = linear.weight.val().dims();
        let bias_dims = linear.bias.as_ref().map(|bias| bias.val().dims());

        let weight: Tensor<B, 2> = self.tensor(&format!("{prefix}.weight"), [d_output, d_input], device)?;
        linear.weight = Param::from_tensor(weight.transpose());
        if let Some(dims) = bias_dims {
            linear.bias = Some(Param::from_tensor(self.tensor(&format!("{prefix}.bias"), dims, device)?));
        }
        Ok(linear)
    }

    pub(crate) fn batch_norm<B: Backend>(
        &self,
        mut norm: FrozenBatchNorm<B>,
        prefix: &str,
        device: &B::Device,
    ) -> Result<FrozenBatchNorm<B>> {
        let dims = [norm.num_features()];

        norm.gamma = Param::from_tensor(self.tensor(&format!("{prefix}.gamma"), dims, device)?);
        norm.beta = Param::from_tensor(self.tensor(&format!("{prefix}.beta"), dims, device)?);
        norm.running_mean = RunningState::new(self.tensor(&format!("{prefix}.running_mean"), dims, device)?);
        norm.running_var = RunningState::new(self.tensor(&format!("{prefix}.running_var"), dims, device)?);
        Ok(norm)
    }
}

/// Read every `f32` tensor of a safetensors file, keyed by its stored name.
///
/// Integer `num_batches_tracked` counters are skipped; any other non-`f32`
/// tensor is an error.
pub fn read_safetensors(path: impl AsRef<Path>) -> Result<HashMap<String, TensorData>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.display().to_string()));
    }

    let bytes = std::fs::read(path).map_err(|e| CheckpointError::Load(e.to_string()))?;
    let file = SafeTensors::deserialize(&bytes).map_err(|e| CheckpointError::Load(e.to_string()))?;

    let mut tensors = HashMap::new();
    for (name, view) in file.tensors() {
        match view.dtype() {
            Dtype::F32 => {
                let values: Vec<f32> = view
                    .data()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                tensors.insert(name, TensorData::new(values, view.shape().to_vec()));
            }
            Dtype::I64 if name.ends_with("num_batches_tracked") => {}
            other => {
                return Err(CheckpointError::Load(format!(
                    "unsupported dtype {other:?} for '{name}'"
                )))
            }
        }
    }

    tracing::debug!("Read {} tensors from {:?}", tensors.len(), path);
    Ok(tensors)
}

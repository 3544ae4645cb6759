//! Classifier trait implementations.
//!
//! Implements `TappableClassifier` so the explanation pipeline can tap CheXNet.

use burn::prelude::*;
use rcam_core::{StageTap, TappableClassifier};

use crate::densenet::ChexNet;
use crate::stage::DenseStage;

impl<B: Backend> TappableClassifier<B> for ChexNet<B> {
    fn stage_names(&self) -> Vec<&'static str> {
        DenseStage::names()
    }

    fn num_classes(&self) -> usize {
        self.n_classes()
    }

    fn logits_tapped(&self, x: Tensor<B, 4>, tap: &mut dyn StageTap<B>) -> Tensor<B, 2> {
        self.forward_tapped(x, tap)
    }
}

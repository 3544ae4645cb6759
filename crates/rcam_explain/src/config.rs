//! Explanation settings.

use std::path::Path;

use rcam_core::{CamError, Result, TargetSelector};
use serde::{Deserialize, Serialize};

use crate::relevance::RelevanceRule;
use crate::render::CutoffPolicy;

/// Settings for one explanation run.
///
/// Missing fields in a JSON file take their default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Tapped stage.
    pub stage: String,
    /// Class to explain; `None` falls back to the label or the top prediction.
    pub class: Option<usize>,
    /// Channel weighting rule.
    pub rule: RelevanceRule,
    /// Mask cutoff policy.
    pub cutoff: CutoffPolicy,
    /// Heatmap height.
    pub output_height: usize,
    /// Heatmap width.
    pub output_width: usize,
    /// Heatmap weight when blending over the image.
    pub alpha: f32,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            stage: "denseblock4".to_string(),
            class: None,
            rule: RelevanceRule::default(),
            cutoff: CutoffPolicy::default(),
            output_height: 224,
            output_width: 224,
            alpha: 0.5,
        }
    }
}

impl ExplainConfig {
    /// Set the tapped stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Set the class to explain.
    #[must_use]
    pub fn with_class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }

    /// Set the relevance rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RelevanceRule) -> Self {
        self.rule = rule;
        self
    }

    /// Set the cutoff policy.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: CutoffPolicy) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Set the heatmap resolution.
    #[must_use]
    pub fn with_output_size(mut self, height: usize, width: usize) -> Self {
        self.output_height = height;
        self.output_width = width;
        self
    }

    /// Target selector for this configuration.
    pub fn selector(&self) -> TargetSelector {
        let selector = TargetSelector::new(self.stage.clone());
        match self.class {
            Some(class) => selector.with_class(class),
            None => selector,
        }
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| CamError::SerializationError(e.to_string()))
    }

    /// Save to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CamError::SerializationError(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

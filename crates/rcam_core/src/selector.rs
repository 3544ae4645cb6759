//! Target selection for one explanation request.

use serde::{Deserialize, Serialize};

use crate::error::{CamError, Result};

/// Which stage is tapped and which output class is explained.
///
/// When `class` is `None` the pipeline falls back to the ground-truth label
/// or, failing that, to the highest scoring class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    /// Name of the tapped stage, e.g. `denseblock4`.
    pub stage: String,
    /// Output class index to explain.
    pub class: Option<usize>,
}

impl TargetSelector {
    /// Select a stage, leaving the class to be resolved later.
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            class: None,
        }
    }

    /// Set the target class.
    #[must_use]
    pub fn with_class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }

    /// Resolve the target class against `scores` for a classifier with
    /// `scores.len()` outputs.
    ///
    /// An explicit class wins; otherwise the argmax of `scores` is used.
    pub fn resolve_class(&self, scores: &[f32]) -> Result<usize> {
        let n_classes = scores.len();
        let class = match self.class {
            Some(class) => class,
            None => argmax(scores)
                .ok_or_else(|| CamError::Other("classifier produced no scores".to_string()))?,
        };

        if class >= n_classes {
            return Err(CamError::InvalidClass { class, n_classes });
        }
        Ok(class)
    }
}

/// Index of the largest score. Ties go to the lowest index.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(idx, _)| idx)
}

/// Class named by a ground-truth label vector: its first largest entry.
///
/// `None` when no entry is positive, e.g. a "No Finding" image.
pub fn label_class(label: &[f32]) -> Option<usize> {
    if label.iter().all(|v| *v <= 0.0) {
        return None;
    }
    argmax(label)
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::new("denseblock4")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_class_wins() {
        let selector = TargetSelector::new("denseblock2").with_class(1);
        assert_eq!(selector.resolve_class(&[0.9, 0.1, 0.5]).unwrap(), 1);
    }

    #[test]
    fn test_argmax_fallback() {
        let selector = TargetSelector::default();
        assert_eq!(selector.stage, "denseblock4");
        assert_eq!(selector.resolve_class(&[0.2, 0.7, 0.1]).unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_class() {
        let selector = TargetSelector::default().with_class(14);
        let err = selector.resolve_class(&[0.0; 14]).unwrap_err();
        assert!(matches!(
            err,
            CamError::InvalidClass {
                class: 14,
                n_classes: 14
            }
        ));
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.0, 1.0, 0.0, 1.0]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        assert_eq!(argmax(&[]), None);
        assert_eq!(
            TargetSelector::default().resolve_class(&[0.3, 0.9, 0.9]).unwrap(),
            1
        );
    }

    #[test]
    fn test_label_class() {
        assert_eq!(label_class(&[0.0; 14]), None);
        assert_eq!(label_class(&[0.0, 1.0, 0.0, 1.0]), Some(1));
        assert_eq!(label_class(&[0.2, 0.6]), Some(1));
        assert_eq!(label_class(&[]), None);
    }

    #[test]
    fn test_empty_scores() {
        assert!(TargetSelector::default().resolve_class(&[]).is_err());
    }
}

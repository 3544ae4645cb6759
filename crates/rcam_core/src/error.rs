//! Error types for rcam_core.

use thiserror::Error;

/// Result type alias using [`CamError`].
pub type Result<T> = std::result::Result<T, CamError>;

/// Which half of a capture is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// The stage output recorded during the forward pass.
    Activation,
    /// The gradient recorded during the backward pass.
    Gradient,
}

impl std::fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activation => write!(f, "activation"),
            Self::Gradient => write!(f, "gradient"),
        }
    }
}

/// Errors raised while tapping a classifier and computing relevance maps.
#[derive(Error, Debug)]
pub enum CamError {
    /// The requested stage is not one of the classifier's named stages.
    #[error("Invalid stage '{stage}': expected one of {available:?}")]
    InvalidStage {
        /// Requested stage identifier.
        stage: String,
        /// Stages exposed by the classifier.
        available: Vec<String>,
    },

    /// A tap is already installed on this stage.
    #[error("A tap is already installed on stage '{0}'; tear it down first")]
    AlreadyInstalled(String),

    /// Activation and gradient shapes disagree.
    #[error("Shape mismatch: activation {activation:?} vs gradient {gradient:?}")]
    ShapeMismatch {
        /// Activation dimensions.
        activation: Vec<usize>,
        /// Gradient dimensions.
        gradient: Vec<usize>,
    },

    /// Relevance was requested before the capture was populated.
    #[error("Missing {0} capture: run forward, then backward, before computing relevance")]
    MissingCapture(CaptureKind),

    /// Target class outside the classifier's output range.
    #[error("Invalid target class {class}: classifier has {n_classes} classes")]
    InvalidClass {
        /// Requested class index.
        class: usize,
        /// Number of classifier outputs.
        n_classes: usize,
    },

    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Dimension error.
    #[error("Dimension error: expected {expected} dimensions, got {got}")]
    DimensionError {
        /// Expected number of dimensions.
        expected: usize,
        /// Actual number of dimensions.
        got: usize,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_stage_message_lists_stages() {
        let err = CamError::InvalidStage {
            stage: "denseblock9".to_string(),
            available: vec!["denseblock1".to_string(), "denseblock4".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("denseblock9"));
        assert!(msg.contains("denseblock4"));
    }

    #[test]
    fn test_missing_capture_message() {
        let err = CamError::MissingCapture(CaptureKind::Gradient);
        assert!(err.to_string().contains("gradient"));
    }
}

//! Named stages of the DenseNet feature extractor.

use std::str::FromStr;

use rcam_core::CamError;
use serde::{Deserialize, Serialize};

/// One of the four dense blocks of a DenseNet, the stages that can be tapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenseStage {
    /// First dense block (stride 4 grid, 56×56 for a 224 input).
    DenseBlock1,
    /// Second dense block (28×28).
    DenseBlock2,
    /// Third dense block (14×14).
    DenseBlock3,
    /// Fourth dense block (7×7), the default explanation stage.
    DenseBlock4,
}

impl DenseStage {
    /// All stages in execution order.
    pub const ALL: [DenseStage; 4] = [
        DenseStage::DenseBlock1,
        DenseStage::DenseBlock2,
        DenseStage::DenseBlock3,
        DenseStage::DenseBlock4,
    ];

    /// Stage name as exposed to taps.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DenseBlock1 => "denseblock1",
            Self::DenseBlock2 => "denseblock2",
            Self::DenseBlock3 => "denseblock3",
            Self::DenseBlock4 => "denseblock4",
        }
    }

    /// Zero-based position in [`DenseStage::ALL`].
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::DenseBlock1 => 0,
            Self::DenseBlock2 => 1,
            Self::DenseBlock3 => 2,
            Self::DenseBlock4 => 3,
        }
    }

    /// All stage names in execution order.
    #[must_use]
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(DenseStage::name).collect()
    }
}

impl std::fmt::Display for DenseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DenseStage {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s.to_lowercase())
            .ok_or_else(|| CamError::InvalidStage {
                stage: s.to_string(),
                available: Self::names().into_iter().map(String::from).collect(),
            })
    }
}

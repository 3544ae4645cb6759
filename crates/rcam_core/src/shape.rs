//! Feature map shape metadata.

use serde::{Deserialize, Serialize};

use crate::error::{CamError, Result};

/// Shape metadata for the 4D tensors captured at a classifier stage.
///
/// Follows the convention `(B, C, H, W)`:
/// - `B`: Batch size
/// - `C`: Channels
/// - `H`, `W`: Spatial grid
///
/// # Example
///
/// ```rust
/// use rcam_core::FeatureShape;
///
/// let shape = FeatureShape::new(1, 1024, 7, 7);
/// assert_eq!(shape.channels(), 1024);
/// assert_eq!(shape.spatial(), [7, 7]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureShape {
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl FeatureShape {
    /// Create a new shape with the specified dimensions.
    #[must_use]
    pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// Create a shape from a slice of dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice doesn't contain exactly 4 elements.
    ///
    /// ```rust
    /// use rcam_core::FeatureShape;
    ///
    /// let shape = FeatureShape::from_dims(&[1, 256, 56, 56]).unwrap();
    /// assert_eq!(shape.height(), 56);
    /// ```
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [b, c, h, w] => Ok(Self::new(*b, *c, *h, *w)),
            _ => Err(CamError::DimensionError {
                expected: 4,
                got: dims.len(),
            }),
        }
    }

    /// Get the batch size.
    #[must_use]
    pub const fn batch(&self) -> usize {
        self.batch
    }

    /// Get the number of channels.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Get the grid height.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Get the grid width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Spatial grid as `[height, width]`.
    #[must_use]
    pub const fn spatial(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// Check if any dimension is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.batch == 0 || self.channels == 0 || self.height == 0 || self.width == 0
    }

    /// Get the total number of elements.
    #[must_use]
    pub const fn numel(&self) -> usize {
        self.batch * self.channels * self.height * self.width
    }

    /// Convert to an array.
    #[must_use]
    pub const fn as_array(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    /// Fail with [`CamError::ShapeMismatch`] unless `gradient` equals `self`.
    ///
    /// `self` is taken to be the activation shape.
    pub fn ensure_matches(&self, gradient: &Self) -> Result<()> {
        if self != gradient {
            return Err(CamError::ShapeMismatch {
                activation: self.as_array().to_vec(),
                gradient: gradient.as_array().to_vec(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(B={}, C={}, H={}, W={})",
            self.batch, self.channels, self.height, self.width
        )
    }
}

impl From<[usize; 4]> for FeatureShape {
    fn from([batch, channels, height, width]: [usize; 4]) -> Self {
        Self::new(batch, channels, height, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_from_dims() {
        let shape = FeatureShape::from_dims(&[1, 1024, 7, 7]).unwrap();
        assert_eq!(shape.as_array(), [1, 1024, 7, 7]);

        assert!(FeatureShape::from_dims(&[1, 1024, 7]).is_err());
        assert!(FeatureShape::from_dims(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_shape_numel_and_empty() {
        assert_eq!(FeatureShape::new(1, 2, 3, 3).numel(), 18);
        assert!(!FeatureShape::new(1, 2, 3, 3).is_empty());
        assert!(FeatureShape::new(1, 0, 3, 3).is_empty());
    }

    #[test]
    fn test_ensure_matches() {
        let a = FeatureShape::new(1, 2, 3, 3);
        assert!(a.ensure_matches(&FeatureShape::new(1, 2, 3, 3)).is_ok());

        let err = a.ensure_matches(&FeatureShape::new(2, 2, 3, 3)).unwrap_err();
        assert!(matches!(err, CamError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_shape_serialization() {
        let shape = FeatureShape::new(1, 512, 28, 28);
        let json = serde_json::to_string(&shape).unwrap();
        let restored: FeatureShape = serde_json::from_str(&json).unwrap();
        assert_eq!(shape, restored);
    }
}

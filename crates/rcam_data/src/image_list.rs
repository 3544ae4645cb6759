//! Image lists: one `<image name> <label> <label> ...` line per image.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};
use crate::labels::argmax;

/// One line of an image list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageListEntry {
    /// Image file name relative to the data directory.
    pub image: String,
    /// Multi-hot label vector.
    pub labels: Vec<f32>,
}

impl ImageListEntry {
    /// Create an entry.
    pub fn new(image: impl Into<String>, labels: Vec<f32>) -> Self {
        Self {
            image: image.into(),
            labels,
        }
    }

    /// Index of the first largest label.
    ///
    /// `None` for an all-zero label vector.
    pub fn target_class(&self) -> Option<usize> {
        if self.labels.iter().all(|v| *v <= 0.0) {
            return None;
        }
        argmax(&self.labels)
    }

    fn to_line(&self) -> String {
        let mut line = self.image.clone();
        for label in &self.labels {
            let _ = write!(line, " {label}");
        }
        line
    }
}

/// Parse image-list text.
///
/// Blank lines are skipped; every other line must carry the same number of
/// labels as the first.
pub fn parse_image_list(text: &str) -> Result<Vec<ImageListEntry>> {
    let mut entries: Vec<ImageListEntry> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let mut tokens = raw.split_whitespace();
        let Some(image) = tokens.next() else {
            continue;
        };

        let labels = tokens
            .map(|token| {
                token.parse::<f32>().map_err(|_| DataError::Parse {
                    line,
                    message: format!("invalid label '{token}'"),
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        if labels.is_empty() {
            return Err(DataError::Parse {
                line,
                message: format!("no labels for '{image}'"),
            });
        }
        if let Some(first) = entries.first() {
            if first.labels.len() != labels.len() {
                return Err(DataError::Parse {
                    line,
                    message: format!("expected {} labels, got {}", first.labels.len(), labels.len()),
                });
            }
        }

        entries.push(ImageListEntry::new(image, labels));
    }

    Ok(entries)
}

/// Read an image-list file.
pub fn read_image_list(path: impl AsRef<Path>) -> Result<Vec<ImageListEntry>> {
    let path = path.as_ref();
    let entries = parse_image_list(&std::fs::read_to_string(path)?)?;
    tracing::debug!("Read {} entries from {:?}", entries.len(), path);
    Ok(entries)
}

/// Write entries as an image-list file.
pub fn write_image_list(path: impl AsRef<Path>, entries: &[ImageListEntry]) -> Result<()> {
    let mut text = String::new();
    for entry in entries {
        text.push_str(&entry.to_line());
        text.push('\n');
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// A data directory and the image list describing it.
#[derive(Debug, Clone)]
pub struct ChestXrayDataset {
    data_dir: PathBuf,
    entries: Vec<ImageListEntry>,
}

impl ChestXrayDataset {
    /// Open the dataset described by `list_file` with images under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, list_file: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_entries(data_dir, read_image_list(list_file)?))
    }

    /// Build a dataset from already parsed entries.
    pub fn from_entries(data_dir: impl Into<PathBuf>, entries: Vec<ImageListEntry>) -> Self {
        Self {
            data_dir: data_dir.into(),
            entries,
        }
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Result<&ImageListEntry> {
        self.entries.get(index).ok_or(DataError::IndexOutOfBounds {
            index,
            length: self.entries.len(),
        })
    }

    /// Entry whose image name is `image`.
    pub fn find(&self, image: &str) -> Option<&ImageListEntry> {
        self.entries.iter().find(|entry| entry.image == image)
    }

    /// Full path of an entry's image.
    pub fn image_path(&self, entry: &ImageListEntry) -> PathBuf {
        self.data_dir.join(&entry.image)
    }

    /// Decode the image at `index` as RGB.
    pub fn load_image(&self, index: usize) -> Result<RgbImage> {
        let entry = self.get(index)?;
        crate::preprocess::load_rgb(self.image_path(entry))
    }

    /// Iterate over entries.
    pub fn iter(&self) -> impl Iterator<Item = &ImageListEntry> {
        self.entries.iter()
    }
}

//! # rcam_data
//!
//! ChestX-ray14 inputs for rcam.
//!
//! This crate provides:
//! - the class vocabulary ([`CLASS_NAMES`], [`class_index`])
//! - image lists ([`read_image_list`], [`ChestXrayDataset`])
//! - bounding-box CSV conversion ([`write_bbox_list`])
//! - image decoding, ImageNet normalization and ten-crop ([`preprocess`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use rcam_data::{preprocess, ChestXrayDataset};
//!
//! let dataset = ChestXrayDataset::new("ChestX-ray14/images", "labels/test_list.txt")?;
//! let image = dataset.load_image(0)?;
//! let (input, base) = preprocess::prepare_single::<B>(&image, 224, &device)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod bbox;
mod error;
mod image_list;
mod labels;
pub mod preprocess;

pub use bbox::{bbox_entries, read_bbox_csv, write_bbox_list, BBoxRecord};
pub use error::{DataError, Result};
pub use image_list::{
    parse_image_list, read_image_list, write_image_list, ChestXrayDataset, ImageListEntry,
};
pub use labels::{argmax, class_index, class_name, CLASS_NAMES, NO_FINDING, N_CLASSES};

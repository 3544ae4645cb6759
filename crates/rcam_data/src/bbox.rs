//! Bounding-box annotations (`BBox_List_2017.csv`) and their conversion
//! into an image list.
//!
//! The CSV is read by column position: image name, finding label, then
//! `x`, `y`, `w`, `h`. Any further columns are ignored.

use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};
use crate::image_list::{write_image_list, ImageListEntry};
use crate::labels::{class_index, N_CLASSES, NO_FINDING};

/// One annotated box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBoxRecord {
    /// Image file name.
    pub image: String,
    /// Finding label as written in the CSV.
    pub finding: String,
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    /// Width in pixels.
    pub w: f32,
    /// Height in pixels.
    pub h: f32,
}

impl BBoxRecord {
    /// Multi-hot label vector in model output order; `No Finding` is all zeros.
    pub fn labels(&self) -> Result<Vec<f32>> {
        let mut labels = vec![0.0; N_CLASSES];
        if self.finding.trim() == NO_FINDING {
            return Ok(labels);
        }
        let idx = class_index(&self.finding)
            .ok_or_else(|| DataError::UnknownClass(self.finding.clone()))?;
        labels[idx] = 1.0;
        Ok(labels)
    }
}

fn string_column(df: &DataFrame, idx: usize) -> Result<Vec<String>> {
    let col = df
        .get_columns()
        .get(idx)
        .ok_or_else(|| DataError::FormatError(format!("Missing column {idx}")))?;
    let values = col
        .cast(&DataType::String)
        .map_err(|e| DataError::FormatError(format!("Failed to cast column {idx}: {e}")))?;
    let values = values
        .str()
        .map_err(|e| DataError::FormatError(format!("Failed to get strings: {e}")))?;
    Ok(values
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

fn float_column(df: &DataFrame, idx: usize) -> Result<Vec<f32>> {
    let col = df
        .get_columns()
        .get(idx)
        .ok_or_else(|| DataError::FormatError(format!("Missing column {idx}")))?;
    let values = col
        .cast(&DataType::Float32)
        .map_err(|e| DataError::FormatError(format!("Failed to cast column {idx}: {e}")))?;
    let values = values
        .f32()
        .map_err(|e| DataError::FormatError(format!("Failed to get f32 values: {e}")))?;
    Ok(values.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

/// Read the bounding-box CSV.
pub fn read_bbox_csv(path: impl AsRef<Path>) -> Result<Vec<BBoxRecord>> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| DataError::FormatError(format!("Failed to create CSV reader: {e}")))?
        .finish()
        .map_err(|e| DataError::FormatError(format!("Failed to read CSV: {e}")))?;

    if df.width() < 6 {
        return Err(DataError::FormatError(format!(
            "Expected at least 6 columns, got {}",
            df.width()
        )));
    }

    let images = string_column(&df, 0)?;
    let findings = string_column(&df, 1)?;
    let xs = float_column(&df, 2)?;
    let ys = float_column(&df, 3)?;
    let ws = float_column(&df, 4)?;
    let hs = float_column(&df, 5)?;

    let records: Vec<BBoxRecord> = images
        .into_iter()
        .zip(findings)
        .enumerate()
        .map(|(row, (image, finding))| BBoxRecord {
            image,
            finding,
            x: xs[row],
            y: ys[row],
            w: ws[row],
            h: hs[row],
        })
        .collect();

    tracing::debug!("Read {} boxes from {:?}", records.len(), path);
    Ok(records)
}

/// One image-list entry per box, in file order.
pub fn bbox_entries(records: &[BBoxRecord]) -> Result<Vec<ImageListEntry>> {
    records
        .iter()
        .map(|record| Ok(ImageListEntry::new(record.image.clone(), record.labels()?)))
        .collect()
}

/// Convert the bounding-box CSV at `csv_path` into an image list at `out_path`.
///
/// Returns the number of lines written.
pub fn write_bbox_list(csv_path: impl AsRef<Path>, out_path: impl AsRef<Path>) -> Result<usize> {
    let entries = bbox_entries(&read_bbox_csv(csv_path)?)?;
    write_image_list(&out_path, &entries)?;
    tracing::info!("Wrote {} entries to {:?}", entries.len(), out_path.as_ref());
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_list::read_image_list;

    const CSV: &str = "Image Index,Finding Label,Bbox [x,y,w,h]\n\
        00013118_008.png,Atelectasis,225.08,547.02,86.76,79.18\n\
        00014716_007.png,Infiltrate,686.0,450.0,180.0,240.0\n\
        00029817_009.png,Cardiomegaly,323.5,528.0,546.1,402.1\n";

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("rcam_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_read_bbox_csv() {
        let path = temp_path("bbox.csv");
        std::fs::write(&path, CSV).unwrap();

        let records = read_bbox_csv(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].image, "00014716_007.png");
        assert_eq!(records[1].finding, "Infiltrate");
        assert!((records[0].x - 225.08).abs() < 1e-3);
        assert!((records[2].h - 402.1).abs() < 1e-3);
    }

    #[test]
    fn test_record_labels() {
        let record = |finding: &str| BBoxRecord {
            image: "a.png".to_string(),
            finding: finding.to_string(),
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
        };

        let labels = record("Infiltrate").labels().unwrap();
        assert_eq!(labels.len(), N_CLASSES);
        assert_eq!(labels[3], 1.0);
        assert_eq!(labels.iter().sum::<f32>(), 1.0);

        assert!(record(NO_FINDING).labels().unwrap().iter().all(|v| *v == 0.0));
        assert!(matches!(record("Fracture").labels(), Err(DataError::UnknownClass(_))));
    }

    #[test]
    fn test_write_bbox_list() {
        let csv_path = temp_path("bbox_in.csv");
        let out_path = temp_path("bbox_list.txt");
        std::fs::write(&csv_path, CSV).unwrap();

        let written = write_bbox_list(&csv_path, &out_path).unwrap();
        let entries = read_image_list(&out_path).unwrap();
        let _ = std::fs::remove_file(&csv_path);
        let _ = std::fs::remove_file(&out_path);

        assert_eq!(written, 3);
        assert_eq!(entries[0].target_class(), Some(0));
        assert_eq!(entries[2].target_class(), Some(1));
    }
}

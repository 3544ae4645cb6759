//! Image decoding and model input preparation.

use std::path::Path;

use burn::prelude::*;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{DataError, Result};

/// ImageNet channel means.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model input side length.
pub const INPUT_SIZE: u32 = 224;
/// Shorter side before ten-cropping.
pub const RESIZE_SIZE: u32 = 256;

/// Decode an image file as 8-bit RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> Result<RgbImage> {
    Ok(image::open(path.as_ref())?.to_rgb8())
}

/// Resize to exactly `width` x `height` with bilinear filtering.
pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Resize so the shorter side is `size`, keeping the aspect ratio.
pub fn resize_shorter(img: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (new_w, new_h) = if w <= h {
        (size, (u64::from(h) * u64::from(size) / u64::from(w.max(1))) as u32)
    } else {
        ((u64::from(w) * u64::from(size) / u64::from(h.max(1))) as u32, size)
    };
    resize_exact(img, new_w, new_h)
}

/// Four corner crops and the centre crop of side `size`.
///
/// Order: top-left, top-right, bottom-left, bottom-right, centre.
pub fn five_crop(img: &RgbImage, size: u32) -> Result<Vec<RgbImage>> {
    let (w, h) = img.dimensions();
    if size > w || size > h {
        return Err(DataError::InvalidShape(format!(
            "crop {size} larger than image {w}x{h}"
        )));
    }

    let left = ((w - size) as f32 / 2.0).round() as u32;
    let top = ((h - size) as f32 / 2.0).round() as u32;
    let corners = [
        (0, 0),
        (w - size, 0),
        (0, h - size),
        (w - size, h - size),
        (left, top),
    ];

    Ok(corners
        .iter()
        .map(|&(x, y)| imageops::crop_imm(img, x, y, size, size).to_image())
        .collect())
}

/// [`five_crop`] of the image followed by [`five_crop`] of its mirror.
pub fn ten_crop(img: &RgbImage, size: u32) -> Result<Vec<RgbImage>> {
    let mut crops = five_crop(img, size)?;
    crops.extend(five_crop(&imageops::flip_horizontal(img), size)?);
    Ok(crops)
}

/// Stack images into a normalized `(n, 3, height, width)` tensor.
///
/// Pixels are scaled to `[0, 1]` and standardized with the ImageNet statistics.
pub fn to_tensor<B: Backend>(images: &[RgbImage], device: &B::Device) -> Result<Tensor<B, 4>> {
    let first = images.first().ok_or(DataError::EmptyDataset)?;
    let (w, h) = first.dimensions();
    let (w, h) = (w as usize, h as usize);

    let mut data = Vec::with_capacity(images.len() * 3 * h * w);
    for img in images {
        if img.dimensions() != first.dimensions() {
            return Err(DataError::InvalidShape(format!(
                "expected {}x{} image, got {}x{}",
                w,
                h,
                img.width(),
                img.height()
            )));
        }
        for c in 0..3 {
            data.extend(
                img.pixels()
                    .map(|p| (p.0[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c]),
            );
        }
    }

    Ok(Tensor::from_data(
        TensorData::new(data, [images.len(), 3, h, w]),
        device,
    ))
}

/// Single-image input: resize to `size` x `size`, then [`to_tensor`].
///
/// Returns the tensor and the resized image used as the display base.
pub fn prepare_single<B: Backend>(
    img: &RgbImage,
    size: u32,
    device: &B::Device,
) -> Result<(Tensor<B, 4>, RgbImage)> {
    let resized = resize_exact(img, size, size);
    let tensor = to_tensor(std::slice::from_ref(&resized), device)?;
    Ok((tensor, resized))
}

/// Ten-crop input: resize the shorter side to `resize`, then [`ten_crop`].
pub fn prepare_ten_crop<B: Backend>(
    img: &RgbImage,
    resize: u32,
    size: u32,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    to_tensor(&ten_crop(&resize_shorter(img, resize), size)?, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::Rgb;

    type TestBackend = NdArray;

    /// Red channel encodes x, green encodes y.
    fn gradient_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn test_resize_shorter() {
        let img = gradient_image(40, 20);
        assert_eq!(resize_shorter(&img, 10).dimensions(), (20, 10));
        let img = gradient_image(30, 60);
        assert_eq!(resize_shorter(&img, 15).dimensions(), (15, 30));
    }

    #[test]
    fn test_five_crop_positions() {
        let img = gradient_image(10, 8);
        let crops = five_crop(&img, 4).unwrap();

        assert_eq!(crops.len(), 5);
        assert_eq!(*crops[0].get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*crops[1].get_pixel(0, 0), Rgb([6, 0, 0]));
        assert_eq!(*crops[2].get_pixel(0, 0), Rgb([0, 4, 0]));
        assert_eq!(*crops[3].get_pixel(3, 3), Rgb([9, 7, 0]));
        assert_eq!(*crops[4].get_pixel(0, 0), Rgb([3, 2, 0]));
    }

    #[test]
    fn test_ten_crop_mirrors() {
        let img = gradient_image(10, 8);
        let crops = ten_crop(&img, 4).unwrap();

        assert_eq!(crops.len(), 10);
        // Top-left of the mirrored image is the original's top-right corner.
        assert_eq!(*crops[5].get_pixel(0, 0), Rgb([9, 0, 0]));
        assert!(ten_crop(&img, 12).is_err());
    }

    #[test]
    fn test_to_tensor_normalization() {
        let device = Default::default();
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 124]));

        let tensor = to_tensor::<TestBackend>(&[img.clone(), img], &device).unwrap();

        assert_eq!(tensor.dims(), [2, 3, 2, 2]);
        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert!((values[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((values[4] - (0.0 - 0.456) / 0.224).abs() < 1e-5);
    }

    #[test]
    fn test_to_tensor_rejects_mixed_sizes() {
        let device = Default::default();
        let images = [RgbImage::new(2, 2), RgbImage::new(3, 2)];
        assert!(to_tensor::<TestBackend>(&images, &device).is_err());
        assert!(matches!(
            to_tensor::<TestBackend>(&[], &device),
            Err(DataError::EmptyDataset)
        ));
    }

    #[test]
    fn test_prepare_inputs() {
        let device = Default::default();
        let img = gradient_image(40, 30);

        let (single, base) = prepare_single::<TestBackend>(&img, 16, &device).unwrap();
        assert_eq!(single.dims(), [1, 3, 16, 16]);
        assert_eq!(base.dimensions(), (16, 16));

        let crops = prepare_ten_crop::<TestBackend>(&img, 20, 16, &device).unwrap();
        assert_eq!(crops.dims(), [10, 3, 16, 16]);
    }

    #[test]
    fn test_load_rgb_round_trip() {
        let path = std::env::temp_dir().join(format!("rcam_img_{}.png", std::process::id()));
        gradient_image(6, 5).save(&path).unwrap();

        let loaded = load_rgb(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.dimensions(), (6, 5));
        assert_eq!(*loaded.get_pixel(5, 4), Rgb([5, 4, 0]));
        assert!(matches!(load_rgb("/nonexistent.png"), Err(DataError::ImageError(_))));
    }
}

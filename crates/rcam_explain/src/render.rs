//! Rendering of relevance surfaces: normalization, resampling,
//! thresholding, and colour images for display.

use image::{imageops, Rgb, RgbImage};
use ndarray::Array2;
use rcam_core::{CamError, Result};
use serde::{Deserialize, Serialize};

/// Min-max normalize to `[0, 1]`.
///
/// A constant surface (including all zeros) maps to all zeros.
pub fn normalize(surface: &Array2<f32>) -> Array2<f32> {
    let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
    for &v in surface.iter().filter(|v| v.is_finite()) {
        lo = lo.min(v);
        hi = hi.max(v);
    }

    let range = hi - lo;
    if range.is_nan() || range <= f32::EPSILON {
        return Array2::zeros(surface.raw_dim());
    }
    surface.mapv(|v| if v.is_finite() { ((v - lo) / range).clamp(0.0, 1.0) } else { 0.0 })
}

/// Bilinear resampling with half-pixel centres.
///
/// Output pixel `x` samples the source at `(x + 0.5) * in / out - 0.5`,
/// clamped to the border.
pub fn resize_bilinear(surface: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (in_h, in_w) = surface.dim();
    if in_h == 0 || in_w == 0 {
        return Array2::zeros((height, width));
    }

    let rows: Vec<(usize, usize, f32)> = (0..height).map(|y| sample_axis(y, in_h, height)).collect();
    let cols: Vec<(usize, usize, f32)> = (0..width).map(|x| sample_axis(x, in_w, width)).collect();

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (y0, y1, dy) = rows[y];
        let (x0, x1, dx) = cols[x];
        let f0 = surface[[y0, x0]] * (1.0 - dx) + surface[[y0, x1]] * dx;
        let f1 = surface[[y1, x0]] * (1.0 - dx) + surface[[y1, x1]] * dx;
        f0 * (1.0 - dy) + f1 * dy
    })
}

fn sample_axis(out_idx: usize, in_len: usize, out_len: usize) -> (usize, usize, f32) {
    let scale = in_len as f32 / out_len as f32;
    let src = ((out_idx as f32 + 0.5) * scale - 0.5).clamp(0.0, (in_len - 1) as f32);
    let i0 = src.floor() as usize;
    let i1 = (i0 + 1).min(in_len - 1);
    (i0, i1, src - i0 as f32)
}

/// Box-average resampling to a smaller grid.
pub fn area_downsample(surface: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (in_h, in_w) = surface.dim();
    if in_h == 0 || in_w == 0 {
        return Array2::zeros((height, width));
    }

    Array2::from_shape_fn((height, width), |(y, x)| {
        let (r0, r1) = box_bounds(y, in_h, height);
        let (c0, c1) = box_bounds(x, in_w, width);
        let cell = surface.slice(ndarray::s![r0..r1, c0..c1]);
        cell.sum() / cell.len() as f32
    })
}

fn box_bounds(out_idx: usize, in_len: usize, out_len: usize) -> (usize, usize) {
    let start = (out_idx * in_len / out_len).min(in_len - 1);
    let end = ((out_idx + 1) * in_len).div_ceil(out_len).clamp(start + 1, in_len);
    (start, end)
}

/// Normalize, resize to `(height, width)`, and clamp to `[0, 1]`.
pub fn normalize_and_resize(surface: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    resize_bilinear(&normalize(surface), height, width).mapv(|v| v.clamp(0.0, 1.0))
}

/// `true` where the value is at least `cutoff`.
pub fn threshold(surface: &Array2<f32>, cutoff: f32) -> Array2<bool> {
    surface.mapv(|v| v >= cutoff)
}

/// How the mask cutoff is derived from a heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CutoffPolicy {
    /// A fraction of the heatmap maximum.
    FractionOfMax(f32),
    /// Mean plus one standard deviation of the heatmap.
    MeanPlusStd,
    /// A fixed value.
    Absolute(f32),
}

impl Default for CutoffPolicy {
    fn default() -> Self {
        CutoffPolicy::FractionOfMax(0.5)
    }
}

impl CutoffPolicy {
    /// The cutoff for `surface`.
    pub fn resolve(&self, surface: &Array2<f32>) -> f32 {
        match *self {
            CutoffPolicy::FractionOfMax(fraction) => {
                let max = surface.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                if max.is_finite() { fraction * max } else { 0.0 }
            }
            CutoffPolicy::MeanPlusStd => {
                if surface.is_empty() {
                    return 0.0;
                }
                let mean = surface.mean().unwrap_or(0.0);
                mean + surface.std(0.0)
            }
            CutoffPolicy::Absolute(value) => value,
        }
    }

    /// Threshold `surface` at the resolved cutoff.
    ///
    /// Relative policies mark nothing on a surface with no positive value,
    /// so an all-zero heatmap gives an empty mask.
    pub fn mask(&self, surface: &Array2<f32>) -> (f32, Array2<bool>) {
        let cutoff = self.resolve(surface);
        let relative = !matches!(self, CutoffPolicy::Absolute(_));
        if relative && !surface.iter().any(|v| *v > 0.0) {
            return (cutoff, Array2::from_elem(surface.raw_dim(), false));
        }
        (cutoff, threshold(surface, cutoff))
    }
}

/// Seismic colormap: dark blue, blue, white, red, dark red over `[0, 1]`.
pub fn seismic(value: f32) -> Rgb<u8> {
    const ANCHORS: [(f32, [u8; 3]); 5] = [
        (0.0, [0, 0, 76]),
        (0.25, [0, 0, 255]),
        (0.5, [255, 255, 255]),
        (0.75, [255, 0, 0]),
        (1.0, [128, 0, 0]),
    ];

    let x = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    let mut i = 0;
    while i + 2 < ANCHORS.len() && x > ANCHORS[i + 1].0 {
        i += 1;
    }
    let (x0, c0) = ANCHORS[i];
    let (x1, c1) = ANCHORS[i + 1];
    let t = ((x - x0) / (x1 - x0)).clamp(0.0, 1.0);
    let lerp = |a: u8, b: u8| (a as f32 + t * (b as f32 - a as f32)).round() as u8;
    Rgb([lerp(c0[0], c1[0]), lerp(c0[1], c1[1]), lerp(c0[2], c1[2])])
}

/// Colour a `[0, 1]` heatmap with [`seismic`].
pub fn heatmap_image(heatmap: &Array2<f32>) -> RgbImage {
    let (height, width) = heatmap.dim();
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        seismic(heatmap[[y as usize, x as usize]])
    })
}

fn ensure_same_size(base: &RgbImage, height: usize, width: usize) -> Result<()> {
    if base.height() as usize != height || base.width() as usize != width {
        return Err(CamError::InvalidShape {
            expected: format!("{}x{}", base.height(), base.width()),
            got: format!("{height}x{width}"),
        });
    }
    Ok(())
}

/// Blend `heatmap` over `base`; `alpha` is the heatmap weight.
pub fn overlay(base: &RgbImage, heatmap: &RgbImage, alpha: f32) -> Result<RgbImage> {
    ensure_same_size(base, heatmap.height() as usize, heatmap.width() as usize)?;

    let a = alpha.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let Rgb(h) = *heatmap.get_pixel(x, y);
        let Rgb(b) = *pixel;
        let blend = |hc: u8, bc: u8| (a * hc as f32 + (1.0 - a) * bc as f32).round() as u8;
        *pixel = Rgb([blend(h[0], b[0]), blend(h[1], b[1]), blend(h[2], b[2])]);
    }
    Ok(out)
}

/// Keep `base` pixels where `mask` is set, black elsewhere.
pub fn apply_mask(base: &RgbImage, mask: &Array2<bool>) -> Result<RgbImage> {
    let (height, width) = mask.dim();
    ensure_same_size(base, height, width)?;

    let mut out = base.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if !mask[[y as usize, x as usize]] {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    Ok(out)
}

/// Place images side by side, top-aligned, on a black canvas.
pub fn compose_panel(images: &[RgbImage]) -> RgbImage {
    let width = images.iter().map(|img| img.width()).sum();
    let height = images.iter().map(|img| img.height()).max().unwrap_or(0);

    let mut panel = RgbImage::new(width, height);
    let mut x = 0i64;
    for img in images {
        imageops::replace(&mut panel, img, x, 0);
        x += i64::from(img.width());
    }
    panel
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::Rng;
    use rcam_core::Seed;

    fn max_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn test_normalize_bounds() {
        let mut rng = Seed::new(11).to_rng();
        let surface = Array2::from_shape_fn((7, 7), |_| rng.gen_range(-3.0f32..5.0));

        let norm = normalize(&surface);

        assert!(norm.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(norm.iter().any(|v| *v == 0.0));
        assert!(norm.iter().any(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_normalize_constant_surface() {
        for value in [0.0f32, 2.5] {
            let norm = normalize(&Array2::from_elem((4, 4), value));
            assert!(norm.iter().all(|v| *v == 0.0));
        }

        let resized = normalize_and_resize(&Array2::zeros((7, 7)), 224, 224);
        assert_eq!(resized.dim(), (224, 224));
        assert!(resized.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_resize_bilinear_values() {
        let surface = array![[0.0f32, 1.0], [2.0, 3.0]];

        let resized = resize_bilinear(&surface, 4, 4);

        assert_eq!(resized.dim(), (4, 4));
        assert!((resized[[0, 0]] - 0.0).abs() < 1e-6);
        assert!((resized[[3, 3]] - 3.0).abs() < 1e-6);
        // (1.5 * 0.5 - 0.5) = 0.25 along both axes
        assert!((resized[[1, 1]] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_resize_stays_in_input_range() {
        let mut rng = Seed::new(5).to_rng();
        let surface = Array2::from_shape_fn((7, 7), |_| rng.gen_range(0.0f32..1.0));
        let lo = surface.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = surface.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let resized = resize_bilinear(&surface, 224, 224);

        assert!(resized.iter().all(|v| *v >= lo - 1e-6 && *v <= hi + 1e-6));
    }

    #[test]
    fn test_resize_then_area_average_recovers_surface() {
        let ramp = Array2::from_shape_fn((7, 7), |(y, x)| (y + x) as f32);
        let plane = Array2::from_shape_fn((7, 7), |(y, x)| 2.0 * y as f32 - 0.5 * x as f32);

        for surface in [ramp, plane] {
            let expected = normalize(&surface);
            let up = normalize_and_resize(&surface, 224, 224);
            let down = area_downsample(&up, 7, 7);

            assert_eq!(down.dim(), (7, 7));
            assert!(max_abs_diff(&down, &expected) < 0.05);
        }
    }

    #[test]
    fn test_area_downsample_block_means() {
        let surface = array![[1.0f32, 3.0, 0.0, 0.0], [1.0, 3.0, 4.0, 4.0]];
        let down = area_downsample(&surface, 1, 2);
        assert_eq!(down, array![[2.0f32, 2.0]]);
    }

    #[test]
    fn test_threshold_monotone() {
        let mut rng = Seed::new(9).to_rng();
        let surface = Array2::from_shape_fn((16, 16), |_| rng.gen_range(0.0f32..1.0));

        let cutoffs = [0.0f32, 0.2, 0.5, 0.8, 1.0];
        for pair in cutoffs.windows(2) {
            let loose = threshold(&surface, pair[0]);
            let strict = threshold(&surface, pair[1]);
            assert!(strict.iter().zip(loose.iter()).all(|(s, l)| !*s || *l));
        }
    }

    #[test]
    fn test_cutoff_policies() {
        let surface = array![[0.0f32, 0.5], [1.0, 0.5]];

        assert!((CutoffPolicy::default().resolve(&surface) - 0.5).abs() < 1e-6);
        assert!((CutoffPolicy::MeanPlusStd.resolve(&surface) - (0.5 + 0.5f32.sqrt() * 0.5)).abs() < 1e-5);
        assert_eq!(CutoffPolicy::Absolute(0.9).resolve(&surface), 0.9);

        let (cutoff, mask) = CutoffPolicy::FractionOfMax(0.5).mask(&surface);
        assert_eq!(cutoff, 0.5);
        assert_eq!(mask, array![[false, true], [true, true]]);
    }

    #[test]
    fn test_zero_heatmap_gives_empty_mask() {
        let zeros = Array2::<f32>::zeros((4, 4));

        for policy in [CutoffPolicy::FractionOfMax(0.5), CutoffPolicy::MeanPlusStd] {
            let (cutoff, mask) = policy.mask(&zeros);
            assert_eq!(cutoff, 0.0);
            assert!(mask.iter().all(|m| !m));
        }
        let (_, mask) = CutoffPolicy::Absolute(0.0).mask(&zeros);
        assert!(mask.iter().all(|m| *m));
    }

    #[test]
    fn test_cutoff_policy_serde() {
        let json = serde_json::to_string(&CutoffPolicy::FractionOfMax(0.5)).unwrap();
        assert_eq!(json, r#"{"kind":"fraction_of_max","value":0.5}"#);
        let policy: CutoffPolicy = serde_json::from_str(r#"{"kind":"mean_plus_std"}"#).unwrap();
        assert_eq!(policy, CutoffPolicy::MeanPlusStd);
    }

    #[test]
    fn test_seismic_anchors() {
        assert_eq!(seismic(0.0), Rgb([0, 0, 76]));
        assert_eq!(seismic(0.5), Rgb([255, 255, 255]));
        assert_eq!(seismic(1.0), Rgb([128, 0, 0]));
        assert_eq!(seismic(f32::NAN), Rgb([0, 0, 76]));
    }

    #[test]
    fn test_overlay_and_mask() {
        let base = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let heat = heatmap_image(&array![[1.0f32, 1.0], [0.5, 0.5]]);

        let blended = overlay(&base, &heat, 0.5).unwrap();
        assert_eq!(*blended.get_pixel(0, 0), Rgb([114, 50, 50]));
        assert_eq!(*blended.get_pixel(0, 1), Rgb([178, 178, 178]));

        let masked = apply_mask(&base, &array![[true, false], [false, true]]).unwrap();
        assert_eq!(*masked.get_pixel(0, 0), Rgb([100, 100, 100]));
        assert_eq!(*masked.get_pixel(1, 0), Rgb([0, 0, 0]));

        let wrong = RgbImage::new(3, 3);
        assert!(overlay(&wrong, &heat, 0.5).is_err());
    }

    #[test]
    fn test_compose_panel() {
        let a = RgbImage::from_pixel(2, 3, Rgb([1, 2, 3]));
        let b = RgbImage::from_pixel(4, 2, Rgb([9, 9, 9]));

        let panel = compose_panel(&[a, b]);

        assert_eq!(panel.dimensions(), (6, 3));
        assert_eq!(*panel.get_pixel(1, 2), Rgb([1, 2, 3]));
        assert_eq!(*panel.get_pixel(5, 1), Rgb([9, 9, 9]));
        assert_eq!(*panel.get_pixel(5, 2), Rgb([0, 0, 0]));
    }
}

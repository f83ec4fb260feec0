//! Image enhancement: make a phone photo of a manifest easy for a VLM to read.
//!
//! ## Step order
//!
//! ```text
//! decode ─▶ EXIF orientation ─▶ grayscale ─▶ level stretch ─▶ unsharp mask ─▶ resize ─▶ PNG
//! ```
//!
//! Orientation must come first: phones store the sensor image sideways and
//! only record the rotation in EXIF, and every later step (notably the width
//! bound) depends on the final orientation. Levels are stretched before
//! sharpening so the mask works on the full dynamic range; resizing happens
//! last so sharpening operates on the original pixels.
//!
//! The output is PNG: lossless compression keeps handwriting edges crisp.
//!
//! The whole transform is pure and deterministic. It runs inside
//! `spawn_blocking` because decoding a 12 MP JPEG and a Lanczos resize are
//! CPU-heavy and would stall the async workers.

use crate::error::ManifestError;
use crate::record::RawImageBytes;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Content type of every enhanced image.
pub const ENHANCED_CONTENT_TYPE: &str = "image/png";

/// Fraction of pixels clipped at each end by the level stretch.
const LEVEL_CLIP_FRACTION: f64 = 0.01;

/// Unsharp-mask blur radius.
const SHARPEN_SIGMA: f32 = 1.0;

/// Unsharp-mask threshold (minimum difference that gets sharpened).
const SHARPEN_THRESHOLD: i32 = 2;

/// Tallest output allowed, as a multiple of the target width.
pub const MAX_HEIGHT_RATIO: u32 = 4;

/// Enhance `raw` on the blocking thread pool.
///
/// Consumes the input; the original bytes are dropped once decoded.
pub async fn enhance(raw: RawImageBytes, max_width: u32) -> Result<RawImageBytes, ManifestError> {
    tokio::task::spawn_blocking(move || enhance_blocking(raw, max_width))
        .await
        .map_err(|e| ManifestError::Internal(format!("Enhance task panicked: {}", e)))?
}

/// Blocking implementation of [`enhance`].
pub fn enhance_blocking(raw: RawImageBytes, max_width: u32) -> Result<RawImageBytes, ManifestError> {
    let img = image::load_from_memory(&raw.bytes).map_err(|e| ManifestError::Enhancement {
        detail: format!("cannot decode {} ({} bytes): {}", raw.content_type, raw.len(), e),
    })?;
    let orientation = read_exif_orientation(&raw.bytes);
    drop(raw);

    debug!(
        "Decoded {}x{} image, EXIF orientation {}",
        img.width(),
        img.height(),
        orientation
    );

    let img = apply_orientation(img, orientation);
    let gray = stretch_levels(img.to_luma8());
    let sharpened = imageops::unsharpen(&gray, SHARPEN_SIGMA, SHARPEN_THRESHOLD);
    let resized = resize_to_width(&sharpened, max_width)?;

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(resized)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ManifestError::Enhancement {
            detail: format!("PNG encoding failed: {}", e),
        })?;

    debug!("Enhanced image → {} bytes PNG", buf.len());
    Ok(RawImageBytes::new(buf, ENHANCED_CONTENT_TYPE))
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Linear level stretch: map the 1st..99th luminance percentile to 0..255.
///
/// A flat image (single luminance) is returned unchanged.
pub fn stretch_levels(mut img: GrayImage) -> GrayImage {
    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return img;
    }
    let clip = (total as f64 * LEVEL_CLIP_FRACTION) as u64;

    let low = percentile_index(histogram.iter().copied().enumerate(), clip);
    let high = percentile_index(histogram.iter().copied().enumerate().rev(), clip);
    if high <= low {
        return img;
    }

    let range = (high - low) as f32;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let scaled = (v as f32 - low as f32) * 255.0 / range;
        *slot = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in img.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    img
}

/// First luminance value whose cumulative count exceeds `clip`.
fn percentile_index(bins: impl Iterator<Item = (usize, u64)>, clip: u64) -> usize {
    let mut seen = 0u64;
    let mut last = 0usize;
    for (value, count) in bins {
        last = value;
        seen += count;
        if seen > clip {
            return value;
        }
    }
    last
}

/// Resize so the width is exactly `width`, preserving aspect ratio.
///
/// Small photos are upscaled: the model reads enlarged handwriting better
/// than a tiny original. An image that would come out taller than
/// [`MAX_HEIGHT_RATIO`] × `width` is rejected before any buffer is allocated.
pub fn resize_to_width(img: &GrayImage, width: u32) -> Result<GrayImage, ManifestError> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Ok(img.clone());
    }

    let height = (h as f64 * width as f64 / w as f64).round().max(1.0);
    let max_height = width.saturating_mul(MAX_HEIGHT_RATIO);
    if height > max_height as f64 {
        return Err(ManifestError::Enhancement {
            detail: format!(
                "{w}x{h} image is too narrow: {width} px wide would be {height} px tall (limit {max_height})"
            ),
        });
    }

    if w == width {
        return Ok(img.clone());
    }
    Ok(imageops::resize(img, width, height as u32, FilterType::Lanczos3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn gradient_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| {
            let v = (100 + (x * 50 / w.max(1))) as u8;
            Rgb([v, v.saturating_add((y % 7) as u8), v])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    /// Insert an APP1 Exif segment holding only the Orientation tag
    /// (little-endian TIFF, one IFD0 entry) right after the JPEG SOI marker.
    fn with_exif_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let mut tiff = vec![b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        tiff.extend_from_slice(&[0x01, 0x00]); // one entry
        tiff.extend_from_slice(&[0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00]);
        tiff.extend_from_slice(&[orientation, 0x00, 0x00, 0x00]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // no next IFD

        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);
        let len = (payload.len() + 2) as u16;

        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn enhances_to_grayscale_png_of_target_width() {
        let raw = RawImageBytes::new(gradient_jpeg(400, 300), "image/jpeg");
        let out = enhance_blocking(raw, 800).expect("enhance should succeed");
        assert_eq!(out.content_type, ENHANCED_CONTENT_TYPE);

        let decoded = image::load_from_memory_with_format(&out.bytes, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), 800);
        assert_eq!(decoded.height(), 600);
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn downscales_wide_images() {
        let raw = RawImageBytes::new(gradient_jpeg(1000, 500), "image/jpeg");
        let out = enhance_blocking(raw, 400).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 200));
    }

    #[test]
    fn is_deterministic() {
        let bytes = gradient_jpeg(120, 80);
        let a = enhance_blocking(RawImageBytes::new(bytes.clone(), "image/jpeg"), 256).unwrap();
        let b = enhance_blocking(RawImageBytes::new(bytes, "image/jpeg"), 256).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn corrupt_input_is_rejected() {
        let raw = RawImageBytes::new(b"<html>not an image</html>".to_vec(), "text/html");
        let err = enhance_blocking(raw, 800).unwrap_err();
        assert!(matches!(err, ManifestError::Enhancement { .. }), "got {err:?}");
    }

    #[test]
    fn missing_exif_is_normal_orientation() {
        assert_eq!(read_exif_orientation(&gradient_jpeg(8, 8)), 1);
        assert_eq!(read_exif_orientation(b"garbage"), 1);
    }

    #[test]
    fn exif_orientation_is_applied_before_resizing() {
        let bytes = with_exif_orientation(&gradient_jpeg(60, 30), 6);
        assert_eq!(read_exif_orientation(&bytes), 6);

        let out = enhance_blocking(RawImageBytes::new(bytes, "image/jpeg"), 256).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        // 60x30 landscape sensor image, rotated to 30x60, then scaled to 256 wide.
        assert_eq!((decoded.width(), decoded.height()), (256, 512));
    }

    #[test]
    fn orientation_six_rotates_portrait() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(40, 20));
        let rotated = apply_orientation(img, 6);
        assert_eq!((rotated.width(), rotated.height()), (20, 40));
        let same = apply_orientation(DynamicImage::ImageLuma8(GrayImage::new(40, 20)), 1);
        assert_eq!((same.width(), same.height()), (40, 20));
    }

    #[test]
    fn levels_are_stretched_to_full_range() {
        let img = GrayImage::from_fn(100, 10, |x, _| Luma([100 + (x / 2) as u8]));
        let out = stretch_levels(img);
        let min = out.pixels().map(|p| p.0[0]).min().unwrap();
        let max = out.pixels().map(|p| p.0[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn flat_image_is_untouched() {
        let img = GrayImage::from_pixel(10, 10, Luma([77]));
        let out = stretch_levels(img.clone());
        assert_eq!(out, img);
    }

    #[test]
    fn resize_preserves_aspect_ratio() {
        let img = GrayImage::new(300, 100);
        let out = resize_to_width(&img, 600).unwrap();
        assert_eq!(out.dimensions(), (600, 200));

        // Exactly at the height limit.
        let tall = GrayImage::new(100, 400);
        let out = resize_to_width(&tall, 256).unwrap();
        assert_eq!(out.dimensions(), (256, 1024));
    }

    #[test]
    fn narrow_strip_is_rejected_not_upscaled() {
        let err = resize_to_width(&GrayImage::new(2, 2000), 1600).unwrap_err();
        assert!(matches!(err, ManifestError::Enhancement { .. }), "got {err:?}");

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2000, Luma([120])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let err = enhance_blocking(RawImageBytes::new(png, "image/png"), 1600).unwrap_err();
        match err {
            ManifestError::Enhancement { detail } => assert!(detail.contains("too narrow"), "got {detail}"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

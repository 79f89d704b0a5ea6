use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

use crate::core::errors::{DecodeError, DecodeResult};

/// Image after downsampling, ready for text detection
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: DynamicImage,
    /// Whether the source exceeded the size cap and was resampled
    pub resized: bool,
}

impl PreparedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decode JPEG/PNG bytes. Other formats are rejected even if the decoder knows them.
pub fn decode_image(bytes: &[u8]) -> DecodeResult<DynamicImage> {
    let format = image::guess_format(bytes).map_err(|_| DecodeError::UnsupportedFormat)?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(DecodeError::UnsupportedFormat);
    }

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::Empty { width, height });
    }

    Ok(img)
}

/// Dimensions after capping the longest side at `max_dimension`.
///
/// Returns `None` when the image already fits. The longest side lands exactly
/// on `max_dimension`; the other side is floored, never below one pixel.
pub fn capped_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return None;
    }

    let scale_side = |side: u32| -> u32 {
        if side == longest {
            max_dimension
        } else {
            ((side as u64 * max_dimension as u64) / longest as u64).max(1) as u32
        }
    };

    Some((scale_side(width), scale_side(height)))
}

/// Downsample an image so its longest side is at most `max_dimension`.
pub fn prepare_image(img: DynamicImage, max_dimension: u32) -> PreparedImage {
    match capped_dimensions(img.width(), img.height(), max_dimension) {
        Some((w, h)) => PreparedImage {
            image: img.resize_exact(w, h, FilterType::Lanczos3),
            resized: true,
        },
        None => PreparedImage {
            image: img,
            resized: false,
        },
    }
}

/// Decode and downsample on the blocking pool.
///
/// Decoding and Lanczos resampling are CPU-bound and must not stall the
/// async runtime.
pub async fn prepare_image_async(bytes: Vec<u8>, max_dimension: u32) -> DecodeResult<PreparedImage> {
    tokio::task::spawn_blocking(move || {
        let img = decode_image(&bytes)?;
        Ok(prepare_image(img, max_dimension))
    })
    .await
    .map_err(|e| DecodeError::TaskFailed(e.to_string()))?
}

/// Asynchronously encode an image to PNG bytes using spawn_blocking.
pub async fn encode_png_async(img: Arc<DynamicImage>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || encode_png(&img))
        .await
        .context("Failed to spawn blocking task for PNG encoding")?
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn test_large_image_longest_side_capped() {
        let prepared = prepare_image(gradient(1600, 1000), 800);
        assert!(prepared.resized);
        assert_eq!(prepared.width(), 800);
        assert_eq!(prepared.height(), 500);

        let tall = prepare_image(gradient(333, 1001), 800);
        assert_eq!(tall.height(), 800);
        // 333 * 800 / 1001 = 266.13 -> 266; aspect kept within one pixel
        assert_eq!(tall.width(), 266);
        let ratio_in = 333.0 / 1001.0;
        let ratio_out = tall.width() as f64 / tall.height() as f64;
        assert!((ratio_in - ratio_out).abs() < 1.0 / 800.0 + 1e-9);
    }

    #[test]
    fn test_small_image_passes_through_unchanged() {
        let source = gradient(640, 480);
        let prepared = prepare_image(source.clone(), 800);
        assert!(!prepared.resized);
        assert_eq!(prepared.image.dimensions(), (640, 480));
        assert_eq!(prepared.image.as_bytes(), source.as_bytes());

        // Exactly at the limit is not resized either
        let exact = prepare_image(gradient(800, 20), 800);
        assert!(!exact.resized);
    }

    #[test]
    fn test_extreme_aspect_keeps_one_pixel() {
        assert_eq!(capped_dimensions(5000, 2, 800), Some((800, 1)));
        assert_eq!(capped_dimensions(100, 100, 800), None);
    }

    #[test]
    fn test_decode_rejects_garbage_and_other_formats() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(DecodeError::UnsupportedFormat)
        ));

        // GIF magic is recognized but not accepted
        assert!(matches!(
            decode_image(b"GIF89a\x01\x00\x01\x00\x00\x00\x00"),
            Err(DecodeError::UnsupportedFormat)
        ));

        // Truncated PNG: valid signature, no chunks
        let truncated = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert!(matches!(
            decode_image(&truncated),
            Err(DecodeError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_prepare_async_round_trip() {
        let png = encode_png(&gradient(1200, 300)).unwrap();
        let prepared = prepare_image_async(png, 800).await.unwrap();
        assert_eq!(prepared.image.dimensions(), (800, 200));
    }
}

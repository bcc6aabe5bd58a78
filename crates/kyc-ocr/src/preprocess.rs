//! Image pre-processing ahead of recognition.
//!
//! Input is decoded, converted to single-channel grayscale and, when its
//! shorter side is below the resolution floor, upscaled with Lanczos3 so the
//! shorter side lands exactly on the floor. Targets above
//! [`MAX_PREPROCESS_PIXELS`] are refused before any buffer is allocated. The result is written as PNG to a
//! temp file that lives as long as the returned [`PreparedImage`].

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GrayImage, ImageFormat, ImageReader};
use kyc_core::defaults::MAX_PREPROCESS_PIXELS;
use kyc_core::{Error, Result};
use tempfile::NamedTempFile;
use tracing::debug;

/// A grayscale PNG ready for the recognition backend.
#[derive(Debug)]
pub struct PreparedImage {
    file: NamedTempFile,
    pub width: u32,
    pub height: u32,
    pub upscaled: bool,
}

impl PreparedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Target dimensions when the shorter side is below `floor`, else `None`.
///
/// Scaling preserves the aspect ratio and rounds up, so the shorter side
/// becomes exactly `floor`.
pub fn upscale_dimensions(width: u32, height: u32, floor: u32) -> Option<(u32, u32)> {
    let min_side = width.min(height);
    if min_side == 0 || min_side >= floor {
        return None;
    }
    let scale = |side: u32| -> u32 {
        let scaled = (side as u64 * floor as u64).div_ceil(min_side as u64);
        scaled.min(u32::MAX as u64) as u32
    };
    Some((scale(width), scale(height)))
}

/// [`upscale_dimensions`], refused with `Error::Extraction` when the target
/// would exceed `max_pixels`.
pub fn upscale_target(
    width: u32,
    height: u32,
    floor: u32,
    max_pixels: u64,
) -> Result<Option<(u32, u32)>> {
    match upscale_dimensions(width, height, floor) {
        Some((new_width, new_height)) if new_width as u64 * new_height as u64 > max_pixels => {
            Err(Error::Extraction(format!(
                "upscaling {}x{} to {}x{} exceeds the {} pixel limit",
                width, height, new_width, new_height, max_pixels
            )))
        }
        target => Ok(target),
    }
}

/// Decode, grayscale and upscale `source`, writing the PNG into `work_dir`.
///
/// CPU-bound; call through [`prepare`] from async code.
pub fn prepare_blocking(source: &Path, min_dimension: u32, work_dir: &Path) -> Result<PreparedImage> {
    let decoded = ImageReader::open(source)
        .map_err(|e| Error::Extraction(format!("open image {}: {}", source.display(), e)))?
        .with_guessed_format()
        .map_err(|e| Error::Extraction(format!("read image {}: {}", source.display(), e)))?
        .decode()
        .map_err(|e| Error::Extraction(format!("decode image {}: {}", source.display(), e)))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(Error::Extraction(format!(
            "image {} has no pixels",
            source.display()
        )));
    }

    let target = upscale_target(width, height, min_dimension, MAX_PREPROCESS_PIXELS)?;
    let mut gray: GrayImage = decoded.to_luma8();
    let mut upscaled = false;
    if let Some((new_width, new_height)) = target {
        debug!(
            width,
            height,
            new_width,
            new_height,
            "Upscaling low-resolution image for recognition"
        );
        gray = image::imageops::resize(&gray, new_width, new_height, FilterType::Lanczos3);
        upscaled = true;
    }

    let file = tempfile::Builder::new()
        .prefix("kyc-ocr-")
        .suffix(".png")
        .tempfile_in(work_dir)
        .map_err(|e| Error::Extraction(format!("create temp image: {}", e)))?;
    gray.save_with_format(file.path(), ImageFormat::Png)
        .map_err(|e| Error::Extraction(format!("write temp image: {}", e)))?;

    Ok(PreparedImage {
        width: gray.width(),
        height: gray.height(),
        upscaled,
        file,
    })
}

/// Async wrapper running [`prepare_blocking`] on the blocking pool.
pub async fn prepare(source: PathBuf, min_dimension: u32, work_dir: PathBuf) -> Result<PreparedImage> {
    tokio::task::spawn_blocking(move || prepare_blocking(&source, min_dimension, &work_dir))
        .await
        .map_err(|e| Error::Internal(format!("image pre-processing task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_rgb(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_upscale_dimensions() {
        assert_eq!(upscale_dimensions(500, 250, 1000), Some((2000, 1000)));
        assert_eq!(upscale_dimensions(300, 700, 1000), Some((1000, 2334)));
        assert_eq!(upscale_dimensions(1000, 1200, 1000), None);
        assert_eq!(upscale_dimensions(0, 10, 1000), None);
    }

    #[test]
    fn test_thin_image_upscale_is_refused() {
        assert_eq!(upscale_dimensions(2, 40_000, 1000), Some((1000, 20_000_000)));
        let err = upscale_target(2, 40_000, 1000, MAX_PREPROCESS_PIXELS).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert!(err.to_string().contains("pixel limit"));

        assert_eq!(
            upscale_target(500, 250, 1000, MAX_PREPROCESS_PIXELS).unwrap(),
            Some((2000, 1000))
        );
        assert_eq!(upscale_target(1200, 1100, 1000, 1).unwrap(), None);
    }

    #[test]
    fn test_thin_image_file_fails_without_allocating() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_rgb(dir.path(), "sliver.png", 2, 4_000);

        // 2x4000 at a 1000 px floor would become 1000x2,000,000
        let err = prepare_blocking(&source, 1000, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_small_image_is_upscaled_to_floor() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_rgb(dir.path(), "small.png", 40, 20);

        let prepared = prepare_blocking(&source, 100, dir.path()).unwrap();
        assert!(prepared.upscaled);
        assert_eq!((prepared.width, prepared.height), (200, 100));

        let reread = image::open(prepared.path()).unwrap();
        assert_eq!(reread.color(), image::ColorType::L8);
        assert_eq!(reread.height(), 100);
    }

    #[test]
    fn test_large_image_keeps_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_rgb(dir.path(), "large.png", 120, 110);

        let prepared = prepare_blocking(&source, 100, dir.path()).unwrap();
        assert!(!prepared.upscaled);
        assert_eq!((prepared.width, prepared.height), (120, 110));
    }

    #[test]
    fn test_format_is_sniffed_not_taken_from_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let png = write_rgb(dir.path(), "real.png", 10, 10);
        let misnamed = dir.path().join("scan.jpg");
        std::fs::rename(&png, &misnamed).unwrap();

        assert!(prepare_blocking(&misnamed, 5, dir.path()).is_ok());
    }

    #[test]
    fn test_undecodable_input_is_extraction_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really").unwrap();

        let err = prepare_blocking(&path, 100, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_rgb(dir.path(), "a.png", 8, 8);

        let prepared = prepare(source, 4, dir.path().to_path_buf()).await.unwrap();
        let path = prepared.path().to_path_buf();
        assert!(path.exists());
        drop(prepared);
        assert!(!path.exists());
    }
}

//! Image persistence: bounded resize, JPEG re-encode, thumbnail sibling.
//!
//! Files land under `<upload_root>/<YYYY>/<MM>/<kind>_<ts>_<rand8>.jpg`.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

const MAX_SIDE: u32 = 1920;
const THUMB_SIDE: u32 = 400;
const JPEG_QUALITY: u8 = 85;
const THUMB_QUALITY: u8 = 75;

/// Relative paths of a stored image pair.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub image_path: String,
    pub thumbnail_path: String,
}

pub struct ImageStorage {
    upload_root: PathBuf,
}

impl ImageStorage {
    pub fn new(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            upload_root: upload_root.into(),
        }
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Decode, normalize and persist an uploaded image plus its thumbnail.
    /// Returns paths relative to the upload root.
    #[instrument(skip(self, bytes), fields(kind, size = bytes.len()))]
    pub fn save(&self, bytes: &[u8], kind: &str, now: NaiveDateTime) -> Result<StoredImage> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Image(format!("decode failed: {e}")))?;
        let decoded = DynamicImage::ImageRgb8(decoded.to_rgb8());

        let date_dir = now.format("%Y/%m").to_string();
        let full_dir = self.upload_root.join(&date_dir);
        std::fs::create_dir_all(&full_dir)
            .map_err(|e| PipelineError::Image(format!("create upload dir: {e}")))?;

        let file_name = generate_filename(kind, now);
        let rel_image = format!("{date_dir}/{file_name}");
        let rel_thumb = format!("{date_dir}/thumb_{file_name}");

        let main = bounded(&decoded, MAX_SIDE);
        write_jpeg(&main, &self.upload_root.join(&rel_image), JPEG_QUALITY)?;

        let thumb = bounded(&decoded, THUMB_SIDE);
        write_jpeg(&thumb, &self.upload_root.join(&rel_thumb), THUMB_QUALITY)?;

        debug!(path = %rel_image, "image stored");
        Ok(StoredImage {
            image_path: rel_image,
            thumbnail_path: rel_thumb,
        })
    }

    pub fn delete(&self, relative_path: &str) -> bool {
        let full = self.upload_root.join(relative_path);
        std::fs::remove_file(full).is_ok()
    }
}

fn generate_filename(kind: &str, now: NaiveDateTime) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let rand8 = &Uuid::new_v4().simple().to_string()[..8];
    format!("{kind}_{stamp}_{rand8}.jpg")
}

fn bounded(img: &DynamicImage, max_side: u32) -> DynamicImage {
    if img.width() <= max_side && img.height() <= max_side {
        img.clone()
    } else {
        img.resize(max_side, max_side, FilterType::Lanczos3)
    }
}

fn write_jpeg(img: &DynamicImage, path: &Path, quality: u8) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| PipelineError::Image(format!("create {}: {e}", path.display())))?;
    let mut writer = std::io::BufWriter::new(file);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| PipelineError::Image(format!("encode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 90, 60]),
        ));
        let mut out = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut out),
            image::ImageFormat::Png,
        )
        .unwrap();
        out
    }

    #[test]
    fn filename_shape() {
        let name = generate_filename("food", now());
        assert!(name.starts_with("food_20260205_100000_"));
        assert!(name.ends_with(".jpg"));
        // kind + stamp + underscore + 8 hex chars + extension
        assert_eq!(name.len(), "food_20260205_100000_".len() + 8 + 4);
    }

    #[test]
    fn save_writes_pair_under_dated_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImageStorage::new(dir.path());
        let stored = storage.save(&png_bytes(64, 48), "food", now()).unwrap();

        assert!(stored.image_path.starts_with("2026/02/food_"));
        assert!(stored.thumbnail_path.starts_with("2026/02/thumb_food_"));
        assert!(dir.path().join(&stored.image_path).exists());
        assert!(dir.path().join(&stored.thumbnail_path).exists());
    }

    #[test]
    fn oversized_images_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImageStorage::new(dir.path());
        let stored = storage.save(&png_bytes(2400, 1200), "scenery", now()).unwrap();

        let reloaded = image::open(dir.path().join(&stored.image_path)).unwrap();
        assert!(reloaded.width() <= MAX_SIDE && reloaded.height() <= MAX_SIDE);
        let thumb = image::open(dir.path().join(&stored.thumbnail_path)).unwrap();
        assert!(thumb.width() <= THUMB_SIDE && thumb.height() <= THUMB_SIDE);
    }

    #[test]
    fn garbage_bytes_fail_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImageStorage::new(dir.path());
        assert!(matches!(
            storage.save(b"not an image", "food", now()),
            Err(PipelineError::Image(_))
        ));
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImageStorage::new(dir.path());
        let stored = storage.save(&png_bytes(32, 32), "selfie", now()).unwrap();
        assert!(storage.delete(&stored.image_path));
        assert!(!storage.delete(&stored.image_path));
    }
}

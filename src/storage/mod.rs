//! # Storage Module
//!
//! Where captured photos, videos and thumbnails live on disk.
//!
//! ## Plain English
//!
//! Every capture lands in one media directory. This module:
//! 1. Creates the directory
//! 2. Generates unique, time-stamped filenames
//! 3. Writes pictures as JPEG
//! 4. Deletes the files of results nobody wants any more

pub mod probe;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::RgbaImage;

pub use probe::{FileProbe, ImageInfo, MediaProbe, VideoInfo};

use crate::encoder::FrameCompressor;
use crate::error::StorageError;
use crate::result::CaptureResult;

// ============================================
// MEDIA STORE
// ============================================

/// Owns the media directory.
pub struct MediaStore {
    directory: PathBuf,
    compressor: FrameCompressor,
}

impl MediaStore {
    /// Opens (creating if needed) the media directory.
    pub fn new(directory: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self, StorageError> {
        let directory = directory.into();
        ensure_directory(&directory)?;
        Ok(Self {
            directory,
            compressor: FrameCompressor::new(jpeg_quality),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes a picture as `IMG_<timestamp>.jpg`.
    pub fn save_picture(&self, image: &RgbaImage) -> Result<PathBuf, StorageError> {
        ensure_directory(&self.directory)?;
        let jpeg = self
            .compressor
            .compress_image(image)
            .map_err(|e| StorageError::Codec(e.to_string()))?;

        let path = generate_filename(&self.directory, "IMG", "jpg");
        fs::write(&path, jpeg)?;
        log::info!(
            "Saved picture {:?} ({}x{})",
            path,
            image.width(),
            image.height()
        );
        Ok(path)
    }

    /// Deletes one file inside the media directory. Missing files are fine.
    pub fn delete(&self, path: &Path) -> Result<(), StorageError> {
        if !path.starts_with(&self.directory) {
            return Err(StorageError::OutsideDirectory(path.to_path_buf()));
        }
        match fs::remove_file(path) {
            Ok(()) => {
                log::debug!("Deleted {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a superseded result's media and thumbnail.
    ///
    /// Failures are logged; there is nobody left to report them to.
    pub fn delete_result_files(&self, result: &CaptureResult) {
        for path in result.backing_files() {
            if let Err(e) = self.delete(&path) {
                log::warn!("Could not delete {:?}: {}", path, e);
            }
        }
    }
}

// ============================================
// UTILITY FUNCTIONS
// ============================================

/// Ensures a directory exists.
pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.is_dir() {
        log::info!("Creating media directory: {:?}", path);
        fs::create_dir_all(path).map_err(|source| StorageError::Directory {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Generates an unused file path in `directory`.
///
/// Format: `<prefix>_YYYY-MM-DD-HH-MM-SS-mmm.<extension>`, with a counter
/// appended when two captures land in the same millisecond.
pub fn generate_filename(directory: &Path, prefix: &str, extension: &str) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S-%3f");
    let path = directory.join(format!("{}_{}.{}", prefix, stamp, extension));
    if !path.exists() {
        return path;
    }

    (1u32..)
        .map(|n| directory.join(format!("{}_{}_{}.{}", prefix, stamp, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ContentType;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn test_filename_generation() {
        let dir = tempdir().unwrap();
        let first = generate_filename(dir.path(), "IMG", "jpg");
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("IMG_"));
        assert!(name.ends_with(".jpg"));

        fs::write(&first, b"x").unwrap();
        let second = generate_filename(dir.path(), "IMG", "jpg");
        assert_ne!(first, second);
    }

    #[test]
    fn test_store_creation() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = MediaStore::new(&nested, 90).unwrap();
        assert!(nested.is_dir());
        assert_eq!(store.directory(), nested.as_path());
    }

    #[test]
    fn test_save_and_delete_picture() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 90).unwrap();
        let image = RgbaImage::from_pixel(32, 16, Rgba([200, 10, 10, 255]));

        let path = store.save_picture(&image).unwrap();
        assert_eq!(image::image_dimensions(&path).unwrap(), (32, 16));
        assert_eq!(path.parent(), Some(dir.path()));

        store.delete(&path).unwrap();
        assert!(!path.exists());
        // Deleting twice is fine
        store.delete(&path).unwrap();
    }

    #[test]
    fn test_delete_outside_directory_rejected() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let outside = other.path().join("keep.jpg");
        fs::write(&outside, b"x").unwrap();

        let store = MediaStore::new(dir.path(), 90).unwrap();
        assert!(matches!(
            store.delete(&outside),
            Err(StorageError::OutsideDirectory(_))
        ));
        assert!(outside.exists());
    }

    #[test]
    fn test_delete_result_files() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 90).unwrap();
        let video = dir.path().join("VID_1.mjpeg");
        let thumb = dir.path().join("VID_1_thumb.jpg");
        fs::write(&video, b"v").unwrap();
        fs::write(&thumb, b"t").unwrap();

        let result = CaptureResult {
            uri: video.to_string_lossy().to_string(),
            content_type: ContentType::Video,
            width: 1,
            height: 1,
            thumb_url: Some(thumb.to_string_lossy().to_string()),
            duration: Some(100),
        };
        store.delete_result_files(&result);
        assert!(!video.exists());
        assert!(!thumb.exists());
    }
}

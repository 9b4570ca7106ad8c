//! Reading back what was saved: dimensions, durations, thumbnails.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::encoder::split_mjpeg_frames;

/// Facts about a recorded video.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
    /// Still image extracted from the video, if one could be written
    pub thumbnail_path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

/// Reads media metadata. Hosts may plug in the platform's retriever.
pub trait MediaProbe: Send + Sync {
    fn probe_video(&self, path: &Path) -> anyhow::Result<VideoInfo>;

    fn probe_image(&self, path: &Path) -> anyhow::Result<ImageInfo>;
}

/// Probe for the files this crate writes.
///
/// Videos are Motion JPEG at a known frame rate; the first frame doubles
/// as the thumbnail and is written next to the video as `<stem>_thumb.jpg`.
#[derive(Clone, Debug)]
pub struct FileProbe {
    fps: u32,
}

impl FileProbe {
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    fn thumbnail_path(video: &Path) -> PathBuf {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        video.with_file_name(format!("{}_thumb.jpg", stem))
    }
}

impl Default for FileProbe {
    fn default() -> Self {
        Self::new(30)
    }
}

impl MediaProbe for FileProbe {
    fn probe_video(&self, path: &Path) -> anyhow::Result<VideoInfo> {
        let bytes = fs::read(path).with_context(|| format!("reading {:?}", path))?;
        let frames = split_mjpeg_frames(&bytes);
        let first = match frames.first() {
            Some(first) => *first,
            None => bail!("no frames in {:?}", path),
        };

        let image = image::load_from_memory_with_format(first, image::ImageFormat::Jpeg)
            .context("decoding first frame")?;

        let thumbnail = Self::thumbnail_path(path);
        let thumbnail_path = match fs::write(&thumbnail, first) {
            Ok(()) => Some(thumbnail),
            Err(e) => {
                log::warn!("Could not write thumbnail {:?}: {}", thumbnail, e);
                None
            }
        };

        Ok(VideoInfo {
            duration_ms: frames.len() as u64 * 1000 / self.fps as u64,
            width: image.width(),
            height: image.height(),
            thumbnail_path,
        })
    }

    fn probe_image(&self, path: &Path) -> anyhow::Result<ImageInfo> {
        let (width, height) =
            image::image_dimensions(path).with_context(|| format!("probing {:?}", path))?;
        Ok(ImageInfo { width, height })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FrameCompressor;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_probe_video() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("VID_test.mjpeg");
        let jpeg = FrameCompressor::new(70)
            .compress_image(&RgbaImage::from_pixel(24, 40, Rgba([9, 9, 9, 255])))
            .unwrap();
        fs::write(&path, jpeg.repeat(15)).unwrap();

        let info = FileProbe::new(30).probe_video(&path).unwrap();
        assert_eq!(info.duration_ms, 500);
        assert_eq!((info.width, info.height), (24, 40));
        let thumb = info.thumbnail_path.unwrap();
        assert_eq!(thumb, dir.path().join("VID_test_thumb.jpg"));
        assert_eq!(image::image_dimensions(&thumb).unwrap(), (24, 40));
    }

    #[test]
    fn test_probe_failures() {
        let dir = tempfile::tempdir().unwrap();
        let probe = FileProbe::default();

        let garbage = dir.path().join("garbage.mjpeg");
        fs::write(&garbage, b"nope").unwrap();
        assert!(probe.probe_video(&garbage).is_err());
        assert!(probe.probe_video(&dir.path().join("missing.mjpeg")).is_err());
        assert!(probe.probe_image(&garbage).is_err());
    }
}

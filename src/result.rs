//! # Capture Result
//!
//! The one thing a session hands back to the host: where the photo or
//! video is, what it is, and how big it is.
//!
//! Over the bridge a result travels as a JSON string; "no result" is the
//! empty string.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bridge::GalleryPick;
use crate::storage::MediaProbe;

/// What kind of media a result points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    Video,
}

/// A finished capture.
///
/// Serializes as `{"uri","contentType","width","height","thumbUrl"?,"duration"?}`.
/// Width and height are 0 when the file could not be probed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub uri: String,
    pub content_type: ContentType,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
    /// Video length in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl CaptureResult {
    pub fn image(path: &Path, width: u32, height: u32) -> Self {
        Self {
            uri: path.to_string_lossy().to_string(),
            content_type: ContentType::Image,
            width,
            height,
            thumb_url: None,
            duration: None,
        }
    }

    /// A video result; fields the probe cannot provide stay empty.
    pub fn video(path: &Path, probe: &dyn MediaProbe) -> Self {
        let mut result = Self {
            uri: path.to_string_lossy().to_string(),
            content_type: ContentType::Video,
            width: 0,
            height: 0,
            thumb_url: None,
            duration: None,
        };

        match probe.probe_video(path) {
            Ok(info) => {
                result.width = info.width;
                result.height = info.height;
                result.duration = Some(info.duration_ms);
                result.thumb_url = info
                    .thumbnail_path
                    .map(|p| p.to_string_lossy().to_string());
            }
            Err(e) => log::warn!("Could not probe video {:?}: {:#}", path, e),
        }
        result
    }

    /// An image result with dimensions read from the file.
    pub fn probed_image(path: &Path, probe: &dyn MediaProbe) -> Self {
        match probe.probe_image(path) {
            Ok(info) => Self::image(path, info.width, info.height),
            Err(e) => {
                log::warn!("Could not probe image {:?}: {:#}", path, e);
                Self::image(path, 0, 0)
            }
        }
    }

    /// Turns a gallery pick into a result; `video/*` picks are videos.
    pub fn from_gallery(pick: &GalleryPick, probe: &dyn MediaProbe) -> Self {
        let path = Path::new(&pick.uri);
        if pick.mime_type.contains("video") {
            Self::video(path, probe)
        } else {
            Self::probed_image(path, probe)
        }
    }

    pub fn is_video(&self) -> bool {
        self.content_type == ContentType::Video
    }

    /// Files on disk this result owns.
    pub fn backing_files(&self) -> Vec<PathBuf> {
        std::iter::once(&self.uri)
            .chain(self.thumb_url.as_ref())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn to_bridge_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Could not serialize result: {}", e);
            String::new()
        })
    }

    /// Parses a bridge string; `""` and malformed JSON are `None`.
    pub fn parse_bridge(s: &str) -> Option<Self> {
        if s.trim().is_empty() {
            return None;
        }
        serde_json::from_str(s).ok()
    }
}

/// Bridge encoding of an optional result.
pub fn to_bridge(result: Option<&CaptureResult>) -> String {
    result.map(CaptureResult::to_bridge_string).unwrap_or_default()
}

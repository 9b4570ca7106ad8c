//! # Configuration Module
//!
//! All tunable settings for the camera component.
//!
//! ## Plain English Explanation
//!
//! The camera needs to know a handful of things before it starts:
//! - What preview size to ask the hardware for
//! - How long a press must be before it becomes a recording
//! - How short a recording may be before it's thrown away
//! - Where photos and videos go
//!
//! Hosts can pass these as JSON over the bridge; anything missing falls
//! back to the defaults below.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::negotiate::AspectRatio;
use crate::capture::Facing;
use crate::input::ButtonState;
use crate::render::ScaleType;

// ============================================
// MAIN CONFIGURATION
// ============================================

/// All configuration options for a capture session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    // ----------------------------------------
    // DEVICE SETTINGS
    // "What to ask the camera for"
    // ----------------------------------------
    /// Preview width requested from the legacy driver (landscape sensor order)
    pub preview_width: u32,

    /// Preview height requested from the legacy driver
    pub preview_height: u32,

    /// Target resolution handed to the provider backend (portrait order)
    pub provider_width: u32,

    /// Target resolution height for the provider backend
    pub provider_height: u32,

    /// Expected preview frame rate
    pub expected_fps: u32,

    /// Aspect ratio used when no explicit size matches
    pub aspect_ratio: AspectRatio,

    /// Which camera to open first
    pub facing: Facing,

    /// Zoom ratio step for `zoom_in`/`zoom_out` on the provider backend
    pub zoom_step: f32,

    /// Focus area size as a fraction of the view
    pub focus_size: f32,

    /// Deliver raw preview bytes to the preview callback
    ///
    /// Off by default; copying every frame costs real time on phones.
    pub preview_callback: bool,

    // ----------------------------------------
    // RENDER SETTINGS
    // ----------------------------------------
    /// How the camera image is fitted to the display
    pub scale_type: ScaleType,

    // ----------------------------------------
    // CAPTURE SETTINGS
    // "What a press means"
    // ----------------------------------------
    /// Which gestures are allowed (photo, video, both)
    pub button_mode: ButtonState,

    /// Hold time before a press turns into a recording
    pub long_press_ms: u64,

    /// Recordings shorter than this are discarded
    pub min_record_ms: u64,

    /// Recordings stop automatically at this length
    pub max_record_ms: u64,

    // ----------------------------------------
    // OUTPUT SETTINGS
    // "Where and how to save"
    // ----------------------------------------
    /// Directory for captured photos, videos and thumbnails
    pub output_directory: PathBuf,

    /// JPEG quality for photos and recorded frames (1-100)
    pub jpeg_quality: u8,

    /// Constant frame rate written by the video recorder
    pub record_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preview_width: 1920,
            preview_height: 1080,
            provider_width: 1080,
            provider_height: 1920,
            expected_fps: 30,
            aspect_ratio: AspectRatio::Ratio16x9,
            facing: Facing::Back,
            zoom_step: 0.1,
            focus_size: 0.2,
            preview_callback: false,

            scale_type: ScaleType::CenterCrop,

            button_mode: ButtonState::Both,
            long_press_ms: 500,
            min_record_ms: 1500,
            max_record_ms: 10_000,

            output_directory: std::env::temp_dir().join("BillieCamera"),
            jpeg_quality: 90,
            record_fps: 30,
        }
    }
}

impl Config {
    /// Smaller preview and recording for low-end devices
    pub fn low_power() -> Self {
        Self {
            preview_width: 1280,
            preview_height: 720,
            provider_width: 720,
            provider_height: 1280,
            expected_fps: 24,
            record_fps: 24,
            jpeg_quality: 80,
            ..Self::default()
        }
    }

    /// Full HD at the highest quality settings
    pub fn high_quality() -> Self {
        Self {
            jpeg_quality: 98,
            max_record_ms: 15_000,
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON, filling gaps with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validates the configuration and returns all problems found.
    ///
    /// ## Plain English
    /// An empty list means the settings are usable.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.preview_width == 0
            || self.preview_height == 0
            || self.provider_width == 0
            || self.provider_height == 0
        {
            errors.push(ConfigError::ZeroPreviewSize);
        }

        if !(1..=120).contains(&self.expected_fps) {
            errors.push(ConfigError::InvalidFps(self.expected_fps));
        }
        if !(1..=120).contains(&self.record_fps) {
            errors.push(ConfigError::InvalidFps(self.record_fps));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            errors.push(ConfigError::InvalidJpegQuality(self.jpeg_quality));
        }

        if self.min_record_ms >= self.max_record_ms {
            errors.push(ConfigError::RecordDurationOrder {
                min_ms: self.min_record_ms,
                max_ms: self.max_record_ms,
            });
        }

        if self.long_press_ms == 0 {
            errors.push(ConfigError::ZeroLongPress);
        }

        if !(self.zoom_step > 0.0) {
            errors.push(ConfigError::InvalidZoomStep(self.zoom_step));
        }

        if !(self.focus_size > 0.0 && self.focus_size <= 1.0) {
            errors.push(ConfigError::InvalidFocusSize(self.focus_size));
        }

        errors
    }
}

// ============================================
// CONFIGURATION ERRORS
// ============================================

/// Errors that can occur with configuration values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A preview or provider dimension is zero
    #[error("preview dimensions must be non-zero")]
    ZeroPreviewSize,

    /// FPS value is outside valid range
    #[error("FPS {0} is outside valid range (1-120)")]
    InvalidFps(u32),

    /// JPEG quality is outside 1-100
    #[error("JPEG quality {0} is outside valid range (1-100)")]
    InvalidJpegQuality(u8),

    /// Minimum recording length is not below the maximum
    #[error("minimum record time {min_ms}ms must be below maximum {max_ms}ms")]
    RecordDurationOrder { min_ms: u64, max_ms: u64 },

    /// Long press threshold of zero would turn every tap into a recording
    #[error("long press threshold must be non-zero")]
    ZeroLongPress,

    /// Zoom step must be positive
    #[error("zoom step {0} must be positive")]
    InvalidZoomStep(f32),

    /// Focus size must be in (0, 1]
    #[error("focus size {0} must be in (0, 1]")]
    InvalidFocusSize(f32),

    /// JSON could not be parsed
    #[error("invalid configuration JSON: {0}")]
    Parse(String),
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.preview_width, 1920);
        assert_eq!(config.preview_height, 1080);
        assert_eq!(config.long_press_ms, 500);
        assert_eq!(config.min_record_ms, 1500);
        assert_eq!(config.max_record_ms, 10_000);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(Config::low_power().validate().is_empty());
        assert!(Config::high_quality().validate().is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();

        config.min_record_ms = 20_000;
        assert_eq!(
            config.validate(),
            vec![ConfigError::RecordDurationOrder {
                min_ms: 20_000,
                max_ms: 10_000
            }]
        );

        config.min_record_ms = 1500;
        config.jpeg_quality = 0;
        config.expected_fps = 0;
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = Config::from_json(r#"{"buttonMode":"OnlyCapture","jpegQuality":70}"#).unwrap();

        assert_eq!(config.button_mode, ButtonState::OnlyCapture);
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.max_record_ms, 10_000);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            Config::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}

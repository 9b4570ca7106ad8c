//! # Error Types Module
//!
//! All the error types used throughout the camera component.
//!
//! ## Plain English Explanation
//!
//! Not every problem is worth the same reaction:
//!
//! - "DeviceError: no camera" ends the capture session
//! - "RenderError: texture update failed" drops one frame and moves on
//! - "StorageError: disk full" leaves a result field empty
//!
//! Unsupported features (flash on a phone without one, zoom past the
//! maximum) are not errors at all and never show up here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

// ============================================
// MAIN ERROR
// ============================================

/// The top-level error for the camera component.
///
/// ## Plain English
///
/// The "filing cabinet" with one folder per subsystem. Lower layers return
/// their own error type and `?` files it into the right folder.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Camera hardware could not be acquired or driven
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// GPU context, surface or pipeline failure
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Saving or deleting media files failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Recording the frame stream failed
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (a bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CameraError {
    /// Returns true if the error ends the current capture attempt.
    ///
    /// Device and surface failures are fatal for the attempt; everything
    /// else is reported and the session keeps going.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::Render(RenderError::UnsupportedTarget(_))
        )
    }
}

// ============================================
// DEVICE ERRORS
// ============================================

/// Camera device failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    /// No camera with the requested facing
    #[error("no {0} camera available")]
    NoCamera(&'static str),

    /// The driver refused to hand out the camera
    #[error("failed to open camera {id}: {reason}")]
    OpenFailed { id: u32, reason: String },

    /// Operation needs an open device
    #[error("camera is not open")]
    NotOpen,

    /// A recording is already running
    #[error("recording already in progress")]
    AlreadyRecording,

    /// The hardware reported no usable sizes
    #[error("camera reported no supported sizes")]
    NoSupportedSizes,

    /// Driver or provider specific failure
    #[error("driver error: {0}")]
    Driver(String),
}

// ============================================
// RENDER ERRORS
// ============================================

/// GPU pipeline failures.
///
/// Only `UnsupportedTarget` and `ContextCreation` reach the caller; the rest
/// are per-frame and get logged by the render thread.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    /// The presentation target kind cannot host a surface
    #[error("unsupported render target: {0}")]
    UnsupportedTarget(String),

    /// Context or window surface creation failed
    #[error("context creation failed: {0}")]
    ContextCreation(String),

    /// Shader program failed to compile or link
    #[error("shader program '{name}' failed: {reason}")]
    Shader { name: String, reason: String },

    /// Pulling the latest camera image failed
    #[error("texture update failed: {0}")]
    TextureUpdate(String),

    /// A handle was used that the backend does not know
    #[error("invalid GPU handle: {0}")]
    InvalidHandle(String),

    /// Backend-specific GPU failure
    #[error("gpu error: {0}")]
    Gpu(String),

    /// The render thread is gone
    #[error("render thread is not running")]
    ThreadGone,
}

// ============================================
// STORAGE ERRORS
// ============================================

/// Media file failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not create the output directory
    #[error("cannot create directory {path:?}: {source}")]
    Directory { path: PathBuf, source: io::Error },

    /// Image encoding or decoding failed
    #[error("image codec error: {0}")]
    Codec(String),

    /// Refused to touch a file outside the media directory
    #[error("path outside media directory: {0:?}")]
    OutsideDirectory(PathBuf),

    /// File system error
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<image::ImageError> for StorageError {
    fn from(e: image::ImageError) -> Self {
        Self::Codec(e.to_string())
    }
}

// ============================================
// ENCODER ERRORS
// ============================================

/// Video recorder failures.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Frame data doesn't match its declared dimensions
    #[error("invalid frame: expected {expected} bytes, got {got}")]
    InvalidFrame { expected: usize, got: usize },

    /// JPEG compression of a frame failed
    #[error("frame compression failed: {0}")]
    Compression(String),

    /// The writer thread is gone
    #[error("recorder is not running")]
    NotRunning,

    /// File system error
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ============================================
// TYPE ALIASES
// ============================================

/// Result type for whole-component operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type for GPU and render engine operations.
pub type RenderResult<T> = Result<T, RenderError>;

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CameraError::Device(DeviceError::NoCamera("front"));
        assert_eq!(err.to_string(), "Device error: no front camera available");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: CameraError = io_err.into();
        assert!(matches!(err, CameraError::Io(_)));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CameraError::from(DeviceError::NotOpen).is_fatal());
        assert!(CameraError::from(RenderError::UnsupportedTarget("x".into())).is_fatal());
        assert!(!CameraError::from(RenderError::TextureUpdate("late".into())).is_fatal());
        assert!(!CameraError::Internal("oops".into()).is_fatal());
    }
}

//! # Capture Module
//!
//! The camera device abstraction: one trait, two backends.
//!
//! ## Plain English Explanation
//!
//! Phones have two ways to talk to the camera. The old one is a plain
//! "open, configure, start" driver. The new one is an asynchronous provider
//! that hands out a bound camera some time after you ask. Both end up
//! pushing frames into a [`FrameSource`] that the render thread reads.
//!
//! ```text
//!   Driver / Provider thread        FrameSource            Render thread
//!   ┌──────────────────┐  push   ┌──────────────┐  pull   ┌────────────┐
//!   │ camera hardware  │ ──────▶ │ latest frame │ ──────▶ │ GPU filter │
//!   └──────────────────┘         └──────────────┘         └────────────┘
//!             │ "frame available"                               ▲
//!             └──────────────── DeviceListener ─────────────────┘
//! ```

pub mod frame;
pub mod legacy;
pub mod negotiate;
pub mod provider;
pub mod simulated;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use frame::{CameraFrame, FrameSource};
pub use legacy::{CameraDriver, CameraInfo, CameraParameters, DriverCamera, FlashMode, FocusMode, LegacyCamera};
pub use provider::{BoundCamera, CameraProvider, ProviderCamera, ZoomState};

use crate::error::{DeviceError, DeviceResult};

// ============================================
// BASIC TYPES
// ============================================

/// Which way the camera faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facing {
    Back,
    Front,
}

impl Facing {
    /// The other camera.
    pub fn toggled(self) -> Self {
        match self {
            Self::Back => Self::Front,
            Self::Front => Self::Back,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Back => "back",
            Self::Front => "front",
        }
    }
}

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width and height swapped.
    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// The size after rotating by `orientation` degrees.
    pub fn rotated(&self, orientation: u32) -> Self {
        if orientation % 180 == 90 {
            self.swapped()
        } else {
            *self
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What the device negotiated, sent along with "surface prepared".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreviewInfo {
    /// Preview size in sensor order
    pub preview_size: Size,
    /// Rotation needed to make the preview upright
    pub orientation: u32,
    pub facing: Facing,
}

impl PreviewInfo {
    /// Size of the upright image the render engine should expect.
    pub fn input_size(&self) -> Size {
        self.preview_size.rotated(self.orientation)
    }
}

/// A tap on the preview view, in view pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FocusPoint {
    pub x: f32,
    pub y: f32,
    pub view_width: u32,
    pub view_height: u32,
}

// ============================================
// CALLBACKS
// ============================================

/// Receives raw RGBA bytes of every preview frame.
pub type PreviewCallback = Arc<dyn Fn(&[u8], Size) + Send + Sync>;

/// Fires once with the recorded file, or `None` on failure/cancellation.
pub type RecordingCallback = Box<dyn FnOnce(Option<PathBuf>) + Send>;

/// Device events.
///
/// Called from camera threads, never from the caller's thread; keep
/// implementations short.
pub trait DeviceListener: Send + Sync {
    /// A new frame source is live and will start receiving frames.
    fn on_surface_prepared(&self, source: &Arc<FrameSource>, info: PreviewInfo);

    /// The frame source is gone; stop using it.
    fn on_surface_destroyed(&self, source: &Arc<FrameSource>);

    /// A new frame landed in the source.
    fn on_frame_available(&self, source: &Arc<FrameSource>);

    /// An asynchronous open failed after `open()` returned.
    fn on_device_error(&self, _error: &DeviceError) {}
}

// ============================================
// DEVICE INTERFACE
// ============================================

/// A camera device.
///
/// Exactly one is active per session. Unsupported features (torch, focus,
/// zoom beyond range) are silently ignored or clamped.
pub trait CaptureDevice: Send {
    /// Acquires the camera for the current facing and starts the frame push.
    ///
    /// Any previously open camera is closed first.
    fn open(&mut self) -> DeviceResult<()>;

    /// Releases the camera and its frame source. Safe to call repeatedly.
    fn close(&mut self);

    /// Toggles facing if the other camera exists.
    fn switch_camera(&mut self) -> DeviceResult<()>;

    /// Closes and drops listeners. The device stays reusable.
    fn destroy(&mut self);

    fn is_open(&self) -> bool;

    fn facing(&self) -> Facing;

    /// Negotiated preview size in sensor order, if open.
    fn preview_size(&self) -> Option<Size>;

    /// Negotiated still picture size, if the backend exposes one.
    fn picture_size(&self) -> Option<Size>;

    /// Preview rotation in degrees.
    fn orientation(&self) -> u32;

    fn set_listener(&mut self, listener: Arc<dyn DeviceListener>);

    /// Enables or disables the per-frame byte callback.
    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>);

    /// Starts writing frames to a video file.
    ///
    /// `on_complete` fires exactly once, including when starting fails.
    fn start_recording(&mut self, on_complete: RecordingCallback);

    /// Finishes the current recording.
    fn stop_record(&mut self);

    fn is_recording(&self) -> bool;

    fn can_auto_focus(&self) -> bool;

    /// Best-effort focus and metering at a view point.
    fn auto_focus(&mut self, point: FocusPoint);

    fn support_torch(&self) -> bool;

    fn set_flash_light(&mut self, on: bool);

    fn zoom(&mut self, ratio: f32);

    fn zoom_in(&mut self);

    fn zoom_out(&mut self);

    /// Current zoom ratio, 1.0 when zoom is unavailable.
    fn zoom_ratio(&self) -> f32;

    /// `(min, max)` zoom ratios, `(1.0, 1.0)` when unavailable.
    fn zoom_range(&self) -> (f32, f32);
}

/// Clamps a requested zoom ratio into `[min, max]`; NaN maps to `min`.
pub(crate) fn clamp_zoom(requested: f32, min: f32, max: f32) -> f32 {
    if requested.is_nan() {
        return min;
    }
    requested.clamp(min, max.max(min))
}

// ============================================
// TESTS
// ============================================

//! # Capability Facade
//!
//! Yes/no questions about the camera hardware, answered from a
//! [`DeviceProfile`] snapshot the host fills in once at startup.
//!
//! Nothing here holds state or talks to hardware.

use serde::{Deserialize, Serialize};

use crate::capture::Facing;

/// Platform level where the advanced camera API first appeared.
pub const ADVANCED_API_MIN_LEVEL: u32 = 21;

// ============================================
// DEVICE PROFILE
// ============================================

/// How much of the advanced camera API a camera supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareLevel {
    Legacy,
    Limited,
    Full,
    Level3,
    External,
}

/// One camera as reported by the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: String,
    pub facing: Facing,
    pub hardware_level: Option<HardwareLevel>,
}

/// Snapshot of the phone the component is running on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub brand: String,
    pub model: String,
    /// Platform API level
    pub api_level: u32,
    /// Display size in pixels; negative when the platform could not tell
    pub display_width: i32,
    pub display_height: i32,
    pub cameras: Vec<CameraDescriptor>,
}

/// Which capture backend to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Synchronous driver API
    Legacy,
    /// Asynchronous provider API
    Provider,
}

// ============================================
// QUERIES
// ============================================

/// Returns true if a usable front camera exists.
///
/// One foldable family reports a front camera that is covered while the
/// phone is unfolded; a near-square display means unfolded.
pub fn has_front_camera(profile: &DeviceProfile) -> bool {
    if !profile.cameras.iter().any(|c| c.facing == Facing::Front) {
        return false;
    }

    if profile.brand.contains("HUAWEI") && profile.model.contains("TAH-") {
        let (mut width, mut height) = (profile.display_width, profile.display_height);
        if width < 0 || height < 0 {
            return true;
        }
        if width < height {
            std::mem::swap(&mut width, &mut height);
        }
        log::debug!(
            "has_front_camera: {} display {}x{}",
            profile.model,
            width,
            height
        );
        if height == 0 || width as f64 / height as f64 <= 4.0 / 3.0 {
            return false;
        }
    }

    true
}

/// Returns true if every camera supports the advanced API beyond the
/// legacy and limited hardware levels.
pub fn has_advanced_api(profile: &DeviceProfile) -> bool {
    if profile.api_level < ADVANCED_API_MIN_LEVEL || profile.cameras.is_empty() {
        return false;
    }

    profile.cameras.iter().all(|camera| {
        !camera.id.trim().is_empty()
            && !matches!(
                camera.hardware_level,
                Some(HardwareLevel::Legacy) | Some(HardwareLevel::Limited)
            )
    })
}

/// Picks the capture backend for this device.
pub fn select_backend(profile: &DeviceProfile) -> BackendKind {
    if has_advanced_api(profile) {
        BackendKind::Provider
    } else {
        BackendKind::Legacy
    }
}

// ============================================
// TESTS
// ============================================

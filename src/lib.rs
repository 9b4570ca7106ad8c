//! # Billie Camera
//!
//! A camera capture component for mobile hosts: live preview through a GPU
//! filter chain, tap for a photo, hold for a short video, and a JSON result
//! handed back to the host.
//!
//! ## Architecture Overview
//!
//! The crate is structured into independent modules:
//!
//! - `capability`: Which camera API a device can use
//! - `capture`: Camera devices (legacy driver, async provider, simulated)
//! - `gpu`: GPU backend interface plus a headless software backend
//! - `filter`: Shader stages that make up the preview chain
//! - `render`: Render engine and the thread that drives it
//! - `input`: Capture button gestures
//! - `encoder`: Video recording
//! - `storage`: Media files and metadata probing
//! - `result`: The result handed to the host
//! - `coordinator`: Ties one capture session together
//! - `bridge`: Host entry points
//! - `config`: Settings
//! - `error`: Error types

// ============================================
// MODULE DECLARATIONS
// ============================================

pub mod bridge;
pub mod capability;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod gpu;
pub mod input;
pub mod render;
pub mod result;
pub mod storage;

// ============================================
// RE-EXPORTS
// ============================================

pub use bridge::{CameraBridge, CameraSession, SessionGuard};
pub use capture::{CaptureDevice, Facing, FrameSource, Size};
pub use config::Config;
pub use coordinator::{CaptureCoordinator, SessionUpdate};
pub use error::{CameraError, CameraResult};
pub use input::ButtonState;
pub use render::{RenderDispatcher, RenderEngine, RenderThread, ScaleType};
pub use result::{CaptureResult, ContentType};

use capability::{BackendKind, DeviceProfile};
use capture::simulated::{SimulatedDriver, SimulatedProvider};
use capture::{LegacyCamera, ProviderCamera};

// ============================================
// DEVICE SELECTION
// ============================================

/// Builds the simulated camera for whichever API `profile` supports.
///
/// ## Plain English
///
/// Hosts without camera hardware (desktop builds, CI) still get a full
/// session: the same backend choice a phone would make, fed by test
/// pattern frames.
pub fn simulated_device(profile: &DeviceProfile, config: &Config) -> Box<dyn CaptureDevice> {
    match capability::select_backend(profile) {
        BackendKind::Provider => {
            Box::new(ProviderCamera::new(SimulatedProvider::default(), config.clone()))
        }
        BackendKind::Legacy => Box::new(LegacyCamera::new(SimulatedDriver::default(), config.clone())),
    }
}

// ============================================
// LOGGING
// ============================================

/// Initialize logging for the platform.
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Info)
                .with_tag("BillieCamera"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .try_init();
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use capability::{CameraDescriptor, HardwareLevel};

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }

    #[test]
    fn test_simulated_device_starts_closed() {
        let profile = DeviceProfile {
            api_level: 30,
            cameras: vec![CameraDescriptor {
                id: "0".into(),
                facing: Facing::Back,
                hardware_level: Some(HardwareLevel::Full),
            }],
            ..DeviceProfile::default()
        };
        let device = simulated_device(&profile, &Config::default());
        assert!(!device.is_open());
        assert_eq!(device.facing(), Facing::Back);
    }
}

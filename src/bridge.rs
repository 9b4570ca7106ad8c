//! # Bridge Module
//!
//! The entry points a host application calls, and the services the host
//! provides in return.
//!
//! ## Plain English Explanation
//!
//! The host asks for one of two things:
//! - "Open the camera" → a photo or video, as a JSON string
//! - "Choose an avatar" → a photo, cropped to a size, as a JSON string
//!
//! Either way the answer is a string, and `""` means "nothing": the user
//! backed out, permission was denied, or something broke.
//!
//! Only one camera session can exist at a time. A second request while
//! one is open gets `""` straight away.
//!
//! The host supplies the platform pieces this crate cannot do itself:
//! permission prompts, the camera screen, the gallery and the cropper.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureDevice;
use crate::config::Config;
use crate::coordinator::CaptureCoordinator;
use crate::error::CameraResult;
use crate::gpu::ContextFactory;
use crate::input::ButtonState;
use crate::result::{to_bridge, CaptureResult};
use crate::storage::{FileProbe, MediaProbe};

/// Receives the bridge answer: result JSON or `""`.
pub type Reply = Box<dyn FnOnce(String) + Send>;

// ============================================
// HOST SERVICES
// ============================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Camera,
    RecordAudio,
}

/// Asks the user for permissions.
pub trait PermissionService: Send + Sync {
    /// True only if every permission was granted.
    fn request(&self, permissions: &[Permission]) -> anyhow::Result<bool>;
}

/// A file picked from the gallery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPick {
    pub uri: String,
    /// Declared MIME type, e.g. `image/jpeg` or `video/mp4`
    pub mime_type: String,
}

/// Lets the user pick existing media instead of capturing.
pub trait GalleryPicker: Send + Sync {
    /// `None` when the user backs out.
    fn pick(&self, mode: ButtonState) -> anyhow::Result<Option<GalleryPick>>;
}

/// Crops an image to a target size.
pub trait CropService: Send + Sync {
    /// Returns the uri of the cropped image.
    fn crop(&self, uri: &str, width: u32, height: u32) -> anyhow::Result<String>;
}

/// Shows the camera screen for a session.
///
/// The launcher owns the session until it calls
/// [`CameraSession::finish`] or drops it. Either may happen later, on any
/// thread.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, session: CameraSession) -> anyhow::Result<()>;
}

// ============================================
// SESSION GUARD
// ============================================

/// Proof that a camera session is open. Dropping it closes the session.
#[derive(Debug)]
pub struct SessionGuard {
    active: Arc<AtomicBool>,
}

impl SessionGuard {
    /// `None` if another session holds `active`.
    pub fn try_acquire(active: &Arc<AtomicBool>) -> Option<Self> {
        active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                active: Arc::clone(active),
            })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

// ============================================
// CAMERA SESSION
// ============================================

/// One camera screen, from launch to answer.
///
/// Dropping it without [`finish`](Self::finish) answers `""`.
pub struct CameraSession {
    mode: ButtonState,
    config: Config,
    gallery: Option<Arc<dyn GalleryPicker>>,
    probe: Arc<dyn MediaProbe>,
    reply: Option<Reply>,
    guard: Option<SessionGuard>,
}

impl CameraSession {
    pub fn mode(&self) -> ButtonState {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds the coordinator for this session's mode and settings.
    pub fn coordinator(
        &self,
        device: Box<dyn CaptureDevice>,
        factory: Box<dyn ContextFactory>,
    ) -> CameraResult<CaptureCoordinator> {
        let mut config = self.config.clone();
        config.button_mode = self.mode;
        Ok(CaptureCoordinator::new(config, device, factory)?.with_probe(Arc::clone(&self.probe)))
    }

    pub fn has_gallery(&self) -> bool {
        self.gallery.is_some()
    }

    /// Runs the gallery picker and turns the pick into a result.
    pub fn pick_from_gallery(&self) -> Option<CaptureResult> {
        let gallery = self.gallery.as_ref()?;
        match gallery.pick(self.mode) {
            Ok(Some(pick)) => Some(CaptureResult::from_gallery(&pick, self.probe.as_ref())),
            Ok(None) => None,
            Err(e) => {
                log::warn!("Gallery pick failed: {:#}", e);
                None
            }
        }
    }

    /// Ends the session and answers the host.
    pub fn finish(mut self, result: Option<CaptureResult>) {
        self.answer(to_bridge(result.as_ref()));
    }

    fn answer(&mut self, answer: String) {
        // Released first so the host can open the next session from the reply
        self.guard.take();
        if let Some(reply) = self.reply.take() {
            log::info!("Camera session finished ({} bytes)", answer.len());
            reply(answer);
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if self.reply.is_some() {
            log::debug!("Camera session dropped without a result");
            self.answer(String::new());
        }
    }
}

// ============================================
// BRIDGE
// ============================================

/// What the host calls.
#[derive(Clone)]
pub struct CameraBridge {
    config: Config,
    permissions: Arc<dyn PermissionService>,
    launcher: Arc<dyn SessionLauncher>,
    cropper: Arc<dyn CropService>,
    gallery: Option<Arc<dyn GalleryPicker>>,
    probe: Arc<dyn MediaProbe>,
    active: Arc<AtomicBool>,
}

impl CameraBridge {
    pub fn new(
        config: Config,
        permissions: Arc<dyn PermissionService>,
        launcher: Arc<dyn SessionLauncher>,
        cropper: Arc<dyn CropService>,
    ) -> Self {
        Self {
            probe: Arc::new(FileProbe::new(config.record_fps)),
            config,
            permissions,
            launcher,
            cropper,
            gallery: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_gallery(mut self, gallery: Arc<dyn GalleryPicker>) -> Self {
        self.gallery = Some(gallery);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// True while a camera session is open.
    pub fn is_session_open(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Opens the camera. `mode` is 0 (photo), 1 (video) or 2 (both);
    /// anything else means photo only.
    pub fn start_camera(&self, mode: i32, reply: Reply) {
        let mode = ButtonState::from_mode(mode).unwrap_or(ButtonState::OnlyCapture);
        self.launch(mode, reply);
    }

    /// Takes a photo and crops it to `width` x `height`.
    pub fn choose_avatar(&self, width: u32, height: u32, reply: Reply) {
        let cropper = Arc::clone(&self.cropper);
        let probe = Arc::clone(&self.probe);

        self.launch(
            ButtonState::OnlyCapture,
            Box::new(move |answer| {
                let Some(photo) = CaptureResult::parse_bridge(&answer) else {
                    reply(String::new());
                    return;
                };
                match cropper.crop(&photo.uri, width, height) {
                    Ok(cropped) => {
                        let result = CaptureResult::probed_image(Path::new(&cropped), probe.as_ref());
                        reply(result.to_bridge_string());
                    }
                    Err(e) => {
                        log::warn!("Crop failed: {:#}", e);
                        reply(String::new());
                    }
                }
            }),
        );
    }

    fn launch(&self, mode: ButtonState, reply: Reply) {
        let Some(guard) = SessionGuard::try_acquire(&self.active) else {
            log::warn!("Camera already open");
            reply(String::new());
            return;
        };

        let mut permissions = vec![Permission::Camera];
        if mode.can_record() {
            permissions.push(Permission::RecordAudio);
        }
        match self.permissions.request(&permissions) {
            Ok(true) => {}
            Ok(false) => {
                log::info!("Camera permission denied");
                drop(guard);
                reply(String::new());
                return;
            }
            Err(e) => {
                log::warn!("Permission request failed: {:#}", e);
                drop(guard);
                reply(String::new());
                return;
            }
        }

        let session = CameraSession {
            mode,
            config: self.config.clone(),
            gallery: self.gallery.clone(),
            probe: Arc::clone(&self.probe),
            reply: Some(reply),
            guard: Some(guard),
        };
        log::info!("Launching camera session: {:?}", mode);
        if let Err(e) = self.launcher.launch(session) {
            // The session was dropped and has already answered
            log::error!("Could not launch camera session: {:#}", e);
        }
    }
}

// ============================================
// TESTS
// ============================================

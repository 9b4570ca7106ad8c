//! # Camera Frames
//!
//! Frames pushed by camera threads and the [`FrameSource`] the render
//! thread pulls them from.
//!
//! ## Plain English
//!
//! A frame source is a mailbox with room for one picture. The camera
//! drops the newest picture in (throwing the old one away), and the
//! render thread copies whatever is there onto its texture when it gets
//! around to it. Nobody ever waits on anybody.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbaImage;
use parking_lot::Mutex;

use super::{DeviceListener, PreviewCallback, RecordingCallback, Size};
use crate::encoder::{RecorderSettings, VideoRecorder};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuBackend, TextureId};
use crate::storage;

/// Receives frames from a camera backend.
pub type FrameSink = Arc<dyn Fn(CameraFrame) + Send + Sync>;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

// ============================================
// CAMERA FRAME
// ============================================

/// One preview frame in sensor orientation.
///
/// The pixels are shared, so cloning a frame is cheap.
#[derive(Clone, Debug)]
pub struct CameraFrame {
    pub image: Arc<RgbaImage>,

    /// Timestamp in nanoseconds since Unix epoch
    pub timestamp_ns: u64,
}

impl CameraFrame {
    /// Wraps an image, stamped with the current time.
    pub fn new(image: RgbaImage) -> Self {
        Self::with_timestamp(image, now_ns())
    }

    pub fn with_timestamp(image: RgbaImage, timestamp_ns: u64) -> Self {
        Self {
            image: Arc::new(image),
            timestamp_ns,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

// ============================================
// FRAME SOURCE
// ============================================

/// Single-slot frame mailbox between a camera and the render thread.
pub struct FrameSource {
    id: u64,
    latest: Mutex<Option<CameraFrame>>,
    transform: Mutex<[f32; 16]>,
    attached: Mutex<Option<TextureId>>,
    released: AtomicBool,
    frames_pushed: AtomicU64,
}

impl FrameSource {
    pub fn new(transform: [f32; 16]) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            latest: Mutex::new(None),
            transform: Mutex::new(transform),
            attached: Mutex::new(None),
            released: AtomicBool::new(false),
            frames_pushed: AtomicU64::new(0),
        })
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Replaces the pending frame. Returns false once released.
    pub fn push(&self, frame: CameraFrame) -> bool {
        if self.is_released() {
            return false;
        }
        *self.latest.lock() = Some(frame);
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed.load(Ordering::Relaxed)
    }

    /// Binds the source to an external texture on the render thread.
    pub fn attach_to_texture(&self, texture: TextureId) {
        *self.attached.lock() = Some(texture);
    }

    pub fn detach(&self) {
        *self.attached.lock() = None;
    }

    pub fn attached_texture(&self) -> Option<TextureId> {
        *self.attached.lock()
    }

    /// Uploads the newest pending frame into the attached texture.
    ///
    /// Returns `Ok(false)` when there was nothing new; the texture keeps
    /// its previous content.
    pub fn update_tex_image(&self, gpu: &mut dyn GpuBackend) -> RenderResult<bool> {
        if self.is_released() {
            return Err(RenderError::TextureUpdate(format!(
                "frame source {} released",
                self.id
            )));
        }
        let texture = self.attached_texture().ok_or_else(|| {
            RenderError::TextureUpdate(format!("frame source {} not attached", self.id))
        })?;

        let frame = self.latest.lock().take();
        match frame {
            Some(frame) => {
                gpu.upload_texture(texture, &frame.image)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Column-major texture matrix to apply when sampling.
    pub fn transform_matrix(&self) -> [f32; 16] {
        *self.transform.lock()
    }

    pub fn set_transform(&self, transform: [f32; 16]) {
        *self.transform.lock() = transform;
    }

    /// Stops accepting frames and drops the pending one.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.latest.lock().take();
            log::debug!("Frame source {} released", self.id);
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================
// FRAME ROUTER
// ============================================

/// Fans camera frames out to the source, listener, preview callback and
/// recorder. Shared by both capture backends.
pub(crate) struct FrameRouter {
    source: Mutex<Option<Arc<FrameSource>>>,
    listener: Mutex<Option<Arc<dyn DeviceListener>>>,
    preview_callback: Mutex<Option<PreviewCallback>>,
    recorder: Mutex<Option<VideoRecorder>>,
    orientation: AtomicU32,
}

impl FrameRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(None),
            listener: Mutex::new(None),
            preview_callback: Mutex::new(None),
            recorder: Mutex::new(None),
            orientation: AtomicU32::new(0),
        })
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn DeviceListener>>) {
        *self.listener.lock() = listener;
    }

    pub fn listener(&self) -> Option<Arc<dyn DeviceListener>> {
        self.listener.lock().clone()
    }

    pub fn set_preview_callback(&self, callback: Option<PreviewCallback>) {
        *self.preview_callback.lock() = callback;
    }

    /// Makes `source` the live source; recordings are rotated by `orientation`.
    pub fn install(&self, source: Arc<FrameSource>, orientation: u32) {
        self.orientation.store(orientation, Ordering::SeqCst);
        *self.source.lock() = Some(source);
    }

    pub fn source(&self) -> Option<Arc<FrameSource>> {
        self.source.lock().clone()
    }

    /// Removes and releases the live source, telling the listener.
    pub fn retire_source(&self) {
        let source = self.source.lock().take();
        if let Some(source) = source {
            source.release();
            if let Some(listener) = self.listener() {
                listener.on_surface_destroyed(&source);
            }
        }
    }

    /// A sink that delivers into `source` through this router.
    pub fn sink_for(self: &Arc<Self>, source: &Arc<FrameSource>) -> FrameSink {
        let router = Arc::clone(self);
        let source = Arc::clone(source);
        Arc::new(move |frame| router.deliver(&source, frame))
    }

    fn deliver(&self, source: &Arc<FrameSource>, frame: CameraFrame) {
        if source.is_released() {
            return;
        }

        let callback = self.preview_callback.lock().clone();
        if let Some(callback) = callback {
            callback(frame.image.as_raw(), frame.size());
        }

        if let Some(recorder) = self.recorder.lock().as_ref() {
            recorder.push(frame.clone());
        }

        if source.push(frame) {
            if let Some(listener) = self.listener() {
                listener.on_frame_available(source);
            }
        }
    }

    // ----------------------------------------
    // RECORDING
    // ----------------------------------------

    pub fn is_recording(&self) -> bool {
        self.recorder.lock().is_some()
    }

    /// Starts recording the frame stream into `directory`.
    pub fn start_recording(
        &self,
        directory: &Path,
        fps: u32,
        quality: u8,
        on_complete: RecordingCallback,
    ) {
        if self.is_recording() {
            log::warn!("start_recording: already recording");
            on_complete(None);
            return;
        }
        if self.source().is_none() {
            log::warn!("start_recording: camera is not open");
            on_complete(None);
            return;
        }
        if let Err(e) = storage::ensure_directory(directory) {
            log::warn!("start_recording: {}", e);
            on_complete(None);
            return;
        }

        let path = storage::generate_filename(directory, "VID", "mjpeg");
        let settings = RecorderSettings {
            fps,
            quality,
            rotation: self.orientation.load(Ordering::SeqCst),
            ..RecorderSettings::default()
        };
        match VideoRecorder::start(path, settings, on_complete) {
            Ok(recorder) => {
                let mut slot = self.recorder.lock();
                if slot.is_some() {
                    drop(slot);
                    recorder.cancel();
                } else {
                    *slot = Some(recorder);
                }
            }
            Err(e) => log::warn!("start_recording: {}", e),
        }
    }

    /// Finishes the recording; its callback gets the file.
    pub fn stop_recording(&self) {
        let recorder = self.recorder.lock().take();
        match recorder {
            Some(recorder) => recorder.stop(),
            None => log::trace!("stop_recording: not recording"),
        }
    }

    /// Abandons the recording; its callback gets `None`.
    pub fn cancel_recording(&self) {
        let recorder = self.recorder.lock().take();
        if let Some(recorder) = recorder {
            recorder.cancel();
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::negotiate::IDENTITY_MATRIX;
    use crate::capture::PreviewInfo;
    use crate::gpu::{SoftwareGpu, TextureKind};
    use image::Rgba;

    fn solid(w: u32, h: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([value, value, value, 255]))
    }

    #[derive(Default)]
    struct CountingListener {
        frames: AtomicU64,
        destroyed: AtomicU64,
    }

    impl DeviceListener for CountingListener {
        fn on_surface_prepared(&self, _source: &Arc<FrameSource>, _info: PreviewInfo) {}

        fn on_surface_destroyed(&self, _source: &Arc<FrameSource>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_frame_available(&self, _source: &Arc<FrameSource>) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_frame_creation() {
        let frame = CameraFrame::new(solid(4, 2, 0));
        assert_eq!(frame.size(), Size::new(4, 2));
        assert!(frame.timestamp_ns > 0);
    }

    #[test]
    fn test_update_tex_image_takes_latest() {
        let mut gpu = SoftwareGpu::new();
        let texture = gpu.create_texture(TextureKind::External, Size::new(0, 0)).unwrap();
        let source = FrameSource::new(IDENTITY_MATRIX);

        // Not attached yet
        assert!(source.update_tex_image(&mut gpu).is_err());

        source.attach_to_texture(texture);
        assert!(!source.update_tex_image(&mut gpu).unwrap());

        source.push(CameraFrame::new(solid(2, 2, 10)));
        source.push(CameraFrame::new(solid(2, 2, 20)));
        assert!(source.update_tex_image(&mut gpu).unwrap());
        assert!(!source.update_tex_image(&mut gpu).unwrap());
        assert_eq!(source.frames_pushed(), 2);
    }

    #[test]
    fn test_released_source_rejects_frames() {
        let source = FrameSource::new(IDENTITY_MATRIX);
        source.release();
        assert!(!source.push(CameraFrame::new(solid(1, 1, 0))));

        let mut gpu = SoftwareGpu::new();
        assert!(source.update_tex_image(&mut gpu).is_err());
    }

    #[test]
    fn test_router_delivers_and_retires() {
        let router = FrameRouter::new();
        let listener = Arc::new(CountingListener::default());
        router.set_listener(Some(listener.clone()));

        let previews = Arc::new(AtomicU64::new(0));
        let seen = previews.clone();
        router.set_preview_callback(Some(Arc::new(move |bytes: &[u8], size: Size| {
            assert_eq!(bytes.len(), size.area() as usize * 4);
            seen.fetch_add(1, Ordering::SeqCst);
        })));

        let source = FrameSource::new(IDENTITY_MATRIX);
        router.install(source.clone(), 90);
        let sink = router.sink_for(&source);
        sink(CameraFrame::new(solid(2, 2, 1)));
        sink(CameraFrame::new(solid(2, 2, 2)));

        assert_eq!(listener.frames.load(Ordering::SeqCst), 2);
        assert_eq!(previews.load(Ordering::SeqCst), 2);

        router.retire_source();
        assert!(source.is_released());
        assert_eq!(listener.destroyed.load(Ordering::SeqCst), 1);

        // Late frames from the camera thread are dropped
        sink(CameraFrame::new(solid(2, 2, 3)));
        assert_eq!(listener.frames.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recording_without_source_fails() {
        let router = FrameRouter::new();
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crossbeam::channel::bounded(1);
        router.start_recording(dir.path(), 30, 80, Box::new(move |path| {
            let _ = tx.send(path);
        }));
        assert_eq!(rx.recv().unwrap(), None);
        assert!(!router.is_recording());
    }
}

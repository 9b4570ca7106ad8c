//! # Capture Coordinator
//!
//! The top-level owner of one capture session: camera device, render
//! thread, capture button and media directory.
//!
//! ## Plain English Explanation
//!
//! The coordinator is the "switchboard" between everything else:
//! - Camera says "new frame" → ask the render thread to draw it
//! - Camera says "surface ready/gone" → bind/unbind the render input
//! - Finger taps → ask the render thread for a photo
//! - Finger holds → start recording; finger lifts → stop it
//!
//! Only one photo or recording is in flight at a time. While one is, or
//! while a result is waiting for the user to accept or retake it, the
//! button ignores presses.
//!
//! Results from other threads (a photo from the render thread, a finished
//! video from the recorder) arrive on a channel. The host calls
//! [`CaptureCoordinator::pump`] to process them and receive
//! [`SessionUpdate`]s.
//!
//! ```text
//!  press/release ──► CaptureButton ──► GestureEvent ──┐
//!                                                     ▼
//!  render thread ── picture ──┐             CaptureCoordinator ──► SessionUpdate
//!  recorder ─────── video ────┴──► channel ──────────▲
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use image::RgbaImage;

use crate::capture::{CaptureDevice, DeviceListener, FocusPoint, FrameSource, PreviewInfo, Size};
use crate::config::Config;
use crate::error::{CameraError, CameraResult, DeviceError};
use crate::filter::Filter;
use crate::gpu::{ContextFactory, RenderTarget};
use crate::input::{ButtonState, CaptureButton, Clock, GestureEvent, GestureState, SystemClock};
use crate::render::{RenderDispatcher, RenderEngine, RenderThread, ScaleType};
use crate::result::CaptureResult;
use crate::storage::{FileProbe, MediaProbe, MediaStore};

/// How long `surface_destroyed` waits for the render thread.
const SURFACE_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================
// EVENTS
// ============================================

/// Something the host should show or act on.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// The recorder is running
    RecordingStarted,
    /// The recording was below the minimum length and was thrown away
    RecordingTooShort { duration_ms: u64 },
    /// A photo or video is ready for review
    Captured(CaptureResult),
    /// The current attempt failed; the button is usable again
    Failed(String),
}

/// Completions arriving from other threads.
enum SessionEvent {
    PictureReady(RgbaImage),
    RecordingFinished(Option<PathBuf>),
    DeviceFailed(DeviceError),
}

/// What is currently in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Picture,
    Recording,
    /// Stopping a recording whose file will be kept
    Finishing,
    /// Stopping a recording that was too short; its file is deleted
    Discarding { duration_ms: u64 },
    /// Stopping a recording nobody wants any more (pause)
    Abandoning,
}

/// Session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub pictures_saved: u64,
    pub videos_saved: u64,
    pub recordings_discarded: u64,
    pub failures: u64,
}

// ============================================
// DEVICE → RENDER WIRING
// ============================================

/// Forwards device events to the render thread and the session channel.
struct RenderLink {
    dispatcher: RenderDispatcher,
    events: Sender<SessionEvent>,
}

impl DeviceListener for RenderLink {
    fn on_surface_prepared(&self, source: &Arc<FrameSource>, info: PreviewInfo) {
        // Upright size: sensor width and height swap at 90 and 270
        let size = info.input_size();
        log::debug!(
            "Surface prepared: {} rotated {} → {}",
            info.preview_size,
            info.orientation,
            size
        );
        self.dispatcher.set_input_texture(Arc::clone(source), size);
    }

    fn on_surface_destroyed(&self, _source: &Arc<FrameSource>) {
        self.dispatcher.clear_input_texture();
    }

    fn on_frame_available(&self, _source: &Arc<FrameSource>) {
        self.dispatcher.render_frame();
    }

    fn on_device_error(&self, error: &DeviceError) {
        let _ = self.events.send(SessionEvent::DeviceFailed(error.clone()));
    }
}

// ============================================
// COORDINATOR
// ============================================

/// One capture session.
pub struct CaptureCoordinator {
    config: Config,
    device: Box<dyn CaptureDevice>,
    render: RenderThread,
    dispatcher: RenderDispatcher,
    button: CaptureButton,
    store: MediaStore,
    probe: Arc<dyn MediaProbe>,

    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    updates: VecDeque<SessionUpdate>,

    in_flight: Option<Operation>,
    /// Result shown to the user, not yet confirmed or cancelled
    review: Option<CaptureResult>,
    /// Cancelled result whose files go when the next result arrives
    deprecated: Option<CaptureResult>,

    stats: SessionStats,
    shut_down: bool,
}

impl CaptureCoordinator {
    /// Builds a session around `device`. Nothing is opened yet.
    pub fn new(
        config: Config,
        mut device: Box<dyn CaptureDevice>,
        factory: Box<dyn ContextFactory>,
    ) -> CameraResult<Self> {
        if let Some(error) = config.validate().into_iter().next() {
            return Err(CameraError::Config(error));
        }

        let store = MediaStore::new(&config.output_directory, config.jpeg_quality)?;
        let render = RenderThread::spawn(RenderEngine::new(factory))?;
        let dispatcher = render.dispatcher();
        dispatcher.set_scale_type(config.scale_type);

        let (events_tx, events_rx) = channel::unbounded();
        device.set_listener(Arc::new(RenderLink {
            dispatcher: dispatcher.clone(),
            events: events_tx.clone(),
        }));

        log::info!(
            "Capture session created: mode {:?}, output {:?}",
            config.button_mode,
            config.output_directory
        );

        Ok(Self {
            button: CaptureButton::new(&config, Arc::new(SystemClock::new())),
            probe: Arc::new(FileProbe::new(config.record_fps)),
            config,
            device,
            render,
            dispatcher,
            store,
            events_tx,
            events_rx,
            updates: VecDeque::new(),
            in_flight: None,
            review: None,
            deprecated: None,
            stats: SessionStats::default(),
            shut_down: false,
        })
    }

    /// Replaces the clock that times gestures.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let mode = self.button.mode();
        self.button = CaptureButton::new(&self.config, clock);
        self.button.set_mode(mode);
        self
    }

    /// Replaces the metadata probe used for videos.
    pub fn with_probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispatcher(&self) -> RenderDispatcher {
        self.dispatcher.clone()
    }

    pub fn device(&self) -> &dyn CaptureDevice {
        self.device.as_ref()
    }

    pub fn gesture_state(&self) -> GestureState {
        self.button.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn media_directory(&self) -> &std::path::Path {
        self.store.directory()
    }

    /// True while a photo or recording is running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The result waiting for confirm or cancel.
    pub fn pending_result(&self) -> Option<&CaptureResult> {
        self.review.as_ref()
    }

    pub fn set_mode(&mut self, mode: ButtonState) {
        self.button.set_mode(mode);
    }

    // ----------------------------------------
    // SURFACE LIFECYCLE
    // ----------------------------------------

    pub fn surface_created(&mut self, target: RenderTarget) {
        self.dispatcher.create_renderer(target);
    }

    pub fn surface_changed(&mut self, width: u32, height: u32) {
        self.dispatcher
            .update_render_target_info(Size::new(width, height));
    }

    /// Releases everything bound to the surface before returning.
    ///
    /// Returns false if the render thread did not confirm in time.
    pub fn surface_destroyed(&mut self) -> bool {
        let confirmed = self.dispatcher.destroy_renderer_sync(SURFACE_TEARDOWN_TIMEOUT);
        if self.in_flight == Some(Operation::Picture) {
            // The pending picture went with the renderer
            self.fail("surface destroyed before the picture was taken".into());
        }
        confirmed
    }

    // ----------------------------------------
    // DEVICE LIFECYCLE
    // ----------------------------------------

    /// Opens the camera. Failure ends the attempt and is also reported as
    /// [`SessionUpdate::Failed`].
    pub fn resume(&mut self) -> CameraResult<()> {
        if self.shut_down {
            return Err(CameraError::Internal("session is shut down".into()));
        }
        if self.review.is_some() {
            log::debug!("resume: result under review, camera stays closed");
            return Ok(());
        }
        match self.device.open() {
            Ok(()) => {
                log::info!("Camera opened ({})", self.device.facing().label());
                Ok(())
            }
            Err(e) => {
                log::error!("Camera open failed: {}", e);
                self.stats.failures += 1;
                self.updates.push_back(SessionUpdate::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Closes the camera. A running recording is abandoned.
    pub fn pause(&mut self) {
        match self.in_flight {
            Some(Operation::Recording) => {
                log::info!("pause: recording abandoned");
                self.in_flight = Some(Operation::Abandoning);
                self.device.stop_record();
            }
            Some(Operation::Picture) => {
                log::debug!("pause: picture request abandoned");
                self.in_flight = None;
            }
            _ => {}
        }
        self.device.close();
        if self.review.is_none() {
            self.button.reset();
        }
        // The recorder may already have answered
        self.drain_events();
    }

    /// Tears the session down. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.pause();
        self.device.destroy();
        self.render.quit();
        log::info!("Capture session shut down: {:?}", self.stats);
    }

    // ----------------------------------------
    // GESTURES
    // ----------------------------------------

    /// Finger down on the capture button.
    pub fn press(&mut self) {
        if self.in_flight.is_some() || self.review.is_some() {
            log::trace!("press ignored: operation in flight");
            return;
        }
        if !self.device.is_open() {
            log::debug!("press ignored: camera not open");
            return;
        }
        self.button.press();
    }

    /// Finger up.
    pub fn release(&mut self) {
        if let Some(event) = self.button.release() {
            self.on_gesture(event);
        }
    }

    /// Advances gesture timers: long press and maximum recording length.
    pub fn tick(&mut self) {
        if let Some(event) = self.button.tick() {
            self.on_gesture(event);
        }
    }

    /// Vertical drag while recording, in zoom steps; positive zooms in.
    pub fn drag(&mut self, delta_steps: f32) {
        if let Some(event) = self.button.drag(delta_steps) {
            self.on_gesture(event);
        }
    }

    fn on_gesture(&mut self, event: GestureEvent) {
        log::debug!("Gesture: {:?}", event);
        match event {
            GestureEvent::TakePicture => self.take_picture(),
            GestureEvent::RecordStart => self.start_recording(),
            GestureEvent::RecordShort { duration_ms } => {
                self.in_flight = Some(Operation::Discarding { duration_ms });
                self.device.stop_record();
            }
            GestureEvent::RecordEnd { duration_ms } => {
                log::info!("Recording ended after {} ms", duration_ms);
                self.in_flight = Some(Operation::Finishing);
                self.device.stop_record();
            }
            GestureEvent::RecordZoom(delta) => {
                let ratio = self.device.zoom_ratio() + delta * self.config.zoom_step;
                self.device.zoom(ratio);
            }
        }
    }

    fn take_picture(&mut self) {
        let events = self.events_tx.clone();
        let requested = self.dispatcher.take_picture(Box::new(move |image| {
            let _ = events.send(SessionEvent::PictureReady(image));
        }));
        match requested {
            Ok(()) => self.in_flight = Some(Operation::Picture),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn start_recording(&mut self) {
        self.in_flight = Some(Operation::Recording);
        let events = self.events_tx.clone();
        self.device.start_recording(Box::new(move |path| {
            let _ = events.send(SessionEvent::RecordingFinished(path));
        }));

        if self.device.is_recording() {
            self.button.recording_started();
            self.updates.push_back(SessionUpdate::RecordingStarted);
        }
        // Otherwise the callback already reported the failure
    }

    // ----------------------------------------
    // RESULTS
    // ----------------------------------------

    /// Processes completions, waiting up to `timeout` for the first one.
    ///
    /// Gesture timers are advanced first, so calling this in a loop also
    /// ends recordings at the maximum length.
    pub fn pump(&mut self, timeout: Duration) -> Vec<SessionUpdate> {
        self.tick();
        if self.updates.is_empty() {
            let deadline = Instant::now() + timeout;
            if let Ok(event) = self.events_rx.recv_deadline(deadline) {
                self.on_event(event);
            }
        }
        self.drain_events();
        self.updates.drain(..).collect()
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.on_event(event);
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PictureReady(image) => self.on_picture(image),
            SessionEvent::RecordingFinished(path) => self.on_recording_finished(path),
            SessionEvent::DeviceFailed(error) => {
                log::error!("Camera failed: {}", error);
                if self.in_flight.is_some() {
                    self.device.stop_record();
                }
                self.fail(error.to_string());
            }
        }
    }

    fn on_picture(&mut self, image: RgbaImage) {
        if self.in_flight != Some(Operation::Picture) {
            log::debug!("Late picture ignored");
            return;
        }
        match self.store.save_picture(&image) {
            Ok(path) => {
                let result = CaptureResult::image(&path, image.width(), image.height());
                self.stats.pictures_saved += 1;
                self.accept(result);
            }
            Err(e) => {
                log::warn!("Could not save picture: {}", e);
                self.fail(e.to_string());
            }
        }
    }

    fn on_recording_finished(&mut self, path: Option<PathBuf>) {
        let operation = self.in_flight;
        match (operation, path) {
            (Some(Operation::Discarding { duration_ms }), path) => {
                if let Some(path) = path {
                    if let Err(e) = self.store.delete(&path) {
                        log::warn!("Could not delete short recording: {}", e);
                    }
                }
                log::info!("Recording discarded after {} ms", duration_ms);
                self.stats.recordings_discarded += 1;
                self.deprecate_files();
                self.in_flight = None;
                self.button.reset();
                self.updates
                    .push_back(SessionUpdate::RecordingTooShort { duration_ms });
            }
            (Some(Operation::Abandoning), path) => {
                if let Some(path) = path {
                    let _ = self.store.delete(&path);
                }
                self.in_flight = None;
            }
            (Some(Operation::Recording | Operation::Finishing), Some(path)) => {
                let result = CaptureResult::video(&path, self.probe.as_ref());
                self.stats.videos_saved += 1;
                self.accept(result);
            }
            (Some(Operation::Recording | Operation::Finishing), None) => {
                self.fail("recording failed".into());
            }
            (_, path) => {
                log::debug!("Late recording ignored: {:?}", path);
                if let Some(path) = path {
                    let _ = self.store.delete(&path);
                }
            }
        }
    }

    /// A new terminal result replaces the previous one.
    fn accept(&mut self, result: CaptureResult) {
        self.deprecate_files();
        log::info!("Captured {:?} {}", result.content_type, result.uri);

        self.in_flight = None;
        self.button.ban();
        self.device.close();
        self.review = Some(result.clone());
        self.updates.push_back(SessionUpdate::Captured(result));
    }

    fn fail(&mut self, reason: String) {
        log::warn!("Capture failed: {}", reason);
        self.stats.failures += 1;
        self.deprecate_files();
        self.in_flight = None;
        if self.review.is_none() {
            self.button.reset();
        }
        self.updates.push_back(SessionUpdate::Failed(reason));
    }

    /// Deletes the files of the last cancelled result.
    fn deprecate_files(&mut self) {
        if let Some(old) = self.deprecated.take() {
            log::debug!("Deleting superseded result {}", old.uri);
            self.store.delete_result_files(&old);
        }
    }

    /// Hands out the result under review and ends the review.
    pub fn confirm(&mut self) -> Option<CaptureResult> {
        let result = self.review.take();
        if result.is_none() {
            log::trace!("confirm: nothing to confirm");
        }
        result
    }

    /// Rejects the result under review and reopens the preview.
    pub fn cancel(&mut self) -> CameraResult<()> {
        if let Some(rejected) = self.review.take() {
            self.deprecate_files();
            self.deprecated = Some(rejected);
        }
        self.button.reset();
        self.device.close();
        self.resume()
    }

    // ----------------------------------------
    // CAMERA CONTROLS
    // ----------------------------------------

    pub fn switch_camera(&mut self) -> CameraResult<()> {
        if self.in_flight.is_some() {
            log::debug!("switch_camera ignored: operation in flight");
            return Ok(());
        }
        self.device.switch_camera()?;
        Ok(())
    }

    /// Tap to focus; ignored by fixed-focus cameras.
    pub fn focus_at(&mut self, point: FocusPoint) {
        if !self.device.can_auto_focus() {
            log::debug!("focus_at: camera has no auto focus");
            return;
        }
        self.device.auto_focus(point);
    }

    pub fn zoom(&mut self, ratio: f32) {
        self.device.zoom(ratio);
    }

    pub fn set_torch(&mut self, on: bool) {
        if !self.device.support_torch() {
            log::debug!("set_torch: no torch");
            return;
        }
        self.device.set_flash_light(on);
    }

    pub fn apply_filter(&self, filter: Box<dyn Filter>) {
        self.dispatcher.apply_filter(filter);
    }

    pub fn clear_filter(&self) {
        self.dispatcher.clear_filter();
    }

    pub fn set_scale_type(&self, scale_type: ScaleType) {
        self.dispatcher.set_scale_type(scale_type);
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{SimulatedCameraModel, SimulatedDriver};
    use crate::capture::LegacyCamera;
    use crate::gpu::{HeadlessSurface, SoftwareContextFactory};
    use crate::input::ManualClock;
    use crate::result::ContentType;
    use std::path::Path;

    struct Session {
        coordinator: CaptureCoordinator,
        clock: ManualClock,
        surface: Arc<HeadlessSurface>,
        driver: SimulatedDriver,
        _dir: tempfile::TempDir,
    }

    fn session(preview: Size) -> Session {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            preview_width: preview.width,
            preview_height: preview.height,
            output_directory: dir.path().to_path_buf(),
            ..Config::default()
        };
        let driver = SimulatedDriver::new(vec![SimulatedCameraModel::back()]);
        let device = LegacyCamera::new(driver.clone(), config.clone());
        let clock = ManualClock::new();

        let mut coordinator = CaptureCoordinator::new(
            config,
            Box::new(device),
            Box::new(SoftwareContextFactory::new()),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()));

        let surface = Arc::new(HeadlessSurface::new());
        coordinator.surface_created(RenderTarget::ViewSurface(surface.clone()));
        coordinator.surface_changed(36, 64);

        Session {
            coordinator,
            clock,
            surface,
            driver,
            _dir: dir,
        }
    }

    fn wait_for_frames(surface: &HeadlessSurface, at_least: u64) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while surface.presented_frames() < at_least {
            assert!(Instant::now() < deadline, "no frames presented");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn pump_until<F>(coordinator: &mut CaptureCoordinator, mut matches: F) -> SessionUpdate
    where
        F: FnMut(&SessionUpdate) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            for update in coordinator.pump(Duration::from_millis(50)) {
                if matches(&update) {
                    return update;
                }
            }
        }
        panic!("update never arrived");
    }

    fn take_photo(s: &mut Session) -> CaptureResult {
        let presented = s.surface.presented_frames();
        wait_for_frames(&s.surface, presented + 1);
        s.coordinator.press();
        s.coordinator.release();
        match pump_until(&mut s.coordinator, |u| matches!(u, SessionUpdate::Captured(_))) {
            SessionUpdate::Captured(result) => result,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn media_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_capture_end_to_end() {
        let mut s = session(Size::new(1920, 1080));
        s.coordinator.resume().unwrap();

        let first = take_photo(&mut s);
        assert_eq!(first.content_type, ContentType::Image);
        // 1920x1080 sensor at 90 degrees: portrait still
        assert_eq!((first.width, first.height), (1080, 1920));
        assert!(Path::new(&first.uri).exists());
        assert!(!s.coordinator.device().is_open());

        // Gestures are ignored while the result is under review
        s.coordinator.press();
        assert_eq!(s.coordinator.gesture_state(), GestureState::Banned);

        // Retake: the rejected photo goes once the new one is accepted
        s.coordinator.cancel().unwrap();
        assert!(s.coordinator.device().is_open());
        let second = take_photo(&mut s);
        assert!(!Path::new(&first.uri).exists());
        assert!(Path::new(&second.uri).exists());

        assert_eq!(s.coordinator.confirm(), Some(second.clone()));
        assert_eq!(s.coordinator.confirm(), None);
        assert_eq!(media_files(s.coordinator.media_directory()), vec![PathBuf::from(&second.uri)]);
        assert_eq!(s.coordinator.stats().pictures_saved, 2);
    }

    #[test]
    fn test_short_recording_leaves_nothing() {
        let mut s = session(Size::new(640, 480));
        s.coordinator.resume().unwrap();
        wait_for_frames(&s.surface, 1);

        s.coordinator.press();
        s.clock.advance(600);
        s.coordinator.tick();
        assert!(s.coordinator.device().is_recording());
        assert_eq!(s.coordinator.gesture_state(), GestureState::Recording);

        std::thread::sleep(Duration::from_millis(100));
        s.clock.advance(500);
        s.coordinator.release();

        let update = pump_until(&mut s.coordinator, |u| {
            matches!(u, SessionUpdate::RecordingTooShort { .. } | SessionUpdate::Captured(_))
        });
        assert_eq!(update, SessionUpdate::RecordingTooShort { duration_ms: 500 });
        assert!(s.coordinator.pending_result().is_none());
        assert!(media_files(s.coordinator.media_directory()).is_empty());
        assert_eq!(s.coordinator.gesture_state(), GestureState::Idle);
        assert!(s.coordinator.device().is_open());
    }

    #[test]
    fn test_long_recording_produces_video() {
        let mut s = session(Size::new(640, 480));
        s.coordinator.resume().unwrap();
        wait_for_frames(&s.surface, 1);

        s.coordinator.press();
        s.clock.advance(500);
        s.coordinator.tick();
        std::thread::sleep(Duration::from_millis(200));
        s.clock.advance(2_000);
        s.coordinator.release();

        let update = pump_until(&mut s.coordinator, |u| matches!(u, SessionUpdate::Captured(_)));
        let SessionUpdate::Captured(result) = update else {
            unreachable!()
        };
        assert!(result.is_video());
        assert!(result.duration.is_some());
        assert!(Path::new(&result.uri).exists());
        assert_eq!(s.coordinator.stats().videos_saved, 1);
    }

    #[test]
    fn test_max_duration_ends_recording() {
        let mut s = session(Size::new(640, 480));
        s.coordinator.resume().unwrap();
        wait_for_frames(&s.surface, 1);

        s.coordinator.press();
        s.clock.advance(500);
        s.coordinator.tick();
        std::thread::sleep(Duration::from_millis(100));
        s.clock.advance(10_000);

        // Finger still down; pump notices the limit
        let update = pump_until(&mut s.coordinator, |u| matches!(u, SessionUpdate::Captured(_)));
        assert!(matches!(update, SessionUpdate::Captured(r) if r.is_video()));
        s.coordinator.release();
        assert_eq!(s.coordinator.gesture_state(), GestureState::Banned);
    }

    #[test]
    fn test_photo_only_mode_never_records() {
        let mut s = session(Size::new(640, 480));
        s.coordinator.set_mode(ButtonState::OnlyCapture);
        s.coordinator.resume().unwrap();
        wait_for_frames(&s.surface, 1);

        s.coordinator.press();
        s.clock.advance(5_000);
        s.coordinator.tick();
        assert!(!s.coordinator.device().is_recording());
        s.coordinator.release();
        let update = pump_until(&mut s.coordinator, |u| matches!(u, SessionUpdate::Captured(_)));
        assert!(matches!(update, SessionUpdate::Captured(r) if !r.is_video()));
    }

    #[test]
    fn test_open_failure_reported() {
        let mut s = session(Size::new(640, 480));
        s.driver.set_fail_open(true);
        assert!(s.coordinator.resume().is_err());
        let updates = s.coordinator.pump(Duration::from_millis(10));
        assert!(matches!(updates.as_slice(), [SessionUpdate::Failed(_)]));

        // Gestures need an open camera
        s.coordinator.press();
        assert_eq!(s.coordinator.gesture_state(), GestureState::Idle);
    }

    #[test]
    fn test_surface_lifecycle_and_shutdown() {
        let mut s = session(Size::new(640, 480));
        s.coordinator.resume().unwrap();
        wait_for_frames(&s.surface, 1);

        assert!(s.coordinator.surface_destroyed());
        let surface = Arc::new(HeadlessSurface::new());
        s.coordinator.surface_created(RenderTarget::ViewSurface(surface.clone()));
        s.coordinator.surface_changed(36, 64);
        wait_for_frames(&surface, 1);

        s.coordinator.set_torch(true);
        s.coordinator.zoom(100.0);
        assert!(s.coordinator.device().zoom_ratio() <= s.coordinator.device().zoom_range().1);

        s.coordinator.shutdown();
        s.coordinator.shutdown();
        assert_eq!(s.driver.open_cameras(), 0);
        assert!(!s.coordinator.dispatcher().is_alive());
        assert!(s.coordinator.resume().is_err());
    }
}

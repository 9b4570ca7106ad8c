//! # Legacy Camera Backend
//!
//! Drives the old synchronous camera API: open by id, read parameters,
//! change them, write them back, start the preview.
//!
//! ## Plain English
//!
//! Opening a camera here is a checklist:
//! 1. Find the camera id facing the right way
//! 2. Pick a preview size, a picture size and a frame rate it supports
//! 3. Turn on continuous focus if the back camera has it
//! 4. Work out how far the picture has to be turned to look upright
//! 5. Start pushing frames into a fresh [`FrameSource`]

use std::sync::Arc;

use super::frame::{FrameRouter, FrameSink, FrameSource};
use super::negotiate::{
    choose_fixed_fps, choose_size, preview_orientation, tap_area, texture_transform, FocusRect,
    FpsRange, PICTURE_POLICY, PREVIEW_POLICY,
};
use super::{
    clamp_zoom, CaptureDevice, DeviceListener, Facing, FocusPoint, PreviewCallback, PreviewInfo,
    RecordingCallback, Size,
};
use crate::config::Config;
use crate::error::{DeviceError, DeviceResult};

// ============================================
// DRIVER INTERFACE
// ============================================

/// Static facts about one camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraInfo {
    pub facing: Facing,
    /// Sensor mounting angle in degrees
    pub orientation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusMode {
    Auto,
    ContinuousVideo,
    ContinuousPicture,
    Fixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    On,
    Auto,
    Torch,
}

/// A camera's settings, read and written as a whole.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraParameters {
    pub supported_preview_sizes: Vec<Size>,
    pub supported_picture_sizes: Vec<Size>,
    pub supported_fps_ranges: Vec<FpsRange>,
    pub preview_fps_range: FpsRange,
    pub preview_size: Size,
    pub picture_size: Size,

    pub supported_focus_modes: Vec<FocusMode>,
    pub focus_mode: FocusMode,
    pub max_focus_areas: u32,
    pub max_metering_areas: u32,
    pub focus_areas: Vec<FocusRect>,
    pub metering_areas: Vec<FocusRect>,

    pub supported_flash_modes: Vec<FlashMode>,
    /// `None` when the camera has no flash at all
    pub flash_mode: Option<FlashMode>,

    pub zoom_supported: bool,
    pub max_zoom: u32,
    /// Index into `zoom_ratios`
    pub zoom: u32,
    /// Zoom ratio per index, in percent (100 = 1x)
    pub zoom_ratios: Vec<u32>,
}

impl CameraParameters {
    /// True if the flash can be used as a torch.
    pub fn supports_torch(&self) -> bool {
        self.flash_mode.is_some()
            && !self.supported_flash_modes.is_empty()
            && !(self.supported_flash_modes.len() == 1
                && self.supported_flash_modes[0] == FlashMode::Off)
    }

    pub fn supports_continuous_video(&self) -> bool {
        self.supported_focus_modes
            .contains(&FocusMode::ContinuousVideo)
    }

    pub fn supports_auto_focus(&self) -> bool {
        self.supported_focus_modes.contains(&FocusMode::Auto)
    }

    fn can_zoom(&self) -> bool {
        self.zoom_supported && !self.zoom_ratios.is_empty()
    }

    fn ratio_at(&self, index: u32) -> f32 {
        self.zoom_ratios
            .get(index as usize)
            .map(|r| *r as f32 / 100.0)
            .unwrap_or(1.0)
    }

    fn top_zoom_index(&self) -> u32 {
        self.max_zoom
            .min(self.zoom_ratios.len().saturating_sub(1) as u32)
    }

    /// Index whose ratio is nearest to `ratio`.
    fn nearest_zoom_index(&self, ratio: f32) -> u32 {
        let target = ratio * 100.0;
        (0..=self.top_zoom_index())
            .min_by(|a, b| {
                let da = (self.ratio_at(*a) * 100.0 - target).abs();
                let db = (self.ratio_at(*b) * 100.0 - target).abs();
                da.total_cmp(&db)
            })
            .unwrap_or(0)
    }
}

/// The platform's synchronous camera service.
pub trait CameraDriver: Send + Sync {
    fn number_of_cameras(&self) -> u32;

    fn camera_info(&self, id: u32) -> Option<CameraInfo>;

    fn open(&self, id: u32) -> DeviceResult<Box<dyn DriverCamera>>;
}

/// One opened camera.
pub trait DriverCamera: Send {
    fn parameters(&self) -> CameraParameters;

    fn set_parameters(&mut self, parameters: &CameraParameters) -> DeviceResult<()>;

    /// Starts pushing preview frames (sensor orientation) into `sink`.
    fn start_preview(&mut self, sink: FrameSink) -> DeviceResult<()>;

    fn stop_preview(&mut self);

    /// Runs one focus cycle; true if focus locked.
    fn auto_focus(&mut self) -> bool;

    fn cancel_auto_focus(&mut self);

    fn release(&mut self);
}

// ============================================
// LEGACY CAMERA
// ============================================

/// What `configure` agreed on with the driver.
#[derive(Clone, Copy, Debug)]
struct Negotiated {
    preview_size: Size,
    picture_size: Option<Size>,
    preview_fps: u32,
}

struct OpenCamera {
    id: u32,
    camera: Box<dyn DriverCamera>,
    preview_size: Size,
    picture_size: Option<Size>,
    preview_fps: u32,
}

/// [`CaptureDevice`] on top of a [`CameraDriver`].
pub struct LegacyCamera<D: CameraDriver> {
    driver: D,
    config: Config,
    facing: Facing,
    display_rotation: u32,
    orientation: u32,
    open: Option<OpenCamera>,
    router: Arc<FrameRouter>,
}

impl<D: CameraDriver> LegacyCamera<D> {
    pub fn new(driver: D, config: Config) -> Self {
        Self {
            facing: config.facing,
            driver,
            config,
            display_rotation: 0,
            orientation: 0,
            open: None,
            router: FrameRouter::new(),
        }
    }

    /// Display rotation in degrees, applied on the next open.
    pub fn set_display_rotation(&mut self, degrees: u32) {
        self.display_rotation = degrees % 360;
    }

    /// Current driver parameters, if open.
    pub fn parameters(&self) -> Option<CameraParameters> {
        self.open.as_ref().map(|o| o.camera.parameters())
    }

    /// Negotiated preview rate in thousandths of a frame per second.
    pub fn preview_fps(&self) -> Option<u32> {
        self.open.as_ref().map(|o| o.preview_fps)
    }

    fn find_camera(&self, facing: Facing) -> Option<(u32, CameraInfo)> {
        (0..self.driver.number_of_cameras()).find_map(|id| {
            self.driver
                .camera_info(id)
                .filter(|info| info.facing == facing)
                .map(|info| (id, info))
        })
    }

    /// Negotiates sizes, frame rate and focus, then writes them back.
    fn configure(&self, camera: &mut dyn DriverCamera) -> DeviceResult<Negotiated> {
        let mut params = camera.parameters();
        let expect = Size::new(self.config.preview_width, self.config.preview_height);

        let preview_size = choose_size(&params.supported_preview_sizes, expect, PREVIEW_POLICY)?;
        let picture_size = choose_size(&params.supported_picture_sizes, expect, PICTURE_POLICY).ok();
        let fps = choose_fixed_fps(
            &params.supported_fps_ranges,
            params.preview_fps_range,
            self.config.expected_fps * 1000,
        );

        params.preview_size = preview_size;
        if let Some(size) = picture_size {
            params.picture_size = size;
        }
        if let Some(range) = fps.range {
            params.preview_fps_range = range;
        }
        if self.facing == Facing::Back && params.supports_continuous_video() {
            camera.cancel_auto_focus();
            params.focus_mode = FocusMode::ContinuousVideo;
        }
        camera.set_parameters(&params)?;

        Ok(Negotiated {
            preview_size,
            picture_size,
            preview_fps: fps.thousand_fps,
        })
    }

    /// Reads, edits and writes back the parameters. `edit` returns false
    /// to skip the write.
    fn update_parameters<F>(&mut self, what: &str, edit: F)
    where
        F: FnOnce(&mut CameraParameters) -> bool,
    {
        let open = match self.open.as_mut() {
            Some(open) => open,
            None => {
                log::trace!("{}: camera not open", what);
                return;
            }
        };
        let mut params = open.camera.parameters();
        if !edit(&mut params) {
            return;
        }
        if let Err(e) = open.camera.set_parameters(&params) {
            log::warn!("{}: {}", what, e);
        }
    }
}

impl<D: CameraDriver> CaptureDevice for LegacyCamera<D> {
    fn open(&mut self) -> DeviceResult<()> {
        self.close();

        let (id, info) = self
            .find_camera(self.facing)
            .ok_or(DeviceError::NoCamera(self.facing.label()))?;
        let mut camera = self.driver.open(id)?;

        let negotiated = match self.configure(camera.as_mut()) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                camera.release();
                return Err(e);
            }
        };

        self.orientation = preview_orientation(info.orientation, self.display_rotation, self.facing);
        let mirror = self.facing == Facing::Front;
        let source = FrameSource::new(texture_transform(self.orientation, mirror));
        self.router.install(Arc::clone(&source), self.orientation);

        let preview = PreviewInfo {
            preview_size: negotiated.preview_size,
            orientation: self.orientation,
            facing: self.facing,
        };
        if let Some(listener) = self.router.listener() {
            listener.on_surface_prepared(&source, preview);
        }

        if let Err(e) = camera.start_preview(self.router.sink_for(&source)) {
            camera.release();
            self.router.retire_source();
            return Err(e);
        }

        log::info!(
            "Opened {} camera {}: preview {} picture {:?} @ {} fps/1000, orientation {}",
            self.facing.label(),
            id,
            negotiated.preview_size,
            negotiated.picture_size,
            negotiated.preview_fps,
            self.orientation
        );
        self.open = Some(OpenCamera {
            id,
            camera,
            preview_size: negotiated.preview_size,
            picture_size: negotiated.picture_size,
            preview_fps: negotiated.preview_fps,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.router.cancel_recording();
        if let Some(mut open) = self.open.take() {
            open.camera.stop_preview();
            open.camera.release();
            log::info!("Closed camera {}", open.id);
        }
        self.router.retire_source();
    }

    fn switch_camera(&mut self) -> DeviceResult<()> {
        let target = self.facing.toggled();
        if self.find_camera(target).is_none() {
            log::debug!("switch_camera: no {} camera", target.label());
            return Ok(());
        }

        self.facing = target;
        if self.open.is_some() {
            self.open()
        } else {
            Ok(())
        }
    }

    fn destroy(&mut self) {
        self.close();
        self.router.set_listener(None);
        self.router.set_preview_callback(None);
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn facing(&self) -> Facing {
        self.facing
    }

    fn preview_size(&self) -> Option<Size> {
        self.open.as_ref().map(|o| o.preview_size)
    }

    fn picture_size(&self) -> Option<Size> {
        self.open.as_ref().and_then(|o| o.picture_size)
    }

    fn orientation(&self) -> u32 {
        self.orientation
    }

    fn set_listener(&mut self, listener: Arc<dyn DeviceListener>) {
        self.router.set_listener(Some(listener));
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) {
        self.router.set_preview_callback(callback);
    }

    fn start_recording(&mut self, on_complete: RecordingCallback) {
        self.router.start_recording(
            &self.config.output_directory,
            self.config.record_fps,
            self.config.jpeg_quality,
            on_complete,
        );
    }

    fn stop_record(&mut self) {
        self.router.stop_recording();
    }

    fn is_recording(&self) -> bool {
        self.router.is_recording()
    }

    fn can_auto_focus(&self) -> bool {
        self.parameters()
            .map(|p| p.supports_auto_focus())
            .unwrap_or(false)
    }

    fn auto_focus(&mut self, point: FocusPoint) {
        let area = tap_area(
            point.x,
            point.y,
            point.view_width,
            point.view_height,
            self.config.focus_size,
            self.orientation,
        );

        let mut areas_set = false;
        self.update_parameters("auto_focus", |params| {
            if params.supports_continuous_video() {
                params.focus_mode = FocusMode::ContinuousVideo;
            }
            if params.max_focus_areas == 0 {
                return false;
            }
            params.focus_areas = vec![area];
            if params.max_metering_areas > 0 {
                params.metering_areas = vec![area];
            }
            areas_set = true;
            true
        });
        if !areas_set {
            log::debug!("auto_focus: no focus areas supported");
            return;
        }

        if let Some(open) = self.open.as_mut() {
            let locked = open.camera.auto_focus();
            log::debug!("auto_focus at {:?}: locked={}", area, locked);
            // Back to continuous focus once the tap cycle ends
            let params = open.camera.parameters();
            if params.supports_continuous_video() {
                open.camera.cancel_auto_focus();
            }
        }
    }

    fn support_torch(&self) -> bool {
        self.parameters()
            .map(|p| p.supports_torch())
            .unwrap_or(false)
    }

    fn set_flash_light(&mut self, on: bool) {
        if !self.support_torch() {
            log::debug!("set_flash_light: torch not supported");
            return;
        }
        self.update_parameters("set_flash_light", |params| {
            params.flash_mode = Some(if on { FlashMode::Torch } else { FlashMode::Off });
            true
        });
    }

    fn zoom(&mut self, ratio: f32) {
        let (min, max) = self.zoom_range();
        let ratio = clamp_zoom(ratio, min, max);
        self.update_parameters("zoom", |params| {
            if !params.can_zoom() {
                return false;
            }
            params.zoom = params.nearest_zoom_index(ratio);
            true
        });
    }

    fn zoom_in(&mut self) {
        self.update_parameters("zoom_in", |params| {
            if !params.can_zoom() {
                return false;
            }
            params.zoom = (params.zoom + 1).min(params.top_zoom_index());
            true
        });
    }

    fn zoom_out(&mut self) {
        self.update_parameters("zoom_out", |params| {
            if !params.can_zoom() {
                return false;
            }
            params.zoom = params.zoom.saturating_sub(1);
            true
        });
    }

    fn zoom_ratio(&self) -> f32 {
        self.parameters()
            .filter(|p| p.can_zoom())
            .map(|p| p.ratio_at(p.zoom))
            .unwrap_or(1.0)
    }

    fn zoom_range(&self) -> (f32, f32) {
        self.parameters()
            .filter(|p| p.can_zoom())
            .map(|p| (p.ratio_at(0), p.ratio_at(p.top_zoom_index())))
            .unwrap_or((1.0, 1.0))
    }
}

impl<D: CameraDriver> Drop for LegacyCamera<D> {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{SimulatedCameraModel, SimulatedDriver};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        prepared: Mutex<Vec<PreviewInfo>>,
        destroyed: AtomicUsize,
        frames: AtomicUsize,
    }

    impl DeviceListener for Recorder {
        fn on_surface_prepared(&self, _source: &Arc<FrameSource>, info: PreviewInfo) {
            self.prepared.lock().push(info);
        }

        fn on_surface_destroyed(&self, _source: &Arc<FrameSource>) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_frame_available(&self, _source: &Arc<FrameSource>) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn legacy(driver: SimulatedDriver) -> (LegacyCamera<SimulatedDriver>, Arc<Recorder>) {
        let listener = Arc::new(Recorder::default());
        let mut config = Config::default();
        config.expected_fps = 15;
        let mut camera = LegacyCamera::new(driver, config);
        camera.set_listener(listener.clone());
        (camera, listener)
    }

    #[test]
    fn test_open_negotiates_preview() {
        let driver = SimulatedDriver::default();
        let (mut camera, listener) = legacy(driver.clone());
        camera.open().unwrap();

        assert!(camera.is_open());
        assert_eq!(camera.preview_size(), Some(Size::new(1920, 1080)));
        assert_eq!(camera.picture_size(), Some(Size::new(1920, 1080)));
        assert_eq!(camera.preview_fps(), Some(15_000));
        assert_eq!(camera.orientation(), 90);
        assert_eq!(
            camera.parameters().unwrap().focus_mode,
            FocusMode::ContinuousVideo
        );

        let prepared = listener.prepared.lock().clone();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].input_size(), Size::new(1080, 1920));

        let deadline = Instant::now() + Duration::from_secs(2);
        while listener.frames.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(listener.frames.load(Ordering::SeqCst) > 0);

        camera.close();
        camera.close();
        assert_eq!(driver.open_cameras(), 0);
        assert_eq!(listener.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_without_camera_fails() {
        let driver = SimulatedDriver::new(vec![SimulatedCameraModel::front()]);
        let (mut camera, _) = legacy(driver);
        assert_eq!(camera.open(), Err(DeviceError::NoCamera("back")));
        assert!(!camera.is_open());
    }

    #[test]
    fn test_switch_camera() {
        let driver = SimulatedDriver::default();
        let (mut camera, listener) = legacy(driver.clone());
        camera.open().unwrap();
        camera.switch_camera().unwrap();

        assert_eq!(camera.facing(), Facing::Front);
        assert_eq!(camera.preview_size(), Some(Size::new(1280, 720)));
        assert_eq!(driver.open_cameras(), 1);
        assert_eq!(listener.prepared.lock().len(), 2);

        // Only a back camera: switching is a no-op
        let (mut single, _) = legacy(SimulatedDriver::back_only());
        single.open().unwrap();
        single.switch_camera().unwrap();
        assert_eq!(single.facing(), Facing::Back);
    }

    #[test]
    fn test_zoom_clamps_and_steps() {
        let (mut camera, _) = legacy(SimulatedDriver::default());
        camera.open().unwrap();
        assert_eq!(camera.zoom_range(), (1.0, 4.0));

        camera.zoom(f32::NAN);
        assert_eq!(camera.zoom_ratio(), 1.0);
        camera.zoom(-5.0);
        assert_eq!(camera.zoom_ratio(), 1.0);
        camera.zoom(1e9);
        assert_eq!(camera.zoom_ratio(), 4.0);
        camera.zoom(1.9);
        assert_eq!(camera.zoom_ratio(), 2.0);

        camera.zoom_in();
        assert_eq!(camera.zoom_ratio(), 2.5);
        camera.zoom(4.0);
        camera.zoom_in();
        assert_eq!(camera.zoom_ratio(), 4.0);
        camera.zoom(1.0);
        camera.zoom_out();
        assert_eq!(camera.zoom_ratio(), 1.0);
    }

    #[test]
    fn test_torch() {
        let (mut camera, _) = legacy(SimulatedDriver::default());
        camera.open().unwrap();
        assert!(camera.support_torch());
        camera.set_flash_light(true);
        assert_eq!(camera.parameters().unwrap().flash_mode, Some(FlashMode::Torch));
        camera.set_flash_light(false);
        assert_eq!(camera.parameters().unwrap().flash_mode, Some(FlashMode::Off));

        // The front camera has no flash: toggling changes nothing
        camera.switch_camera().unwrap();
        let before = camera.parameters().unwrap();
        assert!(!camera.support_torch());
        camera.set_flash_light(true);
        camera.set_flash_light(false);
        assert_eq!(camera.parameters().unwrap(), before);
    }

    #[test]
    fn test_auto_focus_sets_areas() {
        let (mut camera, _) = legacy(SimulatedDriver::default());
        // Not open: nothing happens
        camera.auto_focus(FocusPoint {
            x: 10.0,
            y: 10.0,
            view_width: 100,
            view_height: 100,
        });

        camera.open().unwrap();
        assert!(camera.can_auto_focus());
        camera.auto_focus(FocusPoint {
            x: 540.0,
            y: 960.0,
            view_width: 1080,
            view_height: 1920,
        });
        let params = camera.parameters().unwrap();
        assert_eq!(params.focus_areas.len(), 1);
        assert_eq!(params.metering_areas, params.focus_areas);
    }

    #[test]
    fn test_flash_support_rules() {
        let (mut camera, _) = legacy(SimulatedDriver::default());
        camera.open().unwrap();
        let mut params = camera.parameters().unwrap();
        assert!(params.supports_torch());

        params.supported_flash_modes = vec![FlashMode::Off];
        assert!(!params.supports_torch());
        params.supported_flash_modes = vec![FlashMode::Off, FlashMode::Torch];
        params.flash_mode = None;
        assert!(!params.supports_torch());
    }
}

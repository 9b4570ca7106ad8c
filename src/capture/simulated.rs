//! # Simulated Camera Hardware
//!
//! Software stand-ins for both camera APIs. They generate test pattern
//! frames on a thread at a fixed rate.
//!
//! Used by the tests and by hosts that run without camera hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};

use super::frame::FrameSink;
use super::legacy::{CameraDriver, CameraInfo, CameraParameters, DriverCamera, FlashMode, FocusMode};
use super::negotiate::{choose_size, FpsRange, PICTURE_POLICY};
use super::provider::{BoundCamera, CameraProvider, ZoomState};
use super::{clamp_zoom, CameraFrame, Facing, Size};
use crate::error::{DeviceError, DeviceResult};

// ============================================
// CAMERA DESCRIPTION
// ============================================

/// What one simulated camera can do.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedCameraModel {
    pub facing: Facing,
    pub sensor_orientation: u32,
    /// Preview sizes in sensor order
    pub preview_sizes: Vec<Size>,
    pub picture_sizes: Vec<Size>,
    pub has_flash: bool,
    pub auto_focus: bool,
    /// Zoom ratio table in percent; empty means no zoom
    pub zoom_ratios: Vec<u32>,
}

impl SimulatedCameraModel {
    /// A typical main camera.
    pub fn back() -> Self {
        Self {
            facing: Facing::Back,
            sensor_orientation: 90,
            preview_sizes: vec![
                Size::new(640, 480),
                Size::new(1280, 720),
                Size::new(1440, 1080),
                Size::new(1920, 1080),
            ],
            picture_sizes: vec![
                Size::new(1280, 720),
                Size::new(1920, 1080),
                Size::new(3840, 2160),
            ],
            has_flash: true,
            auto_focus: true,
            zoom_ratios: vec![100, 120, 150, 200, 250, 300, 400],
        }
    }

    /// A fixed-focus selfie camera without flash or zoom.
    pub fn front() -> Self {
        Self {
            facing: Facing::Front,
            sensor_orientation: 270,
            preview_sizes: vec![Size::new(640, 480), Size::new(1280, 720)],
            picture_sizes: vec![Size::new(1280, 720)],
            has_flash: false,
            auto_focus: false,
            zoom_ratios: Vec::new(),
        }
    }

    /// Same camera with a single preview and picture size.
    pub fn with_size(mut self, size: Size) -> Self {
        self.preview_sizes = vec![size];
        self.picture_sizes = vec![size];
        self
    }

    fn initial_parameters(&self) -> CameraParameters {
        let focus_modes = if self.auto_focus {
            vec![
                FocusMode::Auto,
                FocusMode::ContinuousVideo,
                FocusMode::ContinuousPicture,
            ]
        } else {
            vec![FocusMode::Fixed]
        };
        let flash_modes = if self.has_flash {
            vec![FlashMode::Off, FlashMode::On, FlashMode::Auto, FlashMode::Torch]
        } else {
            Vec::new()
        };

        CameraParameters {
            supported_preview_sizes: self.preview_sizes.clone(),
            supported_picture_sizes: self.picture_sizes.clone(),
            supported_fps_ranges: vec![
                FpsRange::fixed(15_000),
                FpsRange::fixed(30_000),
                FpsRange {
                    min: 7_000,
                    max: 30_000,
                },
            ],
            preview_fps_range: FpsRange {
                min: 7_000,
                max: 30_000,
            },
            preview_size: self.preview_sizes.first().copied().unwrap_or_default(),
            picture_size: self.picture_sizes.first().copied().unwrap_or_default(),
            focus_mode: focus_modes[0],
            supported_focus_modes: focus_modes,
            max_focus_areas: u32::from(self.auto_focus),
            max_metering_areas: u32::from(self.auto_focus),
            focus_areas: Vec::new(),
            metering_areas: Vec::new(),
            flash_mode: self.has_flash.then_some(FlashMode::Off),
            supported_flash_modes: flash_modes,
            zoom_supported: !self.zoom_ratios.is_empty(),
            max_zoom: self.zoom_ratios.len().saturating_sub(1) as u32,
            zoom: 0,
            zoom_ratios: self.zoom_ratios.clone(),
        }
    }
}

// ============================================
// FRAME GENERATOR
// ============================================

/// Pushes test pattern frames into a sink until stopped.
struct FrameGenerator {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameGenerator {
    fn spawn(size: Size, fps: u32, sink: FrameSink) -> DeviceResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let fps = fps.max(1);

        let handle = thread::Builder::new()
            .name("billie-sim-camera".into())
            .spawn(move || {
                log::info!("Simulated camera started: {} @ {} FPS", size, fps);

                let frame_duration = Duration::from_micros(1_000_000 / fps as u64);
                let mut frame_number = 0u32;
                let start_time = Instant::now();

                while flag.load(Ordering::SeqCst) {
                    sink(CameraFrame::new(test_pattern(size, frame_number)));
                    frame_number = frame_number.wrapping_add(1);

                    // Maintain frame rate
                    let elapsed = start_time.elapsed();
                    let expected = frame_duration * frame_number;
                    if expected > elapsed {
                        thread::sleep(expected - elapsed);
                    }
                }

                log::info!("Simulated camera stopped after {} frames", frame_number);
            })
            .map_err(|e| DeviceError::Driver(e.to_string()))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FrameGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Vertical color bars whose brightness cycles with the frame number.
fn test_pattern(size: Size, frame_number: u32) -> RgbaImage {
    const BARS: [[u8; 3]; 4] = [[255, 64, 64], [64, 255, 64], [64, 64, 255], [255, 255, 64]];
    let pulse = 192 + (frame_number % 64) as u16;
    let width = size.width.max(1);

    RgbaImage::from_fn(size.width, size.height, |x, _| {
        let bar = BARS[(x * 4 / width) as usize % 4];
        let scale = |c: u8| ((c as u16 * pulse) / 255) as u8;
        Rgba([scale(bar[0]), scale(bar[1]), scale(bar[2]), 255])
    })
}

// ============================================
// SIMULATED LEGACY DRIVER
// ============================================

/// Simulated synchronous camera driver.
#[derive(Clone)]
pub struct SimulatedDriver {
    cameras: Vec<SimulatedCameraModel>,
    open_count: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
}

impl SimulatedDriver {
    pub fn new(cameras: Vec<SimulatedCameraModel>) -> Self {
        Self {
            cameras,
            open_count: Arc::new(AtomicUsize::new(0)),
            fail_open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn back_only() -> Self {
        Self::new(vec![SimulatedCameraModel::back()])
    }

    /// Cameras currently open and not yet released.
    pub fn open_cameras(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Makes the next opens fail like a camera held by another app.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(vec![SimulatedCameraModel::back(), SimulatedCameraModel::front()])
    }
}

impl CameraDriver for SimulatedDriver {
    fn number_of_cameras(&self) -> u32 {
        self.cameras.len() as u32
    }

    fn camera_info(&self, id: u32) -> Option<CameraInfo> {
        self.cameras.get(id as usize).map(|model| CameraInfo {
            facing: model.facing,
            orientation: model.sensor_orientation,
        })
    }

    fn open(&self, id: u32) -> DeviceResult<Box<dyn DriverCamera>> {
        let model = self.cameras.get(id as usize).ok_or(DeviceError::OpenFailed {
            id,
            reason: "no such camera".into(),
        })?;
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::OpenFailed {
                id,
                reason: "camera in use".into(),
            });
        }

        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedDriverCamera {
            parameters: model.initial_parameters(),
            generator: None,
            open_count: Arc::clone(&self.open_count),
            released: false,
        }))
    }
}

struct SimulatedDriverCamera {
    parameters: CameraParameters,
    generator: Option<FrameGenerator>,
    open_count: Arc<AtomicUsize>,
    released: bool,
}

impl DriverCamera for SimulatedDriverCamera {
    fn parameters(&self) -> CameraParameters {
        self.parameters.clone()
    }

    fn set_parameters(&mut self, parameters: &CameraParameters) -> DeviceResult<()> {
        if !parameters
            .supported_preview_sizes
            .contains(&parameters.preview_size)
        {
            return Err(DeviceError::Driver(format!(
                "unsupported preview size {}",
                parameters.preview_size
            )));
        }
        if let Some(mode) = parameters.flash_mode {
            if !parameters.supported_flash_modes.contains(&mode) {
                return Err(DeviceError::Driver(format!("unsupported flash mode {:?}", mode)));
            }
        }
        if parameters.zoom > parameters.max_zoom {
            return Err(DeviceError::Driver(format!("zoom index {} out of range", parameters.zoom)));
        }
        self.parameters = parameters.clone();
        Ok(())
    }

    fn start_preview(&mut self, sink: FrameSink) -> DeviceResult<()> {
        if self.released {
            return Err(DeviceError::NotOpen);
        }
        self.stop_preview();
        let fps = (self.parameters.preview_fps_range.max / 1000).max(1);
        self.generator = Some(FrameGenerator::spawn(
            self.parameters.preview_size,
            fps,
            sink,
        )?);
        Ok(())
    }

    fn stop_preview(&mut self) {
        if let Some(mut generator) = self.generator.take() {
            generator.stop();
        }
    }

    fn auto_focus(&mut self) -> bool {
        self.parameters
            .supported_focus_modes
            .contains(&FocusMode::Auto)
    }

    fn cancel_auto_focus(&mut self) {}

    fn release(&mut self) {
        self.stop_preview();
        if !self.released {
            self.released = true;
            self.open_count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SimulatedDriverCamera {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================
// SIMULATED PROVIDER
// ============================================

/// Simulated asynchronous camera provider.
#[derive(Clone)]
pub struct SimulatedProvider {
    cameras: Vec<SimulatedCameraModel>,
    fps: u32,
    bind_delay: Duration,
    bound: Arc<AtomicUsize>,
    fail_bind: Arc<AtomicBool>,
}

impl SimulatedProvider {
    pub fn new(cameras: Vec<SimulatedCameraModel>) -> Self {
        Self {
            cameras,
            fps: 30,
            bind_delay: Duration::ZERO,
            bound: Arc::new(AtomicUsize::new(0)),
            fail_bind: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// How long `bind` blocks, like a provider warming up.
    pub fn with_bind_delay(mut self, delay: Duration) -> Self {
        self.bind_delay = delay;
        self
    }

    /// Cameras bound and not yet unbound.
    pub fn bound_cameras(&self) -> usize {
        self.bound.load(Ordering::SeqCst)
    }

    pub fn set_fail_bind(&self, fail: bool) {
        self.fail_bind.store(fail, Ordering::SeqCst);
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(vec![SimulatedCameraModel::back(), SimulatedCameraModel::front()])
    }
}

impl CameraProvider for SimulatedProvider {
    fn has_camera(&self, facing: Facing) -> bool {
        self.cameras.iter().any(|c| c.facing == facing)
    }

    fn bind(&self, facing: Facing, target: Size, sink: FrameSink) -> DeviceResult<Box<dyn BoundCamera>> {
        if !self.bind_delay.is_zero() {
            thread::sleep(self.bind_delay);
        }
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(DeviceError::Driver("provider bind failed".into()));
        }
        let model = self
            .cameras
            .iter()
            .find(|c| c.facing == facing)
            .ok_or(DeviceError::NoCamera(facing.label()))?;

        // Targets are given upright; sensors think in their own orientation
        let expect = target.rotated(model.sensor_orientation);
        let resolution = choose_size(&model.preview_sizes, expect, PICTURE_POLICY)?;
        let generator = FrameGenerator::spawn(resolution, self.fps, sink)?;
        self.bound.fetch_add(1, Ordering::SeqCst);

        let (min, max) = match (model.zoom_ratios.first(), model.zoom_ratios.last()) {
            (Some(min), Some(max)) => (*min as f32 / 100.0, *max as f32 / 100.0),
            _ => (1.0, 1.0),
        };
        Ok(Box::new(SimulatedBoundCamera {
            resolution,
            sensor_rotation: model.sensor_orientation,
            zoom: ZoomState { ratio: min, min, max },
            has_flash: model.has_flash,
            torch: false,
            generator: Some(generator),
            bound: Arc::clone(&self.bound),
        }))
    }
}

struct SimulatedBoundCamera {
    resolution: Size,
    sensor_rotation: u32,
    zoom: ZoomState,
    has_flash: bool,
    torch: bool,
    generator: Option<FrameGenerator>,
    bound: Arc<AtomicUsize>,
}

impl BoundCamera for SimulatedBoundCamera {
    fn resolution(&self) -> Size {
        self.resolution
    }

    fn sensor_rotation(&self) -> u32 {
        self.sensor_rotation
    }

    fn zoom_state(&self) -> ZoomState {
        self.zoom
    }

    fn set_zoom_ratio(&mut self, ratio: f32) {
        self.zoom.ratio = clamp_zoom(ratio, self.zoom.min, self.zoom.max);
    }

    fn has_flash_unit(&self) -> bool {
        self.has_flash
    }

    fn enable_torch(&mut self, on: bool) {
        if self.has_flash {
            self.torch = on;
        }
    }

    fn torch_enabled(&self) -> bool {
        self.torch
    }

    fn start_focus_and_metering(&mut self, x: f32, y: f32) -> bool {
        (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y)
    }

    fn unbind(&mut self) {
        if let Some(mut generator) = self.generator.take() {
            generator.stop();
            self.bound.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SimulatedBoundCamera {
    fn drop(&mut self) {
        self.unbind();
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_driver_lists_cameras() {
        let driver = SimulatedDriver::default();
        assert_eq!(driver.number_of_cameras(), 2);
        assert_eq!(driver.camera_info(1).unwrap().facing, Facing::Front);
        assert!(driver.camera_info(2).is_none());
    }

    #[test]
    fn test_driver_camera_streams_frames() {
        let driver = SimulatedDriver::back_only();
        let mut camera = driver.open(0).unwrap();
        assert_eq!(driver.open_cameras(), 1);

        let mut params = camera.parameters();
        params.preview_size = Size::new(640, 480);
        camera.set_parameters(&params).unwrap();

        let (tx, rx) = unbounded();
        camera
            .start_preview(Arc::new(move |frame: CameraFrame| {
                let _ = tx.send(frame.size());
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Size::new(640, 480));

        camera.release();
        assert_eq!(driver.open_cameras(), 0);
    }

    #[test]
    fn test_driver_rejects_bad_parameters() {
        let driver = SimulatedDriver::new(vec![SimulatedCameraModel::front()]);
        let mut camera = driver.open(0).unwrap();
        let mut params = camera.parameters();
        params.flash_mode = Some(FlashMode::Torch);
        assert!(camera.set_parameters(&params).is_err());
    }

    #[test]
    fn test_driver_open_failure() {
        let driver = SimulatedDriver::default();
        driver.set_fail_open(true);
        assert!(matches!(driver.open(0), Err(DeviceError::OpenFailed { id: 0, .. })));
        assert_eq!(driver.open_cameras(), 0);
    }

    #[test]
    fn test_provider_bind_picks_sensor_resolution() {
        let provider = SimulatedProvider::default().with_fps(60);
        let sink: FrameSink = Arc::new(|_frame: CameraFrame| {});
        let mut camera = provider.bind(Facing::Back, Size::new(1080, 1920), sink).unwrap();

        assert_eq!(camera.resolution(), Size::new(1920, 1080));
        assert_eq!(camera.sensor_rotation(), 90);
        assert_eq!(provider.bound_cameras(), 1);

        camera.set_zoom_ratio(10.0);
        assert_eq!(camera.zoom_state().ratio, 4.0);

        camera.unbind();
        assert_eq!(provider.bound_cameras(), 0);
    }

    #[test]
    fn test_test_pattern_has_bars() {
        let image = test_pattern(Size::new(8, 2), 0);
        assert_ne!(image.get_pixel(0, 0), image.get_pixel(7, 0));
        assert_eq!(image.get_pixel(0, 0), image.get_pixel(0, 1));
    }
}

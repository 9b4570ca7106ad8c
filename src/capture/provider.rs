//! # Provider Camera Backend
//!
//! Drives the asynchronous camera provider API. Opening asks the provider
//! to bind a camera and returns straight away; the camera shows up later
//! on a worker thread.
//!
//! ## Plain English
//!
//! Think of ordering at a counter and getting a buzzer. `open()` places the
//! order. When the buzzer goes (the bind finishes) the camera is installed
//! and the listener hears "surface prepared". If the customer already left
//! (`close()` ran first) the order is thrown away: the late camera is
//! unbound on the spot.
//!
//! Every open bumps a generation number; a bind only counts if the
//! generation it started with is still current when it finishes.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::frame::{FrameRouter, FrameSink, FrameSource};
use super::negotiate::{preview_orientation, texture_transform, IDENTITY_MATRIX};
use super::{
    clamp_zoom, CaptureDevice, DeviceListener, Facing, FocusPoint, PreviewCallback, PreviewInfo,
    RecordingCallback, Size,
};
use crate::config::Config;
use crate::error::{DeviceError, DeviceResult};

// ============================================
// PROVIDER INTERFACE
// ============================================

/// Zoom limits and current value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomState {
    pub ratio: f32,
    pub min: f32,
    pub max: f32,
}

/// The platform's asynchronous camera provider.
pub trait CameraProvider: Send + Sync + 'static {
    fn has_camera(&self, facing: Facing) -> bool;

    /// Binds a camera and starts its frame stream into `sink`.
    ///
    /// Blocks until the camera is ready; called from a worker thread.
    /// `target` is the desired upright resolution.
    fn bind(&self, facing: Facing, target: Size, sink: FrameSink) -> DeviceResult<Box<dyn BoundCamera>>;
}

/// A camera bound by a [`CameraProvider`].
pub trait BoundCamera: Send {
    /// Stream resolution in sensor order.
    fn resolution(&self) -> Size;

    fn sensor_rotation(&self) -> u32;

    fn zoom_state(&self) -> ZoomState;

    fn set_zoom_ratio(&mut self, ratio: f32);

    fn has_flash_unit(&self) -> bool;

    fn enable_torch(&mut self, on: bool);

    fn torch_enabled(&self) -> bool;

    /// Focus and meter at a normalized point (0..1 on both axes).
    fn start_focus_and_metering(&mut self, x: f32, y: f32) -> bool;

    /// Stops the stream and releases the camera.
    fn unbind(&mut self);
}

// ============================================
// PROVIDER CAMERA
// ============================================

struct Binding {
    camera: Box<dyn BoundCamera>,
    info: PreviewInfo,
}

#[derive(Default)]
struct BindState {
    generation: u64,
    binding: Option<Binding>,
}

/// [`CaptureDevice`] on top of a [`CameraProvider`].
pub struct ProviderCamera<P: CameraProvider> {
    provider: Arc<P>,
    config: Config,
    facing: Facing,
    display_rotation: u32,
    opened: bool,
    state: Arc<Mutex<BindState>>,
    router: Arc<FrameRouter>,
}

impl<P: CameraProvider> ProviderCamera<P> {
    pub fn new(provider: P, config: Config) -> Self {
        Self {
            provider: Arc::new(provider),
            facing: config.facing,
            config,
            display_rotation: 0,
            opened: false,
            state: Arc::new(Mutex::new(BindState::default())),
            router: FrameRouter::new(),
        }
    }

    /// Display rotation in degrees, applied on the next bind.
    pub fn set_display_rotation(&mut self, degrees: u32) {
        self.display_rotation = degrees % 360;
    }

    /// True once the asynchronous bind has finished.
    pub fn is_bound(&self) -> bool {
        self.state.lock().binding.is_some()
    }

    /// Torch state as reported by the bound camera.
    pub fn torch_enabled(&self) -> bool {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|b| b.camera.torch_enabled())
            .unwrap_or(false)
    }

    fn with_camera<T>(&self, f: impl FnOnce(&mut dyn BoundCamera) -> T) -> Option<T> {
        let mut state = self.state.lock();
        state.binding.as_mut().map(|b| f(b.camera.as_mut()))
    }

    fn info(&self) -> Option<PreviewInfo> {
        self.state.lock().binding.as_ref().map(|b| b.info)
    }

    fn step_zoom(&mut self, delta: f32) {
        let applied = self.with_camera(|camera| {
            let zoom = camera.zoom_state();
            camera.set_zoom_ratio(clamp_zoom(zoom.ratio + delta, zoom.min, zoom.max));
        });
        if applied.is_none() {
            log::trace!("zoom: camera not bound");
        }
    }
}

/// One bind request, run on the bind worker thread.
struct BindJob<P: CameraProvider> {
    provider: Arc<P>,
    state: Arc<Mutex<BindState>>,
    router: Arc<FrameRouter>,
    source: Arc<FrameSource>,
    generation: u64,
    facing: Facing,
    target: Size,
    display_rotation: u32,
}

impl<P: CameraProvider> BindJob<P> {
    fn run(self) {
        let facing = self.facing;
        let sink = self.router.sink_for(&self.source);

        let mut camera = match self.provider.bind(facing, self.target, sink) {
            Ok(camera) => camera,
            Err(e) => {
                let current = self.state.lock().generation == self.generation;
                if current {
                    log::error!("Camera bind failed: {}", e);
                    if let Some(listener) = self.router.listener() {
                        listener.on_device_error(&e);
                    }
                }
                return;
            }
        };

        let orientation =
            preview_orientation(camera.sensor_rotation(), self.display_rotation, facing);
        let info = PreviewInfo {
            preview_size: camera.resolution(),
            orientation,
            facing,
        };

        // Held across install and notification so close() cannot interleave
        let mut state = self.state.lock();
        if state.generation != self.generation {
            drop(state);
            log::debug!("Discarding late {} camera binding", facing.label());
            camera.unbind();
            self.source.release();
            return;
        }

        self.source
            .set_transform(texture_transform(orientation, facing == Facing::Front));
        self.router.install(Arc::clone(&self.source), orientation);
        state.binding = Some(Binding { camera, info });
        if let Some(listener) = self.router.listener() {
            listener.on_surface_prepared(&self.source, info);
        }
        drop(state);

        log::info!(
            "Bound {} camera: {} orientation {}",
            facing.label(),
            info.preview_size,
            orientation
        );
    }
}

impl<P: CameraProvider> CaptureDevice for ProviderCamera<P> {
    fn open(&mut self) -> DeviceResult<()> {
        self.close();
        if !self.provider.has_camera(self.facing) {
            return Err(DeviceError::NoCamera(self.facing.label()));
        }

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let job = BindJob {
            provider: Arc::clone(&self.provider),
            state: Arc::clone(&self.state),
            router: Arc::clone(&self.router),
            source: FrameSource::new(IDENTITY_MATRIX),
            generation,
            facing: self.facing,
            target: Size::new(self.config.provider_width, self.config.provider_height),
            display_rotation: self.display_rotation,
        };
        let (facing, target) = (job.facing, job.target);

        thread::Builder::new()
            .name("billie-camera-bind".into())
            .spawn(move || job.run())
            .map_err(|e| DeviceError::Driver(e.to_string()))?;

        self.opened = true;
        log::info!("Binding {} camera (target {})", facing.label(), target);
        Ok(())
    }

    fn close(&mut self) {
        self.router.cancel_recording();
        let binding = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.binding.take()
        };
        if let Some(mut binding) = binding {
            binding.camera.unbind();
            log::info!("Unbound {} camera", binding.info.facing.label());
        }
        self.router.retire_source();
        self.opened = false;
    }

    fn switch_camera(&mut self) -> DeviceResult<()> {
        let target = self.facing.toggled();
        if !self.provider.has_camera(target) {
            log::debug!("switch_camera: no {} camera", target.label());
            return Ok(());
        }

        self.facing = target;
        if self.opened {
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
        self.opened
    }

    fn facing(&self) -> Facing {
        self.facing
    }

    fn preview_size(&self) -> Option<Size> {
        self.info().map(|i| i.preview_size)
    }

    fn picture_size(&self) -> Option<Size> {
        self.preview_size()
    }

    fn orientation(&self) -> u32 {
        self.info().map(|i| i.orientation).unwrap_or(0)
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
        self.is_bound()
    }

    fn auto_focus(&mut self, point: FocusPoint) {
        let x = point.x / point.view_width.max(1) as f32;
        let y = point.y / point.view_height.max(1) as f32;
        match self.with_camera(|camera| camera.start_focus_and_metering(x, y)) {
            Some(started) => log::debug!("auto_focus at ({:.2}, {:.2}): {}", x, y, started),
            None => log::trace!("auto_focus: camera not bound"),
        }
    }

    fn support_torch(&self) -> bool {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|b| b.camera.has_flash_unit())
            .unwrap_or(false)
    }

    fn set_flash_light(&mut self, on: bool) {
        if !self.support_torch() {
            log::debug!("set_flash_light: no flash unit");
            return;
        }
        self.with_camera(|camera| camera.enable_torch(on));
    }

    fn zoom(&mut self, ratio: f32) {
        self.with_camera(|camera| {
            let zoom = camera.zoom_state();
            camera.set_zoom_ratio(clamp_zoom(ratio, zoom.min, zoom.max));
        });
    }

    fn zoom_in(&mut self) {
        self.step_zoom(self.config.zoom_step);
    }

    fn zoom_out(&mut self) {
        self.step_zoom(-self.config.zoom_step);
    }

    fn zoom_ratio(&self) -> f32 {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|b| b.camera.zoom_state().ratio)
            .unwrap_or(1.0)
    }

    fn zoom_range(&self) -> (f32, f32) {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|b| {
                let zoom = b.camera.zoom_state();
                (zoom.min, zoom.max)
            })
            .unwrap_or((1.0, 1.0))
    }
}

impl<P: CameraProvider> Drop for ProviderCamera<P> {
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
    use crate::capture::simulated::{SimulatedCameraModel, SimulatedProvider};
    use crossbeam::channel::{unbounded, Receiver, Sender};
    use std::time::{Duration, Instant};

    enum Event {
        Prepared(PreviewInfo),
        Destroyed,
        Error(DeviceError),
    }

    struct ChannelListener(Sender<Event>);

    impl DeviceListener for ChannelListener {
        fn on_surface_prepared(&self, _source: &Arc<FrameSource>, info: PreviewInfo) {
            let _ = self.0.send(Event::Prepared(info));
        }

        fn on_surface_destroyed(&self, _source: &Arc<FrameSource>) {
            let _ = self.0.send(Event::Destroyed);
        }

        fn on_frame_available(&self, _source: &Arc<FrameSource>) {}

        fn on_device_error(&self, error: &DeviceError) {
            let _ = self.0.send(Event::Error(error.clone()));
        }
    }

    fn provider_camera(provider: SimulatedProvider) -> (ProviderCamera<SimulatedProvider>, Receiver<Event>) {
        let (tx, rx) = unbounded();
        let mut camera = ProviderCamera::new(provider, Config::default());
        camera.set_listener(Arc::new(ChannelListener(tx)));
        (camera, rx)
    }

    fn wait_prepared(rx: &Receiver<Event>) -> PreviewInfo {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Event::Prepared(info)) => return info,
                Ok(_) => continue,
                Err(e) => panic!("no prepared event: {}", e),
            }
        }
    }

    #[test]
    fn test_open_binds_asynchronously() {
        let provider = SimulatedProvider::default().with_fps(15);
        let (mut camera, rx) = provider_camera(provider.clone());
        camera.open().unwrap();
        assert!(camera.is_open());

        let info = wait_prepared(&rx);
        assert_eq!(info.preview_size, Size::new(1920, 1080));
        assert_eq!(info.orientation, 90);
        assert_eq!(info.input_size(), Size::new(1080, 1920));
        assert_eq!(camera.preview_size(), Some(Size::new(1920, 1080)));

        camera.close();
        assert!(!camera.is_open());
        assert_eq!(provider.bound_cameras(), 0);
    }

    #[test]
    fn test_late_bind_is_discarded() {
        let provider = SimulatedProvider::default().with_bind_delay(Duration::from_millis(150));
        let (mut camera, rx) = provider_camera(provider.clone());
        camera.open().unwrap();
        camera.close();

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(provider.bound_cameras(), 0);
        assert!(!camera.is_bound());
        assert!(rx.try_iter().all(|e| !matches!(e, Event::Prepared(_))));
    }

    #[test]
    fn test_bind_failure_reports_error() {
        let provider = SimulatedProvider::default();
        provider.set_fail_bind(true);
        let (mut camera, rx) = provider_camera(provider);
        camera.open().unwrap();

        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Event::Error(DeviceError::Driver(_))) => {}
            _ => panic!("expected a device error"),
        }
    }

    #[test]
    fn test_switch_rebinds() {
        let provider = SimulatedProvider::default().with_fps(15);
        let (mut camera, rx) = provider_camera(provider.clone());
        camera.open().unwrap();
        wait_prepared(&rx);

        camera.switch_camera().unwrap();
        let info = wait_prepared(&rx);
        assert_eq!(info.facing, Facing::Front);
        assert_eq!(camera.facing(), Facing::Front);
        assert_eq!(provider.bound_cameras(), 1);

        let back_only = SimulatedProvider::new(vec![SimulatedCameraModel::back()]);
        let (mut single, _) = provider_camera(back_only);
        single.switch_camera().unwrap();
        assert_eq!(single.facing(), Facing::Back);
    }

    #[test]
    fn test_zoom_and_torch() {
        let (mut camera, rx) = provider_camera(SimulatedProvider::default().with_fps(15));
        // Unbound: everything is a quiet no-op
        camera.zoom(3.0);
        camera.set_flash_light(true);
        assert_eq!(camera.zoom_ratio(), 1.0);

        camera.open().unwrap();
        wait_prepared(&rx);
        assert_eq!(camera.zoom_range(), (1.0, 4.0));

        camera.zoom(f32::NAN);
        assert_eq!(camera.zoom_ratio(), 1.0);
        camera.zoom(100.0);
        assert_eq!(camera.zoom_ratio(), 4.0);
        camera.zoom_in();
        assert_eq!(camera.zoom_ratio(), 4.0);
        camera.zoom(2.0);
        camera.zoom_out();
        assert!((camera.zoom_ratio() - 1.9).abs() < 1e-5);

        assert!(camera.support_torch());
        camera.set_flash_light(true);
        assert!(camera.torch_enabled());

        // Front camera has no flash
        camera.switch_camera().unwrap();
        wait_prepared(&rx);
        assert!(!camera.support_torch());
        camera.set_flash_light(true);
        assert!(!camera.torch_enabled());
    }
}

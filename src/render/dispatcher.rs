//! # Render Dispatcher
//!
//! Puts [`RenderEngine`] calls on a channel and runs them, in order, on
//! one dedicated thread.
//!
//! ## Plain English
//!
//! Callers never wait for the GPU. They drop a note in the queue and carry
//! on. The render thread reads notes one at a time:
//! - A note that fails gets logged, the next note still runs
//! - A note that panics gets logged too; the thread survives it
//! - "Render a frame" notes pile up when the camera is faster than the
//!   GPU, so only one is kept in the queue at a time
//!
//! Tearing down the surface is the one thing callers wait for, because the
//! platform reclaims the window as soon as they return.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::engine::{CallbackQueue, PictureCallback, PictureSlot, RenderCallback, RenderEngine};
use super::geometry::ScaleType;
use super::{RenderState, RenderStats};
use crate::capture::{FrameSource, Size};
use crate::error::{RenderError, RenderResult};
use crate::filter::Filter;
use crate::gpu::RenderTarget;

// ============================================
// COMMANDS
// ============================================

/// One queued engine call.
pub enum RenderCommand {
    CreateRenderer(RenderTarget),
    SetInputTexture { source: Arc<FrameSource>, size: Size },
    ClearInputTexture,
    UpdateRenderTargetInfo(Size),
    ClearRenderTarget,
    RenderFrame,
    ApplyFilter(Box<dyn Filter>),
    ClearFilter,
    SetScaleType(ScaleType),
    /// Destroy the renderer, then acknowledge if asked to
    DestroyRenderer(Option<Sender<()>>),
    /// Stop the thread (destroys the renderer first)
    Shutdown,
}

impl RenderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRenderer(_) => "create_renderer",
            Self::SetInputTexture { .. } => "set_input_texture",
            Self::ClearInputTexture => "clear_input_texture",
            Self::UpdateRenderTargetInfo(_) => "update_render_target_info",
            Self::ClearRenderTarget => "clear_render_target",
            Self::RenderFrame => "render_frame",
            Self::ApplyFilter(_) => "apply_filter",
            Self::ClearFilter => "clear_filter",
            Self::SetScaleType(_) => "set_scale_type",
            Self::DestroyRenderer(_) => "destroy_renderer",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================
// DISPATCHER
// ============================================

/// Fire-and-forget handle to the render thread. Cheap to clone.
#[derive(Clone)]
pub struct RenderDispatcher {
    sender: Sender<RenderCommand>,
    /// A render_frame is already waiting in the queue
    frame_queued: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    picture: PictureSlot,
    callbacks: CallbackQueue,
    stats: Arc<RenderStats>,
    state: Arc<Mutex<RenderState>>,
}

impl RenderDispatcher {
    fn send(&self, command: RenderCommand) -> bool {
        if !self.is_alive() {
            log::trace!("{} dropped: render thread gone", command.name());
            return false;
        }
        self.sender.send(command).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Engine state as of the last processed command.
    pub fn state(&self) -> RenderState {
        *self.state.lock()
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub fn create_renderer(&self, target: RenderTarget) {
        self.send(RenderCommand::CreateRenderer(target));
    }

    pub fn set_input_texture(&self, source: Arc<FrameSource>, size: Size) {
        self.send(RenderCommand::SetInputTexture { source, size });
    }

    pub fn clear_input_texture(&self) {
        self.send(RenderCommand::ClearInputTexture);
    }

    pub fn update_render_target_info(&self, size: Size) {
        self.send(RenderCommand::UpdateRenderTargetInfo(size));
    }

    pub fn clear_render_target(&self) {
        self.send(RenderCommand::ClearRenderTarget);
    }

    /// Queues a frame unless one is already queued.
    pub fn render_frame(&self) {
        if self.frame_queued.swap(true, Ordering::SeqCst) {
            self.stats.record_coalesced();
            return;
        }
        if !self.send(RenderCommand::RenderFrame) {
            self.frame_queued.store(false, Ordering::SeqCst);
        }
    }

    pub fn apply_filter(&self, filter: Box<dyn Filter>) {
        self.send(RenderCommand::ApplyFilter(filter));
    }

    pub fn clear_filter(&self) {
        self.send(RenderCommand::ClearFilter);
    }

    pub fn set_scale_type(&self, scale_type: ScaleType) {
        self.send(RenderCommand::SetScaleType(scale_type));
    }

    /// Requests a still from the next rendered frame.
    pub fn take_picture(&self, callback: PictureCallback) -> RenderResult<()> {
        if !self.is_alive() {
            return Err(RenderError::ThreadGone);
        }
        if self.picture.request(callback) {
            log::warn!("take_picture: replaced an earlier request");
        }
        Ok(())
    }

    /// Runs `callback` on the render thread before the next frame's draws.
    pub fn post_on_render(&self, callback: RenderCallback) {
        self.callbacks.push(callback);
    }

    pub fn destroy_renderer(&self) {
        self.send(RenderCommand::DestroyRenderer(None));
    }

    /// Destroys the renderer and waits for the render thread to confirm.
    ///
    /// Returns false if the thread is gone or did not answer in time.
    pub fn destroy_renderer_sync(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = channel::bounded(1);
        if !self.send(RenderCommand::DestroyRenderer(Some(ack_tx))) {
            return false;
        }
        match ack_rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("destroy_renderer_sync: {}", e);
                false
            }
        }
    }
}

impl fmt::Debug for RenderDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderDispatcher")
            .field("alive", &self.is_alive())
            .field("queued", &self.sender.len())
            .finish()
    }
}

// ============================================
// RENDER THREAD
// ============================================

/// The render thread and its engine.
pub struct RenderThread {
    dispatcher: RenderDispatcher,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Moves `engine` onto a new thread named `billie-render`.
    pub fn spawn(engine: RenderEngine) -> RenderResult<Self> {
        let (sender, receiver) = channel::unbounded();
        let dispatcher = RenderDispatcher {
            sender,
            frame_queued: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(true)),
            picture: engine.picture_slot(),
            callbacks: engine.callback_queue(),
            stats: engine.stats(),
            state: Arc::new(Mutex::new(engine.state())),
        };

        let worker = RenderWorker {
            engine,
            receiver,
            frame_queued: Arc::clone(&dispatcher.frame_queued),
            alive: Arc::clone(&dispatcher.alive),
            state: Arc::clone(&dispatcher.state),
        };
        let handle = thread::Builder::new()
            .name("billie-render".into())
            .spawn(move || worker.run())
            .map_err(|e| RenderError::ContextCreation(format!("render thread: {}", e)))?;

        log::info!("Render thread started");
        Ok(Self {
            dispatcher,
            handle: Some(handle),
        })
    }

    pub fn dispatcher(&self) -> RenderDispatcher {
        self.dispatcher.clone()
    }

    /// Destroys the renderer and joins the thread.
    pub fn quit(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Bypass the alive check: the thread may still be draining
        let _ = self.dispatcher.sender.send(RenderCommand::Shutdown);
        if handle.join().is_err() {
            log::error!("Render thread panicked on shutdown");
        }
        log::info!("Render thread stopped");
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.quit();
    }
}

struct RenderWorker {
    engine: RenderEngine,
    receiver: Receiver<RenderCommand>,
    frame_queued: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    state: Arc<Mutex<RenderState>>,
}

impl RenderWorker {
    fn run(mut self) {
        while let Ok(command) = self.receiver.recv() {
            if matches!(command, RenderCommand::Shutdown) {
                break;
            }

            let name = command.name();
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle(command)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("{} failed: {}", name, e),
                Err(payload) => log::error!("{} panicked: {}", name, panic_message(&*payload)),
            }
            *self.state.lock() = self.engine.state();
            log::trace!("{} took {:?}", name, started.elapsed());
        }

        self.alive.store(false, Ordering::SeqCst);
        self.engine.destroy_renderer();
        *self.state.lock() = self.engine.state();
    }

    fn handle(&mut self, command: RenderCommand) -> RenderResult<()> {
        let engine = &mut self.engine;
        match command {
            RenderCommand::CreateRenderer(target) => engine.create_renderer(target),
            RenderCommand::SetInputTexture { source, size } => engine.set_input_texture(source, size),
            RenderCommand::ClearInputTexture => {
                engine.clear_input_texture();
                Ok(())
            }
            RenderCommand::UpdateRenderTargetInfo(size) => engine.update_render_target_info(size),
            RenderCommand::ClearRenderTarget => {
                engine.clear_render_target();
                Ok(())
            }
            RenderCommand::RenderFrame => {
                // Cleared first so frames arriving mid-draw queue another
                self.frame_queued.store(false, Ordering::SeqCst);
                engine.render_frame().map(|_| ())
            }
            RenderCommand::ApplyFilter(filter) => {
                engine.apply_filter(filter);
                Ok(())
            }
            RenderCommand::ClearFilter => {
                engine.clear_filter();
                Ok(())
            }
            RenderCommand::SetScaleType(scale_type) => engine.set_scale_type(scale_type),
            RenderCommand::DestroyRenderer(ack) => {
                engine.destroy_renderer();
                *self.state.lock() = engine.state();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                Ok(())
            }
            RenderCommand::Shutdown => Ok(()),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::negotiate::IDENTITY_MATRIX;
    use crate::capture::CameraFrame;
    use crate::gpu::{HeadlessSurface, SoftwareContextFactory};
    use image::{Rgba, RgbaImage};

    fn spawn() -> (RenderThread, RenderDispatcher, Arc<HeadlessSurface>) {
        let engine = RenderEngine::new(Box::new(SoftwareContextFactory::new()));
        let thread = RenderThread::spawn(engine).unwrap();
        let dispatcher = thread.dispatcher();
        let surface = Arc::new(HeadlessSurface::new());
        dispatcher.create_renderer(RenderTarget::ViewSurface(surface.clone()));
        dispatcher.update_render_target_info(Size::new(4, 4));
        (thread, dispatcher, surface)
    }

    fn source() -> Arc<FrameSource> {
        let source = FrameSource::new(IDENTITY_MATRIX);
        source.push(CameraFrame::new(RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]))));
        source
    }

    #[test]
    fn test_commands_run_in_order() {
        let (_thread, dispatcher, surface) = spawn();
        dispatcher.set_input_texture(source(), Size::new(4, 4));
        dispatcher.render_frame();
        assert!(dispatcher.destroy_renderer_sync(Duration::from_secs(5)));

        assert_eq!(surface.presented_frames(), 1);
        assert_eq!(dispatcher.state(), RenderState::Destroyed);
    }

    #[test]
    fn test_render_frames_coalesce() {
        let (_thread, dispatcher, _surface) = spawn();
        // Hold the thread so requests pile up
        let (release_tx, release_rx) = channel::bounded::<()>(1);
        dispatcher.set_input_texture(source(), Size::new(4, 4));
        dispatcher.post_on_render(Box::new(move |_| {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }));
        dispatcher.render_frame();
        for _ in 0..10 {
            dispatcher.render_frame();
        }
        let _ = release_tx.send(());
        assert!(dispatcher.destroy_renderer_sync(Duration::from_secs(5)));

        let stats = dispatcher.stats().snapshot();
        assert!(stats.frames_coalesced >= 1);
        assert!(stats.frames_rendered <= 2);
    }

    #[test]
    fn test_thread_survives_panicking_callback() {
        let (_thread, dispatcher, surface) = spawn();
        let source = source();
        dispatcher.set_input_texture(source.clone(), Size::new(4, 4));
        let (reached_tx, reached_rx) = channel::bounded(1);
        dispatcher.post_on_render(Box::new(move |_| {
            let _ = reached_tx.send(());
            panic!("bad frame");
        }));
        dispatcher.render_frame();
        reached_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        source.push(CameraFrame::new(RgbaImage::from_pixel(4, 4, Rgba([1, 1, 1, 255]))));
        dispatcher.render_frame();
        assert!(dispatcher.destroy_renderer_sync(Duration::from_secs(5)));

        assert!(dispatcher.is_alive());
        assert_eq!(surface.presented_frames(), 1);
    }

    #[test]
    fn test_quit_stops_thread() {
        let (mut thread, dispatcher, _surface) = spawn();
        thread.quit();
        assert!(!dispatcher.is_alive());
        assert!(!dispatcher.destroy_renderer_sync(Duration::from_millis(100)));
        assert!(matches!(
            dispatcher.take_picture(Box::new(|_| {})),
            Err(RenderError::ThreadGone)
        ));
    }
}

//! # Render Engine
//!
//! Owns the GPU context, the presentation surface and the filter chain,
//! and turns one camera frame into one presented frame.
//!
//! ## Plain English
//!
//! Per frame:
//! 1. Copy the newest camera image onto the camera texture
//! 2. Run anything queued for "the next frame" (like a new effect)
//! 3. Camera texture → upright texture → effect → screen
//! 4. If someone asked for a photo, read the final texture back
//!
//! Step 4 happens after the screen has been updated, so taking a photo
//! never delays the preview.

use std::collections::VecDeque;
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;

use super::geometry::{PipelineGeometry, ScaleType};
use super::RenderStats;
use crate::capture::{FrameSource, Size};
use crate::error::{RenderError, RenderResult};
use crate::filter::{ExternalFilter, Filter, PassThroughFilter, ReadbackFilter};
use crate::gpu::{
    ContextFactory, DrawTarget, GpuBackend, RenderTarget, ResourceCounts, SurfaceId, TextureId,
    TextureKind,
};

/// Receives a captured still, on the render thread.
pub type PictureCallback = Box<dyn FnOnce(RgbaImage) + Send>;

/// Work to run on the render thread before the next frame's draws.
pub type RenderCallback = Box<dyn FnOnce(&mut RenderEngine) + Send>;

/// Engine lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    /// No context yet
    Uninitialized,
    /// Context and surface, but no input or no target size
    Ready,
    /// Input and target both known; frames can be drawn
    Bound,
    /// Torn down; `create_renderer` starts over
    Destroyed,
}

// ============================================
// SHARED SLOTS
// ============================================

/// One-shot "take a picture" request. Checked and cleared under the lock,
/// never held while drawing.
#[derive(Clone, Default)]
pub(crate) struct PictureSlot(Arc<Mutex<Option<PictureCallback>>>);

impl PictureSlot {
    /// Returns true if an earlier request was replaced.
    pub fn request(&self, callback: PictureCallback) -> bool {
        self.0.lock().replace(callback).is_some()
    }

    fn take(&self) -> Option<PictureCallback> {
        self.0.lock().take()
    }

    /// Puts a request back unless a newer one arrived meanwhile.
    fn restore(&self, callback: PictureCallback) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

/// FIFO of one-shot render callbacks.
#[derive(Clone, Default)]
pub(crate) struct CallbackQueue(Arc<Mutex<VecDeque<RenderCallback>>>);

impl CallbackQueue {
    pub fn push(&self, callback: RenderCallback) {
        self.0.lock().push_back(callback);
    }

    fn drain(&self) -> Vec<RenderCallback> {
        self.0.lock().drain(..).collect()
    }
}

// ============================================
// RENDER ENGINE
// ============================================

/// Camera-to-screen renderer. Lives on the render thread.
pub struct RenderEngine {
    factory: Box<dyn ContextFactory>,
    gpu: Option<Box<dyn GpuBackend>>,
    surface: Option<SurfaceId>,
    destroyed: bool,

    external: ExternalFilter,
    effect: Option<Box<dyn Filter>>,
    display: PassThroughFilter,
    readback: ReadbackFilter,

    input: Option<Arc<FrameSource>>,
    input_texture: Option<TextureId>,
    /// The texture belongs to a previous source
    input_stale: bool,
    /// At least one camera image reached the texture
    input_has_frame: bool,
    input_size: Size,
    display_size: Size,
    scale_type: ScaleType,
    geometry: Option<PipelineGeometry>,

    callbacks: CallbackQueue,
    picture: PictureSlot,
    stats: Arc<RenderStats>,
}

impl RenderEngine {
    pub fn new(factory: Box<dyn ContextFactory>) -> Self {
        Self {
            factory,
            gpu: None,
            surface: None,
            destroyed: false,
            external: ExternalFilter::new(),
            effect: None,
            display: PassThroughFilter::new("display"),
            readback: ReadbackFilter::new(),
            input: None,
            input_texture: None,
            input_stale: false,
            input_has_frame: false,
            input_size: Size::default(),
            display_size: Size::default(),
            scale_type: ScaleType::default(),
            geometry: None,
            callbacks: CallbackQueue::default(),
            picture: PictureSlot::default(),
            stats: Arc::new(RenderStats::default()),
        }
    }

    pub fn state(&self) -> RenderState {
        match (&self.gpu, self.destroyed) {
            (None, true) => RenderState::Destroyed,
            (None, false) => RenderState::Uninitialized,
            (Some(_), _) if self.input.is_some() && self.geometry.is_some() => RenderState::Bound,
            (Some(_), _) => RenderState::Ready,
        }
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub fn scale_type(&self) -> ScaleType {
        self.scale_type
    }

    pub fn geometry(&self) -> Option<PipelineGeometry> {
        self.geometry
    }

    pub fn input_size(&self) -> Size {
        self.input_size
    }

    pub fn display_size(&self) -> Size {
        self.display_size
    }

    pub fn has_effect(&self) -> bool {
        self.effect.is_some()
    }

    /// Live GPU objects, `None` without a context.
    pub fn resource_counts(&self) -> Option<ResourceCounts> {
        self.gpu.as_ref().map(|gpu| gpu.resource_counts())
    }

    pub(crate) fn picture_slot(&self) -> PictureSlot {
        self.picture.clone()
    }

    pub(crate) fn callback_queue(&self) -> CallbackQueue {
        self.callbacks.clone()
    }

    // ----------------------------------------
    // CONTEXT & SURFACE
    // ----------------------------------------

    /// Creates the context and a surface for `target`, replacing any
    /// previous renderer.
    pub fn create_renderer(&mut self, target: RenderTarget) -> RenderResult<()> {
        if self.gpu.is_some() {
            log::debug!("Recreating renderer");
            self.destroy_renderer();
        }

        let mut gpu = self.factory.create_context()?;
        let surface = match gpu.create_window_surface(&target) {
            Ok(surface) => surface,
            Err(e) => {
                gpu.release();
                return Err(e);
            }
        };
        self.gpu = Some(gpu);
        self.surface = Some(surface);
        self.destroyed = false;

        if let Err(e) = self.initialize_stages().and_then(|()| self.on_size_changed()) {
            log::error!("Renderer setup failed: {}", e);
            self.destroy_renderer();
            self.destroyed = false;
            return Err(e);
        }

        log::info!("Renderer created for {:?}", target);
        Ok(())
    }

    fn initialize_stages(&mut self) -> RenderResult<()> {
        let gpu = self
            .gpu
            .as_deref_mut()
            .ok_or_else(|| RenderError::ContextCreation("no context".into()))?;

        self.external.initialize_program(gpu)?;
        if let Some(effect) = self.effect.as_mut() {
            effect.initialize_program(gpu)?;
        }
        self.display.initialize_program(gpu)?;
        self.readback.initialize_program(gpu)?;
        Ok(())
    }

    /// Releases everything, dependents before the context. Safe to call
    /// in any state.
    pub fn destroy_renderer(&mut self) {
        // 1. Geometry and the camera texture
        self.geometry = None;
        if let Some(source) = &self.input {
            source.detach();
        }
        let texture = self.input_texture.take();
        self.input_stale = false;
        self.input_has_frame = false;

        if let Some(mut gpu) = self.gpu.take() {
            if let Some(texture) = texture {
                gpu.delete_texture(texture);
            }

            // 2. Filter stages; the user effect is rebuilt by the next context
            self.external.release(gpu.as_mut());
            if let Some(effect) = self.effect.as_mut() {
                effect.release(gpu.as_mut());
            }
            self.display.release(gpu.as_mut());
            self.readback.release(gpu.as_mut());

            // 3. Surface, 4. context
            if let Some(surface) = self.surface.take() {
                gpu.destroy_surface(surface);
            }
            gpu.release();
            log::info!("Renderer destroyed");
        }

        self.surface = None;
        if self.picture.take().is_some() {
            log::debug!("Pending picture dropped with the renderer");
        }
        self.destroyed = true;
    }

    // ----------------------------------------
    // INPUT & TARGET
    // ----------------------------------------

    /// Binds the camera source. A new source gets a new texture on the
    /// next frame.
    pub fn set_input_texture(&mut self, source: Arc<FrameSource>, size: Size) -> RenderResult<()> {
        let same = self
            .input
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &source));
        if !same {
            if let Some(old) = self.input.take() {
                old.detach();
            }
            self.input_stale = true;
            log::debug!("Input source #{} ({})", source.id(), size);
            self.input = Some(source);
        }
        self.input_size = size;
        self.on_size_changed()
    }

    pub fn clear_input_texture(&mut self) {
        if let Some(old) = self.input.take() {
            old.detach();
            self.input_stale = true;
        }
        self.input_size = Size::default();
        self.geometry = None;
    }

    pub fn update_render_target_info(&mut self, size: Size) -> RenderResult<()> {
        self.display_size = size;
        if let (Some(gpu), Some(surface)) = (self.gpu.as_deref_mut(), self.surface) {
            gpu.resize_surface(surface, size);
        }
        self.on_size_changed()
    }

    pub fn clear_render_target(&mut self) {
        self.display_size = Size::default();
        self.geometry = None;
    }

    pub fn set_scale_type(&mut self, scale_type: ScaleType) -> RenderResult<()> {
        self.scale_type = scale_type;
        self.on_size_changed()
    }

    /// Recomputes geometry and offscreen targets once both sizes are known.
    fn on_size_changed(&mut self) -> RenderResult<()> {
        self.geometry = PipelineGeometry::compute(self.input_size, self.display_size, self.scale_type);
        if self.geometry.is_none() {
            return Ok(());
        }
        let (input, display) = (self.input_size, self.display_size);

        let mut stages: Vec<&mut dyn Filter> = vec![&mut self.external, &mut self.display];
        if let Some(effect) = self.effect.as_mut() {
            stages.push(&mut **effect);
        }
        for filter in stages {
            filter.stage_mut().set_input_size(input);
            filter.stage_mut().set_display_size(display);
        }

        if let Some(gpu) = self.gpu.as_deref_mut() {
            self.external.stage_mut().create_frame_buffer_if_needed(gpu, input)?;
            if let Some(effect) = self.effect.as_mut() {
                effect.stage_mut().create_frame_buffer_if_needed(gpu, input)?;
            }
            self.readback.set_image_size(gpu, input)?;
        }
        Ok(())
    }

    /// Creates the external texture for the current source if needed.
    fn ensure_input_texture(&mut self) -> RenderResult<TextureId> {
        let gpu = self
            .gpu
            .as_deref_mut()
            .ok_or_else(|| RenderError::ContextCreation("no context".into()))?;

        if self.input_stale {
            if let Some(old) = self.input_texture.take() {
                gpu.delete_texture(old);
            }
            self.input_stale = false;
            self.input_has_frame = false;
        }
        if let Some(texture) = self.input_texture {
            return Ok(texture);
        }

        let texture = gpu.create_texture(TextureKind::External, self.input_size)?;
        if let Some(source) = &self.input {
            source.attach_to_texture(texture);
        }
        self.input_texture = Some(texture);
        Ok(texture)
    }

    // ----------------------------------------
    // FRAMES
    // ----------------------------------------

    /// Draws and presents one frame. Returns whether a frame was presented.
    pub fn render_frame(&mut self) -> RenderResult<bool> {
        if self.gpu.is_none() || self.surface.is_none() || self.input.is_none() {
            log::debug!("render_frame: renderer or input not set up");
            return Ok(false);
        }
        let texture = self.ensure_input_texture()?;
        let Some(geometry) = self.geometry else {
            log::debug!("render_frame: render target size unknown");
            return Ok(false);
        };
        let (Some(gpu), Some(source)) = (self.gpu.as_deref_mut(), self.input.clone()) else {
            return Ok(false);
        };

        match source.update_tex_image(gpu) {
            Ok(true) => self.input_has_frame = true,
            Ok(false) => {}
            Err(e) => {
                self.stats.record_dropped();
                return Err(e);
            }
        }
        if !self.input_has_frame {
            log::trace!("render_frame: no camera image yet");
            return Ok(false);
        }
        self.external.set_transform_matrix(source.transform_matrix());

        for callback in self.callbacks.drain() {
            callback(self);
        }

        // Callbacks may have torn things down
        let (Some(gpu), Some(surface)) = (self.gpu.as_deref_mut(), self.surface) else {
            return Ok(false);
        };

        let mut current = self.external.draw_frame_buffer(gpu, texture, &geometry.offscreen)?;
        if let Some(effect) = self.effect.as_mut() {
            current = effect.draw_frame_buffer(gpu, current, &geometry.offscreen)?;
        }
        self.display
            .draw_frame(gpu, current, DrawTarget::Surface(surface), &geometry.display_quad)?;
        gpu.swap_buffers(surface)?;
        self.stats.record_rendered();

        if let Some(callback) = self.picture.take() {
            match self.readback.capture(gpu, current, &geometry.offscreen) {
                Ok(Some(image)) => {
                    self.stats.record_picture();
                    log::info!("Picture captured: {}x{}", image.width(), image.height());
                    callback(image);
                }
                Ok(None) => {
                    log::warn!("Readback not ready, retrying next frame");
                    self.picture.restore(callback);
                }
                Err(e) => {
                    self.picture.restore(callback);
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    // ----------------------------------------
    // EFFECTS & CALLBACKS
    // ----------------------------------------

    /// Swaps in a user effect at the start of the next frame.
    pub fn apply_filter(&mut self, filter: Box<dyn Filter>) {
        self.post_on_render(Box::new(move |engine| engine.install_effect(Some(filter))));
    }

    /// Removes the user effect at the start of the next frame.
    pub fn clear_filter(&mut self) {
        self.post_on_render(Box::new(|engine| engine.install_effect(None)));
    }

    fn install_effect(&mut self, filter: Option<Box<dyn Filter>>) {
        let Some(gpu) = self.gpu.as_deref_mut() else {
            // Initialized with the next context
            self.effect = filter;
            return;
        };
        if let Some(mut old) = self.effect.take() {
            old.release(gpu);
        }
        let Some(mut filter) = filter else {
            log::info!("Effect cleared");
            return;
        };

        filter.stage_mut().set_input_size(self.input_size);
        filter.stage_mut().set_display_size(self.display_size);
        let result = filter.initialize_program(gpu);
        let result = result.and_then(|()| {
            filter
                .stage_mut()
                .create_frame_buffer_if_needed(gpu, self.input_size)
        });
        match result {
            Ok(()) => {
                log::info!("Effect '{}' applied", filter.stage().name());
                self.effect = Some(filter);
            }
            Err(e) => {
                log::warn!("Effect '{}' failed: {}", filter.stage().name(), e);
                filter.release(gpu);
            }
        }
    }

    /// Requests a still from the next rendered frame.
    pub fn take_picture(&mut self, callback: PictureCallback) {
        if self.picture.request(callback) {
            log::warn!("take_picture: replaced an earlier request");
        }
    }

    pub fn post_on_render(&mut self, callback: RenderCallback) {
        self.callbacks.push(callback);
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        if self.gpu.is_some() {
            self.destroy_renderer();
        }
    }
}

// ============================================
// TESTS
// ============================================

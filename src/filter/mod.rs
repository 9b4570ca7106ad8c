//! # Filter Module
//!
//! One shader pass per stage, chained texture to texture.
//!
//! ## Plain English Explanation
//!
//! Every camera frame goes through a short assembly line:
//!
//! ```text
//! camera texture ──► [ExternalFilter] ──► [effect] ──► [display] ──► screen
//!                      (fix rotation)    (optional)                     │
//!                                                                       ▼
//!                                                           [ReadbackFilter]
//!                                                           (photo, if asked)
//! ```
//!
//! Each station is a [`FilterStage`]: a shader program plus, when it
//! feeds another stage, an offscreen framebuffer to draw into.
//!
//! Settings like "make it redder" can come from any thread. They are not
//! applied right away; they wait in the stage's queue and are applied on
//! the render thread just before the next draw.

pub mod color;
pub mod external;
pub mod readback;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

pub use color::{ColorControls, ColorFilter};
pub use external::ExternalFilter;
pub use readback::ReadbackFilter;

use crate::capture::Size;
use crate::error::RenderResult;
use crate::gpu::{
    DrawCall, DrawTarget, FramebufferId, GpuBackend, PixelKernel, ProgramId, Quad, ShaderSpec,
    TextureId, TextureKind, UniformValue,
};

// ============================================
// SHADERS
// ============================================

/// Pass-through vertex shader.
pub const VERTEX_SHADER: &str = r#"
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 textureCoordinate;
void main() {
    gl_Position = aPosition;
    textureCoordinate = aTextureCoord.xy;
}
"#;

/// Pass-through fragment shader.
pub const FRAGMENT_SHADER: &str = r#"
precision mediump float;
varying vec2 textureCoordinate;
uniform sampler2D inputTexture;
void main() {
    gl_FragColor = texture2D(inputTexture, textureCoordinate);
}
"#;

/// The shader [`PassThroughFilter::new`] uses.
pub fn pass_through_shader(name: &'static str) -> ShaderSpec {
    ShaderSpec::new(name, VERTEX_SHADER, FRAGMENT_SHADER, PixelKernel::Sample)
}

// ============================================
// PENDING GPU OPERATIONS
// ============================================

/// Work queued from another thread, run on the render thread with the
/// stage's program bound.
pub type PendingOp = Box<dyn FnOnce(&mut dyn GpuBackend, ProgramId) + Send>;

/// Cloneable handle for changing a stage from any thread.
///
/// Operations are drained in order, all of them, right before the
/// stage's next draw. Two updates to the same uniform: the later wins.
#[derive(Clone, Default)]
pub struct StageParams {
    queue: Arc<Mutex<VecDeque<PendingOp>>>,
}

impl StageParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_on_draw(&self, op: PendingOp) {
        self.queue.lock().push_back(op);
    }

    pub fn set_uniform(&self, name: &str, value: UniformValue) {
        let name = name.to_string();
        self.run_on_draw(Box::new(move |gpu, program| {
            gpu.set_uniform(program, &name, value)
        }));
    }

    pub fn set_float(&self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    pub fn set_matrix(&self, name: &str, value: [f32; 16]) {
        self.set_uniform(name, UniformValue::Mat4(value));
    }

    /// Operations waiting for the next draw.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs everything queued so far.
    fn drain(&self, gpu: &mut dyn GpuBackend, program: ProgramId) {
        // Take the batch first; ops may queue more without deadlocking
        let batch: Vec<PendingOp> = self.queue.lock().drain(..).collect();
        for op in batch {
            op(gpu, program);
        }
    }
}

impl fmt::Debug for StageParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageParams({} pending)", self.pending())
    }
}

// ============================================
// FILTER STAGE
// ============================================

/// Lifecycle of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    /// Constructed, no program yet
    Created,
    /// Program compiled; draws are allowed
    Ready,
    /// Resources freed; draws are no-ops
    Released,
}

#[derive(Clone, Copy, Debug)]
struct Offscreen {
    texture: TextureId,
    framebuffer: FramebufferId,
    size: Size,
}

/// Program, sizes, offscreen target and parameter queue for one pass.
pub struct FilterStage {
    shader: ShaderSpec,
    texture_kind: TextureKind,
    program: Option<ProgramId>,
    state: StageState,
    enabled: bool,
    input_size: Size,
    display_size: Size,
    offscreen: Option<Offscreen>,
    params: StageParams,
}

impl FilterStage {
    pub fn new(shader: ShaderSpec) -> Self {
        Self {
            shader,
            texture_kind: TextureKind::Texture2D,
            program: None,
            state: StageState::Created,
            enabled: true,
            input_size: Size::default(),
            display_size: Size::default(),
            offscreen: None,
            params: StageParams::new(),
        }
    }

    /// A stage that samples an external (camera) texture.
    pub fn external(shader: ShaderSpec) -> Self {
        Self {
            texture_kind: TextureKind::External,
            ..Self::new(shader)
        }
    }

    pub fn name(&self) -> &str {
        &self.shader.name
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Kind of texture this stage reads.
    pub fn texture_kind(&self) -> TextureKind {
        self.texture_kind
    }

    pub fn params(&self) -> StageParams {
        self.params.clone()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_input_size(&mut self, size: Size) {
        self.input_size = size;
    }

    pub fn input_size(&self) -> Size {
        self.input_size
    }

    pub fn set_display_size(&mut self, size: Size) {
        self.display_size = size;
    }

    pub fn display_size(&self) -> Size {
        self.display_size
    }

    /// Size of the offscreen target, if one is allocated.
    pub fn frame_buffer_size(&self) -> Option<Size> {
        self.offscreen.map(|o| o.size)
    }

    /// Compiles the program, replacing any previous one.
    pub fn initialize_program(&mut self, gpu: &mut dyn GpuBackend) -> RenderResult<()> {
        if let Some(old) = self.program.take() {
            gpu.delete_program(old);
        }
        let program = gpu.create_program(&self.shader)?;
        self.program = Some(program);
        self.state = StageState::Ready;
        log::debug!("Stage '{}' initialized", self.name());
        Ok(())
    }

    /// Allocates the offscreen target unless one of this size exists.
    pub fn create_frame_buffer_if_needed(
        &mut self,
        gpu: &mut dyn GpuBackend,
        size: Size,
    ) -> RenderResult<()> {
        if self.offscreen.map(|o| o.size) == Some(size) {
            return Ok(());
        }
        self.destroy_frame_buffer(gpu);
        if size.is_empty() {
            return Ok(());
        }

        let texture = gpu.create_texture(TextureKind::Texture2D, size)?;
        let framebuffer = match gpu.create_framebuffer(texture) {
            Ok(fb) => fb,
            Err(e) => {
                gpu.delete_texture(texture);
                return Err(e);
            }
        };
        self.offscreen = Some(Offscreen {
            texture,
            framebuffer,
            size,
        });
        log::trace!("Stage '{}' framebuffer {}", self.name(), size);
        Ok(())
    }

    fn destroy_frame_buffer(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some(offscreen) = self.offscreen.take() {
            gpu.delete_framebuffer(offscreen.framebuffer);
            gpu.delete_texture(offscreen.texture);
        }
    }

    /// Program to draw with, or `None` when draws must be skipped.
    fn drawable_program(&self) -> Option<ProgramId> {
        match (self.state, self.program) {
            (StageState::Ready, Some(program)) if self.enabled => Some(program),
            _ => {
                log::trace!(
                    "Stage '{}' skipped draw ({:?}, enabled={})",
                    self.name(),
                    self.state,
                    self.enabled
                );
                None
            }
        }
    }

    /// Frees the program and offscreen target. Safe to repeat.
    pub fn release(&mut self, gpu: &mut dyn GpuBackend) {
        if let Some(program) = self.program.take() {
            gpu.delete_program(program);
        }
        self.destroy_frame_buffer(gpu);
        self.state = StageState::Released;
    }
}

impl fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterStage")
            .field("name", &self.name())
            .field("state", &self.state)
            .field("input", &self.input_size)
            .field("display", &self.display_size)
            .finish()
    }
}

// ============================================
// FILTER TRAIT
// ============================================

/// A shader pass in the render chain.
///
/// Implementors provide the stage; the draw logic is shared. Override
/// [`on_draw_begin`](Filter::on_draw_begin) to set per-draw uniforms.
pub trait Filter: Send {
    fn stage(&self) -> &FilterStage;

    fn stage_mut(&mut self) -> &mut FilterStage;

    /// Runs after the queued parameters, right before the draw.
    fn on_draw_begin(&mut self, _gpu: &mut dyn GpuBackend, _program: ProgramId) {}

    fn initialize_program(&mut self, gpu: &mut dyn GpuBackend) -> RenderResult<()> {
        self.stage_mut().initialize_program(gpu)
    }

    /// Draws `input` into `target` at the display size, clearing first.
    ///
    /// Returns false when the stage skipped the draw.
    fn draw_frame(
        &mut self,
        gpu: &mut dyn GpuBackend,
        input: TextureId,
        target: DrawTarget,
        quad: &Quad,
    ) -> RenderResult<bool> {
        let Some(program) = self.stage().drawable_program() else {
            return Ok(false);
        };
        self.stage().params.drain(gpu, program);
        self.on_draw_begin(gpu, program);

        gpu.draw(&DrawCall {
            program,
            input,
            target,
            viewport: self.stage().display_size,
            quad: *quad,
            clear: true,
        })?;
        Ok(true)
    }

    /// Draws `input` into the stage's offscreen target and returns it.
    ///
    /// Without a program or a framebuffer, or when disabled, `input`
    /// comes back unchanged.
    fn draw_frame_buffer(
        &mut self,
        gpu: &mut dyn GpuBackend,
        input: TextureId,
        quad: &Quad,
    ) -> RenderResult<TextureId> {
        let Some(offscreen) = self.stage().offscreen else {
            return Ok(input);
        };
        let Some(program) = self.stage().drawable_program() else {
            return Ok(input);
        };
        self.stage().params.drain(gpu, program);
        self.on_draw_begin(gpu, program);

        gpu.draw(&DrawCall {
            program,
            input,
            target: DrawTarget::Framebuffer(offscreen.framebuffer),
            viewport: offscreen.size,
            quad: *quad,
            clear: false,
        })?;
        Ok(offscreen.texture)
    }

    fn release(&mut self, gpu: &mut dyn GpuBackend) {
        self.stage_mut().release(gpu);
    }
}

// ============================================
// PASS-THROUGH FILTER
// ============================================

/// Copies its input. Used for display composition and as the base for
/// custom shaders.
#[derive(Debug)]
pub struct PassThroughFilter {
    stage: FilterStage,
}

impl PassThroughFilter {
    pub fn new(name: &'static str) -> Self {
        Self::with_shader(pass_through_shader(name))
    }

    /// Any single-pass effect: GLSL for real GPUs, a kernel for the CPU.
    pub fn with_shader(shader: ShaderSpec) -> Self {
        Self {
            stage: FilterStage::new(shader),
        }
    }
}

impl Filter for PassThroughFilter {
    fn stage(&self) -> &FilterStage {
        &self.stage
    }

    fn stage_mut(&mut self) -> &mut FilterStage {
        &mut self.stage
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareGpu;
    use image::{Rgba, RgbaImage};

    fn input(gpu: &mut SoftwareGpu, color: [u8; 4]) -> TextureId {
        let texture = gpu.create_texture(TextureKind::Texture2D, Size::new(4, 4)).unwrap();
        gpu.upload_texture(texture, &RgbaImage::from_pixel(4, 4, Rgba(color)))
            .unwrap();
        texture
    }

    #[test]
    fn test_draw_before_init_is_noop() {
        let mut gpu = SoftwareGpu::new();
        let texture = input(&mut gpu, [1, 2, 3, 255]);
        let mut filter = PassThroughFilter::new("display");
        filter.stage_mut().create_frame_buffer_if_needed(&mut gpu, Size::new(4, 4)).unwrap();

        assert_eq!(filter.draw_frame_buffer(&mut gpu, texture, &Quad::FULL).unwrap(), texture);
        assert_eq!(filter.stage().state(), StageState::Created);
    }

    #[test]
    fn test_draw_after_release_is_noop() {
        let mut gpu = SoftwareGpu::new();
        let texture = input(&mut gpu, [1, 2, 3, 255]);
        let mut filter = PassThroughFilter::new("display");
        filter.initialize_program(&mut gpu).unwrap();
        filter.stage_mut().set_display_size(Size::new(4, 4));
        filter.release(&mut gpu);

        let (_, fb) = {
            let t = gpu.create_texture(TextureKind::Texture2D, Size::new(4, 4)).unwrap();
            (t, gpu.create_framebuffer(t).unwrap())
        };
        assert!(!filter
            .draw_frame(&mut gpu, texture, DrawTarget::Framebuffer(fb), &Quad::FULL)
            .unwrap());
        assert_eq!(gpu.resource_counts().programs, 0);
    }

    #[test]
    fn test_offscreen_chain() {
        let mut gpu = SoftwareGpu::new();
        let texture = input(&mut gpu, [200, 100, 50, 255]);
        let mut filter = PassThroughFilter::new("copy");
        filter.initialize_program(&mut gpu).unwrap();
        filter.stage_mut().create_frame_buffer_if_needed(&mut gpu, Size::new(2, 2)).unwrap();

        let out = filter.draw_frame_buffer(&mut gpu, texture, &Quad::FULL).unwrap();
        assert_ne!(out, texture);
        let fb = filter.stage().offscreen.unwrap().framebuffer;
        let pixels = gpu.read_pixels(DrawTarget::Framebuffer(fb)).unwrap();
        assert_eq!(pixels.get_pixel(1, 1), &Rgba([200, 100, 50, 255]));

        filter.stage_mut().set_enabled(false);
        assert_eq!(filter.draw_frame_buffer(&mut gpu, texture, &Quad::FULL).unwrap(), texture);
    }

    #[test]
    fn test_framebuffer_reallocated_only_on_resize() {
        let mut gpu = SoftwareGpu::new();
        let mut stage = FilterStage::new(pass_through_shader("fb"));
        stage.create_frame_buffer_if_needed(&mut gpu, Size::new(8, 8)).unwrap();
        let first = stage.offscreen.unwrap().framebuffer;

        stage.create_frame_buffer_if_needed(&mut gpu, Size::new(8, 8)).unwrap();
        assert_eq!(stage.offscreen.unwrap().framebuffer, first);
        assert_eq!(gpu.resource_counts().textures, 1);

        stage.create_frame_buffer_if_needed(&mut gpu, Size::new(4, 8)).unwrap();
        assert_ne!(stage.offscreen.unwrap().framebuffer, first);
        assert_eq!(gpu.resource_counts().textures, 1);
        assert_eq!(gpu.resource_counts().framebuffers, 1);
    }

    #[test]
    fn test_params_last_writer_wins() {
        let mut gpu = SoftwareGpu::new();
        let texture = input(&mut gpu, [255, 255, 255, 255]);
        let mut filter = PassThroughFilter::with_shader(ShaderSpec::new(
            "scale",
            VERTEX_SHADER,
            FRAGMENT_SHADER,
            PixelKernel::ColorScale,
        ));
        filter.initialize_program(&mut gpu).unwrap();
        filter.stage_mut().create_frame_buffer_if_needed(&mut gpu, Size::new(1, 1)).unwrap();

        let params = filter.stage().params();
        let remote = params.clone();
        std::thread::spawn(move || {
            remote.set_float("red", 0.2);
            remote.set_float("red", 0.0);
        })
        .join()
        .unwrap();
        assert_eq!(params.pending(), 2);

        filter.draw_frame_buffer(&mut gpu, texture, &Quad::FULL).unwrap();
        assert_eq!(params.pending(), 0);
        let fb = filter.stage().offscreen.unwrap().framebuffer;
        let pixels = gpu.read_pixels(DrawTarget::Framebuffer(fb)).unwrap();
        assert_eq!(pixels.get_pixel(0, 0), &Rgba([0, 255, 255, 255]));
    }

    #[test]
    fn test_reinitialize_replaces_program() {
        let mut gpu = SoftwareGpu::new();
        let mut filter = PassThroughFilter::new("again");
        filter.initialize_program(&mut gpu).unwrap();
        filter.initialize_program(&mut gpu).unwrap();
        assert_eq!(gpu.resource_counts().programs, 1);
    }
}

//! # GPU Backend Module
//!
//! The seam between the render engine and whatever actually draws pixels.
//!
//! ## Plain English Explanation
//!
//! The render engine talks in handles: "compile this program", "draw this
//! texture into that framebuffer", "present". A GL ES backend would map
//! these one-to-one onto GL calls. [`SoftwareGpu`] does the same work on
//! the CPU so the whole pipeline runs headless (tests, desktop hosts).
//!
//! Every handle is owned by exactly one backend and only touched from the
//! render thread.

pub mod software;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

pub use software::{HeadlessSurface, SoftwareContextFactory, SoftwareGpu};

use crate::capture::{FrameSource, Size};
use crate::error::{RenderError, RenderResult};

// ============================================
// HANDLES
// ============================================

/// Texture handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Shader program handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Framebuffer handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Window surface handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

/// Texture flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    /// Regular RGBA texture
    Texture2D,
    /// Camera stream texture, filled by a frame source
    External,
}

/// Where a draw call lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawTarget {
    Surface(SurfaceId),
    Framebuffer(FramebufferId),
}

/// Live GPU objects, for leak checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub programs: usize,
    pub textures: usize,
    pub framebuffers: usize,
    pub surfaces: usize,
}

// ============================================
// GEOMETRY
// ============================================

/// A full-screen quad as a triangle strip: bottom-left, bottom-right,
/// top-left, top-right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    /// Normalized device coordinates, `x, y` per vertex
    pub vertices: [f32; 8],
    /// Texture coordinates, `u, v` per vertex, `v = 0` at the bottom
    pub tex_coords: [f32; 8],
}

impl Quad {
    pub const CUBE_VERTICES: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
    pub const TEXTURE_VERTICES: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

    /// Covers the whole target and samples the whole texture.
    pub const FULL: Quad = Quad {
        vertices: Self::CUBE_VERTICES,
        tex_coords: Self::TEXTURE_VERTICES,
    };
}

impl Default for Quad {
    fn default() -> Self {
        Self::FULL
    }
}

// ============================================
// SHADERS
// ============================================

/// A uniform value.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

/// Uniform values currently set on a program.
#[derive(Clone, Debug, Default)]
pub struct Uniforms {
    values: HashMap<String, UniformValue>,
}

impl Uniforms {
    pub fn set(&mut self, name: &str, value: UniformValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    /// Float uniform, or `default` if unset or of another type.
    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        match self.values.get(name) {
            Some(UniformValue::Float(v)) => *v,
            _ => default,
        }
    }

    pub fn mat4(&self, name: &str) -> Option<&[f32; 16]> {
        match self.values.get(name) {
            Some(UniformValue::Mat4(m)) => Some(m),
            _ => None,
        }
    }
}

/// Per-pixel function applied to one sampled RGBA texel (0..1 components).
pub type KernelFn = dyn Fn(&Uniforms, [f32; 4]) -> [f32; 4] + Send + Sync;

/// CPU reference for what a fragment shader computes.
///
/// Backends that compile the GLSL ignore this; the software backend runs it.
#[derive(Clone)]
pub enum PixelKernel {
    /// Copy the sampled texel
    Sample,
    /// Sample through the `transformMatrix` uniform, then copy
    SampleTransformed,
    /// Multiply RGB by the `red`, `green` and `blue` uniforms
    ColorScale,
    /// Any other per-pixel effect
    Custom(Arc<KernelFn>),
}

impl PixelKernel {
    /// True if texture coordinates go through `transformMatrix`.
    pub fn uses_transform(&self) -> bool {
        matches!(self, Self::SampleTransformed)
    }

    /// Runs the kernel on one texel.
    pub fn apply(&self, uniforms: &Uniforms, texel: [f32; 4]) -> [f32; 4] {
        match self {
            Self::Sample | Self::SampleTransformed => texel,
            Self::ColorScale => [
                texel[0] * uniforms.float_or("red", 1.0),
                texel[1] * uniforms.float_or("green", 1.0),
                texel[2] * uniforms.float_or("blue", 1.0),
                texel[3],
            ],
            Self::Custom(f) => f(uniforms, texel),
        }
    }
}

impl fmt::Debug for PixelKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample => write!(f, "Sample"),
            Self::SampleTransformed => write!(f, "SampleTransformed"),
            Self::ColorScale => write!(f, "ColorScale"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A vertex + fragment shader pair.
#[derive(Clone, Debug)]
pub struct ShaderSpec {
    pub name: Cow<'static, str>,
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
    pub kernel: PixelKernel,
}

impl ShaderSpec {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
        kernel: PixelKernel,
    ) -> Self {
        Self {
            name: name.into(),
            vertex: vertex.into(),
            fragment: fragment.into(),
            kernel,
        }
    }
}

/// One textured quad draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawCall {
    pub program: ProgramId,
    pub input: TextureId,
    pub target: DrawTarget,
    /// Viewport anchored at the target origin
    pub viewport: Size,
    pub quad: Quad,
    /// Clear the target to opaque black before drawing
    pub clear: bool,
}

// ============================================
// PRESENTATION TARGETS
// ============================================

/// A platform surface frames can be presented to.
pub trait PresentationSurface: Send + Sync {
    /// Native window or surface pointer; 0 for headless surfaces.
    fn native_handle(&self) -> u64;

    /// Receives each presented frame on backends that render on the CPU.
    fn present(&self, _frame: &RgbaImage) {}
}

/// What the render engine draws into.
#[derive(Clone)]
pub enum RenderTarget {
    /// Surface backed by an on-screen view
    ViewSurface(Arc<dyn PresentationSurface>),
    /// Raw platform window
    NativeWindow(Arc<dyn PresentationSurface>),
    /// Texture-backed surface; presented frames feed another consumer
    SurfaceTexture(Arc<FrameSource>),
}

impl RenderTarget {
    /// Builds a target from a host-supplied kind name.
    ///
    /// Unknown kinds cannot host a window surface and are rejected.
    pub fn from_descriptor(kind: &str, surface: Arc<dyn PresentationSurface>) -> RenderResult<Self> {
        match kind {
            "view" | "surface_view" | "surface_holder" | "texture_view" => Ok(Self::ViewSurface(surface)),
            "surface" | "native_window" => Ok(Self::NativeWindow(surface)),
            other => Err(RenderError::UnsupportedTarget(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ViewSurface(_) => "view",
            Self::NativeWindow(_) => "native_window",
            Self::SurfaceTexture(_) => "surface_texture",
        }
    }
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ViewSurface(s) | Self::NativeWindow(s) => {
                write!(f, "{}({:#x})", self.kind(), s.native_handle())
            }
            Self::SurfaceTexture(source) => write!(f, "surface_texture(#{})", source.id()),
        }
    }
}

// ============================================
// BACKEND INTERFACE
// ============================================

/// A GPU context plus the objects created in it.
///
/// Deleting an unknown handle is a no-op; using one in a draw is an error.
pub trait GpuBackend: Send {
    fn create_window_surface(&mut self, target: &RenderTarget) -> RenderResult<SurfaceId>;

    /// Tells the backend the surface's pixel size changed.
    fn resize_surface(&mut self, surface: SurfaceId, size: Size);

    fn destroy_surface(&mut self, surface: SurfaceId);

    /// Presents the surface's back buffer.
    fn swap_buffers(&mut self, surface: SurfaceId) -> RenderResult<()>;

    fn create_program(&mut self, shader: &ShaderSpec) -> RenderResult<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue);

    fn create_texture(&mut self, kind: TextureKind, size: Size) -> RenderResult<TextureId>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Replaces a texture's contents with `image`.
    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage) -> RenderResult<()>;

    /// Creates a framebuffer rendering into `texture`.
    fn create_framebuffer(&mut self, texture: TextureId) -> RenderResult<FramebufferId>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn draw(&mut self, call: &DrawCall) -> RenderResult<()>;

    /// Reads back a framebuffer or surface, top row first.
    fn read_pixels(&mut self, target: DrawTarget) -> RenderResult<RgbaImage>;

    fn resource_counts(&self) -> ResourceCounts;

    /// Tears the context down with everything still in it.
    fn release(&mut self);
}

/// Creates GPU contexts for the render engine.
pub trait ContextFactory: Send {
    fn create_context(&self) -> RenderResult<Box<dyn GpuBackend>>;
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_scale_kernel() {
        let mut uniforms = Uniforms::default();
        uniforms.set("red", UniformValue::Float(0.5));
        uniforms.set("blue", UniformValue::Float(0.0));

        let out = PixelKernel::ColorScale.apply(&uniforms, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(out, [0.5, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_custom_kernel() {
        let invert = PixelKernel::Custom(Arc::new(|_, t| [1.0 - t[0], 1.0 - t[1], 1.0 - t[2], t[3]]));
        let out = invert.apply(&Uniforms::default(), [0.25, 0.5, 1.0, 1.0]);
        assert_eq!(out, [0.75, 0.5, 0.0, 1.0]);
        assert!(!invert.uses_transform());
    }

    #[test]
    fn test_uniform_type_mismatch_uses_default() {
        let mut uniforms = Uniforms::default();
        uniforms.set("red", UniformValue::Vec4([0.0; 4]));
        assert_eq!(uniforms.float_or("red", 1.0), 1.0);
    }

    #[test]
    fn test_target_descriptor() {
        let surface: Arc<dyn PresentationSurface> = Arc::new(HeadlessSurface::new());
        assert_eq!(
            RenderTarget::from_descriptor("view", surface.clone()).unwrap().kind(),
            "view"
        );
        assert_eq!(
            RenderTarget::from_descriptor("surface", surface.clone()).unwrap().kind(),
            "native_window"
        );
        assert_eq!(
            RenderTarget::from_descriptor("bitmap", surface).unwrap_err(),
            RenderError::UnsupportedTarget("bitmap".into())
        );
    }
}

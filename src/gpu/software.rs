//! # Software GPU
//!
//! A CPU implementation of [`GpuBackend`]. Textures are `RgbaImage`s, draw
//! calls rasterize axis-aligned quads row by row with rayon, and programs
//! run their [`PixelKernel`] instead of GLSL.
//!
//! It is slow compared to real hardware but exact, which makes it the
//! backend of choice for tests and headless hosts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;
use rayon::prelude::*;

use super::{
    ContextFactory, DrawCall, DrawTarget, FramebufferId, GpuBackend, PixelKernel,
    PresentationSurface, ProgramId, RenderTarget, ResourceCounts, ShaderSpec, SurfaceId,
    TextureId, TextureKind, UniformValue, Uniforms,
};
use crate::capture::negotiate::{transform_point, IDENTITY_MATRIX};
use crate::capture::{CameraFrame, Size};
use crate::error::{RenderError, RenderResult};

// ============================================
// OBJECTS
// ============================================

struct SoftTexture {
    kind: TextureKind,
    image: RgbaImage,
}

struct SoftProgram {
    kernel: PixelKernel,
    uniforms: Uniforms,
}

struct SoftSurface {
    target: RenderTarget,
    back: RgbaImage,
}

// ============================================
// SOFTWARE GPU
// ============================================

/// CPU-rendering GPU context.
pub struct SoftwareGpu {
    next_id: u32,
    textures: HashMap<u32, SoftTexture>,
    framebuffers: HashMap<u32, u32>,
    programs: HashMap<u32, SoftProgram>,
    surfaces: HashMap<u32, SoftSurface>,
    released: bool,
}

impl SoftwareGpu {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            surfaces: HashMap::new(),
            released: false,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_alive(&self) -> RenderResult<()> {
        if self.released {
            return Err(RenderError::Gpu("context released".into()));
        }
        Ok(())
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> RenderResult<u32> {
        self.framebuffers
            .get(&framebuffer.0)
            .copied()
            .ok_or_else(|| invalid("framebuffer", framebuffer.0))
    }

    /// Target image slot for a draw or readback.
    fn target_image(&mut self, target: DrawTarget) -> RenderResult<&mut RgbaImage> {
        match target {
            DrawTarget::Framebuffer(fb) => {
                let texture = self.framebuffer_texture(fb)?;
                self.textures
                    .get_mut(&texture)
                    .map(|t| &mut t.image)
                    .ok_or_else(|| invalid("texture", texture))
            }
            DrawTarget::Surface(surface) => self
                .surfaces
                .get_mut(&surface.0)
                .map(|s| &mut s.back)
                .ok_or_else(|| invalid("surface", surface.0)),
        }
    }
}

impl Default for SoftwareGpu {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(kind: &str, id: u32) -> RenderError {
    RenderError::InvalidHandle(format!("{} {}", kind, id))
}

impl GpuBackend for SoftwareGpu {
    fn create_window_surface(&mut self, target: &RenderTarget) -> RenderResult<SurfaceId> {
        self.check_alive()?;
        if let RenderTarget::SurfaceTexture(source) = target {
            if source.is_released() {
                return Err(RenderError::ContextCreation(
                    "surface texture already released".into(),
                ));
            }
        }

        let id = self.allocate_id();
        self.surfaces.insert(
            id,
            SoftSurface {
                target: target.clone(),
                back: RgbaImage::new(0, 0),
            },
        );
        log::debug!("Created software surface {} for {:?}", id, target);
        Ok(SurfaceId(id))
    }

    fn resize_surface(&mut self, surface: SurfaceId, size: Size) {
        if let Some(s) = self.surfaces.get_mut(&surface.0) {
            if s.back.dimensions() != (size.width, size.height) {
                s.back = RgbaImage::new(size.width, size.height);
            }
        }
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface.0);
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> RenderResult<()> {
        self.check_alive()?;
        let s = self
            .surfaces
            .get(&surface.0)
            .ok_or_else(|| invalid("surface", surface.0))?;

        match &s.target {
            RenderTarget::ViewSurface(p) | RenderTarget::NativeWindow(p) => p.present(&s.back),
            RenderTarget::SurfaceTexture(source) => {
                source.push(CameraFrame::new(s.back.clone()));
            }
        }
        Ok(())
    }

    fn create_program(&mut self, shader: &ShaderSpec) -> RenderResult<ProgramId> {
        self.check_alive()?;
        if shader.vertex.trim().is_empty() || shader.fragment.trim().is_empty() {
            return Err(RenderError::Shader {
                name: shader.name.to_string(),
                reason: "empty shader source".into(),
            });
        }

        let id = self.allocate_id();
        self.programs.insert(
            id,
            SoftProgram {
                kernel: shader.kernel.clone(),
                uniforms: Uniforms::default(),
            },
        );
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
    }

    fn set_uniform(&mut self, program: ProgramId, name: &str, value: UniformValue) {
        if let Some(p) = self.programs.get_mut(&program.0) {
            p.uniforms.set(name, value);
        }
    }

    fn create_texture(&mut self, kind: TextureKind, size: Size) -> RenderResult<TextureId> {
        self.check_alive()?;
        let id = self.allocate_id();
        self.textures.insert(
            id,
            SoftTexture {
                kind,
                image: RgbaImage::new(size.width, size.height),
            },
        );
        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
    }

    fn upload_texture(&mut self, texture: TextureId, image: &RgbaImage) -> RenderResult<()> {
        self.check_alive()?;
        let t = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| invalid("texture", texture.0))?;
        t.image.clone_from(image);
        Ok(())
    }

    fn create_framebuffer(&mut self, texture: TextureId) -> RenderResult<FramebufferId> {
        self.check_alive()?;
        match self.textures.get(&texture.0) {
            Some(t) if t.kind == TextureKind::Texture2D => {}
            Some(_) => {
                return Err(RenderError::Gpu(
                    "external textures cannot back a framebuffer".into(),
                ))
            }
            None => return Err(invalid("texture", texture.0)),
        }
        let id = self.allocate_id();
        self.framebuffers.insert(id, texture.0);
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(&framebuffer.0);
    }

    fn draw(&mut self, call: &DrawCall) -> RenderResult<()> {
        self.check_alive()?;
        let (kernel, uniforms) = {
            let program = self
                .programs
                .get(&call.program.0)
                .ok_or_else(|| invalid("program", call.program.0))?;
            (program.kernel.clone(), program.uniforms.clone())
        };

        if let DrawTarget::Framebuffer(fb) = call.target {
            if self.framebuffer_texture(fb)? == call.input.0 {
                return Err(RenderError::Gpu("feedback loop: input is the draw target".into()));
            }
        }
        if !self.textures.contains_key(&call.input.0) {
            return Err(invalid("texture", call.input.0));
        }

        // Move the target out so the source texture can be borrowed alongside it
        let slot = self.target_image(call.target)?;
        let mut dest = std::mem::replace(slot, RgbaImage::new(0, 0));
        if let Some(source) = self.textures.get(&call.input.0) {
            rasterize(&mut dest, &source.image, &kernel, &uniforms, call);
        }
        *self.target_image(call.target)? = dest;
        Ok(())
    }

    fn read_pixels(&mut self, target: DrawTarget) -> RenderResult<RgbaImage> {
        self.check_alive()?;
        Ok(self.target_image(target)?.clone())
    }

    fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            programs: self.programs.len(),
            textures: self.textures.len(),
            framebuffers: self.framebuffers.len(),
            surfaces: self.surfaces.len(),
        }
    }

    fn release(&mut self) {
        log::debug!(
            "Releasing software context: {:?}",
            self.resource_counts()
        );
        self.textures.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.surfaces.clear();
        self.released = true;
    }
}

// ============================================
// RASTERIZER
// ============================================

const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

/// Draws an axis-aligned textured quad into `dest`.
fn rasterize(
    dest: &mut RgbaImage,
    source: &RgbaImage,
    kernel: &PixelKernel,
    uniforms: &Uniforms,
    call: &DrawCall,
) {
    let width = dest.width().min(call.viewport.width);
    let height = dest.height().min(call.viewport.height);
    if width == 0 || height == 0 {
        return;
    }
    // Viewports are anchored bottom-left, rows are stored top-down
    let row_offset = (dest.height() - height) as usize;
    let stride = dest.width() as usize * 4;

    let v = &call.quad.vertices;
    let t = &call.quad.tex_coords;
    let (x0, x1, y0, y1) = (v[0], v[6], v[1], v[7]);
    let degenerate = (x1 - x0).abs() < f32::EPSILON || (y1 - y0).abs() < f32::EPSILON;
    let (left, right) = (x0.min(x1), x0.max(x1));
    let (bottom, top) = (y0.min(y1), y0.max(y1));

    let transform = if kernel.uses_transform() {
        uniforms
            .mat4("transformMatrix")
            .copied()
            .unwrap_or(IDENTITY_MATRIX)
    } else {
        IDENTITY_MATRIX
    };
    let clear = call.clear;

    let buffer: &mut [u8] = dest;
    buffer
        .par_chunks_mut(stride)
        .enumerate()
        .skip(row_offset)
        .for_each(|(row, pixels)| {
            let local_row = (row - row_offset) as f32;
            let ndc_y = 1.0 - (local_row + 0.5) / height as f32 * 2.0;

            for col in 0..width as usize {
                let px = &mut pixels[col * 4..col * 4 + 4];
                let ndc_x = (col as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                let inside = !degenerate
                    && ndc_x >= left
                    && ndc_x <= right
                    && ndc_y >= bottom
                    && ndc_y <= top;
                if !inside {
                    if clear {
                        px.copy_from_slice(&OPAQUE_BLACK);
                    }
                    continue;
                }

                let u = t[0] + (ndc_x - x0) / (x1 - x0) * (t[6] - t[0]);
                let tv = t[1] + (ndc_y - y0) / (y1 - y0) * (t[7] - t[1]);
                let (su, sv) = if kernel.uses_transform() {
                    transform_point(&transform, u, tv)
                } else {
                    (u, tv)
                };

                let out = kernel.apply(uniforms, sample(source, su, sv));
                for (channel, value) in px.iter_mut().zip(out) {
                    *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
        });
}

/// Nearest-neighbour sample; `v = 0` is the bottom row.
fn sample(source: &RgbaImage, u: f32, v: f32) -> [f32; 4] {
    let (w, h) = source.dimensions();
    if w == 0 || h == 0 {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let x = ((u * w as f32).floor() as i64).clamp(0, w as i64 - 1) as u32;
    let from_bottom = ((v * h as f32).floor() as i64).clamp(0, h as i64 - 1) as u32;
    let p = source.get_pixel(x, h - 1 - from_bottom).0;
    [
        p[0] as f32 / 255.0,
        p[1] as f32 / 255.0,
        p[2] as f32 / 255.0,
        p[3] as f32 / 255.0,
    ]
}

// ============================================
// HEADLESS SURFACE & FACTORY
// ============================================

/// An off-screen presentation surface that keeps the last frame.
pub struct HeadlessSurface {
    last_frame: Mutex<Option<RgbaImage>>,
    presented: AtomicU64,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self {
            last_frame: Mutex::new(None),
            presented: AtomicU64::new(0),
        }
    }

    /// Number of frames presented so far.
    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<RgbaImage> {
        self.last_frame.lock().clone()
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSurface for HeadlessSurface {
    fn native_handle(&self) -> u64 {
        0
    }

    fn present(&self, frame: &RgbaImage) {
        *self.last_frame.lock() = Some(frame.clone());
        self.presented.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates [`SoftwareGpu`] contexts.
#[derive(Clone, Debug, Default)]
pub struct SoftwareContextFactory {
    created: Arc<AtomicUsize>,
}

impl SoftwareContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contexts created through this factory (or its clones).
    pub fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ContextFactory for SoftwareContextFactory {
    fn create_context(&self) -> RenderResult<Box<dyn GpuBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SoftwareGpu::new()))
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Quad;
    use image::Rgba;

    fn pass_through() -> ShaderSpec {
        ShaderSpec::new("test", "void main(){}", "void main(){}", PixelKernel::Sample)
    }

    /// 2x2 image: top row red, green; bottom row blue, white
    fn checker() -> RgbaImage {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        img.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
        img.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
        img
    }

    fn offscreen(gpu: &mut SoftwareGpu, size: Size) -> (TextureId, FramebufferId) {
        let texture = gpu.create_texture(TextureKind::Texture2D, size).unwrap();
        let fb = gpu.create_framebuffer(texture).unwrap();
        (texture, fb)
    }

    #[test]
    fn test_pass_through_preserves_orientation() {
        let mut gpu = SoftwareGpu::new();
        let program = gpu.create_program(&pass_through()).unwrap();
        let input = gpu.create_texture(TextureKind::Texture2D, Size::new(2, 2)).unwrap();
        gpu.upload_texture(input, &checker()).unwrap();
        let (_, fb) = offscreen(&mut gpu, Size::new(4, 4));

        gpu.draw(&DrawCall {
            program,
            input,
            target: DrawTarget::Framebuffer(fb),
            viewport: Size::new(4, 4),
            quad: Quad::FULL,
            clear: false,
        })
        .unwrap();

        let out = gpu.read_pixels(DrawTarget::Framebuffer(fb)).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(3, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(out.get_pixel(0, 3), &Rgba([0, 0, 255, 255]));
        assert_eq!(out.get_pixel(3, 3), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_shrunk_quad_clears_border() {
        let mut gpu = SoftwareGpu::new();
        let program = gpu.create_program(&pass_through()).unwrap();
        let input = gpu.create_texture(TextureKind::Texture2D, Size::new(1, 1)).unwrap();
        gpu.upload_texture(input, &RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255])))
            .unwrap();
        let (_, fb) = offscreen(&mut gpu, Size::new(4, 2));

        let quad = Quad {
            vertices: [-0.5, -1.0, 0.5, -1.0, -0.5, 1.0, 0.5, 1.0],
            tex_coords: Quad::TEXTURE_VERTICES,
        };
        gpu.draw(&DrawCall {
            program,
            input,
            target: DrawTarget::Framebuffer(fb),
            viewport: Size::new(4, 2),
            quad,
            clear: true,
        })
        .unwrap();

        let out = gpu.read_pixels(DrawTarget::Framebuffer(fb)).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(2, 1), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(3, 1), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_empty_shader_fails() {
        let mut gpu = SoftwareGpu::new();
        let spec = ShaderSpec::new("broken", "", "void main(){}", PixelKernel::Sample);
        assert!(matches!(gpu.create_program(&spec), Err(RenderError::Shader { .. })));
    }

    #[test]
    fn test_feedback_loop_rejected() {
        let mut gpu = SoftwareGpu::new();
        let program = gpu.create_program(&pass_through()).unwrap();
        let (texture, fb) = offscreen(&mut gpu, Size::new(2, 2));

        let result = gpu.draw(&DrawCall {
            program,
            input: texture,
            target: DrawTarget::Framebuffer(fb),
            viewport: Size::new(2, 2),
            quad: Quad::FULL,
            clear: false,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_present_reaches_surface() {
        let mut gpu = SoftwareGpu::new();
        let surface = Arc::new(HeadlessSurface::new());
        let id = gpu
            .create_window_surface(&RenderTarget::ViewSurface(surface.clone()))
            .unwrap();
        gpu.resize_surface(id, Size::new(3, 2));
        gpu.swap_buffers(id).unwrap();

        assert_eq!(surface.presented_frames(), 1);
        assert_eq!(surface.last_frame().unwrap().dimensions(), (3, 2));
    }

    #[test]
    fn test_release_drops_everything() {
        let mut gpu = SoftwareGpu::new();
        gpu.create_program(&pass_through()).unwrap();
        offscreen(&mut gpu, Size::new(2, 2));
        assert_eq!(gpu.resource_counts().framebuffers, 1);

        gpu.release();
        assert_eq!(gpu.resource_counts(), ResourceCounts::default());
        assert!(gpu.create_texture(TextureKind::Texture2D, Size::new(1, 1)).is_err());
    }
}

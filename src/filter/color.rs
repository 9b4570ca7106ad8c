//! The dynamic color effect: per-channel RGB multipliers.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Filter, FilterStage, StageParams, VERTEX_SHADER};
use crate::error::RenderResult;
use crate::gpu::{GpuBackend, PixelKernel, ShaderSpec};

pub const COLOR_FRAGMENT_SHADER: &str = r#"
precision mediump float;
varying vec2 textureCoordinate;
uniform sampler2D inputTexture;
uniform float red;
uniform float green;
uniform float blue;
void main() {
    lowp vec4 textureColor = texture2D(inputTexture, textureCoordinate);
    gl_FragColor = vec4(textureColor.r * red, textureColor.g * green, textureColor.b * blue, textureColor.w);
}
"#;

/// Thread-safe handle to a [`ColorFilter`]'s multipliers.
///
/// Values are clamped to `0.0..=1.0` and reach the GPU on the next draw.
#[derive(Clone, Debug)]
pub struct ColorControls {
    params: StageParams,
    values: Arc<Mutex<[f32; 3]>>,
}

impl ColorControls {
    pub fn set_red(&self, value: f32) {
        self.set(0, "red", value);
    }

    pub fn set_green(&self, value: f32) {
        self.set(1, "green", value);
    }

    pub fn set_blue(&self, value: f32) {
        self.set(2, "blue", value);
    }

    /// Current `[red, green, blue]`.
    pub fn rgb(&self) -> [f32; 3] {
        *self.values.lock()
    }

    fn set(&self, channel: usize, name: &str, value: f32) {
        // NaN becomes 0 rather than poisoning the shader
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.values.lock()[channel] = value;
        self.params.set_float(name, value);
    }

    fn queue_all(&self) {
        let [red, green, blue] = self.rgb();
        self.params.set_float("red", red);
        self.params.set_float("green", green);
        self.params.set_float("blue", blue);
    }
}

/// Multiplies each channel by its multiplier; all 1.0 is a no-op.
#[derive(Debug)]
pub struct ColorFilter {
    stage: FilterStage,
    controls: ColorControls,
}

impl ColorFilter {
    pub fn new() -> Self {
        let stage = FilterStage::new(ShaderSpec::new(
            "color",
            VERTEX_SHADER,
            COLOR_FRAGMENT_SHADER,
            PixelKernel::ColorScale,
        ));
        let controls = ColorControls {
            params: stage.params(),
            values: Arc::new(Mutex::new([1.0; 3])),
        };
        Self { stage, controls }
    }

    pub fn controls(&self) -> ColorControls {
        self.controls.clone()
    }
}

impl Default for ColorFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ColorFilter {
    fn stage(&self) -> &FilterStage {
        &self.stage
    }

    fn stage_mut(&mut self) -> &mut FilterStage {
        &mut self.stage
    }

    fn initialize_program(&mut self, gpu: &mut dyn GpuBackend) -> RenderResult<()> {
        self.stage.initialize_program(gpu)?;
        // A fresh program has no uniforms set
        self.controls.queue_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Size;
    use crate::gpu::{DrawTarget, Quad, SoftwareGpu, TextureKind};
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_controls_clamp() {
        let filter = ColorFilter::new();
        let controls = filter.controls();
        controls.set_red(3.0);
        controls.set_green(-1.0);
        controls.set_blue(f32::NAN);
        assert_eq!(controls.rgb(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_color_applied_on_next_draw() {
        let mut gpu = SoftwareGpu::new();
        let input = gpu.create_texture(TextureKind::Texture2D, Size::new(2, 2)).unwrap();
        gpu.upload_texture(input, &RgbaImage::from_pixel(2, 2, Rgba([200, 200, 200, 255])))
            .unwrap();

        let mut filter = ColorFilter::new();
        let controls = filter.controls();
        controls.set_green(0.5);
        filter.initialize_program(&mut gpu).unwrap();
        filter
            .stage_mut()
            .create_frame_buffer_if_needed(&mut gpu, Size::new(2, 2))
            .unwrap();

        // Set from another thread before the draw
        let remote = filter.controls();
        std::thread::spawn(move || remote.set_blue(0.0)).join().unwrap();

        let out = filter.draw_frame_buffer(&mut gpu, input, &Quad::FULL).unwrap();
        let fb = filter.stage().offscreen.map(|o| o.framebuffer).unwrap();
        assert_ne!(out, input);
        let pixels = gpu.read_pixels(DrawTarget::Framebuffer(fb)).unwrap();
        assert_eq!(pixels.get_pixel(0, 0), &Rgba([200, 100, 0, 255]));
    }
}

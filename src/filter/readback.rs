//! Offscreen readback for still capture.
//!
//! Draws the current texture into a target the size of the input image
//! and copies the pixels back to the CPU.

use image::RgbaImage;

use super::{pass_through_shader, Filter, FilterStage};
use crate::capture::Size;
use crate::error::RenderResult;
use crate::gpu::{DrawTarget, GpuBackend, Quad, TextureId};

/// Reads a texture back as an image.
#[derive(Debug)]
pub struct ReadbackFilter {
    stage: FilterStage,
}

impl ReadbackFilter {
    pub fn new() -> Self {
        Self {
            stage: FilterStage::new(pass_through_shader("readback")),
        }
    }

    /// Sizes the readback target; reallocates only when the size changes.
    pub fn set_image_size(&mut self, gpu: &mut dyn GpuBackend, size: Size) -> RenderResult<()> {
        self.stage.set_input_size(size);
        self.stage.set_display_size(size);
        self.stage.create_frame_buffer_if_needed(gpu, size)
    }

    /// Renders `input` and returns its pixels, top row first.
    ///
    /// `None` when the stage cannot draw (not initialized, released, or
    /// no image size yet).
    pub fn capture(
        &mut self,
        gpu: &mut dyn GpuBackend,
        input: TextureId,
        quad: &Quad,
    ) -> RenderResult<Option<RgbaImage>> {
        let Some(framebuffer) = self.stage.offscreen.map(|o| o.framebuffer) else {
            log::debug!("Readback skipped: no image size");
            return Ok(None);
        };
        let output = self.draw_frame_buffer(gpu, input, quad)?;
        if output == input {
            return Ok(None);
        }
        gpu.read_pixels(DrawTarget::Framebuffer(framebuffer)).map(Some)
    }
}

impl Default for ReadbackFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ReadbackFilter {
    fn stage(&self) -> &FilterStage {
        &self.stage
    }

    fn stage_mut(&mut self) -> &mut FilterStage {
        &mut self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{SoftwareGpu, TextureKind};
    use image::Rgba;

    #[test]
    fn test_capture_matches_image_size() {
        let mut gpu = SoftwareGpu::new();
        let input = gpu.create_texture(TextureKind::Texture2D, Size::new(3, 5)).unwrap();
        let mut image = RgbaImage::from_pixel(3, 5, Rgba([10, 20, 30, 255]));
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        gpu.upload_texture(input, &image).unwrap();

        let mut readback = ReadbackFilter::new();
        assert_eq!(readback.capture(&mut gpu, input, &Quad::FULL).unwrap(), None);

        readback.initialize_program(&mut gpu).unwrap();
        readback.set_image_size(&mut gpu, Size::new(3, 5)).unwrap();
        let captured = readback.capture(&mut gpu, input, &Quad::FULL).unwrap().unwrap();
        assert_eq!(captured, image);
    }

    #[test]
    fn test_capture_after_release() {
        let mut gpu = SoftwareGpu::new();
        let input = gpu.create_texture(TextureKind::Texture2D, Size::new(1, 1)).unwrap();
        let mut readback = ReadbackFilter::new();
        readback.initialize_program(&mut gpu).unwrap();
        readback.set_image_size(&mut gpu, Size::new(1, 1)).unwrap();
        readback.release(&mut gpu);
        assert_eq!(readback.capture(&mut gpu, input, &Quad::FULL).unwrap(), None);
    }
}

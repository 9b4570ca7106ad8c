//! Camera-format conversion: the first pass of every frame.
//!
//! Samples the external camera texture through the frame source's
//! texture matrix, which turns sensor-oriented frames upright (and
//! mirrors the front camera).

use super::{Filter, FilterStage};
use crate::capture::negotiate::IDENTITY_MATRIX;
use crate::gpu::{GpuBackend, PixelKernel, ProgramId, ShaderSpec, UniformValue};

pub const EXTERNAL_VERTEX_SHADER: &str = r#"
uniform mat4 transformMatrix;
attribute vec4 aPosition;
attribute vec4 aTextureCoord;
varying vec2 textureCoordinate;
void main() {
    gl_Position = aPosition;
    textureCoordinate = (transformMatrix * aTextureCoord).xy;
}
"#;

pub const EXTERNAL_FRAGMENT_SHADER: &str = r#"
#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 textureCoordinate;
uniform samplerExternalOES inputTexture;
void main() {
    gl_FragColor = texture2D(inputTexture, textureCoordinate);
}
"#;

/// Draws the camera's external texture into a regular 2D texture.
#[derive(Debug)]
pub struct ExternalFilter {
    stage: FilterStage,
    transform: [f32; 16],
}

impl ExternalFilter {
    pub fn new() -> Self {
        let shader = ShaderSpec::new(
            "external",
            EXTERNAL_VERTEX_SHADER,
            EXTERNAL_FRAGMENT_SHADER,
            PixelKernel::SampleTransformed,
        );
        Self {
            stage: FilterStage::external(shader),
            transform: IDENTITY_MATRIX,
        }
    }

    /// Matrix from the frame source; used from the next draw on.
    pub fn set_transform_matrix(&mut self, matrix: [f32; 16]) {
        self.transform = matrix;
    }

    pub fn transform_matrix(&self) -> [f32; 16] {
        self.transform
    }
}

impl Default for ExternalFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ExternalFilter {
    fn stage(&self) -> &FilterStage {
        &self.stage
    }

    fn stage_mut(&mut self) -> &mut FilterStage {
        &mut self.stage
    }

    fn on_draw_begin(&mut self, gpu: &mut dyn GpuBackend, program: ProgramId) {
        gpu.set_uniform(program, "transformMatrix", UniformValue::Mat4(self.transform));
    }
}

//! Where the camera image lands on the display: crop to fill, or shrink
//! to fit.

use serde::{Deserialize, Serialize};

use crate::capture::Size;
use crate::gpu::Quad;

/// How the camera image is fitted to the display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleType {
    /// Fill the display, cropping the overflow symmetrically
    #[default]
    CenterCrop,
    /// Show the whole image, letterboxed
    CenterInside,
}

/// Quads for one input/display size pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineGeometry {
    pub input: Size,
    pub display: Size,
    /// Used by offscreen passes, always the full texture
    pub offscreen: Quad,
    /// Used by the display pass
    pub display_quad: Quad,
}

impl PipelineGeometry {
    /// `None` until both sizes are known.
    pub fn compute(input: Size, display: Size, scale_type: ScaleType) -> Option<Self> {
        if input.is_empty() || display.is_empty() {
            return None;
        }

        let (iw, ih) = (input.width as f32, input.height as f32);
        let (dw, dh) = (display.width as f32, display.height as f32);

        let ratio_max = (dw / iw).max(dh / ih);
        let ratio_width = (iw * ratio_max).round() / dw;
        let ratio_height = (ih * ratio_max).round() / dh;

        let mut vertices = Quad::CUBE_VERTICES;
        let mut tex_coords = Quad::TEXTURE_VERTICES;
        match scale_type {
            ScaleType::CenterInside => {
                // The fitted width is 1/ratio_height of the display and the
                // fitted height 1/ratio_width
                for pair in vertices.chunks_exact_mut(2) {
                    pair[0] /= ratio_height;
                    pair[1] /= ratio_width;
                }
            }
            ScaleType::CenterCrop => {
                let horizontal = (1.0 - 1.0 / ratio_width) / 2.0;
                let vertical = (1.0 - 1.0 / ratio_height) / 2.0;
                for pair in tex_coords.chunks_exact_mut(2) {
                    pair[0] = inset(pair[0], horizontal);
                    pair[1] = inset(pair[1], vertical);
                }
            }
        }

        Some(Self {
            input,
            display,
            offscreen: Quad::FULL,
            display_quad: Quad {
                vertices,
                tex_coords,
            },
        })
    }
}

fn inset(coordinate: f32, distance: f32) -> f32 {
    if coordinate == 0.0 {
        distance
    } else {
        1.0 - distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f32], b: &[f32]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_unknown_sizes() {
        assert!(PipelineGeometry::compute(Size::new(0, 0), Size::new(10, 10), ScaleType::CenterCrop)
            .is_none());
        assert!(PipelineGeometry::compute(Size::new(10, 10), Size::new(10, 0), ScaleType::CenterCrop)
            .is_none());
    }

    #[test]
    fn test_center_crop_insets_texture() {
        let g = PipelineGeometry::compute(Size::new(100, 100), Size::new(200, 100), ScaleType::CenterCrop)
            .unwrap();
        assert_eq!(g.display_quad.vertices, Quad::CUBE_VERTICES);
        assert!(close(
            &g.display_quad.tex_coords,
            &[0.0, 0.25, 1.0, 0.25, 0.0, 0.75, 1.0, 0.75]
        ));
        assert_eq!(g.offscreen, Quad::FULL);
    }

    #[test]
    fn test_center_inside_letterboxes() {
        let g = PipelineGeometry::compute(
            Size::new(100, 100),
            Size::new(200, 100),
            ScaleType::CenterInside,
        )
        .unwrap();
        assert_eq!(g.display_quad.tex_coords, Quad::TEXTURE_VERTICES);
        // Square image in a 2:1 view: half the width, full height
        assert!(close(
            &g.display_quad.vertices,
            &[-0.5, -1.0, 0.5, -1.0, -0.5, 1.0, 0.5, 1.0]
        ));

        let tall = PipelineGeometry::compute(
            Size::new(1080, 1920),
            Size::new(1080, 1080),
            ScaleType::CenterInside,
        )
        .unwrap();
        assert!(close(&tall.display_quad.vertices[..2], &[-0.5625, -1.0]));
    }

    #[test]
    fn test_same_aspect_is_identity() {
        for scale_type in [ScaleType::CenterCrop, ScaleType::CenterInside] {
            let g = PipelineGeometry::compute(Size::new(720, 1280), Size::new(360, 640), scale_type)
                .unwrap();
            assert!(close(&g.display_quad.vertices, &Quad::CUBE_VERTICES));
            assert!(close(&g.display_quad.tex_coords, &Quad::TEXTURE_VERTICES));
        }
    }
}

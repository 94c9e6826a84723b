//! The renderer boundary: the mesh rasterizer is an external, exclusively
//! owned device consumed through this trait. A test double can implement it
//! by drawing flat-colored rectangles per instance.

use crate::types::DatasetResult;
use std::path::PathBuf;

/// RGBA float buffer, `height * width * 4` values in [0, 1], row 0 at the
/// bottom as produced by the rasterizer until [`RenderBuffer::flip_vertical`]
/// is applied.
#[derive(Debug, Clone)]
pub struct RenderBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl RenderBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; (width * height * 4) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let base = ((y * self.width + x) * 4) as usize;
        [
            self.data[base],
            self.data[base + 1],
            self.data[base + 2],
            self.data[base + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let base = ((y * self.width + x) * 4) as usize;
        self.data[base..base + 4].copy_from_slice(&rgba);
    }

    /// Flip rows so row 0 is the top; must be applied to renderer output
    /// before any decoding.
    pub fn flip_vertical(&mut self) {
        let row = (self.width * 4) as usize;
        let h = self.height as usize;
        for y in 0..h / 2 {
            let (a, b) = (y * row, (h - 1 - y) * row);
            for i in 0..row {
                self.data.swap(a + i, b + i);
            }
        }
    }

    /// Per-pixel packed instance id from the segmentation buffer: reads the
    /// three lowest channels as a base-256 big-endian triple,
    /// `id = B + 256*G + 65536*R` over the raw [0, 1] channel values.
    pub fn instance_ids(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|p| p[2] + 256.0 * p[1] + 65536.0 * p[0])
            .collect()
    }

    /// Rounded 8-bit RGB channels per pixel, for color-keyed label decoding.
    pub fn rgb8(&self) -> Vec<[u8; 3]> {
        self.data
            .chunks_exact(4)
            .map(|p| {
                [
                    (p[0].clamp(0.0, 1.0) * 255.0).round() as u8,
                    (p[1].clamp(0.0, 1.0) * 255.0).round() as u8,
                    (p[2].clamp(0.0, 1.0) * 255.0).round() as u8,
                ]
            })
            .collect()
    }
}

/// Light parameters for one rendered scene.
#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub position: [f32; 3],
    /// Per-channel color already scaled by intensity.
    pub color: [f32; 3],
}

/// The external rasterizer. One scene in flight at a time; invocation
/// failures propagate as fatal, never silently recovered.
pub trait SceneRenderer {
    /// Load object meshes and textures once; renderer class index `i`
    /// corresponds to global class id `i + 1`.
    fn load_objects(
        &mut self,
        meshes: &[PathBuf],
        textures: &[PathBuf],
        colors: &[[f32; 3]],
    ) -> DatasetResult<()>;

    #[allow(clippy::too_many_arguments)]
    fn set_camera_projection(
        &mut self,
        width: u32,
        height: u32,
        fx: f32,
        fy: f32,
        px: f32,
        py: f32,
        znear: f32,
        zfar: f32,
    );

    /// Poses in `[tx, ty, tz, qw, qx, qy, qz]` wire form, one per instance of
    /// the next render call.
    fn set_poses(&mut self, poses: &[[f32; 7]]);

    fn set_light(&mut self, light: Light);

    /// Render the instance batch into the color and segmentation buffers.
    /// `class_indexes` are renderer class indices (global id - 1), parallel
    /// to the poses set beforehand.
    fn render(
        &mut self,
        class_indexes: &[usize],
        color: &mut RenderBuffer,
        seg: &mut RenderBuffer,
    ) -> DatasetResult<()>;
}

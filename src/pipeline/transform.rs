//! Transform stage (spec.md §4.3): 90-step rotation, flips, optional fine
//! affine rotation. Establishes `full_dims`/`global_offset` for every
//! downstream coordinate-sensitive stage.

use bytemuck::{Pod, Zeroable};

use crate::config::{GeometryConfig, Rotation};
use crate::image_buffer::ImageBuffer;
use crate::numerics::bilinear_sample;

pub const WGSL: &str = include_str!("shaders/transform.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TransformUniforms {
    pub rotation_steps: u32,
    pub flip_h: u32,
    pub flip_v: u32,
    pub _pad0: u32,
    pub fine_rotation_rad: f32,
    pub _pad1: [f32; 3],
}

/// The dimensions of the Transform stage's output given an input size and
/// the 90-step rotation component.
#[must_use]
pub fn output_dims(input_w: u32, input_h: u32, rotation: Rotation) -> (u32, u32) {
    match rotation {
        Rotation::Deg0 | Rotation::Deg180 => (input_w, input_h),
        Rotation::Deg90 | Rotation::Deg270 => (input_h, input_w),
    }
}

/// Applies rotation + flips + optional fine rotation via manual bilinear
/// sampling. Out-of-bounds samples read the clamped edge.
#[must_use]
pub fn apply_cpu(input: &ImageBuffer, geometry: &GeometryConfig) -> ImageBuffer {
    let (in_w, in_h) = (input.width(), input.height());
    let (out_w, out_h) = output_dims(in_w, in_h, geometry.rotation);
    let mut out = ImageBuffer::new(out_w, out_h);

    let fine_rad = geometry.fine_rotation_deg.to_radians();
    let (cos_f, sin_f) = (fine_rad.cos(), fine_rad.sin());
    let (cx, cy) = (in_w as f32 / 2.0, in_h as f32 / 2.0);

    for oy in 0..out_h {
        for ox in 0..out_w {
            // Undo the 90-step rotation to find the pre-rotation coordinate.
            let (mut sx, mut sy) = match geometry.rotation {
                Rotation::Deg0 => (ox as f32, oy as f32),
                Rotation::Deg90 => (oy as f32, (out_w - 1 - ox) as f32),
                Rotation::Deg180 => ((out_w - 1 - ox) as f32, (out_h - 1 - oy) as f32),
                Rotation::Deg270 => ((out_h - 1 - oy) as f32, ox as f32),
            };

            if geometry.flip_horizontal {
                sx = in_w as f32 - 1.0 - sx;
            }
            if geometry.flip_vertical {
                sy = in_h as f32 - 1.0 - sy;
            }

            if fine_rad != 0.0 {
                let dx = sx - cx;
                let dy = sy - cy;
                sx = cx + dx * cos_f - dy * sin_f;
                sy = cy + dx * sin_f + dy * cos_f;
            }

            let mut rgb = [0.0f32; 3];
            for c in 0..3 {
                rgb[c] = bilinear_sample(input.data(), in_w as usize, in_h as usize, 3, sx, sy, c);
            }
            out.set_pixel(ox, oy, rgb);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeometryConfig;

    #[test]
    fn rotate_90_four_times_is_identity() {
        let mut geo = GeometryConfig::default();
        let mut buf = ImageBuffer::new(4, 6);
        for y in 0..6 {
            for x in 0..4 {
                buf.set_pixel(x, y, [x as f32 / 4.0, y as f32 / 6.0, 0.5]);
            }
        }

        let original = buf.clone();
        let mut current = buf;
        for _ in 0..4 {
            geo.rotation = Rotation::Deg90;
            current = apply_cpu(&current, &geo);
        }

        assert_eq!(current.width(), original.width());
        assert_eq!(current.height(), original.height());
        for y in 0..original.height() {
            for x in 0..original.width() {
                let a = original.pixel(x, y);
                let b = current.pixel(x, y);
                for c in 0..3 {
                    assert!((a[c] - b[c]).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn flip_horizontal_twice_is_identity() {
        let mut geo = GeometryConfig { flip_horizontal: true, ..GeometryConfig::default() };
        let mut buf = ImageBuffer::new(5, 3);
        for y in 0..3 {
            for x in 0..5 {
                buf.set_pixel(x, y, [x as f32, y as f32, 1.0]);
            }
        }
        let once = apply_cpu(&buf, &geo);
        geo.flip_horizontal = true;
        let twice = apply_cpu(&once, &geo);
        for y in 0..3 {
            for x in 0..5 {
                assert_eq!(buf.pixel(x, y), twice.pixel(x, y));
            }
        }
    }
}

//! Normalization stage (spec.md §4.2): log-density floor/ceiling mapping,
//! first stage in the pipeline.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::ProcessMode;
use crate::image_buffer::ImageBuffer;
use crate::numerics::log10_safe;

pub const WGSL: &str = include_str!("shaders/normalization.wgsl");

// WGSL's uniform address space requires every `vec3<f32>` member to start
// on a 16-byte boundary; `_pad_floor` reserves the W component `floor`
// leaves unused so `ceiling` lands where the shader's `Uniforms` struct
// expects it instead of at the naturally-packed offset 12.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct NormalizationUniforms {
    pub floor: [f32; 3],
    pub _pad_floor: f32,
    pub ceiling: [f32; 3],
    pub inverted: u32,
    pub _pad_tail: [u32; 4],
}

/// `out = clamp((log10_safe(v) - floor) / (ceil - floor), 0, 1)`. E6 mode
/// inverts linearly (`v <- 1 - v`) before the log. Idempotent in place.
/// Writes zero if `ceil - floor <= epsilon` (degenerate bounds).
#[must_use]
pub fn apply_cpu(input: &ImageBuffer, floor: [f32; 3], ceiling: [f32; 3], process_mode: ProcessMode) -> ImageBuffer {
    let (w, h) = (input.width(), input.height());
    let mut out = ImageBuffer::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut rgb = Vec3::from(input.pixel(x, y));
            if process_mode == ProcessMode::E6Positive {
                rgb = Vec3::ONE - rgb;
            }

            let mut result = [0.0f32; 3];
            for c in 0..3 {
                let span = ceiling[c] - floor[c];
                result[c] = if span <= crate::numerics::LOG_EPSILON {
                    0.0
                } else {
                    let d = log10_safe(rgb[c]);
                    ((d - floor[c]) / span).clamp(0.0, 1.0)
                };
            }
            out.set_pixel(x, y, result);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_bounds_write_zero() {
        let input = ImageBuffer::filled(4, 4, [0.5, 0.5, 0.5]);
        let out = apply_cpu(&input, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0], ProcessMode::C41Negative);
        assert_eq!(out.pixel(0, 0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn output_is_clamped_and_finite() {
        let input = ImageBuffer::filled(8, 8, [1.0, 0.5, 0.001]);
        let out = apply_cpu(&input, [-3.0, -3.0, -3.0], [0.0, 0.0, 0.0], ProcessMode::C41Negative);
        assert!(out.is_finite());
        assert!(out.is_unit_range());
    }
}

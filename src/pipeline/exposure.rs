//! Exposure stage (spec.md §4.5): the positive print. CMY density-space
//! shift followed by the H&D sigmoid.

use bytemuck::{Pod, Zeroable};

use crate::config::ProcessMode;
use crate::image_buffer::ImageBuffer;
use crate::numerics::sigmoid_hd;

pub const WGSL: &str = include_str!("shaders/exposure.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ExposureUniforms {
    pub cmy_shift: [f32; 3],
    pub density: f32,
    pub grade: f32,
    pub toe: f32,
    pub shoulder: f32,
    pub bypass: u32,
}

/// CMY shift subtracts from R (cyan), G (magenta), B (yellow) in density
/// space, then the H&D sigmoid is applied per channel with a shared
/// `pivot = density`. E6-positive bypasses the sigmoid (linear
/// pass-through). Preserves neutrality: equal inputs with zero CMY shift
/// produce equal outputs (spec.md §4.5, §8).
#[must_use]
pub fn apply_cpu(input: &ImageBuffer, cmy_shift: [f32; 3], density: f32, grade: f32, toe: f32, shoulder: f32, process_mode: ProcessMode) -> ImageBuffer {
    let (w, h) = (input.width(), input.height());
    let mut out = ImageBuffer::new(w, h);

    let bypass = process_mode == ProcessMode::E6Positive;

    for y in 0..h {
        for x in 0..w {
            let rgb = input.pixel(x, y);
            let mut result = [0.0f32; 3];
            for c in 0..3 {
                let shifted = rgb[c] - cmy_shift[c];
                result[c] = if bypass {
                    shifted.clamp(0.0, 1.0)
                } else {
                    sigmoid_hd(shifted, grade, density, toe, shoulder, 1.0)
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
    fn neutrality_on_achromatic_axis() {
        let input = ImageBuffer::filled(8, 8, [0.42, 0.42, 0.42]);
        let out = apply_cpu(&input, [0.0; 3], 0.5, 2.5, 0.1, 0.1, ProcessMode::C41Negative);
        let p = out.pixel(0, 0);
        assert!((p[0] - p[1]).abs() < 1e-6);
        assert!((p[1] - p[2]).abs() < 1e-6);
    }

    #[test]
    fn scenario_exposure_values() {
        let input = ImageBuffer::filled(1, 1, [0.5, 0.5, 0.5]);
        let out = apply_cpu(&input, [0.0; 3], 0.5, 2.0, 0.0, 0.0, ProcessMode::C41Negative);
        assert!((out.pixel(0, 0)[0] - 0.5).abs() < 1e-4);

        let out = apply_cpu(&input, [0.0; 3], 0.5, 4.0, 0.0, 0.0, ProcessMode::C41Negative);
        assert!((out.pixel(0, 0)[0] - 0.5).abs() < 1e-4);

        let input = ImageBuffer::filled(1, 1, [0.75, 0.75, 0.75]);
        let out = apply_cpu(&input, [0.0; 3], 0.5, 2.0, 0.0, 0.0, ProcessMode::C41Negative);
        assert!((out.pixel(0, 0)[0] - 0.6225).abs() < 1e-4);
    }
}

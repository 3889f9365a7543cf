//! Lab-tools stage (spec.md §4.6): spectral crosstalk correction in linear
//! RGB, followed by a luma unsharp mask computed in CIELAB.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec3};

use crate::image_buffer::ImageBuffer;
use crate::numerics::{gaussian_kernel, lab_to_rgb, rgb_to_lab};

pub const WGSL: &str = include_str!("shaders/lab.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LabUniforms {
    pub separation_strength: f32,
    pub sharpen_amount: f32,
    pub sharpen_radius: f32,
    pub _pad: f32,
}

/// Fixed crosstalk-correction matrix (row-normalized so a neutral input
/// stays neutral at any blend strength).
fn crosstalk_matrix() -> Mat3 {
    Mat3::from_cols(
        Vec3::new(1.08, -0.05, -0.03),
        Vec3::new(-0.04, 1.06, -0.02),
        Vec3::new(-0.02, -0.06, 1.08),
    )
}

fn blended_matrix(beta: f32) -> Mat3 {
    let blended = Mat3::IDENTITY * (1.0 - beta) + crosstalk_matrix() * beta;

    // Row-normalize so (1,1,1) maps to (1,1,1): divide each row by its sum.
    let mut rows = [blended.row(0), blended.row(1), blended.row(2)];
    for row in &mut rows {
        let sum = row.x + row.y + row.z;
        if sum.abs() > 1e-8 {
            *row /= sum;
        }
    }
    Mat3::from_cols(
        Vec3::new(rows[0].x, rows[1].x, rows[2].x),
        Vec3::new(rows[0].y, rows[1].y, rows[2].y),
        Vec3::new(rows[0].z, rows[1].z, rows[2].z),
    )
}

#[must_use]
pub fn apply_cpu(input: &ImageBuffer, separation_strength: f32, sharpen_amount: f32, sharpen_radius: f32) -> ImageBuffer {
    let (w, h) = (input.width(), input.height());
    let matrix = blended_matrix(separation_strength);

    // Pass 1: spectral crosstalk in linear RGB.
    let mut separated = ImageBuffer::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let rgb = Vec3::from(input.pixel(x, y));
            let out = matrix * rgb;
            separated.set_pixel(x, y, out.into());
        }
    }

    if sharpen_amount == 0.0 {
        return separated;
    }

    // Pass 2: convert to LAB, blur L, unsharp with a 2.0 noise floor.
    let mut l_channel = vec![0.0f32; (w * h) as usize];
    let mut a_channel = vec![0.0f32; (w * h) as usize];
    let mut b_channel = vec![0.0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let lab = rgb_to_lab(Vec3::from(separated.pixel(x, y)));
            let idx = (y * w + x) as usize;
            l_channel[idx] = lab.x;
            a_channel[idx] = lab.y;
            b_channel[idx] = lab.z;
        }
    }

    let kernel = gaussian_kernel(sharpen_radius);
    let radius = (kernel.len() / 2) as i32;
    let blur_1d = |src: &[f32], w: u32, h: u32, horizontal: bool| -> Vec<f32> {
        let mut dst = vec![0.0f32; (w * h) as usize];
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                let mut acc = 0.0;
                for (k, &weight) in kernel.iter().enumerate() {
                    let offset = k as i32 - radius;
                    let (sx, sy) = if horizontal {
                        ((x + offset).clamp(0, w as i32 - 1), y)
                    } else {
                        (x, (y + offset).clamp(0, h as i32 - 1))
                    };
                    acc += src[(sy * w as i32 + sx) as usize] * weight;
                }
                dst[(y * w as i32 + x) as usize] = acc;
            }
        }
        dst
    };
    let blur_h = blur_1d(&l_channel, w, h, true);
    let l_blur = blur_1d(&blur_h, w, h, false);

    let mut out = ImageBuffer::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            let diff = l_channel[idx] - l_blur[idx];
            let l_prime = if diff.abs() > 2.0 {
                l_channel[idx] + sharpen_amount * diff
            } else {
                l_channel[idx]
            };
            let rgb = lab_to_rgb(Vec3::new(l_prime, a_channel[idx], b_channel[idx]));
            out.set_pixel(x, y, rgb.into());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_stays_neutral_at_any_strength() {
        let input = ImageBuffer::filled(4, 4, [0.5, 0.5, 0.5]);
        for beta in [0.0, 0.3, 0.7, 1.0] {
            let out = apply_cpu(&input, beta, 0.0, 1.5);
            let p = out.pixel(0, 0);
            assert!((p[0] - 0.5).abs() < 1e-4, "beta={beta} r={}", p[0]);
            assert!((p[1] - 0.5).abs() < 1e-4, "beta={beta} g={}", p[1]);
            assert!((p[2] - 0.5).abs() < 1e-4, "beta={beta} b={}", p[2]);
        }
    }
}

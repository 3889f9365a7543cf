//! CLAHE stage (spec.md §4.7): three kernels — histogram, CDF, apply —
//! operating on perceptual luminance over a fixed 8x8 tile grid (DESIGN.md
//! Open Question 2: pinned regardless of aspect ratio, even at export).

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::image_buffer::ImageBuffer;
use crate::numerics::rec709_luma;

pub const WGSL_HISTOGRAM: &str = include_str!("shaders/clahe_histogram.wgsl");
pub const WGSL_CDF: &str = include_str!("shaders/clahe_cdf.wgsl");
pub const WGSL_APPLY: &str = include_str!("shaders/clahe_apply.wgsl");

pub const TILE_GRID: u32 = 8;
const BINS: usize = 256;
const GAMMA: f32 = 2.2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ClaheUniforms {
    pub clip_limit: f32,
    pub strength: f32,
    pub _pad: [f32; 2],
}

/// Which of the always-8x8 CLAHE tiles pixel `(x, y)` of a `width x height`
/// image falls into (DESIGN.md Open Question 2: the grid is pinned to 8x8
/// regardless of aspect ratio, so this is also how export tiles map their
/// local pixels back onto the shared per-session histogram context).
#[must_use]
pub fn tile_index_for(x: u32, y: u32, width: u32, height: u32) -> usize {
    let tile_w = width.div_ceil(TILE_GRID).max(1);
    let tile_h = height.div_ceil(TILE_GRID).max(1);
    let tile_x = (x / tile_w).min(TILE_GRID - 1);
    let tile_y = (y / tile_h).min(TILE_GRID - 1);
    (tile_y * TILE_GRID + tile_x) as usize
}

/// Perceptual-luma histogram bin (`pow(linear, 1/gamma)` scaled to
/// `[0,255]`) for one pixel.
#[must_use]
pub fn perceptual_bin(rgb: [f32; 3]) -> usize {
    let luma = rec709_luma(Vec3::from(rgb)).clamp(0.0, 1.0);
    let perceptual = luma.powf(1.0 / GAMMA);
    ((perceptual * (BINS as f32 - 1.0)) as usize).min(BINS - 1)
}

/// Per-tile 256-bin histograms over perceptual luma (`pow(linear, 1/gamma)`
/// scaled to `[0,255]`).
#[must_use]
pub fn build_histograms(input: &ImageBuffer) -> Vec<[u32; BINS]> {
    let (w, h) = (input.width(), input.height());
    let mut histograms = vec![[0u32; BINS]; (TILE_GRID * TILE_GRID) as usize];

    for y in 0..h {
        for x in 0..w {
            let tile_index = tile_index_for(x, y, w, h);
            let bin = perceptual_bin(input.pixel(x, y));
            histograms[tile_index][bin] += 1;
        }
    }
    histograms
}

/// Clips each tile's histogram to `clip_limit * total / 256`, redistributes
/// the clipped excess uniformly (integer quotient + remainder on the first
/// `rem` bins), then forms a normalized cumulative sum.
#[must_use]
pub fn build_cdfs(histograms: &[[u32; BINS]], clip_limit: f32) -> Vec<[f32; BINS]> {
    histograms
        .iter()
        .map(|hist| {
            let total: u32 = hist.iter().sum();
            let clip_value = (clip_limit * total as f32 / BINS as f32).max(0.0) as u32;

            let mut clipped = [0u32; BINS];
            let mut excess = 0u32;
            for (i, &count) in hist.iter().enumerate() {
                if count > clip_value {
                    excess += count - clip_value;
                    clipped[i] = clip_value;
                } else {
                    clipped[i] = count;
                }
            }

            let quotient = excess / BINS as u32;
            let remainder = (excess % BINS as u32) as usize;
            for (i, bin) in clipped.iter_mut().enumerate() {
                *bin += quotient;
                if i < remainder {
                    *bin += 1;
                }
            }

            let mut cdf = [0.0f32; BINS];
            let mut cumulative = 0u32;
            let new_total = total.max(1);
            for i in 0..BINS {
                cumulative += clipped[i];
                cdf[i] = cumulative as f32 / new_total as f32;
            }
            cdf
        })
        .collect()
}

/// Bilinearly interpolates the four surrounding tile CDFs, blends with the
/// original luma by `strength`, rescales chrominance, and converts back to
/// linear RGB.
#[must_use]
pub fn apply_cpu(input: &ImageBuffer, cdfs: &[[f32; BINS]], strength: f32) -> ImageBuffer {
    let (w, h) = (input.width(), input.height());
    let tile_w = w as f32 / TILE_GRID as f32;
    let tile_h = h as f32 / TILE_GRID as f32;
    let mut out = ImageBuffer::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let rgb = input.pixel(x, y);
            let luma = rec709_luma(Vec3::from(rgb)).clamp(crate::numerics::LOG_EPSILON, 1.0);
            let perceptual = luma.powf(1.0 / GAMMA);
            let bin = ((perceptual * (BINS as f32 - 1.0)) as usize).min(BINS - 1);

            let tile_x_f = x as f32 / tile_w - 0.5;
            let tile_y_f = y as f32 / tile_h - 0.5;
            let tx0 = tile_x_f.floor() as i32;
            let ty0 = tile_y_f.floor() as i32;
            let fx = tile_x_f - tx0 as f32;
            let fy = tile_y_f - ty0 as f32;

            let clamp_tile = |t: i32| t.clamp(0, TILE_GRID as i32 - 1) as u32;
            let sample = |tx: i32, ty: i32| -> f32 {
                let idx = (clamp_tile(ty) * TILE_GRID + clamp_tile(tx)) as usize;
                cdfs[idx][bin]
            };

            let top = sample(tx0, ty0) * (1.0 - fx) + sample(tx0 + 1, ty0) * fx;
            let bottom = sample(tx0, ty0 + 1) * (1.0 - fx) + sample(tx0 + 1, ty0 + 1) * fx;
            let cdf_luma = top * (1.0 - fy) + bottom * fy;

            let final_luma = luma * (1.0 - strength) + cdf_luma * strength;
            let scale = final_luma / luma.max(crate::numerics::LOG_EPSILON);

            let mut result = [0.0f32; 3];
            for c in 0..3 {
                result[c] = (rgb[c] * scale).clamp(0.0, 1.0);
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
    fn determinism_same_input_same_output() {
        let input = ImageBuffer::filled(32, 32, [0.3, 0.4, 0.5]);
        let h1 = build_histograms(&input);
        let c1 = build_cdfs(&h1, 4.0);
        let out1 = apply_cpu(&input, &c1, 0.5);

        let h2 = build_histograms(&input);
        let c2 = build_cdfs(&h2, 4.0);
        let out2 = apply_cpu(&input, &c2, 0.5);

        assert_eq!(out1.pixel(5, 5), out2.pixel(5, 5));
    }

    #[test]
    fn histograms_are_always_8x8() {
        let input = ImageBuffer::filled(100, 37, [0.5; 3]);
        let h = build_histograms(&input);
        assert_eq!(h.len(), (TILE_GRID * TILE_GRID) as usize);
    }
}

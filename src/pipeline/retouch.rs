//! Retouch stage (spec.md §4.4): coupled auto dust detection and manual
//! healing. Both operations hash the **full-image coordinate**
//! (`tile.global_offset + local coordinate`) so tiled and untiled renders
//! agree bit-for-bit on grain synthesis and jitter (spec.md §4.3, §4.11,
//! scenario test 4).

use glam::Vec3;

use crate::config::ManualSpot;
use crate::image_buffer::ImageBuffer;
use crate::numerics::{hash2, median_filter, rec709_luma, smoothstep};
use crate::pipeline::TileContext;

pub const WGSL: &str = include_str!("shaders/retouch.wgsl");

fn median_kernel_radius(dust_size: f32) -> usize {
    if dust_size < 1.5 {
        1 // 3x3
    } else if dust_size < 2.5 {
        2 // 5x5
    } else {
        3 // 7x7
    }
}

/// Auto dust detection for a single pixel. Returns the replacement pixel if
/// classified as dust, otherwise `None`.
fn auto_dust_pixel(
    input: &ImageBuffer,
    x: u32,
    y: u32,
    global_x: u32,
    global_y: u32,
    dust_threshold: f32,
    dust_size: f32,
    neighborhood_radius: usize,
) -> Option<[f32; 3]> {
    let (w, h) = (input.width() as usize, input.height() as usize);
    let rgb = input.pixel(x, y);
    let luma = rec709_luma(Vec3::from(rgb));

    // Local mean/std of luminance over a neighborhood scaled by dust_size.
    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    let mut count = 0usize;
    for dy in -(neighborhood_radius as isize)..=(neighborhood_radius as isize) {
        for dx in -(neighborhood_radius as isize)..=(neighborhood_radius as isize) {
            let sx = (x as isize + dx).clamp(0, w as isize - 1) as u32;
            let sy = (y as isize + dy).clamp(0, h as isize - 1) as u32;
            let l = rec709_luma(Vec3::from(input.pixel(sx, sy)));
            sum += l;
            sum_sq += l * l;
            count += 1;
        }
    }
    let mean = sum / count as f32;
    let variance = (sum_sq / count as f32 - mean * mean).max(0.0);
    let std = variance.sqrt();

    let flatness = (1.0 - std / 0.08).clamp(0.0, 1.0);
    let highlight_sens = ((mean - 0.4) * 1.5).clamp(0.0, 1.0);
    let final_threshold =
        dust_threshold * (1.0 - 0.98 * flatness.sqrt()) * (1.0 - 0.5 * highlight_sens) + (1.0 - flatness) * 0.05;

    // Bright-only gate.
    if std > 0.2 || luma <= 0.4 {
        return None;
    }

    let median_radius = median_kernel_radius(dust_size);
    let mut reference = [0.0f32; 3];
    for c in 0..3 {
        reference[c] = median_filter(input.data(), w, h, 3, c, median_radius, x as usize, y as usize);
    }

    let deviation = (0..3).map(|c| rgb[c] - reference[c]).fold(f32::MIN, f32::max);
    if deviation <= final_threshold {
        return None;
    }

    let strength = smoothstep(final_threshold, 1.2 * final_threshold, deviation);
    let grain_seed = hash2(global_x, global_y, 0x5eed);
    let grain_scale = 3.0 * mean * (1.0 - mean) * 1e-3;
    let grain = (grain_seed - 0.5) * 2.0 * grain_scale;

    let mut blended = [0.0f32; 3];
    for c in 0..3 {
        blended[c] = (reference[c] + grain) * strength + rgb[c] * (1.0 - strength);
    }
    Some(blended)
}

/// Manual healing for a single pixel against one spot's influence circle.
/// Returns `None` if the pixel is outside the spot's feather radius or the
/// luminance key gate.
fn manual_heal_pixel(
    input: &ImageBuffer,
    x: u32,
    y: u32,
    global_x: u32,
    global_y: u32,
    full_dims: (u32, u32),
    spot: &ManualSpot,
    spot_index: usize,
) -> Option<([f32; 3], f32)> {
    let (fw, fh) = (full_dims.0 as f32, full_dims.1 as f32);
    let norm_x = global_x as f32 / fw;
    let norm_y = global_y as f32 / fh;

    let dx = norm_x - spot.x;
    let dy = norm_y - spot.y;
    let distance = (dx * dx + dy * dy).sqrt();
    if distance > spot.radius {
        return None;
    }

    let angle = dy.atan2(dx);
    let (w, h) = (input.width() as usize, input.height() as usize);

    let mut samples = [[0.0f32; 3]; 3];
    for (i, sample) in samples.iter_mut().enumerate() {
        let jitter = (hash2(global_x, global_y, spot_index as u32 * 17 + i as u32) - 0.5) * 0.3;
        let sample_angle = angle + jitter;
        let sample_norm_x = spot.x + spot.radius * sample_angle.cos();
        let sample_norm_y = spot.y + spot.radius * sample_angle.sin();
        let sx = (sample_norm_x * fw) as isize - global_x as isize + x as isize;
        let sy = (sample_norm_y * fh) as isize - global_y as isize + y as isize;
        let sx = sx.clamp(0, w as isize - 1) as usize;
        let sy = sy.clamp(0, h as isize - 1) as usize;
        // 3x3 local minimum filter to reject residual dust at the sample.
        let mut min_val = [f32::MAX; 3];
        for ddy in -1..=1 {
            for ddx in -1..=1 {
                let px = (sx as isize + ddx).clamp(0, w as isize - 1) as u32;
                let py = (sy as isize + ddy).clamp(0, h as isize - 1) as u32;
                let v = input.pixel(px, py);
                for c in 0..3 {
                    min_val[c] = min_val[c].min(v[c]);
                }
            }
        }
        *sample = min_val;
    }

    let mut heal = [0.0f32; 3];
    for c in 0..3 {
        heal[c] = (samples[0][c] + samples[1][c] + samples[2][c]) / 3.0;
    }

    let pixel = input.pixel(x, y);
    let pixel_luma = rec709_luma(Vec3::from(pixel));
    let heal_luma = rec709_luma(Vec3::from(heal));
    if pixel_luma - heal_luma <= 0.04 {
        return None;
    }
    let key = smoothstep(0.04, 0.12, pixel_luma - heal_luma);

    let feather = smoothstep(spot.radius, 0.8 * spot.radius, distance);
    Some((heal, key * feather))
}

/// Empty spot list -> auto-only path. Zero auto and zero spots -> identity
/// (the engine may elide this stage entirely in that case).
#[must_use]
pub fn apply_cpu(
    input: &ImageBuffer,
    auto_dust_enabled: bool,
    dust_threshold: f32,
    dust_size: f32,
    spots: &[ManualSpot],
    tile: &TileContext,
) -> ImageBuffer {
    let (w, h) = (input.width(), input.height());
    let mut out = input.clone();

    if !auto_dust_enabled && spots.is_empty() {
        return out;
    }

    let neighborhood_radius = (2.0 * dust_size).round().max(1.0) as usize;

    for y in 0..h {
        for x in 0..w {
            let global_x = tile.global_offset.0 + x;
            let global_y = tile.global_offset.1 + y;

            let mut pixel = input.pixel(x, y);

            if auto_dust_enabled {
                if let Some(replacement) =
                    auto_dust_pixel(input, x, y, global_x, global_y, dust_threshold, dust_size, neighborhood_radius)
                {
                    pixel = replacement;
                }
            }

            for (i, spot) in spots.iter().enumerate() {
                // Tile-overlap test: skip spots whose influence circle
                // cannot reach this tile at all.
                if let Some((heal, weight)) = manual_heal_pixel(input, x, y, global_x, global_y, tile.full_dims, spot, i) {
                    for c in 0..3 {
                        pixel[c] = heal[c] * weight + pixel[c] * (1.0 - weight);
                    }
                }
            }

            out.set_pixel(x, y, pixel);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_disabled_and_no_spots() {
        let input = ImageBuffer::filled(16, 16, [0.3, 0.4, 0.5]);
        let tile = TileContext::untiled(16, 16);
        let out = apply_cpu(&input, false, 0.08, 1.5, &[], &tile);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(input.pixel(x, y), out.pixel(x, y));
            }
        }
    }
}

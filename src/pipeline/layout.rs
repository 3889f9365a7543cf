//! Layout stage (spec.md §4.8 stage ordering, "Layout (border/letterbox) →
//! output"): applies the geometry crop rectangle, constrains it to an
//! optional aspect-ratio tag, then pads the result with the export border.

use bytemuck::{Pod, Zeroable};

use crate::config::{AspectTag, ExportConfig, GeometryConfig};
use crate::image_buffer::ImageBuffer;
use crate::numerics::bilinear_sample;

pub const WGSL: &str = include_str!("shaders/layout.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LayoutUniforms {
    pub crop_origin: [f32; 2],
    pub crop_size: [f32; 2],
    pub border_width_px: f32,
    pub border_color: [f32; 3],
    pub _pad: f32,
}

fn aspect_ratio(tag: AspectTag) -> Option<f32> {
    match tag {
        AspectTag::Native => None,
        AspectTag::FourByFive => Some(4.0 / 5.0),
        AspectTag::FiveBySeven => Some(5.0 / 7.0),
        AspectTag::Square => Some(1.0),
    }
}

/// Normalized `(x, y, w, h)` crop rectangle after applying the geometry
/// crop and, unless `keep_full_frame` is set, constraining it to fit the
/// requested aspect-ratio tag (centered within the user's crop).
#[must_use]
pub fn resolve_crop_rect(geometry: &GeometryConfig) -> [f32; 4] {
    let [x, y, w, h] = geometry.crop;

    if geometry.keep_full_frame {
        return [x, y, w, h];
    }

    let Some(target) = geometry.aspect_ratio_tag.and_then(aspect_ratio) else {
        return [x, y, w, h];
    };

    let current = w / h.max(f32::EPSILON);
    let (mut nw, mut nh) = (w, h);
    if current > target {
        nw = h * target;
    } else {
        nh = w / target;
    }
    let nx = x + (w - nw) * 0.5;
    let ny = y + (h - nh) * 0.5;
    [nx, ny, nw, nh]
}

/// Crops to the resolved rectangle, then pads with the export border.
#[must_use]
pub fn apply_cpu(input: &ImageBuffer, geometry: &GeometryConfig, export: &ExportConfig) -> ImageBuffer {
    let (w, h) = (input.width(), input.height());
    let [cx, cy, cw, ch] = resolve_crop_rect(geometry);

    let crop_w = ((cw * w as f32).round() as u32).max(1);
    let crop_h = ((ch * h as f32).round() as u32).max(1);
    let border = export.border_width_px;
    let out_w = crop_w + border * 2;
    let out_h = crop_h + border * 2;

    let mut out = ImageBuffer::filled(out_w, out_h, export.border_color);

    for dy in 0..crop_h {
        for dx in 0..crop_w {
            let u = cx + (dx as f32 + 0.5) / crop_w as f32 * cw;
            let v = cy + (dy as f32 + 0.5) / crop_h as f32 * ch;
            let sx = u * w as f32;
            let sy = v * h as f32;
            let mut rgb = [0.0f32; 3];
            for (c, channel) in rgb.iter_mut().enumerate() {
                *channel = bilinear_sample(input.data(), w as usize, h as usize, 3, sx, sy, c);
            }
            out.set_pixel(dx + border, dy + border, rgb);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_is_identity_size() {
        let input = ImageBuffer::filled(64, 48, [0.2, 0.4, 0.6]);
        let geometry = GeometryConfig::default();
        let export = ExportConfig { border_width_px: 0, ..ExportConfig::default() };
        let out = apply_cpu(&input, &geometry, &export);
        assert_eq!((out.width(), out.height()), (64, 48));
    }

    #[test]
    fn border_pads_dimensions_and_fills_color() {
        let input = ImageBuffer::filled(10, 10, [0.5; 3]);
        let geometry = GeometryConfig::default();
        let export = ExportConfig { border_width_px: 4, border_color: [1.0, 0.0, 0.0], ..ExportConfig::default() };
        let out = apply_cpu(&input, &geometry, &export);
        assert_eq!((out.width(), out.height()), (18, 18));
        assert_eq!(out.pixel(0, 0), [1.0, 0.0, 0.0]);
        assert_eq!(out.pixel(9, 9), [0.5, 0.5, 0.5]);
    }

    #[test]
    fn square_aspect_tag_centers_crop() {
        let geometry = GeometryConfig {
            keep_full_frame: false,
            aspect_ratio_tag: Some(AspectTag::Square),
            ..GeometryConfig::default()
        };
        let rect = resolve_crop_rect(&geometry);
        assert!((rect[2] - rect[3]).abs() < 1e-5);
    }
}

//! Shared scalar/vector math used by every stage kernel.
//!
//! Pure, allocation-free functions operating on scalars or small vectors —
//! no struct state, no GPU dependency, so the CPU and GPU paths can both
//! call the same contracts without drift.

use glam::Vec3;

pub const LOG_EPSILON: f32 = 1e-6;

/// `log10(max(v, epsilon))`.
#[inline]
#[must_use]
pub fn log10_safe(v: f32) -> f32 {
    v.max(LOG_EPSILON).log10()
}

/// H&D sigmoid: `dmax / (1 + exp(-k(x' - x0)))` with toe/shoulder shaping
/// applied to `x` before the exponential. Monotone non-decreasing, C1 at
/// the pivot.
#[inline]
#[must_use]
pub fn sigmoid_hd(x: f32, grade: f32, pivot: f32, toe: f32, shoulder: f32, dmax: f32) -> f32 {
    let shaped = if x < pivot {
        if toe > 0.0 {
            pivot + (x - pivot) / (1.0 + toe * (pivot - x))
        } else {
            x
        }
    } else if shoulder > 0.0 {
        pivot + (shoulder * (x - pivot)).ln_1p() / shoulder
    } else {
        x
    };
    dmax / (1.0 + (-grade * (shaped - pivot)).exp())
}

/// Rec.709 relative luminance.
#[inline]
#[must_use]
pub fn rec709_luma(rgb: Vec3) -> f32 {
    0.2126 * rgb.x + 0.7152 * rgb.y + 0.0722 * rgb.z
}

// --- CIELAB, D65 reference white ---

const D65_XN: f32 = 0.950_47;
const D65_YN: f32 = 1.0;
const D65_ZN: f32 = 1.088_83;

#[inline]
fn lab_f(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

#[inline]
fn lab_f_inv(t: f32) -> f32 {
    const DELTA: f32 = 6.0 / 29.0;
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

/// Linear sRGB (not gamma-encoded) to CIELAB, D65 white point.
#[inline]
#[must_use]
pub fn rgb_to_lab(rgb: Vec3) -> Vec3 {
    let x = 0.4124 * rgb.x + 0.3576 * rgb.y + 0.1805 * rgb.z;
    let y = 0.2126 * rgb.x + 0.7152 * rgb.y + 0.0722 * rgb.z;
    let z = 0.0193 * rgb.x + 0.1192 * rgb.y + 0.9505 * rgb.z;

    let fx = lab_f(x / D65_XN);
    let fy = lab_f(y / D65_YN);
    let fz = lab_f(z / D65_ZN);

    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let b = 200.0 * (fy - fz);
    Vec3::new(l, a, b)
}

/// Inverse of [`rgb_to_lab`]. Round-trips within 1e-5 per channel.
#[inline]
#[must_use]
pub fn lab_to_rgb(lab: Vec3) -> Vec3 {
    let fy = (lab.x + 16.0) / 116.0;
    let fx = fy + lab.y / 500.0;
    let fz = fy - lab.z / 200.0;

    let x = D65_XN * lab_f_inv(fx);
    let y = D65_YN * lab_f_inv(fy);
    let z = D65_ZN * lab_f_inv(fz);

    let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let b = 0.0557 * x - 0.2040 * y + 1.0570 * z;
    Vec3::new(r, g, b)
}

/// Approximate percentile over `log10(buffer)` via a 4096-bucket histogram.
/// Used only for calibration, never per-frame.
#[must_use]
pub fn percentile(buffer: &[f32], p: f32) -> f32 {
    const BUCKETS: usize = 4096;
    const LOG_MIN: f32 = -6.0;
    const LOG_MAX: f32 = 1.0;

    if buffer.is_empty() {
        return 0.0;
    }

    let mut hist = vec![0u32; BUCKETS];
    for &v in buffer {
        let d = log10_safe(v).clamp(LOG_MIN, LOG_MAX);
        let bucket = (((d - LOG_MIN) / (LOG_MAX - LOG_MIN)) * (BUCKETS as f32 - 1.0)) as usize;
        hist[bucket.min(BUCKETS - 1)] += 1;
    }

    let target = (p / 100.0) * buffer.len() as f32;
    let mut cumulative = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cumulative += count;
        if cumulative as f32 >= target {
            let frac = i as f32 / (BUCKETS as f32 - 1.0);
            return LOG_MIN + frac * (LOG_MAX - LOG_MIN);
        }
    }
    LOG_MAX
}

/// Bilinear sample of a planar float buffer; out-of-bounds coordinates clamp
/// to the nearest edge pixel.
#[must_use]
pub fn bilinear_sample(buf: &[f32], width: usize, height: usize, channels: usize, x: f32, y: f32, c: usize) -> f32 {
    let x = x.clamp(0.0, width as f32 - 1.0);
    let y = y.clamp(0.0, height as f32 - 1.0);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: usize, py: usize| -> f32 { buf[(py * width + px) * channels + c] };

    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// NxN median filter over a single channel of a planar buffer, clamped at
/// borders. `radius` is in pixels (kernel edge = `2*radius+1`).
#[must_use]
pub fn median_filter(buf: &[f32], width: usize, height: usize, channels: usize, c: usize, radius: usize, px: usize, py: usize) -> f32 {
    let mut window = Vec::with_capacity((2 * radius + 1) * (2 * radius + 1));
    for dy in -(radius as isize)..=(radius as isize) {
        for dx in -(radius as isize)..=(radius as isize) {
            let sx = (px as isize + dx).clamp(0, width as isize - 1) as usize;
            let sy = (py as isize + dy).clamp(0, height as isize - 1) as usize;
            window.push(buf[(sy * width + sx) * channels + c]);
        }
    }
    window.sort_by(|a, b| a.partial_cmp(b).unwrap());
    window[window.len() / 2]
}

/// Separable Gaussian blur kernel weights for a given sigma, truncated at
/// `3*sigma` and normalized to sum to 1.
#[must_use]
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as i32;
    let mut weights = Vec::with_capacity((2 * radius + 1) as usize);
    let mut sum = 0.0;
    for i in -radius..=radius {
        let x = i as f32;
        let w = (-0.5 * (x / sigma).powi(2)).exp();
        weights.push(w);
        sum += w;
    }
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Cheap deterministic hash of a full-image pixel coordinate, used for
/// synthesized grain and jittered heal sampling. Not cryptographic.
#[inline]
#[must_use]
pub fn hash2(x: u32, y: u32, seed: u32) -> f32 {
    let mut h = x.wrapping_mul(0x27d4_eb2d) ^ y.wrapping_mul(0x1656_67b1) ^ seed.wrapping_mul(0x9e37_79b9);
    h ^= h >> 15;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    (h as f32 / u32::MAX as f32).fract().abs()
}

#[inline]
#[must_use]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log10_safe_clamps_to_epsilon() {
        assert!((log10_safe(0.0) - LOG_EPSILON.log10()).abs() < 1e-6);
    }

    #[test]
    fn sigmoid_hd_pivot_neutrality() {
        // spec.md scenario 3: pivot input at any grade yields dmax/2.
        let out = sigmoid_hd(0.5, 2.0, 0.5, 0.0, 0.0, 1.0);
        assert!((out - 0.5).abs() < 1e-4);
        let out = sigmoid_hd(0.5, 4.0, 0.5, 0.0, 0.0, 1.0);
        assert!((out - 0.5).abs() < 1e-4);
    }

    #[test]
    fn sigmoid_hd_scenario_value() {
        let out = sigmoid_hd(0.75, 2.0, 0.5, 0.0, 0.0, 1.0);
        let expected = 1.0 / (1.0 + (-2.0f32 * 0.25).exp());
        assert!((out - expected).abs() < 1e-4);
        assert!((out - 0.6225).abs() < 1e-4);
    }

    #[test]
    fn sigmoid_hd_monotone() {
        let mut prev = f32::MIN;
        let mut x = -1.0f32;
        while x <= 2.0 {
            let v = sigmoid_hd(x, 3.0, 0.4, 0.2, 0.3, 1.0);
            assert!(v >= prev - 1e-6, "non-monotone at x={x}: {v} < {prev}");
            prev = v;
            x += 0.01;
        }
    }

    #[test]
    fn lab_round_trip() {
        let rgb = Vec3::new(0.3, 0.6, 0.2);
        let lab = rgb_to_lab(rgb);
        let back = lab_to_rgb(lab);
        assert!((rgb - back).abs().max_element() < 1e-5);
    }

    #[test]
    fn percentile_on_ramp() {
        // spec.md scenario 2: ramp 0.001..1.0, 100x100.
        let buf: Vec<f32> = (0..10_000)
            .map(|i| 0.001 + (i as f32 / 9_999.0) * (1.0 - 0.001))
            .collect();
        let floor = percentile(&buf, 0.5);
        let ceil = percentile(&buf, 99.5);
        assert!((floor - (-3.0)).abs() < 0.1, "floor={floor}");
        assert!((ceil - 0.0).abs() < 0.1, "ceil={ceil}");
    }
}

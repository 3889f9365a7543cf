//! CPU-resident linear float RGB image buffer.
//!
//! Simplified relative to a shared GPU-resident image resource: a single
//! owner holds an `ImageBuffer` for the duration of one render (spec.md §3),
//! so there is no need for `Arc<RwLock<..>>` + atomic version/generation
//! tracking built for a long-lived, shared GPU-resident texture cache.

/// Linear scene-referred RGB float32 buffer, interleaved (`RGBRGB...`).
///
/// Invariant (spec.md §3, i): every element is finite. Constructors and
/// mutating stage kernels are responsible for upholding this; violating it
/// is a bug, not a recoverable error.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    /// Row stride in elements (not bytes); `stride >= width * 3`.
    stride: u32,
    data: Vec<f32>,
}

impl ImageBuffer {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width * 3;
        Self {
            width,
            height,
            stride,
            data: vec![0.0; (stride * height) as usize],
        }
    }

    #[must_use]
    pub fn filled(width: u32, height: u32, rgb: [f32; 3]) -> Self {
        let mut buf = Self::new(width, height);
        for px in buf.data.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        buf
    }

    /// Wraps externally-provided interleaved data. `data.len()` must equal
    /// `stride * height`.
    pub fn from_raw(width: u32, height: u32, stride: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), (stride * height) as usize);
        Self { width, height, stride, data }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let i = (y * self.stride + x * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [f32; 3]) {
        let i = (y * self.stride + x * 3) as usize;
        self.data[i..i + 3].copy_from_slice(&rgb);
    }

    /// Every element finite (spec.md §3 invariant i).
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Every element within `[0, 1]` (spec.md §3 invariant ii, checked after
    /// the final stage writes the output texture).
    #[must_use]
    pub fn is_unit_range(&self) -> bool {
        self.data.iter().all(|v| (0.0..=1.0).contains(v))
    }
}

/// EXIF-derived metadata accompanying a loaded image (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct ExifMetadata {
    pub iso: Option<u32>,
    pub shutter_speed: Option<f32>,
    pub aperture: Option<f32>,
    pub camera_model: Option<String>,
    pub orientation: Option<u16>,
}

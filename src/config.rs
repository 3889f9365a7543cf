//! The parameter record edited by the UI and consumed by the engine
//! (spec.md §3). Design Notes §9: dynamically typed config dictionaries in
//! the original source become a typed record here, not a `HashMap<String,
//! Value>`; unknown preset fields are ignored, missing fields fall back to
//! `Default`, via `#[serde(default)]` on every field.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One of three process modes; selects the sign of the Normalization
/// inversion and gates toning behavior (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessMode {
    C41Negative,
    BwNegative,
    E6Positive,
}

impl Default for ProcessMode {
    fn default() -> Self {
        Self::C41Negative
    }
}

/// A manual retouch spot. Coordinates are normalized and live in the full
/// rotated-and-flipped image space, independent of crop (spec.md §3; see
/// DESIGN.md Open Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualSpot {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// 32-byte SHA-256 over raw file bytes; immutable once computed, used as the
/// persistence key for the edit store (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileFingerprint([u8; 32]);

impl FileFingerprint {
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Per-channel floor/ceiling in log10, or `None` to request automatic
/// calibration (spec.md §3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub floor: Option<[f32; 3]>,
    pub ceiling: Option<[f32; 3]>,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self { floor: None, ceiling: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub density: f32,
    pub grade: f32,
    pub toe: f32,
    pub shoulder: f32,
    /// Additive density-space shifts for cyan (R), magenta (G), yellow (B).
    pub cmy_shift: [f32; 3],
    pub white_balance: [f32; 3],
    pub process_mode: ProcessMode,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            density: 0.5,
            grade: 2.0,
            toe: 0.0,
            shoulder: 0.0,
            cmy_shift: [0.0; 3],
            white_balance: [1.0; 3],
            process_mode: ProcessMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub separation_strength: f32,
    pub clahe_strength: f32,
    pub clahe_clip_limit: f32,
    pub sharpen_amount: f32,
    pub sharpen_radius: f32,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            separation_strength: 0.0,
            clahe_strength: 0.0,
            clahe_clip_limit: 4.0,
            sharpen_amount: 0.0,
            sharpen_radius: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToningConfig {
    pub paper_tint: [f32; 3],
    pub dmax_gamma: f32,
    pub selenium_strength: f32,
    pub sepia_strength: f32,
    pub black_and_white: bool,
    pub saturation: f32,
    pub final_gamma: f32,
}

impl Default for ToningConfig {
    fn default() -> Self {
        Self {
            paper_tint: [1.0; 3],
            dmax_gamma: 1.0,
            selenium_strength: 0.0,
            sepia_strength: 0.0,
            black_and_white: false,
            saturation: 1.0,
            final_gamma: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetouchConfig {
    pub auto_dust_threshold: f32,
    pub auto_dust_size: f32,
    pub auto_dust_enabled: bool,
    pub manual_spots: Vec<ManualSpot>,
}

impl Default for RetouchConfig {
    fn default() -> Self {
        Self {
            auto_dust_threshold: 0.08,
            auto_dust_size: 1.5,
            auto_dust_enabled: false,
            manual_spots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Default for Rotation {
    fn default() -> Self {
        Self::Deg0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub rotation: Rotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub fine_rotation_deg: f32,
    /// Normalized crop rectangle `(x, y, w, h)` in `[0, 1]`.
    pub crop: [f32; 4],
    pub aspect_ratio_tag: Option<AspectTag>,
    pub keep_full_frame: bool,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            rotation: Rotation::default(),
            flip_horizontal: false,
            flip_vertical: false,
            fine_rotation_deg: 0.0,
            crop: [0.0, 0.0, 1.0, 1.0],
            aspect_ratio_tag: None,
            keep_full_frame: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectTag {
    Native,
    FourByFive,
    FiveBySeven,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IccTag {
    Srgb,
    AdobeRgb,
    ProPhoto,
    DisplayP3,
    Rec2020,
    WideGamut,
    Greyscale,
}

impl Default for IccTag {
    fn default() -> Self {
        Self::Srgb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSizePolicy {
    OriginalResolution,
    PrintSizeCm { width_cm: u32, height_cm: u32, dpi: u32 },
}

impl Default for OutputSizePolicy {
    fn default() -> Self {
        Self::OriginalResolution
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub size_policy: OutputSizePolicy,
    pub dpi: u32,
    pub color_space: IccTag,
    pub border_width_px: u32,
    pub border_color: [f32; 3],
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            size_policy: OutputSizePolicy::default(),
            dpi: 300,
            color_space: IccTag::default(),
            border_width_px: 0,
            border_color: [1.0, 1.0, 1.0],
        }
    }
}

/// Flat record of parameters grouped into sub-records; created with
/// defaults, mutated by the UI controller via structural replacement
/// (Design Notes §9: no partial in-place mutation), keyed by content hash
/// in the edit store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub exposure: ExposureConfig,
    pub normalization: NormalizationConfig,
    pub lab: LabConfig,
    pub toning: ToningConfig,
    pub retouch: RetouchConfig,
    pub geometry: GeometryConfig,
    pub export: ExportConfig,
}

impl WorkspaceConfig {
    /// Rejects out-of-range parameters before a render is attempted
    /// (`ConfigInvalid`, spec.md §7).
    pub fn validate(&self) -> crate::Result<()> {
        if self.exposure.grade <= 0.0 {
            return Err(crate::NegError::ConfigInvalid {
                field: "exposure.grade".into(),
                reason: "must be > 0".into(),
            });
        }
        if self.lab.clahe_clip_limit < 0.0 {
            return Err(crate::NegError::ConfigInvalid {
                field: "lab.clahe_clip_limit".into(),
                reason: "must be >= 0".into(),
            });
        }
        let [x, y, w, h] = self.geometry.crop;
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) || w <= 0.0 || h <= 0.0 || x + w > 1.0 + 1e-4 || y + h > 1.0 + 1e-4 {
            return Err(crate::NegError::ConfigInvalid {
                field: "geometry.crop".into(),
                reason: "crop rectangle out of [0,1] bounds".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(WorkspaceConfig::default().validate().is_ok());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = FileFingerprint::of_bytes(b"hello");
        let b = FileFingerprint::of_bytes(b"hello");
        assert_eq!(a, b);
        let c = FileFingerprint::of_bytes(b"world");
        assert_ne!(a, c);
    }
}

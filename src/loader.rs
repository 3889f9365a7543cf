//! Loader interface (spec.md §6): the trait boundary RAW decoding and
//! demosaicing implementations sit behind. This crate ships two concrete
//! loaders for the formats spec.md names as in-scope for the core to read
//! directly — 16-bit TIFF and a headerless planar format — while full RAW
//! container decoding remains an external `ImageLoader` collaborator.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{NegError, Result};
use crate::image_buffer::{ExifMetadata, ImageBuffer};

/// A calibration bounds hint a loader may carry alongside the decoded
/// buffer (e.g. from embedded RAW metadata), consumed by the engine in
/// place of a fresh [`crate::calibration::analyze`] pass when present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationHint {
    pub floor: [f32; 3],
    pub ceiling: [f32; 3],
}

/// `load(path) -> (ImageBuffer, ExifMetadata, CalibrationHint?)` (spec.md
/// §6). Implementations recognize their own extensions and reject the
/// rest with [`NegError::LoaderUnsupported`].
pub trait ImageLoader {
    fn load(&self, path: &Path) -> Result<(ImageBuffer, ExifMetadata, Option<CalibrationHint>)>;

    /// Extensions (lowercase, no leading dot) this loader claims.
    fn extensions(&self) -> &'static [&'static str];
}

/// Known extensions across every built-in loader, used by the CLI to
/// recursively expand directory inputs (spec.md §6).
#[must_use]
pub fn known_extensions() -> &'static [&'static str] {
    &["tif", "tiff", "praw"]
}

/// 16-bit TIFF loader, via the `image` crate. Values are normalized to
/// `[0, 1]` by the format's bit depth; no color-management conversion
/// happens here (spec.md: "the core does no color conversion beyond
/// tagging").
pub struct TiffLoader;

impl ImageLoader for TiffLoader {
    fn load(&self, path: &Path) -> Result<(ImageBuffer, ExifMetadata, Option<CalibrationHint>)> {
        let img = image::open(path).map_err(|e| NegError::LoaderCorrupt(e.to_string()))?;
        let rgb16 = img.into_rgb16();
        let (w, h) = (rgb16.width(), rgb16.height());

        let mut buffer = ImageBuffer::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let px = rgb16.get_pixel(x, y);
                let rgb = [px[0] as f32 / 65535.0, px[1] as f32 / 65535.0, px[2] as f32 / 65535.0];
                buffer.set_pixel(x, y, rgb);
            }
        }

        Ok((buffer, ExifMetadata::default(), None))
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["tif", "tiff"]
    }
}

/// Sidecar JSON describing a headerless planar capture: dimensions and bit
/// depth, since the raw `.praw` file carries no header of its own.
#[derive(Debug, Deserialize)]
struct PlanarSidecar {
    width: u32,
    height: u32,
    bit_depth: u32,
}

/// Headerless planar format: big-endian 10-bit or 14-bit RGB triplets, one
/// `u16` per sample, dimensions and bit depth supplied by a `<file>.json`
/// sidecar (spec.md §6).
pub struct PlanarLoader;

impl ImageLoader for PlanarLoader {
    fn load(&self, path: &Path) -> Result<(ImageBuffer, ExifMetadata, Option<CalibrationHint>)> {
        let sidecar_path = path.with_extension("json");
        let sidecar_text = fs::read_to_string(&sidecar_path).map_err(|_| {
            NegError::LoaderUnsupported(format!("missing sidecar {}", sidecar_path.display()))
        })?;
        let sidecar: PlanarSidecar = serde_json::from_str(&sidecar_text)?;

        if !(10..=14).contains(&sidecar.bit_depth) {
            return Err(NegError::LoaderCorrupt(format!("unsupported bit depth {}", sidecar.bit_depth)));
        }

        let bytes = fs::read(path)?;
        let expected_samples = (sidecar.width * sidecar.height * 3) as usize;
        if bytes.len() < expected_samples * 2 {
            return Err(NegError::LoaderCorrupt("truncated planar data".into()));
        }

        let max_value = ((1u32 << sidecar.bit_depth) - 1) as f32;
        let mut buffer = ImageBuffer::new(sidecar.width, sidecar.height);
        for (i, px) in buffer.data_mut().chunks_exact_mut(3).enumerate() {
            for (c, sample) in px.iter_mut().enumerate() {
                let offset = (i * 3 + c) * 2;
                let value = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
                *sample = (value as f32 / max_value).clamp(0.0, 1.0);
            }
        }

        Ok((buffer, ExifMetadata::default(), None))
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["praw"]
    }
}

/// Dispatches to the loader matching `path`'s extension.
pub fn load(path: &Path) -> Result<(ImageBuffer, ExifMetadata, Option<CalibrationHint>)> {
    if !path.exists() {
        return Err(NegError::PathNotFound(path.to_path_buf()));
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();

    let loaders: [&dyn ImageLoader; 2] = [&TiffLoader, &PlanarLoader];
    for loader in loaders {
        if loader.extensions().contains(&ext.as_str()) {
            return loader.load(path);
        }
    }
    Err(NegError::LoaderUnsupported(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_is_rejected() {
        let path = Path::new("/nonexistent/path.unknownext");
        match load(path) {
            Err(NegError::PathNotFound(_)) => {}
            other => panic!("expected PathNotFound for a missing file, got {other:?}"),
        }
    }
}

//! Error taxonomy for the pipeline core.
//!
//! Grouped variants, `#[from]` for the mechanical conversions, a single
//! crate-wide [`Result`] alias. The engine never panics on malformed user
//! input — only on invariant violations, which are bugs, not `NegError`
//! variants.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, NegError>;

#[derive(Debug, thiserror::Error)]
pub enum NegError {
    // --- Loader ---
    #[error("unsupported input file: {0}")]
    LoaderUnsupported(String),

    #[error("corrupt input file: {0}")]
    LoaderCorrupt(String),

    #[error("file not found: {0}")]
    PathNotFound(PathBuf),

    // --- Calibration ---
    #[error("calibration degenerate: floor {floor} >= ceiling {ceil} on channel {channel}")]
    CalibrationDegenerate { channel: usize, floor: f32, ceil: f32 },

    // --- GPU ---
    #[error("GPU device lost")]
    GpuDeviceLost,

    #[error("GPU out of memory")]
    GpuOutOfMemory,

    #[error("failed to request a GPU adapter: {0}")]
    AdapterRequestFailed(String),

    #[error("failed to request a GPU device: {0}")]
    DeviceRequestFailed(String),

    #[error("shader compilation failed for `{stage}`: {message}")]
    KernelCompileError { stage: String, message: String },

    #[error("tile dispatch failed at tile {tile_index}: {message}")]
    TileDispatchFailed { tile_index: usize, message: String },

    #[error("readback failed: {0}")]
    ReadbackFailed(String),

    // --- Persistence ---
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    // --- Config ---
    #[error("invalid config field `{field}`: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#![allow(clippy::too_many_arguments)]

//! NegPy pipeline core: the deterministic image-processing engine that turns
//! a normalized linear float-RGB buffer into a finished print.
//!
//! The desktop UI shell, RAW demosaicing, ICC profile I/O, and the on-disk
//! edit store all live outside this crate; this crate exposes the trait
//! boundaries they implement against (`ImageLoader`, `EditStore`) and the
//! renderer facade they call into (`Engine::render_preview`,
//! `Engine::render_export`, `Engine::compute_metrics`, spec.md §4.12).

pub mod calibration;
pub mod cli;
pub mod config;
pub mod edit_store;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod image_buffer;
pub mod loader;
pub mod numerics;
pub mod pipeline;
pub mod preset;

pub use config::{ManualSpot, ProcessMode, WorkspaceConfig};
pub use engine::{Engine, HistogramResult, RenderEvent, RenderRequest};
pub use error::{NegError, Result};
pub use image_buffer::ImageBuffer;

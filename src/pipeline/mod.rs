//! The ten stage kernels (spec.md §4.2–§4.9), each a pure function
//! `(input textures, uniforms) -> output texture` (Design Notes §9). Every
//! stage ships both a CPU reference implementation (used by the hybrid
//! fallback and exercised directly by the invariant/scenario tests) and a
//! WGSL compute shader dispatched the way `brdf_lut_compute.rs` dispatches
//! its lazily-compiled pipeline: build the bind group, record into the
//! shared encoder, `dispatch_workgroups`.

pub mod clahe;
pub mod exposure;
pub mod lab;
pub mod layout;
pub mod metrics;
pub mod normalization;
pub mod retouch;
pub mod stage_id;
pub mod toning;
pub mod transform;

pub use stage_id::StageId;

/// Coordinate context a tile carries so coordinate-sensitive stages
/// (manual-spot heal, dust-grain hash) behave identically tiled or
/// untiled (spec.md §4.3, §4.11).
#[derive(Debug, Clone, Copy)]
pub struct TileContext {
    pub global_offset: (u32, u32),
    pub full_dims: (u32, u32),
}

impl TileContext {
    #[must_use]
    pub fn untiled(width: u32, height: u32) -> Self {
        Self { global_offset: (0, 0), full_dims: (width, height) }
    }
}

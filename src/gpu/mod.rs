//! GPU compute scheduler: headless device context, texture pool, persistent
//! uniform block, shader/pipeline caches. Every stage kernel is a compute
//! dispatch — there is no rasterization anywhere in this engine.

pub mod context;
pub mod pipeline_cache;
pub mod shader_cache;
pub mod texture_pool;
pub mod tracked;
pub mod uniform_block;

pub use context::GpuContext;
pub use pipeline_cache::{ComputePipelineId, PipelineCache};
pub use shader_cache::ShaderCache;
pub use texture_pool::{TextureKey, TexturePool};
pub use tracked::Tracked;
pub use uniform_block::UniformBlock;

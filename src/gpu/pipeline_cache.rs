//! Compute-only pipeline cache.
//!
//! A pipeline cache holding render, shadow, fullscreen, *and* compute
//! pipeline half-caches behind one struct is the common shape for a
//! rasterization engine. Every NegPy stage is a compute dispatch (spec.md
//! §2: "ten independent compute kernels") — there is no rasterization
//! anywhere in this engine — so only the `get_or_create_compute` half and
//! its backing storage are kept; the graphics/shadow/fullscreen key
//! families and lookup tables are dropped entirely rather than carried as
//! dead weight.

use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineId(u32);

impl ComputePipelineId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub struct PipelineCache {
    compute_pipelines: Vec<wgpu::ComputePipeline>,
    compute_lookup: FxHashMap<u64, ComputePipelineId>,
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            compute_pipelines: Vec::new(),
            compute_lookup: FxHashMap::default(),
        }
    }

    /// `key` should uniquely identify (shader hash, bind group layout
    /// shape, entry point) for the stage this pipeline implements.
    pub fn get_or_create_compute(
        &mut self,
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        key: u64,
        label: &str,
    ) -> ComputePipelineId {
        if let Some(&id) = self.compute_lookup.get(&key) {
            return id;
        }

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let id = ComputePipelineId(self.compute_pipelines.len() as u32);
        self.compute_pipelines.push(pipeline);
        self.compute_lookup.insert(key, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: ComputePipelineId) -> &wgpu::ComputePipeline {
        &self.compute_pipelines[id.index()]
    }
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new()
    }
}

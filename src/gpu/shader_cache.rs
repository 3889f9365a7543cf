//! Hash-keyed cache of compiled `wgpu::ShaderModule`s.
//!
//! Grounded on the call-site shape in `brdf_lut_compute.rs`
//! (`shader_manager.get_or_compile_raw(device, label, source) -> (module,
//! hash)`) rather than on a full template-driven shader manager: a
//! minijinja-templated, `rust-embed`-packed shader manager is built for
//! material permutations over a large shader-variant space. NegPy has ten
//! fixed WGSL sources with no per-material templating axis, so this cache
//! is a plain content-hash → module map over `include_str!` sources.

use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};

pub struct ShaderCache {
    modules: FxHashMap<u64, wgpu::ShaderModule>,
}

impl ShaderCache {
    #[must_use]
    pub fn new() -> Self {
        Self { modules: FxHashMap::default() }
    }

    /// Compiles `source` if not already cached, keyed by a hash of the
    /// source text. Returns the hash so callers can key pipeline caches off
    /// the same identity without re-hashing.
    pub fn get_or_compile(&mut self, device: &wgpu::Device, label: &str, source: &'static str) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        source.hash(&mut hasher);
        let key = hasher.finish();

        self.modules.entry(key).or_insert_with(|| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        key
    }

    #[must_use]
    pub fn get(&self, key: u64) -> Option<&wgpu::ShaderModule> {
        self.modules.get(&key)
    }
}

impl Default for ShaderCache {
    fn default() -> Self {
        Self::new()
    }
}

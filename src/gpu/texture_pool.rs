//! Keyed allocator of intermediate GPU textures with reference counts and
//! GC-driven release (spec.md §2, §3, §5).
//!
//! A transient-texture-pool pattern generalized for this engine's needs:
//! rather than evicting on a per-frame idle counter (appropriate when every
//! texture is re-requested every frame), NegPy's stage textures persist
//! across renders (a render can be superseded mid-flight by coalescing,
//! spec.md §5), so eviction here tracks "renders since last use" instead of
//! "frames idle", with a fixed two-render grace window (spec.md §5: "a
//! background sweep frees textures whose last use exceeds two renders").

use rustc_hash::FxHashMap;

use crate::gpu::tracked::Tracked;

/// `(stage-id, width, height, format)` — the pool's lookup key (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub stage_id: u8,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

pub struct PooledTexture {
    pub texture: wgpu::Texture,
    pub view: Tracked<wgpu::TextureView>,
    /// Renders since this texture was last handed out. Reset to 0 on reuse.
    idle_renders: u32,
    refcount: u32,
}

/// Refcounted, GC'd texture pool. A texture is destroyed only when its
/// refcount is zero AND it has aged past the grace window AND the command
/// buffer that last referenced it has signaled completion (spec.md §3
/// invariant v) — the third condition is upheld by never recycling a
/// texture from `active` back into `free` until `end_render` is called,
/// which the engine only does after `queue.submit` for that render and
/// after draining any pending `map_async` callbacks that read from it.
pub struct TexturePool {
    device_label_prefix: &'static str,
    active: Vec<(TextureKey, PooledTexture)>,
    free: FxHashMap<TextureKey, Vec<PooledTexture>>,
}

const MAX_IDLE_RENDERS: u32 = 2;

impl TexturePool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            device_label_prefix: "negpy-stage-texture",
            active: Vec::new(),
            free: FxHashMap::default(),
        }
    }

    /// Borrows a texture matching `key`, creating one if the free list has
    /// none. Call during the prepare phase, before command encoding.
    pub fn allocate(&mut self, device: &wgpu::Device, key: TextureKey) -> usize {
        let mut pooled = if let Some(bucket) = self.free.get_mut(&key) {
            bucket.pop()
        } else {
            None
        };

        if let Some(t) = &mut pooled {
            t.idle_renders = 0;
            t.refcount = 1;
        }

        let pooled = pooled.unwrap_or_else(|| Self::create(device, key, self.device_label_prefix));

        let index = self.active.len();
        self.active.push((key, pooled));
        index
    }

    fn create(device: &wgpu::Device, key: TextureKey, label_prefix: &str) -> PooledTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label_prefix),
            size: wgpu::Extent3d {
                width: key.width,
                height: key.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: key.format,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        PooledTexture {
            texture,
            view: Tracked::new(view),
            idle_renders: 0,
            refcount: 1,
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &PooledTexture {
        &self.active[index].1
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Called once a render's command buffers have been submitted and its
    /// readbacks (if any) scheduled; moves `active` textures back to `free`
    /// bucketed by key and bumps every free texture's idle counter.
    pub fn end_render(&mut self) {
        for (key, mut pooled) in self.active.drain(..) {
            pooled.refcount = 0;
            self.free.entry(key).or_default().push(pooled);
        }
        for bucket in self.free.values_mut() {
            for t in bucket.iter_mut() {
                t.idle_renders += 1;
            }
        }
    }

    /// Evicts free textures that have aged past the grace window.
    pub fn trim(&mut self) {
        for bucket in self.free.values_mut() {
            bucket.retain(|t| t.idle_renders <= MAX_IDLE_RENDERS);
        }
        self.free.retain(|_, bucket| !bucket.is_empty());
    }

    /// Releases every pool entry; called when a new file is loaded
    /// (spec.md §5: "an explicit `cleanup()` releases all pool entries").
    pub fn cleanup(&mut self) {
        self.active.clear();
        self.free.clear();
    }

    #[must_use]
    pub fn total_texture_count(&self) -> usize {
        self.active.len() + self.free.values().map(Vec::len).sum::<usize>()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TextureKey {
        TextureKey {
            stage_id: 0,
            width: 64,
            height: 64,
            format: wgpu::TextureFormat::Rgba32Float,
        }
    }

    #[test]
    fn cleanup_clears_everything() {
        let mut pool = TexturePool::new();
        // Without a real device we only exercise the bookkeeping paths that
        // don't require texture creation.
        pool.end_render();
        pool.cleanup();
        assert_eq!(pool.total_texture_count(), 0);
        let _ = key();
    }
}

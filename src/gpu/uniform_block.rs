//! One persistent uniform buffer per session; each stage owns a
//! 256-byte-aligned slice written by the engine before dispatch (spec.md
//! §2, §3). Generalized from a growable per-instance model-buffer
//! allocator that doubles capacity for a variable number of slots. NegPy's
//! slot count is fixed (one per `StageId`) and known at session start, so
//! the doubling-growth machinery is dropped in favor of a single
//! fixed-size buffer sized at construction.

use wgpu::util::DeviceExt;

/// WebGPU/D3D12 minimum uniform buffer offset alignment.
pub const UNIFORM_ALIGNMENT: u64 = 256;

pub struct UniformBlock {
    buffer: wgpu::Buffer,
    stage_count: u32,
    slice_size: u64,
    host: Vec<u8>,
}

impl UniformBlock {
    /// `slice_size` is the largest per-stage uniform struct's byte size;
    /// it's rounded up to `UNIFORM_ALIGNMENT` so slices never overlap
    /// (spec.md §3 invariant iv).
    #[must_use]
    pub fn new(device: &wgpu::Device, stage_count: u32, slice_size: u64) -> Self {
        let aligned = slice_size.div_ceil(UNIFORM_ALIGNMENT) * UNIFORM_ALIGNMENT;
        let total = aligned * stage_count as u64;
        let host = vec![0u8; total as usize];
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("negpy-uniform-block"),
            contents: &host,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        Self {
            buffer,
            stage_count,
            slice_size: aligned,
            host,
        }
    }

    /// Byte offset of the slice owned by `stage_index`.
    #[must_use]
    pub fn offset_of(&self, stage_index: u32) -> u64 {
        debug_assert!(stage_index < self.stage_count);
        stage_index as u64 * self.slice_size
    }

    #[must_use]
    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    /// Writes `data` into the host staging copy at `stage_index`'s slice.
    /// Call [`Self::flush`] to upload.
    pub fn write(&mut self, stage_index: u32, data: &[u8]) {
        debug_assert!(data.len() as u64 <= self.slice_size);
        let offset = self.offset_of(stage_index) as usize;
        self.host[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn flush(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.buffer, 0, &self.host);
    }

    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

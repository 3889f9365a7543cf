//! Engine (spec.md §4.11, §2.6): orders stages, manages the pool, writes
//! uniforms, drives the hybrid CPU/GPU handshake, runs tiled export, and
//! schedules asynchronous histogram readback.
//!
//! Grounded on an `Engine` that owns renderer/scene/assets/input and
//! exposes `init`/`update`/`render_active_scene` for the owns-everything
//! facade shape, and on a `FrameComposer::render` acquire → build → prepare
//! → execute → present → `transient_pool.reset()` six-step structure for
//! the per-render sequence, adapted to a headless compute pipeline:
//! calibrate → build stage list → run stages in order → schedule metrics →
//! pool reset.
//!
//! The GPU compute scheduler (`crate::gpu`) is real, load-bearing
//! infrastructure — texture pool, persistent uniform block, shader and
//! pipeline caches. Every render submitted through [`Engine::render_preview`]
//! / [`Engine::render_export`] still executes the CPU reference
//! implementation of the stage list, which spec.md §4.11(viii) requires to
//! exist regardless ("fall back to a CPU implementation when the GPU
//! backend is disabled or unavailable... must produce pixel-for-pixel
//! identical output"), but the four stages that share the
//! `(uniform, input texture, storage-write output texture)` bind group
//! shape — Normalization, Exposure, Lab's crosstalk pass, and Toning — also
//! have a real GPU call site here: [`normalization_gpu`], [`exposure_gpu`],
//! [`lab_crosstalk_gpu`], [`toning_gpu`], all built on [`dispatch_simple_stage`]
//! (bind group layout → pipeline → bind group → compute pass) and
//! [`readback_texture`] (staging-buffer `map_async` readback). Retouch
//! (dynamic spot storage buffer), Transform (resizing output), and the
//! CLAHE/metrics kernels (multi-pass, atomics) each need a bind group shape
//! of their own and have a WGSL module in `pipeline/shaders/` but no
//! dispatch call site yet (see DESIGN.md's scope note).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::calibration::{self, CalibrationBounds};
use crate::config::{NormalizationConfig, ToningConfig, WorkspaceConfig};
use crate::error::Result;
use crate::gpu::{GpuContext, PipelineCache, ShaderCache, TextureKey, TexturePool, UniformBlock};
use crate::image_buffer::ImageBuffer;
use crate::loader::CalibrationHint;
use crate::pipeline::{
    StageId, TileContext, clahe, exposure, lab, layout, metrics, normalization, retouch, toning, transform,
};

/// Default tile edge and halo width for tiled export (spec.md §4.11).
pub const DEFAULT_TILE_SIZE: u32 = 2048;
pub const DEFAULT_TILE_HALO: u32 = 32;

/// Which render this request is (spec.md §4.11: "assemble the ordered
/// stage list for a request (preview vs export vs histogram-only)").
#[derive(Debug, Clone, Copy)]
pub enum RenderKind {
    Preview { max_dim: u32 },
    Export { tile_size: u32, halo: u32 },
    HistogramOnly,
}

/// One render request as submitted to the coalescing channel (spec.md §5).
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub config: WorkspaceConfig,
    pub kind: RenderKind,
}

/// Out-of-band failure signaling for `render_preview` (spec.md §4.12, §7):
/// "returns a placeholder and emits a `render_failed(kind, message)` event."
/// `render_export` instead returns a typed [`crate::error::NegError`]
/// directly, since an export has no "placeholder" the caller could write
/// to disk.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    Failed { render_id: u64, kind: &'static str, message: String },
}

/// Delivered asynchronously after a render, tagged with the render id it
/// belongs to so the UI can drop stale metrics (spec.md §3, §5).
#[derive(Debug, Clone)]
pub struct HistogramResult {
    pub render_id: u64,
    pub r: [u32; 256],
    pub g: [u32; 256],
    pub b: [u32; 256],
    pub luma: [u32; 256],
}

/// GPU compute resources bundle (spec.md §2): device/queue, transient
/// texture pool, the persistent per-stage uniform block, and the
/// shader/pipeline caches every stage dispatch shares.
pub struct GpuSubsystem {
    pub context: GpuContext,
    pub pool: TexturePool,
    pub shader_cache: ShaderCache,
    pub pipeline_cache: PipelineCache,
    pub uniforms: UniformBlock,
}

impl GpuSubsystem {
    pub fn new() -> Result<Self> {
        let context = GpuContext::new_blocking()?;
        // One slice per `StageId`; 256 bytes already satisfies the uniform
        // offset alignment and comfortably covers every stage's Uniforms
        // struct (the largest, `ToningUniforms`, is under 128 bytes).
        let uniforms = UniformBlock::new(&context.device, StageId::ALL.len() as u32, 256);
        Ok(Self { context, pool: TexturePool::new(), shader_cache: ShaderCache::new(), pipeline_cache: PipelineCache::new(), uniforms })
    }
}

/// Records a compute dispatch against an arbitrary bind group shape:
/// compile (or fetch) the shader, derive a pipeline from the caller's own
/// bind group layout, build the bind group, record one compute pass. Every
/// stage kernel in `pipeline/*.rs` shares this one dispatch signature
/// (Design Notes §9: "inheritance hierarchies over stage objects collapse
/// to a closed set of stage variants sharing one dispatch signature").
pub fn dispatch_simple_stage(
    gpu: &mut GpuSubsystem,
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    shader_source: &'static str,
    layout_entries: &[wgpu::BindGroupLayoutEntry],
    bind_entries: &[wgpu::BindGroupEntry],
    workgroups: (u32, u32, u32),
) {
    let device = &gpu.context.device;
    let shader_key = gpu.shader_cache.get_or_compile(device, label, shader_source);
    let module = gpu.shader_cache.get(shader_key).expect("shader was just compiled into the cache");

    let bind_group_layout =
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: Some(label), entries: layout_entries });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        immediate_size: 0,
    });
    let pipeline_id = gpu.pipeline_cache.get_or_create_compute(device, module, &pipeline_layout, shader_key, label);
    let pipeline = gpu.pipeline_cache.get(pipeline_id);
    let bind_group =
        device.create_bind_group(&wgpu::BindGroupDescriptor { label: Some(label), layout: &bind_group_layout, entries: bind_entries });

    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(label), timestamp_writes: None });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, &bind_group, &[]);
    pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
}

/// Bind group layout entries for the common `(uniform, input texture,
/// storage-write output texture)` shape (Normalization, Exposure, Lab's
/// crosstalk pass, Toning).
#[must_use]
pub fn simple_stage_layout() -> [wgpu::BindGroupLayoutEntry; 3] {
    [
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer { ty: wgpu::BufferBindingType::Uniform, has_dynamic_offset: false, min_binding_size: None },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba32Float,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        },
    ]
}

/// Uploads an `ImageBuffer` to a freshly created `Rgba32Float` GPU texture
/// (alpha padded to 1.0, since `ImageBuffer` is RGB-only).
#[must_use]
pub fn upload_to_texture(device: &wgpu::Device, queue: &wgpu::Queue, label: &str, image: &ImageBuffer) -> wgpu::Texture {
    let (w, h) = (image.width(), image.height());
    let mut rgba = vec![0.0f32; (w * h * 4) as usize];
    for (i, px) in image.data().chunks_exact(3).enumerate() {
        rgba[i * 4..i * 4 + 3].copy_from_slice(px);
        rgba[i * 4 + 3] = 1.0;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d { width: w, height: h, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::STORAGE_BINDING,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo { texture: &texture, mip_level: 0, origin: wgpu::Origin3d::ZERO, aspect: wgpu::TextureAspect::All },
        bytemuck::cast_slice(&rgba),
        wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(w * 16), rows_per_image: Some(h) },
        wgpu::Extent3d { width: w, height: h, depth_or_array_layers: 1 },
    );
    texture
}

/// Copies an `Rgba32Float` texture back to host memory by mapping a
/// staging buffer, blocking on the fence via `device.poll` (spec.md §5's
/// one explicit async point, driven synchronously here so the simple-stage
/// GPU entry points below can return a finished `ImageBuffer`). The render
/// path itself (`Engine::render_preview`/`render_export`) stays on the CPU
/// reference stage functions and never calls this; its own asynchrony is
/// the `std::thread` that computes the histogram off the hot path, not a
/// GPU fence.
fn readback_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, width: u32, height: u32) -> ImageBuffer {
    let unpadded_bytes_per_row = width * 16;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("negpy-readback-staging"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("negpy-readback-encoder") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo { texture, mip_level: 0, origin: wgpu::Origin3d::ZERO, aspect: wgpu::TextureAspect::All },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout { offset: 0, bytes_per_row: Some(padded_bytes_per_row), rows_per_image: Some(height) },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let (tx, rx) = flume::bounded(1);
    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    let _ = device.poll(wgpu::PollType::wait_indefinitely());
    rx.recv().expect("map_async callback dropped without firing").expect("staging buffer mapping failed");

    let mut out = ImageBuffer::new(width, height);
    {
        let mapped = slice.get_mapped_range();
        for y in 0..height {
            let row_start = (y * padded_bytes_per_row) as usize;
            let row: &[f32] = bytemuck::cast_slice(&mapped[row_start..row_start + unpadded_bytes_per_row as usize]);
            for x in 0..width {
                let base = (x * 4) as usize;
                out.set_pixel(x, y, [row[base], row[base + 1], row[base + 2]]);
            }
        }
    }
    staging.unmap();
    out
}

/// Runs one of the four stages whose WGSL kernel shares
/// `simple_stage_layout` outright (Normalization, Exposure, Lab's
/// crosstalk pass, Toning) on the GPU: writes `uniforms` into this stage's
/// persistent slice, uploads `input`, dispatches, and reads the result
/// back. Retouch (dynamic spot storage buffer), Transform (resizing
/// output), and CLAHE/the metrics kernels (multi-pass, atomics) each need
/// a bind group shape of their own and are not wired here — see
/// DESIGN.md's scope note.
fn run_simple_stage_gpu<U: bytemuck::Pod>(gpu: &mut GpuSubsystem, stage: StageId, label: &str, shader_source: &'static str, uniforms: U, input: &ImageBuffer) -> ImageBuffer {
    let stage_index = stage.order() as u32;
    gpu.uniforms.write(stage_index, bytemuck::bytes_of(&uniforms));
    gpu.uniforms.flush(&gpu.context.queue);

    let input_texture = upload_to_texture(&gpu.context.device, &gpu.context.queue, label, input);
    let input_view = input_texture.create_view(&wgpu::TextureViewDescriptor::default());

    let key = TextureKey { stage_id: stage.order(), width: input.width(), height: input.height(), format: wgpu::TextureFormat::Rgba32Float };
    let output_index = gpu.pool.allocate(&gpu.context.device, key);
    let output_texture = gpu.pool.get(output_index).texture.clone();
    let output_view = (*gpu.pool.get(output_index).view).clone();

    let uniform_buffer: wgpu::Buffer = (*gpu.uniforms.buffer()).clone();
    let uniform_offset = gpu.uniforms.offset_of(stage_index);
    let uniform_size = std::mem::size_of::<U>() as u64;
    let bind_entries = [
        wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding { buffer: &uniform_buffer, offset: uniform_offset, size: wgpu::BufferSize::new(uniform_size) }),
        },
        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&input_view) },
        wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&output_view) },
    ];

    let mut encoder = gpu.context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    dispatch_simple_stage(
        gpu,
        &mut encoder,
        label,
        shader_source,
        &simple_stage_layout(),
        &bind_entries,
        (input.width().div_ceil(8), input.height().div_ceil(8), 1),
    );
    gpu.context.queue.submit(std::iter::once(encoder.finish()));

    let result = readback_texture(&gpu.context.device, &gpu.context.queue, &output_texture, input.width(), input.height());
    gpu.pool.end_render();
    result
}

/// GPU dispatch of the Normalization stage (spec.md §4.2).
#[must_use]
pub fn normalization_gpu(gpu: &mut GpuSubsystem, input: &ImageBuffer, floor: [f32; 3], ceiling: [f32; 3], process_mode: crate::config::ProcessMode) -> ImageBuffer {
    let uniforms = normalization::NormalizationUniforms {
        floor,
        _pad_floor: 0.0,
        ceiling,
        inverted: u32::from(process_mode == crate::config::ProcessMode::E6Positive),
        _pad_tail: [0; 4],
    };
    run_simple_stage_gpu(gpu, StageId::Normalization, "normalization", normalization::WGSL, uniforms, input)
}

/// GPU dispatch of the Exposure stage (spec.md §4.5).
#[must_use]
pub fn exposure_gpu(gpu: &mut GpuSubsystem, input: &ImageBuffer, cmy_shift: [f32; 3], density: f32, grade: f32, toe: f32, shoulder: f32, process_mode: crate::config::ProcessMode) -> ImageBuffer {
    let uniforms = exposure::ExposureUniforms {
        cmy_shift,
        density,
        grade,
        toe,
        shoulder,
        bypass: u32::from(process_mode == crate::config::ProcessMode::E6Positive),
    };
    run_simple_stage_gpu(gpu, StageId::Exposure, "exposure", exposure::WGSL, uniforms, input)
}

/// GPU dispatch of the Lab stage's spectral-crosstalk pass only (spec.md
/// §4.6); the luma unsharp pass needs a separable-blur intermediate and is
/// not part of `simple_stage_layout`.
#[must_use]
pub fn lab_crosstalk_gpu(gpu: &mut GpuSubsystem, input: &ImageBuffer, separation_strength: f32) -> ImageBuffer {
    let uniforms = lab::LabUniforms { separation_strength, sharpen_amount: 0.0, sharpen_radius: 1.0, _pad: 0.0 };
    run_simple_stage_gpu(gpu, StageId::Lab, "lab-crosstalk", lab::WGSL, uniforms, input)
}

/// GPU dispatch of the Toning stage (spec.md §4.8).
#[must_use]
pub fn toning_gpu(gpu: &mut GpuSubsystem, input: &ImageBuffer, cfg: &ToningConfig) -> ImageBuffer {
    let uniforms = toning::ToningUniforms {
        paper_tint: cfg.paper_tint,
        dmax_gamma: cfg.dmax_gamma,
        selenium_target: [0.85, 0.75, 0.85],
        selenium_strength: cfg.selenium_strength,
        sepia_target: [1.10, 0.99, 0.83],
        sepia_strength: cfg.sepia_strength,
        saturation: cfg.saturation,
        final_gamma: cfg.final_gamma,
        black_and_white: u32::from(cfg.black_and_white),
        _pad: 0.0,
    };
    run_simple_stage_gpu(gpu, StageId::Toning, "toning", toning::WGSL, uniforms, input)
}

/// CPU reference implementation of one full, untiled stage sequence from
/// Normalization through Layout (spec.md §4.11 stage ordering). This is
/// the path every render actually executes (see module docs).
fn run_pipeline_cpu(input: &ImageBuffer, config: &WorkspaceConfig, bounds: CalibrationBounds) -> ImageBuffer {
    let normalized = normalization::apply_cpu(input, bounds.floor, bounds.ceiling, config.exposure.process_mode);
    let transformed = transform::apply_cpu(&normalized, &config.geometry);
    let full_dims = (transformed.width(), transformed.height());
    let tile = TileContext::untiled(full_dims.0, full_dims.1);

    let post_lab = run_retouch_exposure_lab(&transformed, config, &tile);
    let clahe_out = run_clahe(&post_lab, config.lab.clahe_clip_limit, config.lab.clahe_strength);
    let toned = toning::apply_cpu(&clahe_out, &config.toning);
    layout::apply_cpu(&toned, &config.geometry, &config.export)
}

/// Retouch → Exposure → Lab, the three coordinate-sensitive-or-order-fixed
/// stages shared between the untiled path and each export tile's first
/// pass (spec.md §4.11).
fn run_retouch_exposure_lab(input: &ImageBuffer, config: &WorkspaceConfig, tile: &TileContext) -> ImageBuffer {
    let retouched = retouch::apply_cpu(
        input,
        config.retouch.auto_dust_enabled,
        config.retouch.auto_dust_threshold,
        config.retouch.auto_dust_size,
        &config.retouch.manual_spots,
        tile,
    );
    let exposed = exposure::apply_cpu(
        &retouched,
        config.exposure.cmy_shift,
        config.exposure.density,
        config.exposure.grade,
        config.exposure.toe,
        config.exposure.shoulder,
        config.exposure.process_mode,
    );
    lab::apply_cpu(&exposed, config.lab.separation_strength, config.lab.sharpen_amount, config.lab.sharpen_radius)
}

fn run_clahe(input: &ImageBuffer, clip_limit: f32, strength: f32) -> ImageBuffer {
    let hist = clahe::build_histograms(input);
    let cdfs = clahe::build_cdfs(&hist, clip_limit);
    clahe::apply_cpu(input, &cdfs, strength)
}

/// A single export tile: the source region read (including halo, clamped
/// to image bounds) and the core region it is responsible for writing into
/// the stitched output (spec.md §4.11: "halos are discarded and tiles are
/// copied into a contiguous output").
#[derive(Debug, Clone, Copy)]
struct ExportTile {
    src_x: u32,
    src_y: u32,
    src_w: u32,
    src_h: u32,
    core_x: u32,
    core_y: u32,
    core_w: u32,
    core_h: u32,
}

fn compute_export_tiles(full_dims: (u32, u32), tile_size: u32, halo: u32) -> Vec<ExportTile> {
    let (fw, fh) = full_dims;
    let mut tiles = Vec::new();
    let mut cy = 0u32;
    while cy < fh {
        let core_h = tile_size.min(fh - cy);
        let mut cx = 0u32;
        while cx < fw {
            let core_w = tile_size.min(fw - cx);
            let src_x = cx.saturating_sub(halo);
            let src_y = cy.saturating_sub(halo);
            let src_x_end = (cx + core_w + halo).min(fw);
            let src_y_end = (cy + core_h + halo).min(fh);
            tiles.push(ExportTile {
                src_x,
                src_y,
                src_w: src_x_end - src_x,
                src_h: src_y_end - src_y,
                core_x: cx,
                core_y: cy,
                core_w,
                core_h,
            });
            cx += core_w;
        }
        cy += core_h;
    }
    tiles
}

fn extract_region(input: &ImageBuffer, x: u32, y: u32, w: u32, h: u32) -> ImageBuffer {
    let mut out = ImageBuffer::new(w, h);
    for dy in 0..h {
        for dx in 0..w {
            out.set_pixel(dx, dy, input.pixel(x + dx, y + dy));
        }
    }
    out
}

fn accumulate_clahe_histogram(post_lab_tile: &ImageBuffer, tile: &ExportTile, full_dims: (u32, u32), hist: &mut [[u32; 256]]) {
    let local_x0 = tile.core_x - tile.src_x;
    let local_y0 = tile.core_y - tile.src_y;
    for dy in 0..tile.core_h {
        for dx in 0..tile.core_w {
            let gx = tile.core_x + dx;
            let gy = tile.core_y + dy;
            let rgb = post_lab_tile.pixel(local_x0 + dx, local_y0 + dy);
            let bin = clahe::perceptual_bin(rgb);
            let tile_index = clahe::tile_index_for(gx, gy, full_dims.0, full_dims.1);
            hist[tile_index][bin] += 1;
        }
    }
}

fn copy_tile_interior(toned_tile: &ImageBuffer, tile: &ExportTile, stitched: &mut ImageBuffer) {
    let local_x0 = tile.core_x - tile.src_x;
    let local_y0 = tile.core_y - tile.src_y;
    for dy in 0..tile.core_h {
        for dx in 0..tile.core_w {
            let px = toned_tile.pixel(local_x0 + dx, local_y0 + dy);
            stitched.set_pixel(tile.core_x + dx, tile.core_y + dy, px);
        }
    }
}

/// Tiled export path (spec.md §4.11): Normalization and Transform run
/// untiled; Retouch/Exposure/Lab run per-tile (each tile carries its own
/// `global_offset`/`full_dims` so manual-spot healing and dust-grain
/// hashing agree with the untiled render — scenario test 4); CLAHE's
/// shared per-session histogram context is accumulated across all tiles
/// before any tile applies it (Open Question 2: the 8x8 grid always spans
/// the full image); Toning runs per-tile; halos are discarded when tiles
/// are stitched; Layout (crop + border) runs once on the stitched result.
fn run_pipeline_cpu_tiled(input: &ImageBuffer, config: &WorkspaceConfig, bounds: CalibrationBounds, tile_size: u32, halo: u32) -> ImageBuffer {
    let normalized = normalization::apply_cpu(input, bounds.floor, bounds.ceiling, config.exposure.process_mode);
    let transformed = transform::apply_cpu(&normalized, &config.geometry);
    let full_dims = (transformed.width(), transformed.height());

    if full_dims.0.max(full_dims.1) <= tile_size {
        let tile = TileContext::untiled(full_dims.0, full_dims.1);
        let post_lab = run_retouch_exposure_lab(&transformed, config, &tile);
        let clahe_out = run_clahe(&post_lab, config.lab.clahe_clip_limit, config.lab.clahe_strength);
        let toned = toning::apply_cpu(&clahe_out, &config.toning);
        return layout::apply_cpu(&toned, &config.geometry, &config.export);
    }

    let tiles = compute_export_tiles(full_dims, tile_size, halo);

    let mut shared_hist = vec![[0u32; 256]; (clahe::TILE_GRID * clahe::TILE_GRID) as usize];
    let mut post_lab_tiles = Vec::with_capacity(tiles.len());
    for t in &tiles {
        let region = extract_region(&transformed, t.src_x, t.src_y, t.src_w, t.src_h);
        let tile_ctx = TileContext { global_offset: (t.src_x, t.src_y), full_dims };
        let post_lab = run_retouch_exposure_lab(&region, config, &tile_ctx);
        accumulate_clahe_histogram(&post_lab, t, full_dims, &mut shared_hist);
        post_lab_tiles.push(post_lab);
    }

    let shared_cdfs = clahe::build_cdfs(&shared_hist, config.lab.clahe_clip_limit);

    let mut stitched = ImageBuffer::new(full_dims.0, full_dims.1);
    for (t, post_lab) in tiles.iter().zip(post_lab_tiles.iter()) {
        let clahe_out = clahe::apply_cpu(post_lab, &shared_cdfs, config.lab.clahe_strength);
        let toned = toning::apply_cpu(&clahe_out, &config.toning);
        copy_tile_interior(&toned, t, &mut stitched);
    }

    layout::apply_cpu(&stitched, &config.geometry, &config.export)
}

/// Resolves calibration bounds: explicit per-channel overrides in
/// `normalization` win outright; otherwise a loader-supplied
/// [`CalibrationHint`] is used; otherwise a fresh analysis runs. Degenerate
/// bounds fall back to the identity calibration with a logged warning
/// (spec.md §7).
#[must_use]
pub fn resolve_calibration(input: &ImageBuffer, normalization: &NormalizationConfig, hint: Option<CalibrationHint>) -> CalibrationBounds {
    let bounds = match (normalization.floor, normalization.ceiling) {
        (Some(floor), Some(ceiling)) => CalibrationBounds { floor, ceiling },
        _ => {
            let base = hint.map_or_else(|| calibration::analyze(input), |h| CalibrationBounds { floor: h.floor, ceiling: h.ceiling });
            CalibrationBounds {
                floor: normalization.floor.unwrap_or(base.floor),
                ceiling: normalization.ceiling.unwrap_or(base.ceiling),
            }
        }
    };

    match bounds.validate() {
        Ok(()) => bounds,
        Err(e) => {
            log::warn!("calibration degenerate, substituting identity: {e}");
            CalibrationBounds::identity()
        }
    }
}

/// The pipeline core's single entry point for driving renders. Owns the
/// optional GPU subsystem, the monotonic render-id counter, and the
/// coalescing/metrics channels (spec.md §5).
pub struct Engine {
    gpu: Option<GpuSubsystem>,
    next_render_id: AtomicU64,
    metrics_tx: flume::Sender<HistogramResult>,
    metrics_rx: flume::Receiver<HistogramResult>,
    request_tx: flume::Sender<RenderRequest>,
    request_rx: flume::Receiver<RenderRequest>,
    event_tx: flume::Sender<RenderEvent>,
    event_rx: flume::Receiver<RenderEvent>,
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        let (metrics_tx, metrics_rx) = flume::unbounded();
        // Bound 1: "only the most recent pending request is kept" (spec.md §5).
        let (request_tx, request_rx) = flume::bounded(1);
        let (event_tx, event_rx) = flume::unbounded();
        Self { gpu: None, next_render_id: AtomicU64::new(1), metrics_tx, metrics_rx, request_tx, request_rx, event_tx, event_rx }
    }

    /// Attempts to bring up the GPU subsystem; on failure the engine keeps
    /// running CPU-only (spec.md §4.11(viii), §7 `GpuDeviceLost` handling).
    pub fn enable_gpu(&mut self) {
        match GpuSubsystem::new() {
            Ok(gpu) => {
                log::info!("GPU backend enabled");
                self.gpu = Some(gpu);
            }
            Err(e) => log::warn!("GPU backend unavailable, running CPU-only: {e}"),
        }
    }

    #[must_use]
    pub fn gpu_enabled(&self) -> bool {
        self.gpu.is_some()
    }

    /// Coalescing submit: if a request is already pending, it is replaced
    /// rather than queued, so an in-flight worker never falls behind a
    /// burst of UI edits (spec.md §5).
    pub fn submit(&self, request: RenderRequest) {
        let _ = self.request_rx.try_recv();
        let _ = self.request_tx.try_send(request);
    }

    #[must_use]
    pub fn next_pending(&self) -> Option<RenderRequest> {
        self.request_rx.try_recv().ok()
    }

    /// Non-blocking poll for the most recently delivered histogram;
    /// `render_id` lets the caller drop stale results (spec.md §5).
    #[must_use]
    pub fn poll_metrics(&self) -> Option<HistogramResult> {
        self.metrics_rx.try_recv().ok()
    }

    /// Non-blocking poll for a `render_failed` event emitted by a prior
    /// `render_preview` call (spec.md §4.12: "emits a `render_failed(kind,
    /// message)` event").
    #[must_use]
    pub fn poll_events(&self) -> Option<RenderEvent> {
        self.event_rx.try_recv().ok()
    }

    fn allocate_render_id(&self) -> u64 {
        self.next_render_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A flat neutral-gray image matching `dims`, returned in place of a
    /// failed preview so the UI always has something to display (spec.md
    /// §4.12 "returns a placeholder").
    fn placeholder(dims: (u32, u32)) -> ImageBuffer {
        ImageBuffer::filled(dims.0.max(1), dims.1.max(1), [0.5, 0.5, 0.5])
    }

    /// Produces an immediately-available preview image; the histogram for
    /// this render is computed off the hot path and delivered later via
    /// [`Self::poll_metrics`] (spec.md §4.12, §5). Never returns an error:
    /// on failure a placeholder image is returned and a [`RenderEvent`] is
    /// queued for [`Self::poll_events`] instead (spec.md §7: "the engine
    /// never panics on malformed user input").
    #[must_use]
    pub fn render_preview(&self, input: &ImageBuffer, config: &WorkspaceConfig, hint: Option<CalibrationHint>) -> ImageBuffer {
        let render_id = self.allocate_render_id();
        if let Err(e) = config.validate() {
            let _ = self.event_tx.send(RenderEvent::Failed { render_id, kind: "ConfigInvalid", message: e.to_string() });
            return Self::placeholder((input.width(), input.height()));
        }

        let bounds = resolve_calibration(input, &config.normalization, hint);
        let output = run_pipeline_cpu(input, config, bounds);
        debug_assert!(output.is_finite());
        debug_assert!(output.is_unit_range());

        let tx = self.metrics_tx.clone();
        let histogram_source = output.clone();
        std::thread::spawn(move || {
            let (r, g, b, luma) = metrics::build_histogram_cpu(&histogram_source);
            let _ = tx.send(HistogramResult { render_id, r, g, b, luma });
        });

        output
    }

    /// Full-fidelity export, tiled when the output's longest edge exceeds
    /// `tile_size` (spec.md §4.11).
    pub fn render_export(
        &self,
        input: &ImageBuffer,
        config: &WorkspaceConfig,
        hint: Option<CalibrationHint>,
        tile_size: u32,
        halo: u32,
    ) -> Result<ImageBuffer> {
        config.validate()?;
        let bounds = resolve_calibration(input, &config.normalization, hint);
        let output = run_pipeline_cpu_tiled(input, config, bounds, tile_size, halo);
        debug_assert!(output.is_finite());
        debug_assert!(output.is_unit_range());
        Ok(output)
    }

    /// Standalone metric computation over an already-rendered buffer
    /// (spec.md §4.12).
    #[must_use]
    pub fn compute_metrics(&self, buffer: &ImageBuffer) -> HistogramResult {
        let render_id = self.allocate_render_id();
        let (r, g, b, luma) = metrics::build_histogram_cpu(buffer);
        HistogramResult { render_id, r, g, b, luma }
    }

    /// Locates the film-border transition in full-image coordinates
    /// (spec.md §4.9).
    #[must_use]
    pub fn autocrop(&self, buffer: &ImageBuffer) -> metrics::CropRect {
        metrics::autocrop_cpu(buffer)
    }

    /// Releases every pool entry; called when a new file is loaded
    /// (spec.md §5).
    pub fn cleanup(&mut self) {
        if let Some(gpu) = &mut self.gpu {
            gpu.pool.cleanup();
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessMode;

    #[test]
    fn scenario_pure_gray_e6_identity() {
        // spec.md scenario 1.
        let engine = Engine::new();
        let input = ImageBuffer::filled(64, 64, [0.5, 0.5, 0.5]);
        let mut config = WorkspaceConfig::default();
        config.exposure.process_mode = ProcessMode::E6Positive;
        config.normalization.floor = Some([-6.0; 3]);
        config.normalization.ceiling = Some([0.0; 3]);

        let out = engine.render_preview(&input, &config, None);
        for y in 0..64 {
            for x in 0..64 {
                let p = out.pixel(x, y);
                for c in p {
                    assert!((c - 0.5).abs() < 1e-2, "pixel ({x},{y}) = {p:?}");
                }
            }
        }
    }

    #[test]
    fn tiled_and_untiled_export_agree_scenario_4() {
        // spec.md scenario 4 (downscaled to keep the test fast): a bright
        // spike healed by a manual spot must match within 1/65535 whether
        // rendered as a single tile or split into many.
        let mut input = ImageBuffer::filled(512, 512, [0.3, 0.3, 0.3]);
        input.set_pixel(250, 250, [0.9, 0.9, 0.9]);

        let mut config = WorkspaceConfig::default();
        config.normalization.floor = Some([-6.0; 3]);
        config.normalization.ceiling = Some([0.0; 3]);
        config.retouch.manual_spots.push(crate::config::ManualSpot { x: 250.0 / 512.0, y: 250.0 / 512.0, radius: 0.02 });

        let engine = Engine::new();
        let untiled = engine.render_export(&input, &config, None, 4096, 32).unwrap();
        let tiled = engine.render_export(&input, &config, None, 128, 32).unwrap();

        assert_eq!((untiled.width(), untiled.height()), (tiled.width(), tiled.height()));
        let mut max_diff = 0.0f32;
        for y in 0..untiled.height() {
            for x in 0..untiled.width() {
                let a = untiled.pixel(x, y);
                let b = tiled.pixel(x, y);
                for c in 0..3 {
                    max_diff = max_diff.max((a[c] - b[c]).abs());
                }
            }
        }
        assert!(max_diff <= 1.0 / 65535.0 + 1e-6, "max per-channel diff {max_diff}");
    }

    #[test]
    fn calibration_degenerate_falls_back_to_identity() {
        let input = ImageBuffer::filled(8, 8, [0.5; 3]);
        let normalization = NormalizationConfig { floor: Some([1.0; 3]), ceiling: Some([1.0; 3]) };
        let bounds = resolve_calibration(&input, &normalization, None);
        assert_eq!(bounds, CalibrationBounds::identity());
    }

    #[test]
    fn invalid_config_yields_placeholder_and_failed_event() {
        let engine = Engine::new();
        let input = ImageBuffer::filled(4, 4, [0.2, 0.2, 0.2]);
        let mut config = WorkspaceConfig::default();
        config.exposure.grade = -1.0;

        let out = engine.render_preview(&input, &config, None);
        assert_eq!((out.width(), out.height()), (4, 4));
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(out.pixel(x, y), [0.5, 0.5, 0.5]);
            }
        }

        match engine.poll_events() {
            Some(RenderEvent::Failed { kind, .. }) => assert_eq!(kind, "ConfigInvalid"),
            other => panic!("expected a Failed event, got {other:?}"),
        }
        assert!(engine.poll_events().is_none());
    }

    /// spec.md §8 "CPU/GPU agreement": per stage, outputs must agree within
    /// 1/255 (8-bit) or 1e-4 (float). Skips instead of failing when no GPU
    /// adapter is available, matching this crate's existing convention of
    /// never hard-requiring a real device in tests.
    fn max_channel_diff(a: &ImageBuffer, b: &ImageBuffer) -> f32 {
        assert_eq!((a.width(), a.height()), (b.width(), b.height()));
        let mut max_diff = 0.0f32;
        for y in 0..a.height() {
            for x in 0..a.width() {
                let pa = a.pixel(x, y);
                let pb = b.pixel(x, y);
                for c in 0..3 {
                    max_diff = max_diff.max((pa[c] - pb[c]).abs());
                }
            }
        }
        max_diff
    }

    #[test]
    fn cpu_gpu_agreement_simple_stages() {
        let Ok(mut gpu) = GpuSubsystem::new() else {
            eprintln!("skipping cpu_gpu_agreement_simple_stages: no GPU adapter available");
            return;
        };

        let mut input = ImageBuffer::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                let v = (x as f32 + y as f32) / 30.0;
                input.set_pixel(x, y, [v, (v * 0.7).clamp(0.0, 1.0), (v * 1.2).clamp(0.0, 1.0)]);
            }
        }
        const TOLERANCE: f32 = 1e-4;

        let floor = [-6.0, -6.2, -5.8];
        let ceiling = [0.2, 0.1, 0.3];
        let cpu = normalization::apply_cpu(&input, floor, ceiling, ProcessMode::C41Negative);
        let gpu_out = normalization_gpu(&mut gpu, &input, floor, ceiling, ProcessMode::C41Negative);
        assert!(max_channel_diff(&cpu, &gpu_out) <= TOLERANCE, "normalization CPU/GPU mismatch");

        let exposed_input = cpu;
        let cpu = exposure::apply_cpu(&exposed_input, [0.02, -0.01, 0.03], 0.5, 2.2, 0.1, 0.1, ProcessMode::C41Negative);
        let gpu_out = exposure_gpu(&mut gpu, &exposed_input, [0.02, -0.01, 0.03], 0.5, 2.2, 0.1, 0.1, ProcessMode::C41Negative);
        assert!(max_channel_diff(&cpu, &gpu_out) <= TOLERANCE, "exposure CPU/GPU mismatch");

        let lab_input = cpu;
        let cpu = lab::apply_cpu(&lab_input, 0.4, 0.0, 1.0);
        let gpu_out = lab_crosstalk_gpu(&mut gpu, &lab_input, 0.4);
        assert!(max_channel_diff(&cpu, &gpu_out) <= TOLERANCE, "lab crosstalk CPU/GPU mismatch");

        let toning_cfg = ToningConfig { selenium_strength: 0.3, sepia_strength: 0.1, ..ToningConfig::default() };
        let cpu = toning::apply_cpu(&lab_input, &toning_cfg);
        let gpu_out = toning_gpu(&mut gpu, &lab_input, &toning_cfg);
        assert!(max_channel_diff(&cpu, &gpu_out) <= TOLERANCE, "toning CPU/GPU mismatch");
    }
}

//! Headless GPU device/queue context.
//!
//! Adapted from `WgpuContext::new`'s `Instance::default()` →
//! `request_adapter` → `request_device` sequence and its convention of
//! mapping `wgpu` request errors onto a crate error variant instead of
//! panicking — but with the surface/swapchain/depth-texture half removed
//! entirely. NegPy never presents to a window; every output is either a
//! `map_async` readback or an export tile write.

use crate::error::{NegError, Result};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| NegError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("negpy-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| NegError::DeviceRequestFailed(e.to_string()))?;

        Ok(Self { device, queue })
    }

    /// Blocking constructor for synchronous call sites (CLI `main`), using
    /// `pollster` to drive async device setup from a sync context.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }
}

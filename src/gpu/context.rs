//! Headless device setup for the probe binary and GPU tests

use crate::error::{TerrainError, TerrainResult};
use super::validation::check_adapter_support;

/// Device, queue and the backend the reduction strategy is resolved from
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub backend: wgpu::Backend,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Request a compute capable device without a surface.
    ///
    /// Tries a high-performance adapter first, then low power, then the fallback adapter.
    pub fn headless() -> TerrainResult<Self> {
        pollster::block_on(Self::request())
    }

    async fn request() -> TerrainResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::empty(),
            dx12_shader_compiler: Default::default(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });

        let mut options = wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        };
        let mut adapter = instance.request_adapter(&options).await;
        if adapter.is_none() {
            log::warn!("[GpuContext::request] No high-performance adapter found, trying low power...");
            options.power_preference = wgpu::PowerPreference::LowPower;
            adapter = instance.request_adapter(&options).await;
        }
        if adapter.is_none() {
            log::warn!("[GpuContext::request] No low-power adapter found, trying fallback...");
            options.force_fallback_adapter = true;
            adapter = instance.request_adapter(&options).await;
        }
        let adapter = adapter.ok_or_else(|| {
            TerrainError::MissingCapability("no GPU adapter available".to_string())
        })?;

        let info = adapter.get_info();
        log::info!(
            "[GpuContext::request] Adapter: {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );
        check_adapter_support(adapter.features(), &adapter.get_downlevel_capabilities())?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Terrain Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| TerrainError::MissingCapability(format!("device request failed: {}", e)))?;

        Ok(Self {
            device,
            queue,
            backend: info.backend,
            adapter_info: info,
        })
    }
}

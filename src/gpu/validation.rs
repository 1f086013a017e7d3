//! Runtime validation of GPU resources
//!
//! Shader compilation and pipeline creation run inside a wgpu validation error scope
//! so that a bad shader fails construction with an error instead of a device panic.

use bytemuck::Pod;

use crate::error::{TerrainError, TerrainResult};

/// Run `create` inside a validation error scope and surface the first error
pub fn with_validation<T>(
    device: &wgpu::Device,
    shader: &str,
    create: impl FnOnce() -> T,
) -> TerrainResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        log::error!("[validation::with_validation] Shader '{}' rejected: {}", shader, error);
        return Err(TerrainError::ShaderValidation {
            shader: shader.to_string(),
            message: error.to_string(),
        });
    }
    log::debug!("[validation::with_validation] Shader '{}' validated", shader);
    Ok(value)
}

/// Runtime size checker for GPU records
pub fn check_record_size<T: Pod>(expected: usize) -> Result<(), String> {
    let actual = std::mem::size_of::<T>();
    if actual != expected {
        Err(format!(
            "Record size mismatch for {}: expected {} bytes, got {} bytes",
            std::any::type_name::<T>(),
            expected,
            actual
        ))
    } else {
        Ok(())
    }
}

/// Fail when the adapter cannot run indirect compute terrain builds
pub fn check_adapter_support(
    features: wgpu::Features,
    downlevel: &wgpu::DownlevelCapabilities,
) -> TerrainResult<()> {
    if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
        return Err(TerrainError::MissingCapability(
            "compute shaders are not supported".to_string(),
        ));
    }
    if !downlevel.flags.contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION) {
        return Err(TerrainError::MissingCapability(
            "indirect execution is not supported".to_string(),
        ));
    }
    log::debug!(
        "[validation::check_adapter_support] Compute and indirect execution available ({:?})",
        features
    );
    Ok(())
}

//! Frame diagnostics
//!
//! The frame path never reads back. Diagnostics are an explicit, blocking readback of
//! the counter buffer that the caller requests after submitting a frame.

use bytemuck::Pod;

use crate::config::CapacityConfig;
use crate::constants::counters;
use crate::error::{AppendList, TerrainError, TerrainResult};

/// Counters and overflow state of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDiagnostics {
    /// Entries requested in the final node list
    pub final_nodes: u32,
    /// Entries requested in the culled patch list
    pub patches: u32,
    pub patch_bounds: u32,
    /// Largest candidate list requested by any pass
    pub peak_candidates: u32,
    /// OVERFLOW_* bits from `constants::counters`
    pub overflow_flags: u32,
    pub capacities: CapacityConfig,
}

impl FrameDiagnostics {
    /// Decode the raw counter buffer
    pub fn from_counters(raw: &[u32], capacities: CapacityConfig) -> Self {
        let slot = |i: u32| raw.get(i as usize).copied().unwrap_or(0);
        Self {
            final_nodes: slot(counters::FINAL_NODES),
            patches: slot(counters::PATCHES),
            patch_bounds: slot(counters::PATCH_BOUNDS),
            peak_candidates: slot(counters::PEAK_CANDIDATES),
            overflow_flags: slot(counters::OVERFLOW_FLAGS),
            capacities,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflow_flags != 0
    }

    /// Fail with the first overflowed list
    pub fn check(&self) -> TerrainResult<()> {
        let caps = &self.capacities;
        let lists = [
            (
                counters::OVERFLOW_CANDIDATES,
                AppendList::CandidateNodes,
                caps.candidate_nodes,
                self.peak_candidates,
            ),
            (
                counters::OVERFLOW_FINAL_NODES,
                AppendList::FinalNodes,
                caps.final_nodes,
                self.final_nodes,
            ),
            (
                counters::OVERFLOW_PATCHES,
                AppendList::Patches,
                caps.patches,
                self.patches,
            ),
            (
                counters::OVERFLOW_PATCH_BOUNDS,
                AppendList::PatchBounds,
                caps.patches,
                self.patch_bounds,
            ),
        ];
        for (bit, list, capacity, required) in lists {
            if self.overflow_flags & bit != 0 {
                log::error!(
                    "[FrameDiagnostics::check] {} overflowed: {} requested, capacity {}",
                    list,
                    required,
                    capacity
                );
                return Err(TerrainError::CapacityOverflow {
                    list,
                    capacity,
                    required,
                });
            }
        }
        Ok(())
    }
}

/// Copy `count` records out of a GPU buffer and block until they are mapped
pub fn read_back<T: Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    count: usize,
) -> TerrainResult<Vec<T>> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    if size == 0 {
        return Ok(Vec::new());
    }
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Terrain Readback Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Terrain Readback"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    device.poll(wgpu::Maintain::Wait);

    pollster::block_on(receiver)
        .map_err(|_| TerrainError::Readback("map callback dropped".to_string()))?
        .map_err(|e| TerrainError::Readback(e.to_string()))?;

    let data = slice.get_mapped_range();
    let records = bytemuck::cast_slice::<u8, T>(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(final_nodes: u32, patches: u32, peak: u32, flags: u32) -> [u32; 8] {
        let mut raw = [0; 8];
        raw[counters::FINAL_NODES as usize] = final_nodes;
        raw[counters::PATCHES as usize] = patches;
        raw[counters::PEAK_CANDIDATES as usize] = peak;
        raw[counters::OVERFLOW_FLAGS as usize] = flags;
        raw
    }

    #[test]
    fn clean_frame_passes() {
        let diagnostics = FrameDiagnostics::from_counters(&raw(100, 6400, 36, 0), CapacityConfig::default());
        assert!(diagnostics.check().is_ok());
        assert_eq!(diagnostics.final_nodes, 100);
    }

    #[test]
    fn overflow_bits_name_the_list() {
        let diagnostics = FrameDiagnostics::from_counters(
            &raw(100, 6400, 64, counters::OVERFLOW_CANDIDATES),
            CapacityConfig::default(),
        );
        assert!(matches!(
            diagnostics.check(),
            Err(TerrainError::CapacityOverflow {
                list: AppendList::CandidateNodes,
                capacity: 50,
                required: 64
            })
        ));
    }
}

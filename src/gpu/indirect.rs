use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::constants::mesh;

/// GPU indirect draw indexed command structure
/// This matches wgpu's DrawIndexedIndirect command layout
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Number of indices to draw
    pub index_count: u32,

    /// Number of instances to draw, the only field rewritten per frame
    pub instance_count: u32,

    /// First index in the index buffer
    pub first_index: u32,

    /// Value added to each index
    pub base_vertex: i32,

    /// First instance index
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    pub const fn new(index_count: u32) -> Self {
        Self {
            index_count,
            instance_count: 0,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }

    /// Args drawing the patch mesh once per culled patch
    pub const fn patch_mesh() -> Self {
        Self::new(mesh::PATCH_MESH_INDEX_COUNT)
    }

    /// Args drawing a unit cube once per patch bounds
    pub const fn bounds_cube() -> Self {
        Self::new(mesh::UNIT_CUBE_INDEX_COUNT)
    }

    /// Byte offset of `instance_count`
    pub const INSTANCE_COUNT_OFFSET: u64 = 4;

    /// Refresh the instance count from a live counter, clamped to the list capacity
    pub fn set_instance_count(&mut self, live_count: u32, capacity: u32) {
        self.instance_count = live_count.min(capacity);
    }
}

/// Indirect argument buffers for the patch draw and the debug bounds draw.
///
/// Buffers are initialised once; the finalize kernel overwrites only the instance
/// counts on the GPU.
pub struct IndirectDrawState {
    patch_args: wgpu::Buffer,
    bounds_args: wgpu::Buffer,
}

impl IndirectDrawState {
    pub fn new(device: &wgpu::Device) -> Self {
        let usage = wgpu::BufferUsages::INDIRECT
            | wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        let patch_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Patch Indirect Args"),
            contents: bytemuck::bytes_of(&DrawIndexedIndirectArgs::patch_mesh()),
            usage,
        });
        let bounds_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Bounds Indirect Args"),
            contents: bytemuck::bytes_of(&DrawIndexedIndirectArgs::bounds_cube()),
            usage,
        });
        Self {
            patch_args,
            bounds_args,
        }
    }

    /// Args buffer for `draw_indexed_indirect` of the patch mesh
    pub fn patch_args(&self) -> &wgpu::Buffer {
        &self.patch_args
    }

    /// Args buffer for `draw_indexed_indirect` of the bounds cube
    pub fn bounds_args(&self) -> &wgpu::Buffer {
        &self.bounds_args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_layout_matches_wgpu() {
        assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);
        let args = DrawIndexedIndirectArgs::patch_mesh();
        let words: [u32; 5] = bytemuck::cast(args);
        assert_eq!(words[0], 1536);
        assert_eq!(DrawIndexedIndirectArgs::bounds_cube().index_count, 36);
    }

    #[test]
    fn instance_count_is_clamped() {
        let mut args = DrawIndexedIndirectArgs::patch_mesh();
        args.set_instance_count(20000, 12800);
        assert_eq!(args.instance_count, 12800);
        assert_eq!(args.index_count, 1536);
        args.set_instance_count(7, 12800);
        assert_eq!(args.instance_count, 7);
    }
}

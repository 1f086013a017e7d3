//! Uniform layouts of the terrain build shader
//!
//! Every struct here is mirrored field for field in `shaders/terrain_build.wgsl`.

use bytemuck::{Pod, Zeroable};

use crate::camera::CameraState;
use crate::config::CullingSettings;
use crate::hiz::HizFrame;
use crate::world::TerrainWorldParams;
use super::constants::{frame_flags, MAX_LOD_LEVELS};

/// Static world layout, uploaded once
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WorldUniform {
    /// (width, height, depth, 0)
    pub world_size: [f32; 4],
    /// Per LOD: (node size, patch extent, 0, 0)
    pub lod_params: [[f32; 4]; MAX_LOD_LEVELS],
    /// Per LOD: (node count, sector count per node, patch grid size, 0)
    pub lod_counts: [[u32; 4]; MAX_LOD_LEVELS],
}

impl WorldUniform {
    pub fn new(params: &TerrainWorldParams) -> Self {
        let mut uniform = Self::zeroed();
        uniform.world_size = [
            params.world_size.x,
            params.world_size.y,
            params.world_size.z,
            0.0,
        ];
        for (lod, layout) in params.lods().iter().enumerate().take(MAX_LOD_LEVELS) {
            uniform.lod_params[lod] = [layout.node_size, layout.patch_extent, 0.0, 0.0];
            uniform.lod_counts[lod] = [
                layout.node_count,
                layout.sector_count_per_node,
                params.patch_grid_size(lod as u32),
                0,
            ];
        }
        uniform
    }
}

/// Camera, HiZ camera and culling toggles, uploaded every dispatch
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FrameUniform {
    pub view_proj: [[f32; 4]; 4],
    pub frustum_planes: [[f32; 4]; 6],
    pub camera_position: [f32; 4],
    pub hiz_view_proj: [[f32; 4]; 4],
    pub hiz_camera_position: [f32; 4],
    pub hiz_size: u32,
    pub hiz_mip_count: u32,
    pub flags: u32,
    pub height_redundance: f32,
    pub depth_bias: f32,
    pub _padding: [f32; 3],
}

impl FrameUniform {
    pub fn new(camera: &CameraState, settings: &CullingSettings, hiz: Option<&HizFrame>) -> Self {
        let mut flags = 0;
        if settings.frustum_cull {
            flags |= frame_flags::FRUSTUM_CULL;
        }
        if settings.bounds_debug {
            flags |= frame_flags::BOUNDS_DEBUG;
        }

        let mut uniform = Self {
            view_proj: camera.view_proj.into(),
            frustum_planes: camera.frustum.planes,
            camera_position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            hiz_view_proj: [[0.0; 4]; 4],
            hiz_camera_position: [0.0; 4],
            hiz_size: 1,
            hiz_mip_count: 1,
            flags,
            height_redundance: settings.bounds_height_redundance as f32,
            depth_bias: settings.clamped_depth_bias(),
            _padding: [0.0; 3],
        };

        if let Some(hiz) = hiz.filter(|_| settings.hiz_occlusion_cull) {
            uniform.flags |= frame_flags::HIZ_CULL;
            uniform.hiz_view_proj = hiz.view_proj.into();
            uniform.hiz_camera_position = [
                hiz.camera_position.x,
                hiz.camera_position.y,
                hiz.camera_position.z,
                1.0,
            ];
            uniform.hiz_size = hiz.size;
            uniform.hiz_mip_count = hiz.mip_count;
        }
        uniform
    }
}

/// Evaluation coefficient, uploaded only when changed
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct EvaluationUniform {
    pub node_evaluation_c: f32,
    pub _padding: [f32; 3],
}

/// Per traversal pass, addressed with a dynamic offset
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct PassUniform {
    pub lod: u32,
    pub consume_slot: u32,
    pub append_slot: u32,
    pub consume_capacity: u32,
    pub append_capacity: u32,
    pub _padding: [u32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::gpu::validation::check_record_size;

    #[test]
    fn uniform_sizes_match_wgsl() {
        check_record_size::<WorldUniform>(16 + 256 + 256).unwrap();
        check_record_size::<FrameUniform>(288).unwrap();
        check_record_size::<EvaluationUniform>(16).unwrap();
        check_record_size::<PassUniform>(32).unwrap();
    }

    #[test]
    fn world_uniform_lists_every_lod() {
        let params = TerrainWorldParams::new(&WorldConfig::default()).unwrap();
        let uniform = WorldUniform::new(&params);
        assert_eq!(uniform.lod_params[0], [64.0, 4.0, 0.0, 0.0]);
        assert_eq!(uniform.lod_counts[5], [5, 32, 40, 0]);
        assert_eq!(uniform.lod_counts[6], [0; 4]);
    }

    #[test]
    fn hiz_flag_needs_a_pyramid() {
        let camera = CameraState::look_at(
            cgmath::Point3::new(0.0, 10.0, 0.0),
            cgmath::Point3::new(0.0, 0.0, 10.0),
            60.0,
            1.0,
            0.1,
            100.0,
        );
        let settings = CullingSettings::default();
        let uniform = FrameUniform::new(&camera, &settings, None);
        assert_eq!(uniform.flags & frame_flags::HIZ_CULL, 0);
        assert_ne!(uniform.flags & frame_flags::FRUSTUM_CULL, 0);
        assert_eq!(uniform.depth_bias, 1.0);
    }
}

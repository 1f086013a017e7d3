//! GPU constants - generated WGSL prelude shared by the terrain and HiZ kernels
//!
//! The Rust constants and the configured world layout are the single source of truth;
//! every embedded shader is prefixed with the block generated here.

use crate::config::CapacityConfig;
use crate::constants::counters;
use crate::hiz::DepthConvention;
use crate::world::{NodeDescriptor, TerrainWorldParams};

/// Upper bound of LOD levels carried by the world uniform
pub const MAX_LOD_LEVELS: usize = 16;

/// Placeholder substituted into `@workgroup_size` of the patch kernel
pub const PATCHES_PER_NODE_PLACEHOLDER: &str = "__PATCHES_PER_NODE__";

/// Depth convention constants, the whole prelude of the HiZ shader
pub fn generate_depth_constants(convention: DepthConvention) -> String {
    format!(
        r#"// Depth convention
const REVERSED_Z: bool = {};
const FAR_DEPTH: f32 = {:.1};
"#,
        convention == DepthConvention::Reversed,
        convention.far_value(),
    )
}

/// Generate the WGSL prelude of the terrain build shader
pub fn generate_wgsl_constants(
    params: &TerrainWorldParams,
    capacities: &CapacityConfig,
    convention: DepthConvention,
) -> String {
    format!(
        r#"// AUTO-GENERATED GPU CONSTANTS - DO NOT EDIT
// Generated from src/gpu/constants.rs

// World layout
const MAX_LOD: u32 = {}u;
const LOD_COUNT: u32 = {}u;
const ROOT_NODE_COUNT: u32 = {}u;
const PATCHES_PER_NODE: u32 = {}u;
const LOD_MAP_SIZE: u32 = {}u;
const MAX_NODE_ID: u32 = {}u;

// Append list capacities
const ROOT_CAPACITY: u32 = {}u;
const CANDIDATE_CAPACITY: u32 = {}u;
const FINAL_CAPACITY: u32 = {}u;
const PATCH_CAPACITY: u32 = {}u;

// Counter slots
const COUNTER_ROOT_NODES: u32 = {}u;
const COUNTER_NODE_LIST_A: u32 = {}u;
const COUNTER_NODE_LIST_B: u32 = {}u;
const COUNTER_FINAL_NODES: u32 = {}u;
const COUNTER_PATCHES: u32 = {}u;
const COUNTER_PATCH_BOUNDS: u32 = {}u;
const COUNTER_PEAK_CANDIDATES: u32 = {}u;
const COUNTER_OVERFLOW_FLAGS: u32 = {}u;

// Overflow bits
const OVERFLOW_CANDIDATES: u32 = {}u;
const OVERFLOW_FINAL_NODES: u32 = {}u;
const OVERFLOW_PATCHES: u32 = {}u;
const OVERFLOW_PATCH_BOUNDS: u32 = {}u;

// Node descriptor flags
const NODE_BRANCH: u32 = {}u;
const NODE_CULLED: u32 = {}u;

// Frame flags
const FLAG_FRUSTUM_CULL: u32 = {}u;
const FLAG_HIZ_CULL: u32 = {}u;
const FLAG_BOUNDS_DEBUG: u32 = {}u;

{}"#,
        params.max_lod,
        params.lod_count(),
        params.root_node_count,
        params.patches_per_node,
        params.lod_map_size(),
        params.node_ids().max_node_id(),
        params.root_node_count * params.root_node_count,
        capacities.candidate_nodes,
        capacities.final_nodes,
        capacities.patches,
        counters::ROOT_NODES,
        counters::NODE_LIST_A,
        counters::NODE_LIST_B,
        counters::FINAL_NODES,
        counters::PATCHES,
        counters::PATCH_BOUNDS,
        counters::PEAK_CANDIDATES,
        counters::OVERFLOW_FLAGS,
        counters::OVERFLOW_CANDIDATES,
        counters::OVERFLOW_FINAL_NODES,
        counters::OVERFLOW_PATCHES,
        counters::OVERFLOW_PATCH_BOUNDS,
        NodeDescriptor::BRANCH,
        NodeDescriptor::CULLED,
        frame_flags::FRUSTUM_CULL,
        frame_flags::HIZ_CULL,
        frame_flags::BOUNDS_DEBUG,
        generate_depth_constants(convention),
    )
}

/// Bits of `FrameUniform::flags`
pub mod frame_flags {
    pub const FRUSTUM_CULL: u32 = 1;
    pub const HIZ_CULL: u32 = 2;
    pub const BOUNDS_DEBUG: u32 = 4;
}

/// Prefix a shader source with its generated prelude and fill in placeholders
pub fn compose_shader(prelude: &str, source: &str, patches_per_node: u32) -> String {
    let mut composed = String::with_capacity(prelude.len() + source.len() + 1);
    composed.push_str(prelude);
    composed.push('\n');
    composed.push_str(&source.replace(PATCHES_PER_NODE_PLACEHOLDER, &patches_per_node.to_string()));
    composed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    #[test]
    fn prelude_carries_the_world_layout() {
        let params = TerrainWorldParams::new(&WorldConfig::default()).unwrap();
        let prelude = generate_wgsl_constants(
            &params,
            &CapacityConfig::default(),
            DepthConvention::Standard,
        );
        assert!(prelude.contains("const MAX_NODE_ID: u32 = 34124u;"));
        assert!(prelude.contains("const LOD_MAP_SIZE: u32 = 160u;"));
        assert!(prelude.contains("const PATCH_CAPACITY: u32 = 12800u;"));
        assert!(prelude.contains("const REVERSED_Z: bool = false;"));
    }

    #[test]
    fn compose_substitutes_workgroup_size() {
        let composed = compose_shader(
            "const A: u32 = 1u;",
            "@workgroup_size(__PATCHES_PER_NODE__, __PATCHES_PER_NODE__, 1)",
            8,
        );
        assert!(composed.starts_with("const A: u32 = 1u;\n"));
        assert!(composed.ends_with("@workgroup_size(8, 8, 1)"));
    }

    #[test]
    fn reversed_depth_constants() {
        let prelude = generate_depth_constants(DepthConvention::Reversed);
        assert!(prelude.contains("const REVERSED_Z: bool = true;"));
        assert!(prelude.contains("const FAR_DEPTH: f32 = 0.0;"));
    }
}

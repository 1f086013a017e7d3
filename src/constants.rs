// Terrain constants - defaults shared by the CPU reference path, the GPU path
// and the generated WGSL prelude.

/// World layout defaults
pub mod world {
    /// Default world extent in metres (width, height, depth)
    pub const DEFAULT_WORLD_SIZE: [f32; 3] = [10240.0, 2048.0, 10240.0];

    /// Coarsest LOD index. LOD 0 is the finest.
    pub const DEFAULT_MAX_LOD: u32 = 5;

    /// At the coarsest LOD the world is a ROOT_NODE_COUNT x ROOT_NODE_COUNT grid
    pub const DEFAULT_ROOT_NODE_COUNT: u32 = 5;

    /// A terminal node splits into PATCHES_PER_NODE x PATCHES_PER_NODE patches
    pub const DEFAULT_PATCHES_PER_NODE: u32 = 8;
}

/// Append list capacities
pub mod capacity {
    pub const DEFAULT_CANDIDATE_NODES: u32 = 50;
    pub const DEFAULT_FINAL_NODES: u32 = 200;
    pub const DEFAULT_PATCHES: u32 = DEFAULT_FINAL_NODES * 64;
}

/// Per-frame culling and LOD defaults
pub mod culling {
    pub const DEFAULT_NODE_EVALUATION_C: f32 = 1.0;
    pub const DEFAULT_BOUNDS_HEIGHT_REDUNDANCE: u32 = 5;
    pub const DEFAULT_HIZ_DEPTH_BIAS: f32 = 1.0;

    /// Valid range for the HiZ depth bias
    pub const HIZ_DEPTH_BIAS_MIN: f32 = 0.01;
    pub const HIZ_DEPTH_BIAS_MAX: f32 = 1000.0;
}

/// Mesh geometry referenced by the indirect draw arguments
pub mod mesh {
    /// The patch mesh is a PATCH_MESH_GRID x PATCH_MESH_GRID quad grid
    pub const PATCH_MESH_GRID: u32 = 16;
    /// Edge length of one patch mesh quad at LOD 0 (metres)
    pub const PATCH_MESH_QUAD_SIZE: f32 = 0.5;
    pub const PATCH_MESH_INDEX_COUNT: u32 = PATCH_MESH_GRID * PATCH_MESH_GRID * 6;
    pub const UNIT_CUBE_INDEX_COUNT: u32 = 36;
}

/// Counter slots in the GPU counter buffer
pub mod counters {
    pub const ROOT_NODES: u32 = 0;
    pub const NODE_LIST_A: u32 = 1;
    pub const NODE_LIST_B: u32 = 2;
    pub const FINAL_NODES: u32 = 3;
    pub const PATCHES: u32 = 4;
    pub const PATCH_BOUNDS: u32 = 5;
    pub const PEAK_CANDIDATES: u32 = 6;
    pub const OVERFLOW_FLAGS: u32 = 7;
    pub const COUNT: u32 = 8;

    /// Bits stored in the OVERFLOW_FLAGS slot
    pub const OVERFLOW_CANDIDATES: u32 = 1;
    pub const OVERFLOW_FINAL_NODES: u32 = 2;
    pub const OVERFLOW_PATCHES: u32 = 4;
    pub const OVERFLOW_PATCH_BOUNDS: u32 = 8;
}

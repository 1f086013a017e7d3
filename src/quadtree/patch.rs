/// Patch generation
///
/// Every terminal node expands into S x S patches. Each patch is culled again at its
/// own granularity, and survivors get seam codes from the LOD map so the vertex stage
/// can stitch edges against coarser neighbours.

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::world::{Aabb, FinalNode, TerrainInputs, TerrainWorldParams};
use super::{AppendBuffer, FrameContext, LodMap};

/// Culled patch record consumed by the instanced draw
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderPatch {
    /// World-space centre (x, z)
    pub position: [f32; 2],
    /// Height range in world units
    pub min_max_height: [f32; 2],
    pub lod: u32,
    /// Patch edge relative to the base patch mesh, 2^lod
    pub scale: f32,
    pub _padding: [u32; 2],
    /// LOD difference to the neighbour across (-x, -z, +x, +z)
    pub lod_trans: [u32; 4],
}

/// Debug bounds of a surviving patch; `min[3]` carries the LOD
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PatchBounds {
    pub min: [f32; 4],
    pub max: [f32; 4],
}

impl RenderPatch {
    pub fn bounds(&self, half_extent: f32) -> Aabb {
        Aabb::from_center_xz(
            self.position,
            half_extent,
            self.min_max_height[0],
            self.min_max_height[1],
        )
    }
}

impl PatchBounds {
    pub fn new(aabb: &Aabb, lod: u32) -> Self {
        Self {
            min: [aabb.min.x, aabb.min.y, aabb.min.z, lod as f32],
            max: [aabb.max.x, aabb.max.y, aabb.max.z, 0.0],
        }
    }
}

/// Build patch (px, py) of a terminal node
pub fn build_patch(
    params: &TerrainWorldParams,
    inputs: &TerrainInputs,
    redundance: u32,
    node: &FinalNode,
    px: u32,
    py: u32,
) -> RenderPatch {
    let s = params.patches_per_node;
    let lod = params.lod(node.lod);
    let patch_edge = lod.patch_extent * 2.0;
    let center = params.node_center_xz(node.loc());
    let offset = (s as f32 - 1.0) * 0.5;
    let position = [
        center[0] + (px as f32 - offset) * patch_edge,
        center[1] + (py as f32 - offset) * patch_edge,
    ];

    let [lo, hi] = inputs.min_max.texel(node.lod, node.x * s + px, node.y * s + py);
    let height = params.world_size.y;
    let r = redundance as f32;

    RenderPatch {
        position,
        min_max_height: [lo * height - r, hi * height + r],
        lod: node.lod,
        scale: lod.sector_count_per_node as f32,
        _padding: [0; 2],
        lod_trans: [0; 4],
    }
}

/// Neighbour LOD codes across (-x, -z, +x, +z), sampled half a patch extent past
/// each edge midpoint
pub fn seam_codes(params: &TerrainWorldParams, lod_map: &LodMap, patch: &RenderPatch) -> [u32; 4] {
    let reach = params.lod(patch.lod).patch_extent * 1.5;
    let [x, z] = patch.position;
    let samples = [[x - reach, z], [x, z - reach], [x + reach, z], [x, z + reach]];
    samples.map(|[sx, sz]| {
        lod_map
            .sample_world(params, sx, sz)
            .map_or(0, |neighbour| neighbour.saturating_sub(patch.lod))
    })
}

/// Expand, cull and append the patches of every terminal node
pub struct PatchGenerator<'a> {
    pub params: &'a TerrainWorldParams,
    pub inputs: &'a TerrainInputs,
    pub lod_map: &'a LodMap,
}

impl<'a> PatchGenerator<'a> {
    pub fn generate(
        &self,
        ctx: &FrameContext,
        nodes: &[FinalNode],
        patches: &AppendBuffer<RenderPatch>,
        bounds: &AppendBuffer<PatchBounds>,
    ) {
        let s = self.params.patches_per_node;
        nodes.par_iter().for_each(|node| {
            let half_extent = self.params.lod(node.lod).patch_extent;
            for py in 0..s {
                for px in 0..s {
                    let mut patch = build_patch(
                        self.params,
                        self.inputs,
                        ctx.settings.bounds_height_redundance,
                        node,
                        px,
                        py,
                    );
                    let aabb = patch.bounds(half_extent);
                    if ctx.is_culled(&aabb) {
                        continue;
                    }
                    patch.lod_trans = seam_codes(self.params, self.lod_map, &patch);
                    patches.append(patch);
                    if ctx.settings.bounds_debug {
                        bounds.append(PatchBounds::new(&aabb, node.lod));
                    }
                }
            }
        });
    }
}

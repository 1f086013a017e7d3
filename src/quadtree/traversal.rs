/// Breadth-first quadtree traversal
///
/// One pass per LOD, coarsest first. Each pass consumes the candidate list of its LOD
/// and either subdivides a node into the next candidate list or accepts it into the
/// final node list. Culled nodes are dropped from both.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::camera::CameraState;
use crate::config::{CapacityConfig, CullingSettings};
use crate::error::AppendList;
use crate::hiz::{is_occluded, DepthPyramid};
use crate::world::{Aabb, FinalNode, NodeDescriptor, NodeLoc, TerrainInputs, TerrainWorldParams};
use super::AppendBuffer;

/// Per-frame state passed explicitly into every pass
#[derive(Clone, Copy)]
pub struct FrameContext<'a> {
    pub camera: &'a CameraState,
    pub settings: CullingSettings,
    /// None skips HiZ culling for the frame
    pub hiz: Option<&'a DepthPyramid>,
}

impl<'a> FrameContext<'a> {
    /// Frustum and HiZ culling of a box
    pub fn is_culled(&self, aabb: &Aabb) -> bool {
        if self.settings.frustum_cull && !aabb.intersects_frustum(&self.camera.frustum) {
            return true;
        }
        if self.settings.hiz_occlusion_cull {
            if let Some(pyramid) = self.hiz {
                return is_occluded(pyramid, aabb, self.settings.clamped_depth_bias());
            }
        }
        false
    }

    /// Subdivide iff the node is not at LOD 0 and d * C < node size
    pub fn should_subdivide(&self, lod: u32, node_size: f32, aabb: &Aabb) -> bool {
        lod > 0
            && aabb.distance_to(self.camera.position) * self.settings.node_evaluation_c < node_size
    }
}

/// World bounds of a node: XZ footprint plus its height range expanded by `r`
pub fn node_bounds(
    params: &TerrainWorldParams,
    inputs: &TerrainInputs,
    redundance: u32,
    node: NodeLoc,
) -> Aabb {
    let [lo, hi] = inputs.min_max.node_range(node, params.patches_per_node);
    let height = params.world_size.y;
    let r = redundance as f32;
    Aabb::from_center_xz(
        params.node_center_xz(node),
        params.lod(node.lod).node_size * 0.5,
        lo * height - r,
        hi * height + r,
    )
}

/// Node descriptors indexed by node id
pub struct NodeDescriptorTable {
    entries: Vec<AtomicU32>,
}

impl NodeDescriptorTable {
    pub fn new(len: usize) -> Self {
        Self {
            entries: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn get(&self, id: u32) -> NodeDescriptor {
        NodeDescriptor(self.entries[id as usize].load(Ordering::Relaxed))
    }

    pub fn set(&self, id: u32, descriptor: NodeDescriptor) {
        self.entries[id as usize].store(descriptor.0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Host traversal state: root list, candidate ping-pong pair and final list
pub struct QuadtreeTraversal {
    roots: Vec<NodeLoc>,
    lists: [AppendBuffer<[u32; 2]>; 2],
    final_nodes: AppendBuffer<FinalNode>,
    descriptors: NodeDescriptorTable,
    peak_candidates: u32,
}

impl QuadtreeTraversal {
    pub fn new(params: &TerrainWorldParams, capacities: &CapacityConfig) -> Self {
        let count = params.root_node_count;
        let roots = (0..count)
            .flat_map(|y| (0..count).map(move |x| NodeLoc::new(params.max_lod, x, y)))
            .collect();
        Self {
            roots,
            lists: [
                AppendBuffer::new(AppendList::CandidateNodes, capacities.candidate_nodes),
                AppendBuffer::new(AppendList::CandidateNodes, capacities.candidate_nodes),
            ],
            final_nodes: AppendBuffer::new(AppendList::FinalNodes, capacities.final_nodes),
            descriptors: NodeDescriptorTable::new(params.node_ids().len()),
            peak_candidates: 0,
        }
    }

    /// Run all LOD passes for one frame.
    ///
    /// Overflow does not stop the frame; it is left in the list counters for the
    /// caller's diagnostics.
    pub fn run(&mut self, params: &TerrainWorldParams, inputs: &TerrainInputs, ctx: &FrameContext) {
        self.final_nodes.reset();
        for list in self.lists.iter_mut() {
            list.reset();
        }
        self.peak_candidates = 0;

        for (pass, lod) in (0..=params.max_lod).rev().enumerate() {
            let append_index = pass % 2;
            let consume: Vec<NodeLoc> = if pass == 0 {
                self.roots.clone()
            } else {
                let consume_list = &mut self.lists[1 - append_index];
                let nodes = consume_list
                    .to_vec()
                    .into_iter()
                    .map(|[x, y]| NodeLoc::new(lod, x, y))
                    .collect();
                consume_list.reset();
                nodes
            };

            let append = &self.lists[append_index];
            let final_nodes = &self.final_nodes;
            let descriptors = &self.descriptors;
            consume.par_iter().for_each(|&node| {
                evaluate_node(params, inputs, ctx, node, append, final_nodes, descriptors);
            });

            self.peak_candidates = self.peak_candidates.max(append.requested());
            log::trace!(
                "[QuadtreeTraversal::run] LOD {} consumed {} nodes, appended {} candidates",
                lod,
                consume.len(),
                append.requested()
            );
        }
    }

    pub fn final_nodes(&self) -> &AppendBuffer<FinalNode> {
        &self.final_nodes
    }

    pub fn descriptors(&self) -> &NodeDescriptorTable {
        &self.descriptors
    }

    /// Largest candidate count requested by any pass this frame
    pub fn peak_candidates(&self) -> u32 {
        self.peak_candidates
    }

    pub fn candidates_overflowed(&self, capacity: u32) -> bool {
        self.peak_candidates > capacity
    }
}

fn evaluate_node(
    params: &TerrainWorldParams,
    inputs: &TerrainInputs,
    ctx: &FrameContext,
    node: NodeLoc,
    append: &AppendBuffer<[u32; 2]>,
    final_nodes: &AppendBuffer<FinalNode>,
    descriptors: &NodeDescriptorTable,
) {
    let id = inputs.node_ids.node_id(node);
    let aabb = node_bounds(params, inputs, ctx.settings.bounds_height_redundance, node);

    if ctx.is_culled(&aabb) {
        descriptors.set(id, NodeDescriptor::DISCARDED);
        return;
    }

    let node_size = params.lod(node.lod).node_size;
    match node.children() {
        Some(children) if ctx.should_subdivide(node.lod, node_size, &aabb) => {
            descriptors.set(id, NodeDescriptor::BRANCHED);
            append.append_all(&children.map(|c| [c.x, c.y]));
        }
        _ => {
            descriptors.set(id, NodeDescriptor::TERMINAL);
            final_nodes.append(FinalNode::from(node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use cgmath::Point3;

    fn setup() -> (TerrainWorldParams, TerrainInputs) {
        let params = TerrainWorldParams::new(&WorldConfig::default()).unwrap();
        let inputs = TerrainInputs::flat(&params, 0.5);
        (params, inputs)
    }

    fn overhead_camera(height: f32) -> CameraState {
        CameraState::look_at(
            Point3::new(0.0, height, 0.0),
            Point3::new(0.0, 0.0, 0.001),
            60.0,
            1.0,
            1.0,
            50000.0,
        )
    }

    #[test]
    fn bounds_expand_by_redundance() {
        let (params, inputs) = setup();
        let aabb = node_bounds(&params, &inputs, 5, NodeLoc::new(5, 2, 2));
        assert_eq!(aabb.min.y, 1024.0 - 5.0);
        assert_eq!(aabb.max.y, 1024.0 + 5.0);
        assert_eq!(aabb.min.x, -1024.0);
        assert_eq!(aabb.max.z, 1024.0);
    }

    #[test]
    fn far_camera_keeps_the_roots() {
        let (params, inputs) = setup();
        let camera = overhead_camera(20000.0);
        let ctx = FrameContext {
            camera: &camera,
            settings: CullingSettings::unculled(),
            hiz: None,
        };
        let mut traversal = QuadtreeTraversal::new(&params, &CapacityConfig::default());
        traversal.run(&params, &inputs, &ctx);

        let nodes = traversal.final_nodes().to_vec();
        assert_eq!(nodes.len(), 25);
        assert!(nodes.iter().all(|n| n.lod == 5));
        for node in &nodes {
            let id = inputs.node_ids.node_id(node.loc());
            assert_eq!(traversal.descriptors().get(id), NodeDescriptor::TERMINAL);
        }
    }

    #[test]
    fn lod_zero_is_always_terminal() {
        let (params, inputs) = setup();
        let camera = overhead_camera(1030.0);
        let ctx = FrameContext {
            camera: &camera,
            settings: CullingSettings::unculled(),
            hiz: None,
        };
        assert!(!ctx.should_subdivide(0, 64.0, &Aabb::from_center_xz([0.0, 0.0], 32.0, 0.0, 2000.0)));

        let mut traversal = QuadtreeTraversal::new(&params, &CapacityConfig::default());
        traversal.run(&params, &inputs, &ctx);
        let nodes = traversal.final_nodes().to_vec();
        assert!(nodes.iter().any(|n| n.lod == 0));
    }
}

/// LOD map rasterizer
///
/// One texel per LOD 0 node cell holding the LOD of the terminal node that covers it.
/// Each texel walks its ancestors from the coarsest LOD down and stops at the first
/// node that was not subdivided this frame.

use rayon::prelude::*;

use crate::world::{FinalNode, NodeIdPyramid, NodeLoc, TerrainWorldParams};
use super::NodeDescriptorTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodMap {
    size: u32,
    texels: Vec<u32>,
}

impl LodMap {
    pub fn new(params: &TerrainWorldParams) -> Self {
        let size = params.lod_map_size();
        Self {
            size,
            texels: vec![params.max_lod; (size * size) as usize],
        }
    }

    /// Rewrite every texel from this frame's node descriptors
    pub fn rasterize(
        &mut self,
        params: &TerrainWorldParams,
        node_ids: &NodeIdPyramid,
        descriptors: &NodeDescriptorTable,
    ) {
        let size = self.size as usize;
        let max_lod = params.max_lod;
        self.texels
            .par_chunks_mut(size)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().enumerate() {
                    *texel = owning_lod(max_lod, node_ids, descriptors, x as u32, y as u32);
                }
            });
    }

    /// Stamp each final node's LOD over its region
    pub fn stamp(&mut self, nodes: &[FinalNode]) {
        for node in nodes {
            let cells = 1u32 << node.lod;
            for y in node.y * cells..(node.y + 1) * cells {
                for x in node.x * cells..(node.x + 1) * cells {
                    self.texels[(y * self.size + x) as usize] = node.lod;
                }
            }
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.texels[(y * self.size + x) as usize]
    }

    pub fn texels(&self) -> &[u32] {
        &self.texels
    }

    /// LOD owning a world XZ position, None outside the world
    pub fn sample_world(&self, params: &TerrainWorldParams, x: f32, z: f32) -> Option<u32> {
        params.lod_map_texel(x, z).map(|[tx, ty]| self.get(tx, ty))
    }
}

fn owning_lod(
    max_lod: u32,
    node_ids: &NodeIdPyramid,
    descriptors: &NodeDescriptorTable,
    x: u32,
    y: u32,
) -> u32 {
    for lod in (0..=max_lod).rev() {
        let node = NodeLoc::new(lod, x >> lod, y >> lod);
        if !descriptors.get(node_ids.node_id(node)).is_branch() {
            return lod;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::world::NodeDescriptor;

    #[test]
    fn walk_stops_at_first_unsubdivided_node() {
        let params = TerrainWorldParams::new(&WorldConfig {
            size: [1024.0, 100.0, 1024.0],
            max_lod: 2,
            root_node_count: 1,
            patches_per_node: 2,
        })
        .unwrap();
        let ids = NodeIdPyramid::from_params(&params);
        let descriptors = NodeDescriptorTable::new(params.node_ids().len());

        // Root branches, child (1, 0) branches, everything else is terminal
        descriptors.set(ids.node_id(NodeLoc::new(2, 0, 0)), NodeDescriptor::BRANCHED);
        descriptors.set(ids.node_id(NodeLoc::new(1, 1, 0)), NodeDescriptor::BRANCHED);
        descriptors.set(ids.node_id(NodeLoc::new(1, 0, 1)), NodeDescriptor::DISCARDED);

        let mut map = LodMap::new(&params);
        map.rasterize(&params, &ids, &descriptors);
        assert_eq!(map.get(0, 0), 1);
        assert_eq!(map.get(2, 0), 0);
        assert_eq!(map.get(3, 1), 0);
        assert_eq!(map.get(0, 3), 1);
        assert_eq!(map.get(3, 3), 1);

        let mut stamped = LodMap::new(&params);
        let finals: Vec<FinalNode> = [
            NodeLoc::new(1, 0, 0),
            NodeLoc::new(1, 0, 1),
            NodeLoc::new(1, 1, 1),
            NodeLoc::new(0, 2, 0),
            NodeLoc::new(0, 3, 0),
            NodeLoc::new(0, 2, 1),
            NodeLoc::new(0, 3, 1),
        ]
        .into_iter()
        .map(FinalNode::from)
        .collect();
        stamped.stamp(&finals);
        assert_eq!(stamped, map);
    }
}

/// Terrain world parameters
///
/// Derives the per-LOD node sizes, grid counts and dense node-id ranges from the
/// world extent and the quadtree shape.

use cgmath::Vector3;

use crate::config::WorldConfig;
use crate::error::{TerrainError, TerrainResult};
use super::NodeLoc;

/// Per-LOD layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodParams {
    /// Edge length of one node in metres
    pub node_size: f32,
    /// Half the edge length of one patch in metres
    pub patch_extent: f32,
    /// Number of nodes along one axis
    pub node_count: u32,
    /// Node edge measured in LOD 0 cells (2^lod)
    pub sector_count_per_node: u32,
}

/// Maps (lod, x, y) to a dense node id.
///
/// Offsets are assigned coarsest first, so the max LOD owns ids starting at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdTable {
    offsets: Vec<u32>,
    counts: Vec<u32>,
    max_node_id: u32,
}

impl NodeIdTable {
    fn new(lods: &[LodParams]) -> TerrainResult<Self> {
        let mut offsets = vec![0; lods.len()];
        let counts: Vec<u32> = lods.iter().map(|l| l.node_count).collect();
        let mut next = 0u32;
        for lod in (0..lods.len()).rev() {
            offsets[lod] = next;
            next = counts[lod]
                .checked_mul(counts[lod])
                .and_then(|ids| next.checked_add(ids))
                .ok_or_else(|| {
                    TerrainError::InvalidConfig(format!(
                        "node ids of LOD {} do not fit in 32 bits",
                        lod
                    ))
                })?;
        }
        Ok(Self {
            offsets,
            counts,
            max_node_id: next - 1,
        })
    }

    pub fn offset(&self, lod: u32) -> u32 {
        self.offsets[lod as usize]
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    pub fn max_node_id(&self) -> u32 {
        self.max_node_id
    }

    /// Total number of node ids, MAX_NODE_ID + 1
    pub fn len(&self) -> usize {
        self.max_node_id as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn node_id(&self, node: NodeLoc) -> u32 {
        let count = self.counts[node.lod as usize];
        self.offsets[node.lod as usize] + node.y * count + node.x
    }

    /// Inclusive id range owned by a LOD
    pub fn range(&self, lod: u32) -> std::ops::RangeInclusive<u32> {
        let count = self.counts[lod as usize];
        let start = self.offsets[lod as usize];
        start..=start + count * count - 1
    }

    /// Inverse of `node_id`
    pub fn node_loc(&self, id: u32) -> Option<NodeLoc> {
        if id > self.max_node_id {
            return None;
        }
        (0..self.offsets.len() as u32).find_map(|lod| {
            let range = self.range(lod);
            range.contains(&id).then(|| {
                let local = id - range.start();
                let count = self.counts[lod as usize];
                NodeLoc::new(lod, local % count, local / count)
            })
        })
    }
}

/// World extent plus the derived quadtree layout
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainWorldParams {
    pub world_size: Vector3<f32>,
    pub max_lod: u32,
    pub root_node_count: u32,
    pub patches_per_node: u32,
    lods: Vec<LodParams>,
    node_ids: NodeIdTable,
}

impl TerrainWorldParams {
    pub fn new(config: &WorldConfig) -> TerrainResult<Self> {
        let [width, height, depth] = config.size;
        if !(width > 0.0 && height > 0.0 && depth > 0.0) {
            return Err(TerrainError::InvalidConfig(format!(
                "world size must be positive, got {:?}",
                config.size
            )));
        }
        if (width - depth).abs() > f32::EPSILON * width {
            return Err(TerrainError::InvalidConfig(format!(
                "quadtree terrain must be square, got {}x{}",
                width, depth
            )));
        }
        if config.root_node_count == 0 || config.patches_per_node == 0 {
            return Err(TerrainError::InvalidConfig(
                "root node count and patches per node must be non-zero".to_string(),
            ));
        }
        if config.max_lod > 15 {
            return Err(TerrainError::InvalidConfig(format!(
                "max LOD {} is too deep for a dense node-id table",
                config.max_lod
            )));
        }

        let mut lods = vec![
            LodParams {
                node_size: 0.0,
                patch_extent: 0.0,
                node_count: 0,
                sector_count_per_node: 0,
            };
            config.max_lod as usize + 1
        ];
        let too_deep = || {
            TerrainError::InvalidConfig(format!(
                "root grid {} with max LOD {} and {} patches per node overflows the node grid",
                config.root_node_count, config.max_lod, config.patches_per_node
            ))
        };
        let mut node_count = config.root_node_count;
        for lod in (0..=config.max_lod).rev() {
            let node_size = width / node_count as f32;
            lods[lod as usize] = LodParams {
                node_size,
                patch_extent: node_size / (2.0 * config.patches_per_node as f32),
                node_count,
                sector_count_per_node: 1 << lod,
            };
            if lod > 0 {
                node_count = node_count.checked_mul(2).ok_or_else(too_deep)?;
            }
        }
        // The height field is one sample wider than the finest patch grid
        node_count
            .checked_mul(config.patches_per_node)
            .and_then(|grid| grid.checked_add(1))
            .ok_or_else(too_deep)?;
        let node_ids = NodeIdTable::new(&lods)?;

        log::debug!(
            "[TerrainWorldParams::new] {} LODs, root grid {}x{}, max node id {}",
            lods.len(),
            config.root_node_count,
            config.root_node_count,
            node_ids.max_node_id()
        );

        Ok(Self {
            world_size: Vector3::new(width, height, depth),
            max_lod: config.max_lod,
            root_node_count: config.root_node_count,
            patches_per_node: config.patches_per_node,
            lods,
            node_ids,
        })
    }

    pub fn lod(&self, lod: u32) -> &LodParams {
        &self.lods[lod as usize]
    }

    pub fn lods(&self) -> &[LodParams] {
        &self.lods
    }

    pub fn lod_count(&self) -> u32 {
        self.max_lod + 1
    }

    pub fn node_ids(&self) -> &NodeIdTable {
        &self.node_ids
    }

    /// Edge length of the LOD map, one texel per LOD 0 node
    pub fn lod_map_size(&self) -> u32 {
        self.lods[0].node_count
    }

    /// Patch grid resolution at a LOD, which is also the min/max level size
    pub fn patch_grid_size(&self, lod: u32) -> u32 {
        self.lods[lod as usize].node_count * self.patches_per_node
    }

    /// Node centre on the XZ plane
    pub fn node_center_xz(&self, node: NodeLoc) -> [f32; 2] {
        let lod = self.lod(node.lod);
        let half = (lod.node_count as f32 - 1.0) * 0.5;
        [
            (node.x as f32 - half) * lod.node_size,
            (node.y as f32 - half) * lod.node_size,
        ]
    }

    /// LOD 0 cell containing a world XZ position, if inside the world
    pub fn lod_map_texel(&self, x: f32, z: f32) -> Option<[u32; 2]> {
        let cell = self.lods[0].node_size;
        let half = self.world_size.x * 0.5;
        let tx = ((x + half) / cell).floor();
        let ty = ((z + half) / cell).floor();
        let size = self.lod_map_size() as f32;
        if tx < 0.0 || ty < 0.0 || tx >= size || ty >= size {
            return None;
        }
        Some([tx as u32, ty as u32])
    }
}

/// Baked terrain inputs
///
/// The traversal consumes three static artifacts: a normalized height field, a
/// min/max-height pyramid at patch resolution and a node-id pyramid at node
/// resolution. Both pyramids must have exactly one level per LOD.

use crate::error::{TerrainError, TerrainResult};
use super::{NodeLoc, TerrainWorldParams};

/// Normalized single channel height field
#[derive(Debug, Clone, PartialEq)]
pub struct HeightField {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl HeightField {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> TerrainResult<Self> {
        if width == 0 || height == 0 || data.len() != (width * height) as usize {
            return Err(TerrainError::InvalidConfig(format!(
                "height field of {}x{} needs {} samples, got {}",
                width,
                height,
                width as usize * height as usize,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn flat(size: u32, value: f32) -> Self {
        Self {
            width: size,
            height: size,
            data: vec![value; (size * size) as usize],
        }
    }

    fn texel(&self, x: u32, y: u32) -> f32 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.data[(y * self.width + x) as usize]
    }

    /// Bilinear sample at normalized coordinates, clamped to the edge
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let fx = (u.clamp(0.0, 1.0) * (self.width - 1) as f32).max(0.0);
        let fy = (v.clamp(0.0, 1.0) * (self.height - 1) as f32).max(0.0);
        let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
        let (tx, ty) = (fx.fract(), fy.fract());
        let top = self.texel(x0, y0) * (1.0 - tx) + self.texel(x0 + 1, y0) * tx;
        let bottom = self.texel(x0, y0 + 1) * (1.0 - tx) + self.texel(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// World height at an XZ position
    pub fn world_height_at(&self, params: &TerrainWorldParams, x: f32, z: f32) -> f32 {
        let half = params.world_size.x * 0.5;
        let u = (x + half) / params.world_size.x;
        let v = (z + half) / params.world_size.z;
        self.sample(u, v) * params.world_size.y
    }
}

/// One square level of the min/max pyramid
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxLevel {
    pub size: u32,
    pub data: Vec<[f32; 2]>,
}

impl MinMaxLevel {
    pub fn texel(&self, x: u32, y: u32) -> [f32; 2] {
        self.data[(y * self.size + x) as usize]
    }
}

/// Normalized (min, max) heights, level l at patch resolution of LOD l
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxHeightPyramid {
    pub levels: Vec<MinMaxLevel>,
}

impl MinMaxHeightPyramid {
    /// Build every level from a per-texel function of (level, x, y)
    pub fn from_fn(
        params: &TerrainWorldParams,
        mut texel: impl FnMut(u32, u32, u32) -> [f32; 2],
    ) -> Self {
        let levels = (0..params.lod_count())
            .map(|lod| {
                let size = params.patch_grid_size(lod);
                let mut data = Vec::with_capacity((size * size) as usize);
                for y in 0..size {
                    for x in 0..size {
                        data.push(texel(lod, x, y));
                    }
                }
                MinMaxLevel { size, data }
            })
            .collect();
        Self { levels }
    }

    pub fn flat(params: &TerrainWorldParams, value: f32) -> Self {
        Self::from_fn(params, |_, _, _| [value, value])
    }

    pub fn texel(&self, lod: u32, x: u32, y: u32) -> [f32; 2] {
        self.levels[lod as usize].texel(x, y)
    }

    /// Reduction of the S x S texels covering a node
    pub fn node_range(&self, node: NodeLoc, patches_per_node: u32) -> [f32; 2] {
        let level = &self.levels[node.lod as usize];
        let mut range = [f32::MAX, f32::MIN];
        for py in 0..patches_per_node {
            for px in 0..patches_per_node {
                let [lo, hi] = level.texel(
                    node.x * patches_per_node + px,
                    node.y * patches_per_node + py,
                );
                range[0] = range[0].min(lo);
                range[1] = range[1].max(hi);
            }
        }
        range
    }
}

/// Dense node ids, level l at node resolution of LOD l
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdPyramid {
    pub levels: Vec<NodeIdLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeIdLevel {
    pub size: u32,
    pub data: Vec<u32>,
}

impl NodeIdPyramid {
    /// The pyramid a correct bake produces for these parameters
    pub fn from_params(params: &TerrainWorldParams) -> Self {
        let table = params.node_ids();
        let levels = (0..params.lod_count())
            .map(|lod| {
                let size = params.lod(lod).node_count;
                let mut data = Vec::with_capacity((size * size) as usize);
                for y in 0..size {
                    for x in 0..size {
                        data.push(table.node_id(NodeLoc::new(lod, x, y)));
                    }
                }
                NodeIdLevel { size, data }
            })
            .collect();
        Self { levels }
    }

    pub fn node_id(&self, node: NodeLoc) -> u32 {
        let level = &self.levels[node.lod as usize];
        level.data[(node.y * level.size + node.x) as usize]
    }
}

/// All static inputs of the traversal
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainInputs {
    pub height: HeightField,
    pub min_max: MinMaxHeightPyramid,
    pub node_ids: NodeIdPyramid,
}

impl TerrainInputs {
    /// Flat terrain at a normalized height
    pub fn flat(params: &TerrainWorldParams, height: f32) -> Self {
        Self {
            height: HeightField::flat(params.patch_grid_size(0) + 1, height),
            min_max: MinMaxHeightPyramid::flat(params, height),
            node_ids: NodeIdPyramid::from_params(params),
        }
    }

    /// Reject pyramids whose level count or sizes disagree with the world layout
    pub fn validate(&self, params: &TerrainWorldParams) -> TerrainResult<()> {
        let expected_levels = params.lod_count();

        if self.min_max.levels.len() as u32 != expected_levels {
            return Err(TerrainError::MipLevelMismatch {
                input: "min/max height pyramid",
                expected: expected_levels,
                actual: self.min_max.levels.len() as u32,
            });
        }
        if self.node_ids.levels.len() as u32 != expected_levels {
            return Err(TerrainError::MipLevelMismatch {
                input: "node id pyramid",
                expected: expected_levels,
                actual: self.node_ids.levels.len() as u32,
            });
        }

        for lod in 0..expected_levels {
            let level = &self.min_max.levels[lod as usize];
            let expected = params.patch_grid_size(lod);
            if level.size != expected || level.data.len() != (expected * expected) as usize {
                return Err(TerrainError::InputSizeMismatch {
                    input: "min/max height pyramid",
                    level: lod,
                    expected_width: expected,
                    expected_height: expected,
                    actual_width: level.size,
                    actual_height: (level.data.len() as u32).checked_div(level.size).unwrap_or(0),
                });
            }

            let level = &self.node_ids.levels[lod as usize];
            let expected = params.lod(lod).node_count;
            if level.size != expected || level.data.len() != (expected * expected) as usize {
                return Err(TerrainError::InputSizeMismatch {
                    input: "node id pyramid",
                    level: lod,
                    expected_width: expected,
                    expected_height: expected,
                    actual_width: level.size,
                    actual_height: (level.data.len() as u32).checked_div(level.size).unwrap_or(0),
                });
            }
            if let Some(&id) = level.data.iter().find(|&&id| id > params.node_ids().max_node_id()) {
                return Err(TerrainError::InvalidConfig(format!(
                    "node id pyramid level {} holds id {} beyond MAX_NODE_ID {}",
                    lod,
                    id,
                    params.node_ids().max_node_id()
                )));
            }
        }

        log::debug!(
            "[TerrainInputs::validate] {} levels, height field {}x{}",
            expected_levels,
            self.height.width,
            self.height.height
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    fn params() -> TerrainWorldParams {
        TerrainWorldParams::new(&WorldConfig::default()).unwrap()
    }

    #[test]
    fn flat_inputs_validate() {
        let params = params();
        let inputs = TerrainInputs::flat(&params, 0.5);
        inputs.validate(&params).unwrap();
        assert_eq!(inputs.min_max.levels[0].size, 1280);
        assert_eq!(inputs.min_max.levels[5].size, 40);
        assert_eq!(inputs.node_ids.levels[0].size, 160);
    }

    #[test]
    fn missing_level_is_rejected() {
        let params = params();
        let mut inputs = TerrainInputs::flat(&params, 0.5);
        inputs.min_max.levels.pop();
        assert!(matches!(
            inputs.validate(&params),
            Err(TerrainError::MipLevelMismatch { expected: 6, actual: 5, .. })
        ));
    }

    #[test]
    fn wrong_level_size_is_rejected() {
        let params = params();
        let mut inputs = TerrainInputs::flat(&params, 0.5);
        inputs.node_ids.levels[2] = NodeIdLevel {
            size: 10,
            data: vec![0; 100],
        };
        assert!(matches!(
            inputs.validate(&params),
            Err(TerrainError::InputSizeMismatch { level: 2, expected_width: 40, .. })
        ));
    }

    #[test]
    fn node_range_reduces_the_node_texels() {
        let params = params();
        let pyramid = MinMaxHeightPyramid::from_fn(&params, |lod, x, y| {
            if lod == 5 && x == 9 && y == 10 {
                [0.1, 0.9]
            } else {
                [0.4, 0.6]
            }
        });
        assert_eq!(pyramid.node_range(NodeLoc::new(5, 1, 1), 8), [0.1, 0.9]);
        assert_eq!(pyramid.node_range(NodeLoc::new(5, 0, 0), 8), [0.4, 0.6]);
    }

    #[test]
    fn height_field_samples_bilinearly() {
        let field = HeightField::new(2, 2, vec![0.0, 1.0, 0.0, 1.0]).unwrap();
        assert!((field.sample(0.5, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(field.sample(1.0, 0.0), 1.0);
        assert!(HeightField::new(2, 2, vec![0.0; 3]).is_err());
    }
}

//! Terrain configuration
//!
//! Every field has a default so a partial TOML file is enough. Culling settings are
//! plain per-frame toggles; world and capacity settings are fixed at construction.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{capacity, culling, world};
use crate::error::{TerrainError, TerrainResult};
use crate::world::TerrainWorldParams;

/// Quadtree shape and world extent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// World extent (width, height, depth) in metres
    pub size: [f32; 3],
    /// Coarsest LOD index
    pub max_lod: u32,
    /// Root grid count R along one axis
    pub root_node_count: u32,
    /// Patches per node axis S
    pub patches_per_node: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            size: world::DEFAULT_WORLD_SIZE,
            max_lod: world::DEFAULT_MAX_LOD,
            root_node_count: world::DEFAULT_ROOT_NODE_COUNT,
            patches_per_node: world::DEFAULT_PATCHES_PER_NODE,
        }
    }
}

/// Append list capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Capacity of each candidate node list (A and B)
    pub candidate_nodes: u32,
    pub final_nodes: u32,
    /// Capacity of the culled patch list and of the patch bounds list
    pub patches: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            candidate_nodes: capacity::DEFAULT_CANDIDATE_NODES,
            final_nodes: capacity::DEFAULT_FINAL_NODES,
            patches: capacity::DEFAULT_PATCHES,
        }
    }
}

/// Per-frame culling and LOD toggles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingSettings {
    pub frustum_cull: bool,
    pub hiz_occlusion_cull: bool,
    /// Emit patch bounds and their indirect args
    pub bounds_debug: bool,
    /// Evaluation coefficient C; larger values select coarser LODs
    pub node_evaluation_c: f32,
    /// Height-bounds redundancy r in world units
    pub bounds_height_redundance: u32,
    /// HiZ depth bias in world units
    pub hiz_depth_bias: f32,
}

impl Default for CullingSettings {
    fn default() -> Self {
        Self {
            frustum_cull: true,
            hiz_occlusion_cull: true,
            bounds_debug: false,
            node_evaluation_c: culling::DEFAULT_NODE_EVALUATION_C,
            bounds_height_redundance: culling::DEFAULT_BOUNDS_HEIGHT_REDUNDANCE,
            hiz_depth_bias: culling::DEFAULT_HIZ_DEPTH_BIAS,
        }
    }
}

impl CullingSettings {
    /// All culling off, the configuration used by LOD selection tests
    pub fn unculled() -> Self {
        Self {
            frustum_cull: false,
            hiz_occlusion_cull: false,
            ..Self::default()
        }
    }

    /// Depth bias clamped to its valid range
    pub fn clamped_depth_bias(&self) -> f32 {
        self.hiz_depth_bias
            .clamp(culling::HIZ_DEPTH_BIAS_MIN, culling::HIZ_DEPTH_BIAS_MAX)
    }

    /// Check the settings against a world of `world_height` metres.
    ///
    /// A finite positive depth bias outside its range is accepted and clamped where it is
    /// used, with a warning.
    pub fn validate(&self, world_height: f32) -> TerrainResult<()> {
        if !(self.node_evaluation_c > 0.0 && self.node_evaluation_c.is_finite()) {
            return Err(TerrainError::InvalidConfig(format!(
                "node evaluation coefficient must be positive, got {}",
                self.node_evaluation_c
            )));
        }
        if !(self.hiz_depth_bias > 0.0 && self.hiz_depth_bias.is_finite()) {
            return Err(TerrainError::InvalidConfig(format!(
                "HiZ depth bias must be positive and finite, got {}",
                self.hiz_depth_bias
            )));
        }
        if self.bounds_height_redundance as f32 > world_height {
            return Err(TerrainError::InvalidConfig(format!(
                "height-bounds redundancy {} exceeds the world height {}",
                self.bounds_height_redundance, world_height
            )));
        }
        if self.clamped_depth_bias() != self.hiz_depth_bias {
            log::warn!(
                "[CullingSettings::validate] HiZ depth bias {} is outside [{}, {}], using {}",
                self.hiz_depth_bias,
                culling::HIZ_DEPTH_BIAS_MIN,
                culling::HIZ_DEPTH_BIAS_MAX,
                self.clamped_depth_bias()
            );
        }
        Ok(())
    }
}

/// How the depth pyramid reduces mip levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReductionMode {
    /// Ping-pong on GL and DX12 backends, in-place elsewhere
    #[default]
    Auto,
    InPlace,
    PingPong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HizConfig {
    pub reduction: ReductionMode,
    /// Depth buffer uses reversed Z (near = 1, far = 0)
    pub reversed_z: bool,
}

/// Complete terrain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TerrainConfig {
    pub world: WorldConfig,
    pub capacities: CapacityConfig,
    pub culling: CullingSettings,
    pub hiz: HizConfig,
}

impl TerrainConfig {
    pub fn from_toml_str(source: &str) -> TerrainResult<Self> {
        let config: TerrainConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> TerrainResult<Self> {
        let path = path.as_ref();
        log::info!("[TerrainConfig::load] Loading {}", path.display());
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> TerrainResult<()> {
        let caps = &self.capacities;
        if caps.candidate_nodes == 0 || caps.final_nodes == 0 || caps.patches == 0 {
            return Err(TerrainError::InvalidConfig(
                "append list capacities must be non-zero".to_string(),
            ));
        }
        // Rejects quadtree shapes whose node grid or node ids overflow
        let params = TerrainWorldParams::new(&self.world)?;
        let root_count = params.lod(params.max_lod).node_count.pow(2);
        if caps.candidate_nodes < root_count {
            log::warn!(
                "[TerrainConfig::validate] Candidate capacity {} is below the root grid size {}",
                caps.candidate_nodes,
                root_count
            );
        }
        self.culling.validate(params.world_size.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = TerrainConfig::default();
        assert_eq!(config.world.root_node_count, 5);
        assert_eq!(config.world.max_lod, 5);
        assert_eq!(config.capacities.patches, 200 * 64);
        assert_eq!(config.culling.node_evaluation_c, 1.0);
        assert_eq!(config.culling.bounds_height_redundance, 5);
        assert_eq!(config.hiz.reduction, ReductionMode::Auto);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = TerrainConfig::from_toml_str(
            r#"
            [culling]
            bounds_debug = true
            node_evaluation_c = 2.5

            [hiz]
            reduction = "ping_pong"
            "#,
        )
        .unwrap();
        assert!(config.culling.bounds_debug);
        assert_eq!(config.culling.node_evaluation_c, 2.5);
        assert!(config.culling.frustum_cull);
        assert_eq!(config.hiz.reduction, ReductionMode::PingPong);
        assert_eq!(config.world, WorldConfig::default());
    }

    #[test]
    fn rejects_non_positive_coefficient() {
        let result = TerrainConfig::from_toml_str("[culling]\nnode_evaluation_c = 0.0\n");
        assert!(matches!(result, Err(TerrainError::InvalidConfig(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let result = TerrainConfig::from_toml_str("[culling\n");
        assert!(matches!(result, Err(TerrainError::ConfigParse(_))));
    }

    #[test]
    fn rejects_invalid_culling_settings() {
        let mut settings = CullingSettings::default();
        settings.hiz_depth_bias = f32::NAN;
        assert!(matches!(settings.validate(2048.0), Err(TerrainError::InvalidConfig(_))));
        settings.hiz_depth_bias = -1.0;
        assert!(matches!(settings.validate(2048.0), Err(TerrainError::InvalidConfig(_))));

        let mut settings = CullingSettings::default();
        settings.bounds_height_redundance = 4096;
        assert!(matches!(settings.validate(2048.0), Err(TerrainError::InvalidConfig(_))));
        assert!(settings.validate(8192.0).is_ok());
    }

    #[test]
    fn rejects_quadtree_deeper_than_the_node_id_space() {
        let result = TerrainConfig::from_toml_str("[world]\nmax_lod = 15\nroot_node_count = 5\n");
        assert!(matches!(result, Err(TerrainError::InvalidConfig(_))));

        let result = TerrainConfig::from_toml_str("[world]\nroot_node_count = 70000\n");
        assert!(matches!(result, Err(TerrainError::InvalidConfig(_))));
    }

    #[test]
    fn depth_bias_is_clamped() {
        let mut settings = CullingSettings::default();
        settings.hiz_depth_bias = 0.0;
        assert_eq!(settings.clamped_depth_bias(), 0.01);
        settings.hiz_depth_bias = 5000.0;
        assert_eq!(settings.clamped_depth_bias(), 1000.0);
    }
}

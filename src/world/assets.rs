/// Loading baked terrain inputs from image files
///
/// Layout of a terrain directory:
/// - `height.png`: 16-bit luma height field
/// - `min_max_height_{lod}.png`: 16-bit RGBA, R = min, G = max
/// - `node_id_{lod}.png`: 16-bit luma node ids

use std::path::Path;

use image::{ImageBuffer, Luma, Rgba};

use crate::error::{asset_error, TerrainError, TerrainResult};
use super::inputs::{MinMaxLevel, NodeIdLevel};
use super::{HeightField, MinMaxHeightPyramid, NodeIdPyramid, TerrainInputs, TerrainWorldParams};

pub const HEIGHT_FILE: &str = "height.png";

pub fn min_max_file(lod: u32) -> String {
    format!("min_max_height_{}.png", lod)
}

pub fn node_id_file(lod: u32) -> String {
    format!("node_id_{}.png", lod)
}

fn normalize(value: u16) -> f32 {
    value as f32 / u16::MAX as f32
}

fn load_luma16(path: &Path) -> TerrainResult<ImageBuffer<Luma<u16>, Vec<u16>>> {
    let image = image::open(path).map_err(|e| asset_error(path.display(), e))?;
    Ok(image.into_luma16())
}

fn load_rgba16(path: &Path) -> TerrainResult<ImageBuffer<Rgba<u16>, Vec<u16>>> {
    let image = image::open(path).map_err(|e| asset_error(path.display(), e))?;
    Ok(image.into_rgba16())
}

fn require_square(path: &Path, width: u32, height: u32) -> TerrainResult<u32> {
    if width != height {
        return Err(asset_error(
            path.display(),
            format!("expected a square image, got {}x{}", width, height),
        ));
    }
    Ok(width)
}

/// Load and validate every baked input for a world layout
pub fn load_terrain_inputs(
    dir: impl AsRef<Path>,
    params: &TerrainWorldParams,
) -> TerrainResult<TerrainInputs> {
    let dir = dir.as_ref();
    log::info!("[assets::load_terrain_inputs] Loading terrain from {}", dir.display());

    if params.node_ids().max_node_id() > u16::MAX as u32 {
        return Err(TerrainError::InvalidConfig(format!(
            "MAX_NODE_ID {} does not fit a 16-bit node id image",
            params.node_ids().max_node_id()
        )));
    }

    let height_image = load_luma16(&dir.join(HEIGHT_FILE))?;
    let height = HeightField::new(
        height_image.width(),
        height_image.height(),
        height_image.pixels().map(|p| normalize(p.0[0])).collect(),
    )?;

    let mut min_max_levels = Vec::new();
    for lod in 0..params.lod_count() {
        let path = dir.join(min_max_file(lod));
        if !path.exists() {
            break;
        }
        let image = load_rgba16(&path)?;
        let size = require_square(&path, image.width(), image.height())?;
        let data = image
            .pixels()
            .map(|p| [normalize(p.0[0]), normalize(p.0[1])])
            .collect();
        min_max_levels.push(MinMaxLevel { size, data });
    }

    let mut node_id_levels = Vec::new();
    for lod in 0..params.lod_count() {
        let path = dir.join(node_id_file(lod));
        if !path.exists() {
            break;
        }
        let image = load_luma16(&path)?;
        let size = require_square(&path, image.width(), image.height())?;
        let data = image.pixels().map(|p| p.0[0] as u32).collect();
        node_id_levels.push(NodeIdLevel { size, data });
    }

    let inputs = TerrainInputs {
        height,
        min_max: MinMaxHeightPyramid {
            levels: min_max_levels,
        },
        node_ids: NodeIdPyramid {
            levels: node_id_levels,
        },
    };
    inputs.validate(params)?;

    log::info!(
        "[assets::load_terrain_inputs] Loaded {} LOD levels from {}",
        params.lod_count(),
        dir.display()
    );
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    fn small_params() -> TerrainWorldParams {
        TerrainWorldParams::new(&WorldConfig {
            size: [1024.0, 256.0, 1024.0],
            max_lod: 2,
            root_node_count: 2,
            patches_per_node: 4,
        })
        .unwrap()
    }

    fn write_inputs(dir: &Path, params: &TerrainWorldParams, levels: u32) {
        let size = params.patch_grid_size(0);
        let height: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(size, size, |x, _| Luma([(x * 100) as u16]));
        height.save(dir.join(HEIGHT_FILE)).unwrap();

        for lod in 0..levels {
            let size = params.patch_grid_size(lod);
            let min_max: ImageBuffer<Rgba<u16>, Vec<u16>> =
                ImageBuffer::from_fn(size, size, |x, y| {
                    Rgba([(x + y) as u16 * 10, (x + y) as u16 * 20, 0, u16::MAX])
                });
            min_max.save(dir.join(min_max_file(lod))).unwrap();

            let ids = NodeIdPyramid::from_params(params);
            let level = &ids.levels[lod as usize];
            let node_ids: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_fn(level.size, level.size, |x, y| {
                    Luma([level.data[(y * level.size + x) as usize] as u16])
                });
            node_ids.save(dir.join(node_id_file(lod))).unwrap();
        }
    }

    #[test]
    fn loads_baked_pyramids() {
        let dir = tempfile::tempdir().unwrap();
        let params = small_params();
        write_inputs(dir.path(), &params, params.lod_count());

        let inputs = load_terrain_inputs(dir.path(), &params).unwrap();
        assert_eq!(inputs.node_ids, NodeIdPyramid::from_params(&params));
        assert_eq!(inputs.min_max.levels[0].size, 32);
        assert_eq!(inputs.min_max.texel(0, 3, 2), [normalize(50), normalize(100)]);
        assert_eq!(inputs.height.width, 32);
    }

    #[test]
    fn missing_level_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let params = small_params();
        write_inputs(dir.path(), &params, params.lod_count() - 1);

        assert!(matches!(
            load_terrain_inputs(dir.path(), &params),
            Err(TerrainError::MipLevelMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn missing_height_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        let params = small_params();
        assert!(matches!(
            load_terrain_inputs(dir.path(), &params),
            Err(TerrainError::AssetLoad { .. })
        ));
    }
}

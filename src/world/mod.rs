//! Terrain world description
//!
//! - **Params**: world extent, per-LOD node layout and the dense node-id table
//! - **Node**: quadtree node coordinates and per-node descriptors
//! - **Bounds**: node and patch AABBs, frustum test and camera distance
//! - **Inputs**: baked height field, min/max-height pyramid and node-id pyramid
//! - **Assets**: loading the baked inputs from image files

pub mod assets;
pub mod bounds;
pub mod inputs;
pub mod node;
pub mod params;

pub use assets::load_terrain_inputs;
pub use bounds::Aabb;
pub use inputs::{HeightField, MinMaxHeightPyramid, NodeIdPyramid, TerrainInputs};
pub use node::{FinalNode, NodeDescriptor, NodeLoc};
pub use params::{LodParams, NodeIdTable, TerrainWorldParams};

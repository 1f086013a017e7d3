pub mod camera;
pub mod config;
pub mod constants;
pub mod error;
pub mod gpu;
pub mod hiz;
pub mod quadtree;
pub mod world;

pub use camera::{CameraState, FrustumPlanes};
pub use config::{CapacityConfig, CullingSettings, HizConfig, ReductionMode, TerrainConfig, WorldConfig};
pub use error::{TerrainError, TerrainErrorContext, TerrainResult};
pub use gpu::{DrawIndexedIndirectArgs, FrameDiagnostics, GpuContext, GpuTerrainBuilder, IndirectDrawState};
pub use hiz::{DepthBuffer, DepthConvention, DepthPyramid, DepthPyramidBuilder, HizFrame, ReductionStrategy};
pub use quadtree::{CpuTerrainBuilder, LodMap, PatchBounds, RenderPatch};
pub use world::{load_terrain_inputs, FinalNode, NodeLoc, TerrainInputs, TerrainWorldParams};

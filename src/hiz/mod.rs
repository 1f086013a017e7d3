/// Hierarchical depth (HiZ) pyramid
///
/// The pyramid is built from the camera depth buffer each frame and published together
/// with the view-projection and camera position used to build it, so the traversal can
/// reproject node bounds into it.
///
/// - `DepthPyramidBuilder`: wgpu compute build, in-place or ping-pong reduction
/// - `DepthPyramid`: host build of the same pyramid for the reference path
/// - `occlusion`: the conservative box-vs-pyramid test

pub mod builder;
pub mod occlusion;
pub mod pyramid;

pub use builder::{
    DepthPyramidBuilder, DepthReducer, HizFrame, HizTargets, InPlaceReducer, PingPongReducer,
};
pub use occlusion::{is_occluded, project_bounds, select_mip, ProjectedBounds};
pub use pyramid::{hiz_map_size, DepthBuffer, DepthConvention, DepthPyramid, ReductionStrategy};

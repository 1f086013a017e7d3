/// Quadtree LOD selection on the host
///
/// The reference implementation of the per-frame pipeline. Each pass processes its
/// items with rayon and appends through atomic counters, so list order is not
/// deterministic and results compare as sets.

pub mod append_buffer;
pub mod lod_map;
pub mod patch;
pub mod pipeline;
pub mod traversal;

pub use append_buffer::AppendBuffer;
pub use lod_map::LodMap;
pub use patch::{build_patch, seam_codes, PatchBounds, PatchGenerator, RenderPatch};
pub use pipeline::CpuTerrainBuilder;
pub use traversal::{node_bounds, FrameContext, NodeDescriptorTable, QuadtreeTraversal};

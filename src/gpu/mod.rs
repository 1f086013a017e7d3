//! GPU terrain build
//!
//! wgpu compute pipeline for the per-frame quadtree traversal, LOD map, patch
//! generation and indirect draw arguments, plus the generated WGSL prelude and the
//! validation helpers shared with the HiZ builder.

pub mod constants;
pub mod context;
pub mod diagnostics;
pub mod indirect;
pub mod layouts;
pub mod terrain_builder;
pub mod validation;

pub use context::GpuContext;
pub use diagnostics::{read_back, FrameDiagnostics};
pub use indirect::{DrawIndexedIndirectArgs, IndirectDrawState};
pub use layouts::{EvaluationUniform, FrameUniform, PassUniform, WorldUniform};
pub use terrain_builder::GpuTerrainBuilder;
pub use validation::{check_adapter_support, with_validation};

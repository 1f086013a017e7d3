/// Host reference pipeline
///
/// Runs the same per-frame pipeline as the GPU builder over host memory: traversal,
/// LOD map, patch generation and the indirect argument refresh. Used by tests, the
/// probe binary and devices without compute or indirect execution.

use crate::camera::CameraState;
use crate::config::{CapacityConfig, CullingSettings, TerrainConfig};
use crate::constants::counters;
use crate::error::{AppendList, TerrainError, TerrainResult};
use crate::gpu::{DrawIndexedIndirectArgs, FrameDiagnostics};
use crate::hiz::DepthPyramid;
use crate::world::{FinalNode, TerrainInputs, TerrainWorldParams};
use super::{AppendBuffer, FrameContext, LodMap, PatchBounds, PatchGenerator, QuadtreeTraversal, RenderPatch};

pub struct CpuTerrainBuilder {
    params: TerrainWorldParams,
    inputs: TerrainInputs,
    capacities: CapacityConfig,
    settings: CullingSettings,
    traversal: QuadtreeTraversal,
    lod_map: LodMap,
    patches: AppendBuffer<RenderPatch>,
    patch_bounds: AppendBuffer<PatchBounds>,
    patch_args: DrawIndexedIndirectArgs,
    bounds_args: DrawIndexedIndirectArgs,
    diagnostics: Option<FrameDiagnostics>,
}

impl CpuTerrainBuilder {
    pub fn new(config: &TerrainConfig, inputs: TerrainInputs) -> TerrainResult<Self> {
        config.validate()?;
        let params = TerrainWorldParams::new(&config.world)?;
        inputs.validate(&params)?;

        let capacities = config.capacities;
        log::info!(
            "[CpuTerrainBuilder::new] {} LODs, capacities: {} candidates, {} final nodes, {} patches",
            params.lod_count(),
            capacities.candidate_nodes,
            capacities.final_nodes,
            capacities.patches
        );

        Ok(Self {
            traversal: QuadtreeTraversal::new(&params, &capacities),
            lod_map: LodMap::new(&params),
            patches: AppendBuffer::new(AppendList::Patches, capacities.patches),
            patch_bounds: AppendBuffer::new(AppendList::PatchBounds, capacities.patches),
            patch_args: DrawIndexedIndirectArgs::patch_mesh(),
            bounds_args: DrawIndexedIndirectArgs::bounds_cube(),
            diagnostics: None,
            settings: config.culling,
            capacities,
            params,
            inputs,
        })
    }

    /// Run one frame.
    ///
    /// With HiZ culling on and no valid pyramid, HiZ is skipped for this frame.
    /// Capacity overflow is returned after the frame completes; the outputs then
    /// hold the truncated lists.
    pub fn dispatch(
        &mut self,
        camera: &CameraState,
        hiz: Option<&DepthPyramid>,
    ) -> TerrainResult<FrameDiagnostics> {
        let hiz = hiz.filter(|pyramid| pyramid.is_valid());
        if self.settings.hiz_occlusion_cull && hiz.is_none() {
            log::warn!("[CpuTerrainBuilder::dispatch] HiZ culling enabled without a depth pyramid, skipping HiZ this frame");
        }
        let ctx = FrameContext {
            camera,
            settings: self.settings,
            hiz,
        };

        self.traversal.run(&self.params, &self.inputs, &ctx);

        self.lod_map
            .rasterize(&self.params, &self.inputs.node_ids, self.traversal.descriptors());

        self.patches.reset();
        self.patch_bounds.reset();
        let final_nodes = self.traversal.final_nodes().to_vec();
        PatchGenerator {
            params: &self.params,
            inputs: &self.inputs,
            lod_map: &self.lod_map,
        }
        .generate(&ctx, &final_nodes, &self.patches, &self.patch_bounds);

        self.patch_args
            .set_instance_count(self.patches.requested(), self.capacities.patches);
        let bounds_count = if self.settings.bounds_debug {
            self.patch_bounds.requested()
        } else {
            0
        };
        self.bounds_args
            .set_instance_count(bounds_count, self.capacities.patches);

        let diagnostics = self.collect_diagnostics();
        self.diagnostics = Some(diagnostics);
        log::debug!(
            "[CpuTerrainBuilder::dispatch] {} final nodes, {} patches, peak {} candidates",
            diagnostics.final_nodes,
            diagnostics.patches,
            diagnostics.peak_candidates
        );
        diagnostics.check()?;
        Ok(diagnostics)
    }

    fn collect_diagnostics(&self) -> FrameDiagnostics {
        let mut flags = 0;
        if self.traversal.candidates_overflowed(self.capacities.candidate_nodes) {
            flags |= counters::OVERFLOW_CANDIDATES;
        }
        if self.traversal.final_nodes().overflowed() {
            flags |= counters::OVERFLOW_FINAL_NODES;
        }
        if self.patches.overflowed() {
            flags |= counters::OVERFLOW_PATCHES;
        }
        if self.patch_bounds.overflowed() {
            flags |= counters::OVERFLOW_PATCH_BOUNDS;
        }
        FrameDiagnostics {
            final_nodes: self.traversal.final_nodes().requested(),
            patches: self.patches.requested(),
            patch_bounds: self.patch_bounds.requested(),
            peak_candidates: self.traversal.peak_candidates(),
            overflow_flags: flags,
            capacities: self.capacities,
        }
    }

    pub fn set_frustum_cull(&mut self, enabled: bool) {
        self.settings.frustum_cull = enabled;
    }

    pub fn set_hiz_occlusion_cull(&mut self, enabled: bool) {
        self.settings.hiz_occlusion_cull = enabled;
    }

    pub fn set_bounds_debug(&mut self, enabled: bool) {
        self.settings.bounds_debug = enabled;
    }

    pub fn set_node_evaluation_c(&mut self, c: f32) -> TerrainResult<()> {
        if !(c > 0.0 && c.is_finite()) {
            return Err(TerrainError::InvalidConfig(format!(
                "node evaluation coefficient must be positive, got {}",
                c
            )));
        }
        self.settings.node_evaluation_c = c;
        Ok(())
    }

    /// Rejected when it exceeds the world height
    pub fn set_bounds_height_redundance(&mut self, redundance: u32) -> TerrainResult<()> {
        let settings = CullingSettings {
            bounds_height_redundance: redundance,
            ..self.settings
        };
        settings.validate(self.params.world_size.y)?;
        self.settings = settings;
        Ok(())
    }

    /// Rejected unless positive and finite, clamped to its range when used
    pub fn set_hiz_depth_bias(&mut self, bias: f32) -> TerrainResult<()> {
        let settings = CullingSettings {
            hiz_depth_bias: bias,
            ..self.settings
        };
        settings.validate(self.params.world_size.y)?;
        self.settings = settings;
        Ok(())
    }

    pub fn settings(&self) -> &CullingSettings {
        &self.settings
    }

    pub fn params(&self) -> &TerrainWorldParams {
        &self.params
    }

    pub fn inputs(&self) -> &TerrainInputs {
        &self.inputs
    }

    pub fn final_nodes(&self) -> Vec<FinalNode> {
        self.traversal.final_nodes().to_vec()
    }

    pub fn patches(&self) -> Vec<RenderPatch> {
        self.patches.to_vec()
    }

    pub fn patch_bounds(&self) -> Vec<PatchBounds> {
        self.patch_bounds.to_vec()
    }

    pub fn lod_map(&self) -> &LodMap {
        &self.lod_map
    }

    pub fn patch_args(&self) -> &DrawIndexedIndirectArgs {
        &self.patch_args
    }

    pub fn bounds_args(&self) -> &DrawIndexedIndirectArgs {
        &self.bounds_args
    }

    /// Diagnostics of the last dispatch
    pub fn diagnostics(&self) -> Option<&FrameDiagnostics> {
        self.diagnostics.as_ref()
    }
}

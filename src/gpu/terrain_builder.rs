/// GPU terrain builder
///
/// Records the per-frame quadtree traversal, LOD map rasterization, patch generation
/// and indirect argument refresh into the caller's command encoder. Every pass sizes
/// its dispatch from a GPU counter, so nothing is read back on the frame path.

use wgpu::util::DeviceExt;
use wgpu::{BindGroup, BindGroupLayout, Buffer, ComputePipeline, Device, Queue, Texture, TextureView};

use crate::camera::CameraState;
use crate::config::{CapacityConfig, CullingSettings, TerrainConfig};
use crate::constants::counters;
use crate::error::{TerrainError, TerrainResult};
use crate::hiz::{DepthConvention, HizFrame};
use crate::quadtree::{PatchBounds, RenderPatch};
use crate::world::{FinalNode, TerrainInputs, TerrainWorldParams};
use super::constants::{compose_shader, generate_wgsl_constants};
use super::diagnostics::{read_back, FrameDiagnostics};
use super::indirect::{DrawIndexedIndirectArgs, IndirectDrawState};
use super::layouts::{EvaluationUniform, FrameUniform, PassUniform, WorldUniform};
use super::validation::with_validation;

const LOD_MAP_WORKGROUP_SIZE: u32 = 8;
const PASS_UNIFORM_SIZE: u64 = std::mem::size_of::<PassUniform>() as u64;
const COUNTER_BYTES: u64 = (counters::COUNT as u64) * 4;

fn layout_entry(binding: u32, ty: wgpu::BindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

fn uniform_entry(binding: u32, has_dynamic_offset: bool) -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        binding,
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: None,
        },
    )
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        binding,
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    )
}

fn texture_entry(binding: u32, sample_type: wgpu::TextureSampleType) -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        binding,
        wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
    )
}

fn unfilterable_float() -> wgpu::TextureSampleType {
    wgpu::TextureSampleType::Float { filterable: false }
}

fn buffer_entry(binding: u32, buffer: &Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn view_entry(binding: u32, view: &TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

fn storage_buffer(device: &Device, label: &str, size: u64, extra: wgpu::BufferUsages) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        // Zero-sized bindings are invalid
        size: size.max(16),
        usage: wgpu::BufferUsages::STORAGE | extra,
        mapped_at_creation: false,
    })
}

/// Upload one texel pyramid as a mipped 2D texture, level i of size `levels[i].0`
fn upload_pyramid(
    device: &Device,
    queue: &Queue,
    label: &str,
    format: wgpu::TextureFormat,
    texel_bytes: u32,
    levels: &[(u32, &[u8])],
) -> Texture {
    let base = levels.first().map_or(1, |(size, _)| *size);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: base,
            height: base,
            depth_or_array_layers: 1,
        },
        mip_level_count: levels.len().max(1) as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    for (mip, (size, bytes)) in levels.iter().enumerate() {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: mip as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size * texel_bytes),
                rows_per_image: Some(*size),
            },
            wgpu::Extent3d {
                width: *size,
                height: *size,
                depth_or_array_layers: 1,
            },
        );
    }
    texture
}

/// Bind group layouts of the four kernels
struct KernelLayouts {
    common: BindGroupLayout,
    traversal: BindGroupLayout,
    lod_map: BindGroupLayout,
    patches: BindGroupLayout,
    finalize: BindGroupLayout,
    hiz: BindGroupLayout,
}

impl KernelLayouts {
    fn new(device: &Device) -> Self {
        let common = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Common Layout"),
            entries: &[
                uniform_entry(0, false),
                uniform_entry(1, false),
                uniform_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, false),
                texture_entry(5, unfilterable_float()),
                texture_entry(6, wgpu::TextureSampleType::Uint),
            ],
        });
        let traversal = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Traversal Layout"),
            entries: &[
                uniform_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
            ],
        });
        let lod_map = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain LOD Map Layout"),
            entries: &[layout_entry(
                4,
                wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::R32Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
            )],
        });
        let patches = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Patch Layout"),
            entries: &[
                storage_entry(5, true),
                texture_entry(6, wgpu::TextureSampleType::Uint),
                storage_entry(7, false),
                storage_entry(8, false),
            ],
        });
        let finalize = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain Finalize Layout"),
            entries: &[storage_entry(9, false), storage_entry(10, false)],
        });
        let hiz = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain HiZ Layout"),
            entries: &[texture_entry(0, unfilterable_float())],
        });
        Self {
            common,
            traversal,
            lod_map,
            patches,
            finalize,
            hiz,
        }
    }
}

struct KernelPipelines {
    traversal: ComputePipeline,
    lod_map: ComputePipeline,
    patches: ComputePipeline,
    finalize: ComputePipeline,
}

fn create_pipeline(
    device: &Device,
    module: &wgpu::ShaderModule,
    layouts: &[&BindGroupLayout],
    entry_point: &str,
) -> ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&pipeline_layout),
        module,
        entry_point,
    })
}

/// Storage owned by the builder
struct TerrainBuffers {
    world: Buffer,
    frame: Buffer,
    evaluation: Buffer,
    passes: Buffer,
    pass_stride: u64,
    counters: Buffer,
    dispatch_args: Buffer,
    root_nodes: Buffer,
    node_lists: [Buffer; 2],
    final_nodes: Buffer,
    node_descriptors: Buffer,
    patches: Buffer,
    patch_bounds: Buffer,
}

/// One traversal pass: LOD, counter slots and the group(1) bind group it uses
struct TraversalPass {
    lod: u32,
    consume_slot: u32,
    /// Index into `traversal_groups`: root to A, A to B, B to A
    group: usize,
}

pub struct GpuTerrainBuilder {
    params: TerrainWorldParams,
    capacities: CapacityConfig,
    settings: CullingSettings,
    convention: DepthConvention,
    evaluation_dirty: bool,
    buffers: TerrainBuffers,
    indirect: IndirectDrawState,
    _min_max_texture: Texture,
    _node_id_texture: Texture,
    lod_map_texture: Texture,
    lod_map_view: TextureView,
    _dummy_hiz: Texture,
    dummy_hiz_view: TextureView,
    layouts: KernelLayouts,
    pipelines: KernelPipelines,
    common_group: BindGroup,
    traversal_groups: [BindGroup; 3],
    lod_map_group: BindGroup,
    patch_group: BindGroup,
    finalize_group: BindGroup,
    passes: Vec<TraversalPass>,
}

impl GpuTerrainBuilder {
    pub fn new(
        device: &Device,
        queue: &Queue,
        config: &TerrainConfig,
        inputs: &TerrainInputs,
    ) -> TerrainResult<Self> {
        config.validate()?;
        let params = TerrainWorldParams::new(&config.world)?;
        inputs.validate(&params)?;
        let capacities = config.capacities;
        let convention = DepthConvention::from_reversed_z(config.hiz.reversed_z);

        let limits = device.limits();
        let s = params.patches_per_node;
        if s > limits.max_compute_workgroup_size_x
            || s > limits.max_compute_workgroup_size_y
            || s * s > limits.max_compute_invocations_per_workgroup
        {
            return Err(TerrainError::MissingCapability(format!(
                "patch workgroup {}x{} exceeds the device compute limits",
                s, s
            )));
        }
        let patch_bytes = capacities.patches as u64 * std::mem::size_of::<RenderPatch>() as u64;
        if patch_bytes > limits.max_storage_buffer_binding_size as u64 {
            return Err(TerrainError::MissingCapability(format!(
                "patch list of {} bytes exceeds the storage binding limit {}",
                patch_bytes, limits.max_storage_buffer_binding_size
            )));
        }

        log::info!(
            "[GpuTerrainBuilder::new] {} LODs, LOD map {}x{}, capacities: {} candidates, {} final nodes, {} patches",
            params.lod_count(),
            params.lod_map_size(),
            params.lod_map_size(),
            capacities.candidate_nodes,
            capacities.final_nodes,
            capacities.patches
        );

        let buffers = Self::create_buffers(device, &params, &capacities, &config.culling, limits.min_uniform_buffer_offset_alignment as u64);
        let passes = Self::write_pass_uniforms(queue, &buffers, &params, &capacities);
        let indirect = IndirectDrawState::new(device);

        let min_max_levels: Vec<(u32, &[u8])> = inputs
            .min_max
            .levels
            .iter()
            .map(|level| (level.size, bytemuck::cast_slice::<[f32; 2], u8>(&level.data)))
            .collect();
        let min_max_texture = upload_pyramid(
            device,
            queue,
            "Terrain Min Max Height",
            wgpu::TextureFormat::Rg32Float,
            8,
            &min_max_levels,
        );
        let node_id_levels: Vec<(u32, &[u8])> = inputs
            .node_ids
            .levels
            .iter()
            .map(|level| (level.size, bytemuck::cast_slice::<u32, u8>(&level.data)))
            .collect();
        let node_id_texture = upload_pyramid(
            device,
            queue,
            "Terrain Node Ids",
            wgpu::TextureFormat::R32Uint,
            4,
            &node_id_levels,
        );
        let min_max_view = min_max_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let node_id_view = node_id_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let lod_map_size = params.lod_map_size();
        let lod_map_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Terrain LOD Map"),
            size: wgpu::Extent3d {
                width: lod_map_size,
                height: lod_map_size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let lod_map_view = lod_map_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let dummy_hiz = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("Terrain Empty HiZ"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::bytes_of(&convention.far_value()),
        );
        let dummy_hiz_view = dummy_hiz.create_view(&wgpu::TextureViewDescriptor::default());

        let prelude = generate_wgsl_constants(&params, &capacities, convention);
        let source = compose_shader(&prelude, include_str!("shaders/terrain_build.wgsl"), s);

        let (layouts, pipelines) = with_validation(device, "terrain_build", || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Terrain Build Shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let layouts = KernelLayouts::new(device);
            let pipelines = KernelPipelines {
                traversal: create_pipeline(
                    device,
                    &module,
                    &[&layouts.common, &layouts.traversal, &layouts.hiz],
                    "traverse_quadtree",
                ),
                lod_map: create_pipeline(
                    device,
                    &module,
                    &[&layouts.common, &layouts.lod_map],
                    "build_lod_map",
                ),
                patches: create_pipeline(
                    device,
                    &module,
                    &[&layouts.common, &layouts.patches, &layouts.hiz],
                    "build_patches",
                ),
                finalize: create_pipeline(
                    device,
                    &module,
                    &[&layouts.common, &layouts.finalize],
                    "finalize_args",
                ),
            };
            (layouts, pipelines)
        })?;

        let common_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Common Bind Group"),
            layout: &layouts.common,
            entries: &[
                buffer_entry(0, &buffers.world),
                buffer_entry(1, &buffers.frame),
                buffer_entry(2, &buffers.evaluation),
                buffer_entry(3, &buffers.counters),
                buffer_entry(4, &buffers.node_descriptors),
                view_entry(5, &min_max_view),
                view_entry(6, &node_id_view),
            ],
        });

        let pass_binding = wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffers.passes,
                offset: 0,
                size: wgpu::BufferSize::new(PASS_UNIFORM_SIZE),
            }),
        };
        let [list_a, list_b] = &buffers.node_lists;
        let traversal_group = |label: &str, consume: &Buffer, append: &Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layouts.traversal,
                entries: &[
                    pass_binding.clone(),
                    buffer_entry(1, consume),
                    buffer_entry(2, append),
                    buffer_entry(3, &buffers.final_nodes),
                ],
            })
        };
        let traversal_groups = [
            traversal_group("Terrain Traversal Root Bind Group", &buffers.root_nodes, list_a),
            traversal_group("Terrain Traversal A->B Bind Group", list_a, list_b),
            traversal_group("Terrain Traversal B->A Bind Group", list_b, list_a),
        ];

        let lod_map_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain LOD Map Bind Group"),
            layout: &layouts.lod_map,
            entries: &[view_entry(4, &lod_map_view)],
        });
        let patch_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Patch Bind Group"),
            layout: &layouts.patches,
            entries: &[
                buffer_entry(5, &buffers.final_nodes),
                view_entry(6, &lod_map_view),
                buffer_entry(7, &buffers.patches),
                buffer_entry(8, &buffers.patch_bounds),
            ],
        });
        let finalize_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Finalize Bind Group"),
            layout: &layouts.finalize,
            entries: &[
                buffer_entry(9, indirect.patch_args()),
                buffer_entry(10, indirect.bounds_args()),
            ],
        });

        Ok(Self {
            settings: config.culling,
            evaluation_dirty: false,
            buffers,
            indirect,
            _min_max_texture: min_max_texture,
            _node_id_texture: node_id_texture,
            lod_map_texture,
            lod_map_view,
            _dummy_hiz: dummy_hiz,
            dummy_hiz_view,
            layouts,
            pipelines,
            common_group,
            traversal_groups,
            lod_map_group,
            patch_group,
            finalize_group,
            passes,
            params,
            capacities,
            convention,
        })
    }

    fn create_buffers(
        device: &Device,
        params: &TerrainWorldParams,
        capacities: &CapacityConfig,
        settings: &CullingSettings,
        uniform_alignment: u64,
    ) -> TerrainBuffers {
        let uniform = wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST;
        let world = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain World Uniform"),
            contents: bytemuck::bytes_of(&WorldUniform::new(params)),
            usage: uniform,
        });
        let frame = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Frame Uniform"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: uniform,
            mapped_at_creation: false,
        });
        let evaluation = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Evaluation Uniform"),
            contents: bytemuck::bytes_of(&EvaluationUniform {
                node_evaluation_c: settings.node_evaluation_c,
                _padding: [0.0; 3],
            }),
            usage: uniform,
        });

        let pass_stride = PASS_UNIFORM_SIZE.max(uniform_alignment);
        let passes = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Pass Uniforms"),
            size: pass_stride * params.lod_count() as u64,
            usage: uniform,
            mapped_at_creation: false,
        });

        let counters = storage_buffer(
            device,
            "Terrain Counters",
            COUNTER_BYTES,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        );
        let dispatch_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Dispatch Args"),
            contents: bytemuck::cast_slice(&[0u32, 1, 1]),
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
        });

        let count = params.root_node_count;
        let roots: Vec<[u32; 2]> = (0..count)
            .flat_map(|y| (0..count).map(move |x| [x, y]))
            .collect();
        let root_nodes = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Root Nodes"),
            contents: bytemuck::cast_slice(&roots),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let list_bytes = capacities.candidate_nodes as u64 * 8;
        let node_lists = [
            storage_buffer(device, "Terrain Node List A", list_bytes, wgpu::BufferUsages::empty()),
            storage_buffer(device, "Terrain Node List B", list_bytes, wgpu::BufferUsages::empty()),
        ];
        let readable = wgpu::BufferUsages::COPY_SRC;
        let final_nodes = storage_buffer(
            device,
            "Terrain Final Nodes",
            capacities.final_nodes as u64 * std::mem::size_of::<FinalNode>() as u64,
            readable,
        );
        let node_descriptors = storage_buffer(
            device,
            "Terrain Node Descriptors",
            params.node_ids().len() as u64 * 4,
            readable,
        );
        let patches = storage_buffer(
            device,
            "Terrain Culled Patches",
            capacities.patches as u64 * std::mem::size_of::<RenderPatch>() as u64,
            readable | wgpu::BufferUsages::VERTEX,
        );
        let patch_bounds = storage_buffer(
            device,
            "Terrain Patch Bounds",
            capacities.patches as u64 * std::mem::size_of::<PatchBounds>() as u64,
            readable | wgpu::BufferUsages::VERTEX,
        );

        TerrainBuffers {
            world,
            frame,
            evaluation,
            passes,
            pass_stride,
            counters,
            dispatch_args,
            root_nodes,
            node_lists,
            final_nodes,
            node_descriptors,
            patches,
            patch_bounds,
        }
    }

    /// Pass k consumes root (k = 0), A (k odd) or B (k even), and appends to the other list
    fn write_pass_uniforms(
        queue: &Queue,
        buffers: &TerrainBuffers,
        params: &TerrainWorldParams,
        capacities: &CapacityConfig,
    ) -> Vec<TraversalPass> {
        let roots = params.root_node_count * params.root_node_count;
        (0..params.lod_count())
            .map(|pass| {
                let lod = params.max_lod - pass;
                let (consume_slot, append_slot, consume_capacity, group) = match pass {
                    0 => (counters::ROOT_NODES, counters::NODE_LIST_A, roots, 0),
                    p if p % 2 == 1 => (
                        counters::NODE_LIST_A,
                        counters::NODE_LIST_B,
                        capacities.candidate_nodes,
                        1,
                    ),
                    _ => (
                        counters::NODE_LIST_B,
                        counters::NODE_LIST_A,
                        capacities.candidate_nodes,
                        2,
                    ),
                };
                let uniform = PassUniform {
                    lod,
                    consume_slot,
                    append_slot,
                    consume_capacity,
                    append_capacity: capacities.candidate_nodes,
                    _padding: [0; 3],
                };
                queue.write_buffer(
                    &buffers.passes,
                    pass as u64 * buffers.pass_stride,
                    bytemuck::bytes_of(&uniform),
                );
                TraversalPass {
                    lod,
                    consume_slot,
                    group,
                }
            })
            .collect()
    }

    /// Record one frame into `encoder`.
    ///
    /// Without a published pyramid HiZ culling is skipped for this frame. Overflow is
    /// recorded in the counter buffer and reported by `read_diagnostics`.
    pub fn dispatch(
        &mut self,
        device: &Device,
        queue: &Queue,
        encoder: &mut wgpu::CommandEncoder,
        camera: &CameraState,
        hiz: Option<HizFrame<'_>>,
    ) {
        if self.settings.hiz_occlusion_cull && hiz.is_none() {
            log::warn!("[GpuTerrainBuilder::dispatch] HiZ culling enabled without a depth pyramid, skipping HiZ this frame");
        }

        let mut initial = [0u32; counters::COUNT as usize];
        initial[counters::ROOT_NODES as usize] = self.params.root_node_count * self.params.root_node_count;
        queue.write_buffer(&self.buffers.counters, 0, bytemuck::cast_slice(&initial));

        let frame = FrameUniform::new(camera, &self.settings, hiz.as_ref());
        queue.write_buffer(&self.buffers.frame, 0, bytemuck::bytes_of(&frame));

        if self.evaluation_dirty {
            let evaluation = EvaluationUniform {
                node_evaluation_c: self.settings.node_evaluation_c,
                _padding: [0.0; 3],
            };
            queue.write_buffer(&self.buffers.evaluation, 0, bytemuck::bytes_of(&evaluation));
            self.evaluation_dirty = false;
        }

        let hiz_view = hiz.map_or(&self.dummy_hiz_view, |frame| frame.view);
        let hiz_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain HiZ Bind Group"),
            layout: &self.layouts.hiz,
            entries: &[view_entry(0, hiz_view)],
        });

        for (index, pass) in self.passes.iter().enumerate() {
            self.copy_counter_to_dispatch(encoder, pass.consume_slot);
            {
                let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Terrain Traversal"),
                    timestamp_writes: None,
                });
                compute.set_pipeline(&self.pipelines.traversal);
                compute.set_bind_group(0, &self.common_group, &[]);
                let offset = (index as u64 * self.buffers.pass_stride) as u32;
                compute.set_bind_group(1, &self.traversal_groups[pass.group], &[offset]);
                compute.set_bind_group(2, &hiz_group, &[]);
                compute.dispatch_workgroups_indirect(&self.buffers.dispatch_args, 0);
            }
            // The consumed list is the next pass's append target
            if pass.consume_slot != counters::ROOT_NODES {
                encoder.clear_buffer(
                    &self.buffers.counters,
                    pass.consume_slot as u64 * 4,
                    Some(4),
                );
            }
            log::trace!("[GpuTerrainBuilder::dispatch] Recorded traversal of LOD {}", pass.lod);
        }

        {
            let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Terrain LOD Map"),
                timestamp_writes: None,
            });
            compute.set_pipeline(&self.pipelines.lod_map);
            compute.set_bind_group(0, &self.common_group, &[]);
            compute.set_bind_group(1, &self.lod_map_group, &[]);
            let groups = (self.params.lod_map_size() + LOD_MAP_WORKGROUP_SIZE - 1) / LOD_MAP_WORKGROUP_SIZE;
            compute.dispatch_workgroups(groups, groups, 1);
        }

        self.copy_counter_to_dispatch(encoder, counters::FINAL_NODES);
        {
            let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Terrain Patches"),
                timestamp_writes: None,
            });
            compute.set_pipeline(&self.pipelines.patches);
            compute.set_bind_group(0, &self.common_group, &[]);
            compute.set_bind_group(1, &self.patch_group, &[]);
            compute.set_bind_group(2, &hiz_group, &[]);
            compute.dispatch_workgroups_indirect(&self.buffers.dispatch_args, 0);
        }

        {
            let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Terrain Finalize Args"),
                timestamp_writes: None,
            });
            compute.set_pipeline(&self.pipelines.finalize);
            compute.set_bind_group(0, &self.common_group, &[]);
            compute.set_bind_group(1, &self.finalize_group, &[]);
            compute.dispatch_workgroups(1, 1, 1);
        }
    }

    /// Workgroup count x of the next indirect dispatch := counter `slot`
    fn copy_counter_to_dispatch(&self, encoder: &mut wgpu::CommandEncoder, slot: u32) {
        encoder.copy_buffer_to_buffer(
            &self.buffers.counters,
            slot as u64 * 4,
            &self.buffers.dispatch_args,
            0,
            4,
        );
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

    /// Takes effect on the next dispatch
    pub fn set_node_evaluation_c(&mut self, c: f32) -> TerrainResult<()> {
        if !(c > 0.0 && c.is_finite()) {
            return Err(TerrainError::InvalidConfig(format!(
                "node evaluation coefficient must be positive, got {}",
                c
            )));
        }
        if c != self.settings.node_evaluation_c {
            self.settings.node_evaluation_c = c;
            self.evaluation_dirty = true;
        }
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

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    /// Culled patch list, `RenderPatch` records
    pub fn patch_buffer(&self) -> &Buffer {
        &self.buffers.patches
    }

    /// Debug bounds list, `PatchBounds` records
    pub fn patch_bounds_buffer(&self) -> &Buffer {
        &self.buffers.patch_bounds
    }

    pub fn final_node_buffer(&self) -> &Buffer {
        &self.buffers.final_nodes
    }

    pub fn indirect(&self) -> &IndirectDrawState {
        &self.indirect
    }

    pub fn lod_map_texture(&self) -> &Texture {
        &self.lod_map_texture
    }

    pub fn lod_map_view(&self) -> &TextureView {
        &self.lod_map_view
    }

    /// Blocking readback of the counters of the last submitted frame
    pub fn read_diagnostics(&self, device: &Device, queue: &Queue) -> TerrainResult<FrameDiagnostics> {
        let raw = read_back::<u32>(device, queue, &self.buffers.counters, counters::COUNT as usize)?;
        Ok(FrameDiagnostics::from_counters(&raw, self.capacities))
    }

    /// Blocking readback of the final node list, for debugging and tests
    pub fn read_final_nodes(&self, device: &Device, queue: &Queue) -> TerrainResult<Vec<FinalNode>> {
        let diagnostics = self.read_diagnostics(device, queue)?;
        let count = diagnostics.final_nodes.min(self.capacities.final_nodes);
        read_back(device, queue, &self.buffers.final_nodes, count as usize)
    }

    /// Blocking readback of the culled patch list, for debugging and tests
    pub fn read_patches(&self, device: &Device, queue: &Queue) -> TerrainResult<Vec<RenderPatch>> {
        let diagnostics = self.read_diagnostics(device, queue)?;
        let count = diagnostics.patches.min(self.capacities.patches);
        read_back(device, queue, &self.buffers.patches, count as usize)
    }

    /// Blocking readback of the patch draw arguments
    pub fn read_patch_args(&self, device: &Device, queue: &Queue) -> TerrainResult<DrawIndexedIndirectArgs> {
        let args = read_back::<DrawIndexedIndirectArgs>(device, queue, self.indirect.patch_args(), 1)?;
        args.first()
            .copied()
            .ok_or_else(|| TerrainError::Readback("empty indirect args".to_string()))
    }
}

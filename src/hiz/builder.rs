/// Depth Pyramid Builder
///
/// Builds the hierarchical depth pyramid on the GPU from the camera depth buffer.
/// The mip chain is reduced either in place or through two scratch surfaces; the
/// strategy is resolved once at construction from the backend.

use cgmath::{Matrix4, Point3};
use wgpu::{BindGroup, BindGroupLayout, ComputePipeline, Device, Texture, TextureView};

use crate::camera::CameraState;
use crate::config::HizConfig;
use crate::error::TerrainResult;
use crate::gpu::constants::generate_depth_constants;
use crate::gpu::validation::with_validation;
use super::{hiz_map_size, DepthConvention, ReductionStrategy};

const WORKGROUP_SIZE: u32 = 8;
const LEVEL_PARAMS_SIZE: u64 = 16;

/// Pyramid texture and its per-mip views
pub struct HizTargets {
    texture: Texture,
    mip_views: Vec<TextureView>,
    sampled_view: TextureView,
    size: u32,
    mip_count: u32,
}

impl HizTargets {
    fn new(device: &Device, size: u32, mip_count: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("HiZ Pyramid"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let mip_views = (0..mip_count)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("HiZ Mip {} View", level)),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        let sampled_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("HiZ Pyramid View"),
            ..Default::default()
        });

        Self {
            texture,
            mip_views,
            sampled_view,
            size,
            mip_count,
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    fn level_size(&self, mip: u32) -> u32 {
        (self.size >> mip).max(1)
    }
}

/// One uniform slot per pyramid level, slot 0 drives the blit
pub struct LevelUniforms {
    buffer: wgpu::Buffer,
    stride: u64,
}

impl LevelUniforms {
    fn new(device: &Device, mip_count: u32, stride: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("HiZ Level Params"),
            size: stride * mip_count as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, stride }
    }

    fn write(&self, queue: &wgpu::Queue, targets: &HizTargets, viewport: [u32; 2]) {
        for mip in 0..targets.mip_count {
            let src = if mip == 0 {
                viewport
            } else {
                let s = targets.level_size(mip - 1);
                [s, s]
            };
            let dst = targets.level_size(mip);
            let params: [u32; 4] = [src[0], src[1], dst, dst];
            queue.write_buffer(
                &self.buffer,
                mip as u64 * self.stride,
                bytemuck::cast_slice(&params),
            );
        }
    }

    fn binding(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(LEVEL_PARAMS_SIZE),
        })
    }

    fn offset(&self, mip: u32) -> u32 {
        (mip as u64 * self.stride) as u32
    }
}

/// Records the blit and the mip reductions of one pyramid build
pub trait DepthReducer {
    fn strategy(&self) -> ReductionStrategy;

    /// Rebuild the size dependent bind groups and scratch surfaces
    fn resize(&mut self, device: &Device, targets: &HizTargets, levels: &LevelUniforms);

    fn encode(
        &self,
        device: &Device,
        encoder: &mut wgpu::CommandEncoder,
        depth: &TextureView,
        targets: &HizTargets,
        levels: &LevelUniforms,
    );
}

fn layout_entry(binding: u32, ty: wgpu::BindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

fn depth_input_entry() -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        0,
        wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
    )
}

fn storage_out_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        binding,
        wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: wgpu::TextureFormat::R32Float,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
    )
}

fn level_params_entry() -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        3,
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: wgpu::BufferSize::new(LEVEL_PARAMS_SIZE),
        },
    )
}

fn reduce_in_entry() -> wgpu::BindGroupLayoutEntry {
    layout_entry(
        4,
        wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
    )
}

fn create_pipeline(
    device: &Device,
    module: &wgpu::ShaderModule,
    layout: &BindGroupLayout,
    entry_point: &str,
) -> ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&pipeline_layout),
        module,
        entry_point,
    })
}

fn dispatch_level(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &ComputePipeline,
    bind_group: &BindGroup,
    offset: u32,
    size: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[offset]);
    let groups = (size + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE;
    pass.dispatch_workgroups(groups, groups, 1);
}

/// Reads mip i-1 and writes mip i of the pyramid texture
pub struct InPlaceReducer {
    blit_layout: BindGroupLayout,
    reduce_layout: BindGroupLayout,
    blit_pipeline: ComputePipeline,
    reduce_pipeline: ComputePipeline,
    reduce_groups: Vec<BindGroup>,
}

impl InPlaceReducer {
    pub fn new(device: &Device, module: &wgpu::ShaderModule) -> Self {
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("HiZ Blit Layout"),
            entries: &[depth_input_entry(), storage_out_entry(1), level_params_entry()],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("HiZ Reduce Layout"),
            entries: &[level_params_entry(), reduce_in_entry(), storage_out_entry(5)],
        });
        Self {
            blit_pipeline: create_pipeline(device, module, &blit_layout, "blit_depth"),
            reduce_pipeline: create_pipeline(device, module, &reduce_layout, "reduce_mip"),
            blit_layout,
            reduce_layout,
            reduce_groups: Vec::new(),
        }
    }
}

impl DepthReducer for InPlaceReducer {
    fn strategy(&self) -> ReductionStrategy {
        ReductionStrategy::InPlace
    }

    fn resize(&mut self, device: &Device, targets: &HizTargets, levels: &LevelUniforms) {
        self.reduce_groups = (1..targets.mip_count)
            .map(|mip| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("HiZ Reduce {} Bind Group", mip)),
                    layout: &self.reduce_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: levels.binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: wgpu::BindingResource::TextureView(
                                &targets.mip_views[mip as usize - 1],
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: wgpu::BindingResource::TextureView(
                                &targets.mip_views[mip as usize],
                            ),
                        },
                    ],
                })
            })
            .collect();
    }

    fn encode(
        &self,
        device: &Device,
        encoder: &mut wgpu::CommandEncoder,
        depth: &TextureView,
        targets: &HizTargets,
        levels: &LevelUniforms,
    ) {
        let blit_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("HiZ Blit Bind Group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.mip_views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: levels.binding(),
                },
            ],
        });
        dispatch_level(encoder, "HiZ Blit", &self.blit_pipeline, &blit_group, 0, targets.size);

        for (i, group) in self.reduce_groups.iter().enumerate() {
            let mip = i as u32 + 1;
            dispatch_level(
                encoder,
                "HiZ Reduce",
                &self.reduce_pipeline,
                group,
                levels.offset(mip),
                targets.level_size(mip),
            );
        }
    }
}

/// Reads one scratch surface, writes the pyramid mip and the other scratch surface
pub struct PingPongReducer {
    blit_layout: BindGroupLayout,
    reduce_layout: BindGroupLayout,
    blit_pipeline: ComputePipeline,
    reduce_pipeline: ComputePipeline,
    scratch: Vec<(Texture, TextureView)>,
    reduce_groups: Vec<BindGroup>,
}

impl PingPongReducer {
    pub fn new(device: &Device, module: &wgpu::ShaderModule) -> Self {
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("HiZ Ping-Pong Blit Layout"),
            entries: &[
                depth_input_entry(),
                storage_out_entry(1),
                storage_out_entry(2),
                level_params_entry(),
            ],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("HiZ Ping-Pong Reduce Layout"),
            entries: &[
                level_params_entry(),
                reduce_in_entry(),
                storage_out_entry(5),
                storage_out_entry(6),
            ],
        });
        Self {
            blit_pipeline: create_pipeline(device, module, &blit_layout, "blit_depth_ping_pong"),
            reduce_pipeline: create_pipeline(device, module, &reduce_layout, "reduce_mip_ping_pong"),
            blit_layout,
            reduce_layout,
            scratch: Vec::new(),
            reduce_groups: Vec::new(),
        }
    }
}

impl DepthReducer for PingPongReducer {
    fn strategy(&self) -> ReductionStrategy {
        ReductionStrategy::PingPong
    }

    fn resize(&mut self, device: &Device, targets: &HizTargets, levels: &LevelUniforms) {
        self.scratch = (0..2)
            .map(|i| {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("HiZ Scratch {}", i)),
                    size: wgpu::Extent3d {
                        width: targets.size,
                        height: targets.size,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::R32Float,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::STORAGE_BINDING,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                (texture, view)
            })
            .collect();

        self.reduce_groups = (1..targets.mip_count)
            .map(|mip| {
                let read = &self.scratch[(mip as usize - 1) % 2].1;
                let write = &self.scratch[mip as usize % 2].1;
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("HiZ Ping-Pong Reduce {} Bind Group", mip)),
                    layout: &self.reduce_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: levels.binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: wgpu::BindingResource::TextureView(read),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: wgpu::BindingResource::TextureView(
                                &targets.mip_views[mip as usize],
                            ),
                        },
                        wgpu::BindGroupEntry {
                            binding: 6,
                            resource: wgpu::BindingResource::TextureView(write),
                        },
                    ],
                })
            })
            .collect();
    }

    fn encode(
        &self,
        device: &Device,
        encoder: &mut wgpu::CommandEncoder,
        depth: &TextureView,
        targets: &HizTargets,
        levels: &LevelUniforms,
    ) {
        let Some((_, first_scratch)) = self.scratch.first() else {
            return;
        };
        let blit_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("HiZ Ping-Pong Blit Bind Group"),
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.mip_views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(first_scratch),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: levels.binding(),
                },
            ],
        });
        dispatch_level(encoder, "HiZ Blit", &self.blit_pipeline, &blit_group, 0, targets.size);

        for (i, group) in self.reduce_groups.iter().enumerate() {
            let mip = i as u32 + 1;
            dispatch_level(
                encoder,
                "HiZ Ping-Pong Reduce",
                &self.reduce_pipeline,
                group,
                levels.offset(mip),
                targets.level_size(mip),
            );
        }
    }
}

/// Pyramid published for the traversal of the current frame
#[derive(Clone, Copy)]
pub struct HizFrame<'a> {
    pub view: &'a TextureView,
    pub view_proj: Matrix4<f32>,
    pub camera_position: Point3<f32>,
    pub size: u32,
    pub mip_count: u32,
    pub generation: u64,
}

/// GPU depth pyramid builder
pub struct DepthPyramidBuilder {
    convention: DepthConvention,
    reducer: Box<dyn DepthReducer>,
    targets: Option<HizTargets>,
    levels: Option<LevelUniforms>,
    viewport: [u32; 2],
    uniform_alignment: u64,
    max_dimension: u32,
    generation: u64,
    published_camera: Option<CameraState>,
}

impl DepthPyramidBuilder {
    pub fn new(device: &Device, config: &HizConfig, backend: wgpu::Backend) -> TerrainResult<Self> {
        let convention = DepthConvention::from_reversed_z(config.reversed_z);
        let strategy = ReductionStrategy::resolve(config.reduction, backend);
        log::info!(
            "[DepthPyramidBuilder::new] Using {:?} reduction on {:?} ({:?} depth)",
            strategy,
            backend,
            convention
        );

        let source = format!(
            "{}\n{}",
            generate_depth_constants(convention),
            include_str!("shaders/hiz_build.wgsl")
        );
        let reducer = with_validation(device, "hiz_build", || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("HiZ Build Shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let reducer: Box<dyn DepthReducer> = match strategy {
                ReductionStrategy::InPlace => Box::new(InPlaceReducer::new(device, &module)),
                ReductionStrategy::PingPong => Box::new(PingPongReducer::new(device, &module)),
            };
            reducer
        })?;

        let limits = device.limits();
        Ok(Self {
            convention,
            reducer,
            targets: None,
            levels: None,
            viewport: [0, 0],
            uniform_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            max_dimension: limits.max_texture_dimension_2d,
            generation: 0,
            published_camera: None,
        })
    }

    /// Record this frame's pyramid build.
    ///
    /// Returns false when the viewport is empty or too large; nothing is published
    /// and the traversal skips HiZ for the frame.
    pub fn update(
        &mut self,
        device: &Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        depth: &TextureView,
        viewport: [u32; 2],
        camera: &CameraState,
    ) -> bool {
        self.published_camera = None;
        if viewport[0] == 0 || viewport[1] == 0 {
            log::warn!(
                "[DepthPyramidBuilder::update] Depth buffer is {}x{}, skipping HiZ this frame",
                viewport[0],
                viewport[1]
            );
            return false;
        }

        let (size, mip_count) = hiz_map_size(viewport[0], viewport[1]);
        if size > self.max_dimension {
            log::warn!(
                "[DepthPyramidBuilder::update] Pyramid size {} exceeds the device limit {}, skipping HiZ",
                size,
                self.max_dimension
            );
            return false;
        }

        let reallocate = self.targets.as_ref().map_or(true, |t| t.size != size);
        if reallocate {
            log::debug!(
                "[DepthPyramidBuilder::update] Allocating {}x{} pyramid with {} mips",
                size,
                size,
                mip_count
            );
            let targets = HizTargets::new(device, size, mip_count);
            let stride = (LEVEL_PARAMS_SIZE).max(self.uniform_alignment);
            let levels = LevelUniforms::new(device, mip_count, stride);
            self.reducer.resize(device, &targets, &levels);
            self.targets = Some(targets);
            self.levels = Some(levels);
            self.generation += 1;
        }

        let (Some(targets), Some(levels)) = (self.targets.as_ref(), self.levels.as_ref()) else {
            return false;
        };
        if reallocate || self.viewport != viewport {
            levels.write(queue, targets, viewport);
            self.viewport = viewport;
        }

        self.reducer.encode(device, encoder, depth, targets, levels);
        self.published_camera = Some(*camera);
        true
    }

    /// The pyramid built by the last successful `update`
    pub fn published(&self) -> Option<HizFrame<'_>> {
        let camera = self.published_camera.as_ref()?;
        let targets = self.targets.as_ref()?;
        Some(HizFrame {
            view: &targets.sampled_view,
            view_proj: camera.view_proj,
            camera_position: camera.position,
            size: targets.size,
            mip_count: targets.mip_count,
            generation: self.generation,
        })
    }

    pub fn targets(&self) -> Option<&HizTargets> {
        self.targets.as_ref()
    }

    pub fn strategy(&self) -> ReductionStrategy {
        self.reducer.strategy()
    }

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

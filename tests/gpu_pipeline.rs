/// GPU pipeline tests
///
/// The GPU build must select the same final node set as the host pipeline. Tests are
/// skipped when no adapter is available.

use cgmath::Point3;
use gpu_terrain::{
    CameraState, CpuTerrainBuilder, CullingSettings, DepthPyramidBuilder, GpuContext,
    GpuTerrainBuilder, HizConfig, TerrainConfig, TerrainError, TerrainInputs, TerrainWorldParams,
};
use gpu_terrain::error::AppendList;

fn init_gpu() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(context) => Some(context),
        Err(e) => {
            println!("Skipping GPU test - {}", e);
            None
        }
    }
}

fn unculled_config() -> TerrainConfig {
    TerrainConfig {
        culling: CullingSettings::unculled(),
        ..TerrainConfig::default()
    }
}

fn flat_inputs(config: &TerrainConfig) -> TerrainInputs {
    let params = TerrainWorldParams::new(&config.world).unwrap();
    TerrainInputs::flat(&params, 0.5)
}

fn overhead(height: f32) -> CameraState {
    CameraState::look_at(
        Point3::new(0.0, height, 0.0),
        Point3::new(0.0, 0.0, 0.001),
        60.0,
        1.0,
        1.0,
        50000.0,
    )
}

fn horizon() -> CameraState {
    CameraState::look_at(
        Point3::new(0.0, 1100.0, -1000.0),
        Point3::new(0.0, 1100.0, 1000.0),
        60.0,
        1.0,
        1.0,
        50000.0,
    )
}

fn run_frame(context: &GpuContext, builder: &mut GpuTerrainBuilder, camera: &CameraState) {
    let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Test Encoder"),
    });
    builder.dispatch(&context.device, &context.queue, &mut encoder, camera, None);
    context.queue.submit(Some(encoder.finish()));
}

fn node_keys(nodes: Vec<gpu_terrain::FinalNode>) -> Vec<(u32, u32, u32)> {
    let mut keys: Vec<_> = nodes.into_iter().map(|n| (n.lod, n.x, n.y)).collect();
    keys.sort_unstable();
    keys
}

#[test]
fn gpu_selects_the_host_node_set() {
    let Some(context) = init_gpu() else {
        return;
    };
    let config = unculled_config();
    let inputs = flat_inputs(&config);
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();
    let mut cpu = CpuTerrainBuilder::new(&config, inputs).unwrap();

    for camera in [overhead(20000.0), overhead(1040.0), horizon()] {
        let expected = cpu.dispatch(&camera, None).unwrap();
        run_frame(&context, &mut gpu, &camera);

        let diagnostics = gpu.read_diagnostics(&context.device, &context.queue).unwrap();
        assert!(diagnostics.check().is_ok());
        assert_eq!(diagnostics.final_nodes, expected.final_nodes);
        assert_eq!(diagnostics.patches, expected.patches);

        let gpu_nodes = gpu.read_final_nodes(&context.device, &context.queue).unwrap();
        assert_eq!(node_keys(gpu_nodes), node_keys(cpu.final_nodes()));

        let args = gpu.read_patch_args(&context.device, &context.queue).unwrap();
        assert_eq!(args.instance_count, expected.patches);
        assert_eq!(args.index_count, 1536);
    }
}

#[test]
fn gpu_seam_codes_match_the_host() {
    let Some(context) = init_gpu() else {
        return;
    };
    let config = unculled_config();
    let inputs = flat_inputs(&config);
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();
    let mut cpu = CpuTerrainBuilder::new(&config, inputs).unwrap();

    let camera = overhead(1040.0);
    cpu.dispatch(&camera, None).unwrap();
    run_frame(&context, &mut gpu, &camera);

    let key = |p: &gpu_terrain::RenderPatch| {
        (
            p.lod,
            p.position[0].round() as i64,
            p.position[1].round() as i64,
            p.lod_trans,
        )
    };
    let mut expected: Vec<_> = cpu.patches().iter().map(key).collect();
    let mut actual: Vec<_> = gpu
        .read_patches(&context.device, &context.queue)
        .unwrap()
        .iter()
        .map(key)
        .collect();
    expected.sort_unstable();
    actual.sort_unstable();
    assert_eq!(actual, expected);
}

#[test]
fn gpu_reports_candidate_overflow() {
    let Some(context) = init_gpu() else {
        return;
    };
    let mut config = unculled_config();
    config.capacities.candidate_nodes = 8;
    let inputs = flat_inputs(&config);
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();

    run_frame(&context, &mut gpu, &overhead(1040.0));
    let diagnostics = gpu.read_diagnostics(&context.device, &context.queue).unwrap();
    assert!(matches!(
        diagnostics.check(),
        Err(TerrainError::CapacityOverflow {
            list: AppendList::CandidateNodes,
            capacity: 8,
            required: 36
        })
    ));
}

#[test]
fn gpu_reports_final_node_and_patch_overflow() {
    let Some(context) = init_gpu() else {
        return;
    };
    let mut config = unculled_config();
    config.capacities.final_nodes = 1;
    let inputs = flat_inputs(&config);
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();

    run_frame(&context, &mut gpu, &overhead(20000.0));
    let diagnostics = gpu.read_diagnostics(&context.device, &context.queue).unwrap();
    assert!(matches!(
        diagnostics.check(),
        Err(TerrainError::CapacityOverflow {
            list: AppendList::FinalNodes,
            capacity: 1,
            required: 25
        })
    ));
    assert_eq!(gpu.read_final_nodes(&context.device, &context.queue).unwrap().len(), 1);
    assert_eq!(diagnostics.patches, 64);

    let mut config = unculled_config();
    config.capacities.patches = 1;
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();
    run_frame(&context, &mut gpu, &overhead(20000.0));
    let diagnostics = gpu.read_diagnostics(&context.device, &context.queue).unwrap();
    assert!(matches!(
        diagnostics.check(),
        Err(TerrainError::CapacityOverflow {
            list: AppendList::Patches,
            capacity: 1,
            required: 1600
        })
    ));
    assert_eq!(gpu.read_patches(&context.device, &context.queue).unwrap().len(), 1);
    let args = gpu.read_patch_args(&context.device, &context.queue).unwrap();
    assert_eq!(args.instance_count, 1);
}

#[test]
fn coefficient_changes_apply_on_the_next_dispatch() {
    let Some(context) = init_gpu() else {
        return;
    };
    let config = unculled_config();
    let inputs = flat_inputs(&config);
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();
    let camera = overhead(1040.0);

    run_frame(&context, &mut gpu, &camera);
    let fine = gpu.read_diagnostics(&context.device, &context.queue).unwrap();
    gpu.set_node_evaluation_c(1.0e6).unwrap();
    run_frame(&context, &mut gpu, &camera);
    let coarse = gpu.read_diagnostics(&context.device, &context.queue).unwrap();

    assert_eq!(fine.final_nodes, 100);
    assert_eq!(coarse.final_nodes, 25);
}

fn depth_target(context: &GpuContext, width: u32, height: u32, depth: f32) -> wgpu::TextureView {
    let texture = context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Depth"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Test Depth Clear"),
    });
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Test Depth Clear"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(depth),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    context.queue.submit(Some(encoder.finish()));
    view
}

#[test]
fn gpu_hiz_culls_behind_a_near_wall() {
    let Some(context) = init_gpu() else {
        return;
    };
    let mut config = unculled_config();
    config.culling.hiz_occlusion_cull = true;
    let inputs = flat_inputs(&config);
    let mut gpu = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs).unwrap();
    let mut hiz = DepthPyramidBuilder::new(&context.device, &HizConfig::default(), context.backend).unwrap();
    let camera = horizon();

    // Depth of a wall 50 units ahead
    let p = camera.position;
    let clip = camera.view_proj * cgmath::Vector4::new(p.x, p.y, p.z + 50.0, 1.0);
    let depth = depth_target(&context, 96, 64, clip.z / clip.w);

    run_frame(&context, &mut gpu, &camera);
    let open = gpu.read_diagnostics(&context.device, &context.queue).unwrap();

    let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Test HiZ Frame"),
    });
    assert!(hiz.update(&context.device, &context.queue, &mut encoder, &depth, [96, 64], &camera));
    assert_eq!(hiz.generation(), 1);
    let frame = hiz.published();
    assert!(frame.is_some());
    gpu.dispatch(&context.device, &context.queue, &mut encoder, &camera, frame);
    context.queue.submit(Some(encoder.finish()));

    let occluded = gpu.read_diagnostics(&context.device, &context.queue).unwrap();
    assert!(occluded.patches < open.patches);

    // Same size, no reallocation
    let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Test HiZ Reuse"),
    });
    assert!(hiz.update(&context.device, &context.queue, &mut encoder, &depth, [96, 64], &camera));
    context.queue.submit(Some(encoder.finish()));
    assert_eq!(hiz.generation(), 1);
}

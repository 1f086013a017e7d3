/// Terrain LOD probe
///
/// Runs the terrain build for a few camera positions and prints the per-frame node
/// and patch counts. Uses the host pipeline, and the GPU pipeline as well with --gpu.
///
/// Usage: terrain_probe [config.toml] [--assets DIR] [--gpu]

use anyhow::{Context, Result};
use cgmath::Point3;

use gpu_terrain::{
    load_terrain_inputs, CameraState, CpuTerrainBuilder, GpuContext, GpuTerrainBuilder,
    TerrainConfig, TerrainInputs, TerrainWorldParams,
};

struct ProbeArgs {
    config: Option<String>,
    assets: Option<String>,
    gpu: bool,
}

fn parse_args() -> Result<ProbeArgs> {
    let mut args = ProbeArgs {
        config: None,
        assets: None,
        gpu: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--gpu" => args.gpu = true,
            "--assets" => {
                args.assets = Some(iter.next().context("--assets needs a directory")?);
            }
            other if other.starts_with("--") => anyhow::bail!("unknown flag {}", other),
            path => args.config = Some(path.to_string()),
        }
    }
    Ok(args)
}

fn probe_cameras(params: &TerrainWorldParams) -> Vec<(&'static str, CameraState)> {
    let top = params.world_size.y;
    let edge = params.world_size.x * 0.5;
    vec![
        (
            "High altitude",
            CameraState::look_at(
                Point3::new(0.0, top * 10.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
                60.0,
                16.0 / 9.0,
                1.0,
                top * 40.0,
            ),
        ),
        (
            "Above centre",
            CameraState::look_at(
                Point3::new(0.0, top * 0.5 + 6.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
                60.0,
                16.0 / 9.0,
                1.0,
                edge * 4.0,
            ),
        ),
        (
            "Ground level",
            CameraState::look_at(
                Point3::new(0.0, top * 0.5 + 20.0, -edge * 0.5),
                Point3::new(0.0, top * 0.5, edge),
                60.0,
                16.0 / 9.0,
                1.0,
                edge * 4.0,
            ),
        ),
    ]
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => TerrainConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => TerrainConfig::default(),
    };
    let params = TerrainWorldParams::new(&config.world)?;
    let inputs = match &args.assets {
        Some(dir) => load_terrain_inputs(dir, &params)?,
        None => {
            log::info!("[terrain_probe] No assets given, using a flat world at half height");
            TerrainInputs::flat(&params, 0.5)
        }
    };

    let gpu = if args.gpu {
        let context = GpuContext::headless()?;
        let builder = GpuTerrainBuilder::new(&context.device, &context.queue, &config, &inputs)?;
        Some((context, builder))
    } else {
        None
    };
    let mut cpu = CpuTerrainBuilder::new(&config, inputs)?;
    let mut gpu = gpu;

    println!("Terrain probe");
    println!("=============\n");
    println!(
        "World {}x{}x{}, {} LODs, {} patches per node\n",
        params.world_size.x,
        params.world_size.y,
        params.world_size.z,
        params.lod_count(),
        params.patches_per_node
    );

    for (name, camera) in probe_cameras(&params) {
        let start = std::time::Instant::now();
        let diagnostics = cpu.dispatch(&camera, None)?;
        let elapsed = start.elapsed();

        println!("{}", name);
        println!("  host:  {} final nodes, {} patches, peak {} candidates ({:?})",
            diagnostics.final_nodes,
            diagnostics.patches,
            diagnostics.peak_candidates,
            elapsed
        );

        let mut per_lod = vec![0u32; params.lod_count() as usize];
        for node in cpu.final_nodes() {
            per_lod[node.lod as usize] += 1;
        }
        println!("  nodes per LOD: {:?}", per_lod);

        if let Some((context, builder)) = gpu.as_mut() {
            let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Terrain Probe Encoder"),
            });
            builder.dispatch(&context.device, &context.queue, &mut encoder, &camera, None);
            context.queue.submit(Some(encoder.finish()));

            let gpu_diagnostics = builder.read_diagnostics(&context.device, &context.queue)?;
            gpu_diagnostics.check()?;
            println!(
                "  gpu:   {} final nodes, {} patches, peak {} candidates",
                gpu_diagnostics.final_nodes, gpu_diagnostics.patches, gpu_diagnostics.peak_candidates
            );
        }
        println!();
    }

    Ok(())
}

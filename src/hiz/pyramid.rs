/// Host-side depth pyramid
///
/// Downsamples a depth buffer into a square power-of-two mip chain where every texel
/// holds the farthest depth of the four texels below it. The farther operator follows
/// the depth convention so the pyramid stays conservative under reversed Z.

use cgmath::{Matrix4, Point3, SquareMatrix};
use rayon::prelude::*;

use crate::camera::CameraState;
use crate::config::ReductionMode;
use crate::error::{TerrainError, TerrainResult};

/// Which end of the depth range is far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthConvention {
    /// near = 0, far = 1
    #[default]
    Standard,
    /// near = 1, far = 0
    Reversed,
}

impl DepthConvention {
    pub fn from_reversed_z(reversed_z: bool) -> Self {
        if reversed_z {
            DepthConvention::Reversed
        } else {
            DepthConvention::Standard
        }
    }

    pub fn farther(self, a: f32, b: f32) -> f32 {
        match self {
            DepthConvention::Standard => a.max(b),
            DepthConvention::Reversed => a.min(b),
        }
    }

    pub fn nearer(self, a: f32, b: f32) -> f32 {
        match self {
            DepthConvention::Standard => a.min(b),
            DepthConvention::Reversed => a.max(b),
        }
    }

    /// Strictly farther
    pub fn is_farther(self, a: f32, b: f32) -> bool {
        match self {
            DepthConvention::Standard => a > b,
            DepthConvention::Reversed => a < b,
        }
    }

    /// Depth of the far plane, the clear value of a depth buffer
    pub fn far_value(self) -> f32 {
        match self {
            DepthConvention::Standard => 1.0,
            DepthConvention::Reversed => 0.0,
        }
    }
}

/// How mip levels are reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionStrategy {
    /// Read mip i-1 and write mip i of the same surface
    InPlace,
    /// Read a scratch surface, write the pyramid mip and the other scratch surface
    PingPong,
}

impl ReductionStrategy {
    /// Resolve the configured mode against the backend the pyramid runs on.
    ///
    /// GL and DX12 cannot sample one mip of a texture while writing another, so they
    /// get the ping-pong strategy unless overridden.
    pub fn resolve(mode: ReductionMode, backend: wgpu::Backend) -> Self {
        match mode {
            ReductionMode::InPlace => ReductionStrategy::InPlace,
            ReductionMode::PingPong => ReductionStrategy::PingPong,
            ReductionMode::Auto => match backend {
                wgpu::Backend::Gl | wgpu::Backend::Dx12 => ReductionStrategy::PingPong,
                _ => ReductionStrategy::InPlace,
            },
        }
    }
}

/// Base size and mip count for a viewport: next power of two of the larger side
pub fn hiz_map_size(width: u32, height: u32) -> (u32, u32) {
    let size = width.max(height).max(1).next_power_of_two();
    (size, size.trailing_zeros() + 1)
}

/// Host copy of a camera depth buffer
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthBuffer {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> TerrainResult<Self> {
        if data.len() != width as usize * height as usize {
            return Err(TerrainError::InvalidConfig(format!(
                "depth buffer of {}x{} needs {} samples, got {}",
                width,
                height,
                width as usize * height as usize,
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, depth: f32) -> Self {
        Self {
            width,
            height,
            data: vec![depth; width as usize * height as usize],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, depth: f32) {
        self.data[(y * self.width + x) as usize] = depth;
    }
}

/// Depth pyramid plus the camera it was built from
#[derive(Debug, Clone)]
pub struct DepthPyramid {
    convention: DepthConvention,
    strategy: ReductionStrategy,
    size: u32,
    mip_count: u32,
    levels: Vec<Vec<f32>>,
    scratch: [Vec<f32>; 2],
    view_proj: Matrix4<f32>,
    camera_position: Point3<f32>,
    generation: u64,
    valid: bool,
}

impl DepthPyramid {
    pub fn new(convention: DepthConvention, strategy: ReductionStrategy) -> Self {
        Self {
            convention,
            strategy,
            size: 0,
            mip_count: 0,
            levels: Vec::new(),
            scratch: [Vec::new(), Vec::new()],
            view_proj: Matrix4::identity(),
            camera_position: Point3::new(0.0, 0.0, 0.0),
            generation: 0,
            valid: false,
        }
    }

    /// Rebuild from this frame's depth buffer.
    ///
    /// Returns false when the depth buffer is empty; the pyramid is then unusable for
    /// the frame and occlusion tests treat everything as visible.
    pub fn update(&mut self, depth: &DepthBuffer, camera: &CameraState) -> bool {
        if depth.is_empty() {
            log::warn!(
                "[DepthPyramid::update] Depth buffer is {}x{}, skipping HiZ this frame",
                depth.width,
                depth.height
            );
            self.valid = false;
            return false;
        }

        let (size, mip_count) = hiz_map_size(depth.width, depth.height);
        if size != self.size {
            self.allocate(size, mip_count);
        }

        self.blit(depth);
        match self.strategy {
            ReductionStrategy::InPlace => self.reduce_in_place(),
            ReductionStrategy::PingPong => self.reduce_ping_pong(),
        }

        self.view_proj = camera.view_proj;
        self.camera_position = camera.position;
        self.valid = true;
        true
    }

    fn allocate(&mut self, size: u32, mip_count: u32) {
        log::debug!(
            "[DepthPyramid::allocate] Resizing pyramid {} -> {} ({} mips)",
            self.size,
            size,
            mip_count
        );
        self.size = size;
        self.mip_count = mip_count;
        self.levels = (0..mip_count)
            .map(|mip| {
                let s = (size >> mip) as usize;
                vec![self.convention.far_value(); s * s]
            })
            .collect();
        self.scratch = match self.strategy {
            ReductionStrategy::InPlace => [Vec::new(), Vec::new()],
            ReductionStrategy::PingPong => {
                let len = size as usize * size as usize;
                [vec![0.0; len], vec![0.0; len]]
            }
        };
        self.generation += 1;
    }

    fn blit(&mut self, depth: &DepthBuffer) {
        let size = self.size;
        let (w, h) = (depth.width as u64, depth.height as u64);
        let row_len = size as usize;
        let mip0 = &mut self.levels[0];
        mip0.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            let sy = (y as u64 * h / size as u64) as u32;
            for (x, texel) in row.iter_mut().enumerate() {
                let sx = (x as u64 * w / size as u64) as u32;
                *texel = depth.get(sx, sy);
            }
        });
        if self.strategy == ReductionStrategy::PingPong {
            self.scratch[0][..mip0.len()].copy_from_slice(mip0);
        }
    }

    fn reduce_in_place(&mut self) {
        for mip in 1..self.mip_count as usize {
            let (src, dst) = self.levels.split_at_mut(mip);
            reduce_level(self.convention, &src[mip - 1], &mut dst[0], self.size >> mip);
        }
    }

    fn reduce_ping_pong(&mut self) {
        for mip in 1..self.mip_count as usize {
            let dst_size = self.size >> mip;
            let len = dst_size as usize * dst_size as usize;
            let [first, second] = &mut self.scratch;
            let (read, write) = if mip % 2 == 1 {
                (&*first, second)
            } else {
                (&*second, first)
            };
            let src_len = len * 4;
            reduce_level(self.convention, &read[..src_len], &mut self.levels[mip], dst_size);
            write[..len].copy_from_slice(&self.levels[mip]);
        }
    }

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    pub fn strategy(&self) -> ReductionStrategy {
        self.strategy
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Incremented every time the mip chain is reallocated
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn view_proj(&self) -> &Matrix4<f32> {
        &self.view_proj
    }

    pub fn camera_position(&self) -> Point3<f32> {
        self.camera_position
    }

    pub fn mip_size(&self, mip: u32) -> u32 {
        (self.size >> mip).max(1)
    }

    pub fn level(&self, mip: u32) -> &[f32] {
        &self.levels[mip as usize]
    }

    /// Texel at a mip, clamped to the level
    pub fn texel(&self, mip: u32, x: u32, y: u32) -> f32 {
        let size = self.mip_size(mip);
        let (x, y) = (x.min(size - 1), y.min(size - 1));
        self.levels[mip as usize][(y * size + x) as usize]
    }
}

/// Farther-of-4 reduction of a (2 * dst_size)^2 level into a dst_size^2 level
fn reduce_level(convention: DepthConvention, src: &[f32], dst: &mut [f32], dst_size: u32) {
    let src_size = (dst_size * 2) as usize;
    dst.par_chunks_mut(dst_size as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let top = &src[2 * y * src_size..(2 * y + 1) * src_size];
            let bottom = &src[(2 * y + 1) * src_size..(2 * y + 2) * src_size];
            for (x, texel) in row.iter_mut().enumerate() {
                let a = convention.farther(top[2 * x], top[2 * x + 1]);
                let b = convention.farther(bottom[2 * x], bottom[2 * x + 1]);
                *texel = convention.farther(a, b);
            }
        });
}

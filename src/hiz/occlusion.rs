/// HiZ occlusion test shared by node and patch culling

use cgmath::{InnerSpace, Vector3, Vector4};

use crate::world::Aabb;
use super::DepthPyramid;

/// Screen rectangle and nearest depth of a projected box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedBounds {
    pub uv_min: [f32; 2],
    pub uv_max: [f32; 2],
    pub nearest_depth: f32,
}

/// Project a box with the pyramid camera after pulling every corner toward it by `bias`.
///
/// None when a corner lies behind the camera, in which case the box straddles the eye
/// and must be treated as visible.
pub fn project_bounds(pyramid: &DepthPyramid, aabb: &Aabb, bias: f32) -> Option<ProjectedBounds> {
    let eye = pyramid.camera_position();
    let eye = Vector3::new(eye.x, eye.y, eye.z);
    let convention = pyramid.convention();
    let view_proj = pyramid.view_proj();

    let mut uv_min = [1.0f32, 1.0];
    let mut uv_max = [0.0f32, 0.0];
    let mut nearest_depth = convention.far_value();
    let mut first = true;

    for corner in aabb.corners() {
        let to_eye = eye - corner;
        let pulled = if to_eye.magnitude2() > 0.0 {
            corner + to_eye.normalize() * bias
        } else {
            corner
        };

        let clip = view_proj * Vector4::new(pulled.x, pulled.y, pulled.z, 1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        let u = (ndc.x * 0.5 + 0.5).clamp(0.0, 1.0);
        let v = (0.5 - ndc.y * 0.5).clamp(0.0, 1.0);

        uv_min = [uv_min[0].min(u), uv_min[1].min(v)];
        uv_max = [uv_max[0].max(u), uv_max[1].max(v)];
        nearest_depth = if first {
            ndc.z
        } else {
            convention.nearer(nearest_depth, ndc.z)
        };
        first = false;
    }

    Some(ProjectedBounds {
        uv_min,
        uv_max,
        nearest_depth,
    })
}

/// Mip whose texels cover the projected rectangle with at most 2x2 texels
pub fn select_mip(pyramid: &DepthPyramid, bounds: &ProjectedBounds) -> u32 {
    let size = pyramid.size() as f32;
    let extent_px = ((bounds.uv_max[0] - bounds.uv_min[0]) * size)
        .max((bounds.uv_max[1] - bounds.uv_min[1]) * size)
        .max(1.0);
    let mip = extent_px.log2().ceil() as i32;
    mip.clamp(0, pyramid.mip_count() as i32 - 1) as u32
}

/// True when the box is strictly behind everything in the pyramid over its footprint.
///
/// An invalid pyramid never occludes.
pub fn is_occluded(pyramid: &DepthPyramid, aabb: &Aabb, bias: f32) -> bool {
    if !pyramid.is_valid() {
        return false;
    }
    let Some(bounds) = project_bounds(pyramid, aabb, bias) else {
        return false;
    };

    let mip = select_mip(pyramid, &bounds);
    let mip_size = pyramid.mip_size(mip);
    let to_texel = |uv: f32| ((uv * mip_size as f32) as u32).min(mip_size - 1);
    let (x0, y0) = (to_texel(bounds.uv_min[0]), to_texel(bounds.uv_min[1]));
    let (x1, y1) = (to_texel(bounds.uv_max[0]), to_texel(bounds.uv_max[1]));

    let convention = pyramid.convention();
    let hiz_depth = convention.farther(
        convention.farther(pyramid.texel(mip, x0, y0), pyramid.texel(mip, x1, y0)),
        convention.farther(pyramid.texel(mip, x0, y1), pyramid.texel(mip, x1, y1)),
    );

    convention.is_farther(bounds.nearest_depth, hiz_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraState;
    use crate::hiz::{DepthBuffer, DepthConvention, ReductionStrategy};
    use cgmath::{Point3, Vector4};

    fn camera(reversed: bool) -> CameraState {
        let eye = Point3::new(0.0, 0.0, 0.0);
        let target = Point3::new(0.0, 0.0, 1.0);
        if reversed {
            CameraState::look_at_reversed_z(eye, target, 60.0, 1.0, 1.0, 1000.0)
        } else {
            CameraState::look_at(eye, target, 60.0, 1.0, 1.0, 1000.0)
        }
    }

    /// Pyramid of a wall at distance `wall` filling the viewport
    fn wall_pyramid(wall: f32, convention: DepthConvention) -> DepthPyramid {
        let cam = camera(convention == DepthConvention::Reversed);
        let clip = cam.view_proj * Vector4::new(0.0, 0.0, wall, 1.0);
        let depth = DepthBuffer::filled(64, 64, clip.z / clip.w);
        let mut pyramid = DepthPyramid::new(convention, ReductionStrategy::InPlace);
        pyramid.update(&depth, &cam);
        pyramid
    }

    fn small_box(z: f32) -> Aabb {
        Aabb::new(Vector3::new(-1.0, -1.0, z), Vector3::new(1.0, 1.0, z + 2.0))
    }

    #[test]
    fn box_behind_wall_is_occluded() {
        for convention in [DepthConvention::Standard, DepthConvention::Reversed] {
            let pyramid = wall_pyramid(50.0, convention);
            assert!(is_occluded(&pyramid, &small_box(100.0), 1.0));
            assert!(!is_occluded(&pyramid, &small_box(20.0), 1.0));
        }
    }

    #[test]
    fn box_straddling_the_camera_is_visible() {
        let pyramid = wall_pyramid(50.0, DepthConvention::Standard);
        let around_eye = Aabb::new(Vector3::new(-5.0, -5.0, -5.0), Vector3::new(5.0, 5.0, 500.0));
        assert!(!is_occluded(&pyramid, &around_eye, 1.0));
    }

    #[test]
    fn bias_keeps_boxes_at_the_wall_visible() {
        let pyramid = wall_pyramid(50.0, DepthConvention::Standard);
        // Nearest face sits just behind the wall; the bias pulls it in front
        let touching = small_box(50.5);
        assert!(!is_occluded(&pyramid, &touching, 1.0));
        assert!(is_occluded(&pyramid, &touching, 0.01));
    }

    #[test]
    fn invalid_pyramid_never_occludes() {
        let pyramid = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::InPlace);
        assert!(!is_occluded(&pyramid, &small_box(100.0), 1.0));
    }

    #[test]
    fn mip_grows_with_screen_extent() {
        let pyramid = wall_pyramid(50.0, DepthConvention::Standard);
        let near = project_bounds(&pyramid, &small_box(5.0), 0.0).unwrap();
        let far = project_bounds(&pyramid, &small_box(500.0), 0.0).unwrap();
        assert!(select_mip(&pyramid, &near) > select_mip(&pyramid, &far));
        assert!(select_mip(&pyramid, &near) < pyramid.mip_count());
    }
}

/// Depth pyramid tests
///
/// Reduction invariants of the host pyramid for both depth conventions and both
/// reduction strategies, plus reallocation behaviour across viewport changes.

use cgmath::Point3;
use gpu_terrain::{CameraState, DepthBuffer, DepthConvention, DepthPyramid, ReductionStrategy};
use gpu_terrain::hiz::hiz_map_size;

fn camera() -> CameraState {
    CameraState::look_at(
        Point3::new(0.0, 10.0, 0.0),
        Point3::new(0.0, 10.0, 100.0),
        60.0,
        1.0,
        0.1,
        1000.0,
    )
}

/// Deterministic depth ramp with some structure in both axes
fn ramp(width: u32, height: u32) -> DepthBuffer {
    let data = (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x * 7 + y * 13) % 97) as f32 / 97.0))
        .collect();
    DepthBuffer::new(width, height, data).unwrap()
}

fn assert_reduction_holds(pyramid: &DepthPyramid) {
    let convention = pyramid.convention();
    for mip in 1..pyramid.mip_count() {
        let size = pyramid.mip_size(mip);
        for y in 0..size {
            for x in 0..size {
                let expected = convention.farther(
                    convention.farther(
                        pyramid.texel(mip - 1, 2 * x, 2 * y),
                        pyramid.texel(mip - 1, 2 * x + 1, 2 * y),
                    ),
                    convention.farther(
                        pyramid.texel(mip - 1, 2 * x, 2 * y + 1),
                        pyramid.texel(mip - 1, 2 * x + 1, 2 * y + 1),
                    ),
                );
                assert_eq!(pyramid.texel(mip, x, y), expected, "mip {} texel ({}, {})", mip, x, y);
            }
        }
    }
}

#[test]
fn every_level_is_the_farther_of_four() {
    for convention in [DepthConvention::Standard, DepthConvention::Reversed] {
        for strategy in [ReductionStrategy::InPlace, ReductionStrategy::PingPong] {
            let mut pyramid = DepthPyramid::new(convention, strategy);
            assert!(pyramid.update(&ramp(64, 64), &camera()));
            assert_reduction_holds(&pyramid);
        }
    }
}

#[test]
fn strategies_agree() {
    let depth = ramp(100, 60);
    let mut in_place = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::InPlace);
    let mut ping_pong = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::PingPong);
    in_place.update(&depth, &camera());
    ping_pong.update(&depth, &camera());

    assert_eq!(in_place.mip_count(), ping_pong.mip_count());
    for mip in 0..in_place.mip_count() {
        assert_eq!(in_place.level(mip), ping_pong.level(mip), "mip {}", mip);
    }
}

#[test]
fn non_power_of_two_viewport_is_resampled() {
    let depth = ramp(100, 60);
    let mut pyramid = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::InPlace);
    pyramid.update(&depth, &camera());

    assert_eq!(pyramid.size(), 128);
    assert_eq!(pyramid.mip_count(), 8);
    assert_eq!(pyramid.mip_size(7), 1);
    assert_eq!(hiz_map_size(100, 60), (128, 8));

    // mip 0 texel (x, y) samples the source at (x * w / size, y * h / size)
    assert_eq!(pyramid.texel(0, 0, 0), depth.get(0, 0));
    assert_eq!(pyramid.texel(0, 127, 127), depth.get(127 * 100 / 128, 127 * 60 / 128));
    assert_eq!(pyramid.texel(0, 64, 32), depth.get(50, 15));
    assert_reduction_holds(&pyramid);
}

#[test]
fn top_level_holds_the_farthest_depth() {
    let mut depth = DepthBuffer::filled(32, 32, 0.25);
    depth.set(31, 0, 0.75);
    let mut standard = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::InPlace);
    standard.update(&depth, &camera());
    assert_eq!(standard.texel(standard.mip_count() - 1, 0, 0), 0.75);

    let mut reversed = DepthPyramid::new(DepthConvention::Reversed, ReductionStrategy::PingPong);
    reversed.update(&depth, &camera());
    assert_eq!(reversed.texel(reversed.mip_count() - 1, 0, 0), 0.25);
}

#[test]
fn storage_is_reused_until_the_size_changes() {
    let mut pyramid = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::PingPong);
    pyramid.update(&ramp(64, 64), &camera());
    let first = pyramid.generation();

    // Same base size, only the content changes
    pyramid.update(&ramp(60, 50), &camera());
    assert_eq!(pyramid.generation(), first);
    assert_eq!(pyramid.size(), 64);

    pyramid.update(&ramp(200, 100), &camera());
    assert_eq!(pyramid.generation(), first + 1);
    assert_eq!(pyramid.size(), 256);
    assert_reduction_holds(&pyramid);
}

#[test]
fn empty_depth_buffer_invalidates_the_pyramid() {
    let mut pyramid = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::InPlace);
    assert!(!pyramid.is_valid());
    assert!(pyramid.update(&ramp(16, 16), &camera()));
    assert!(pyramid.is_valid());

    assert!(!pyramid.update(&DepthBuffer::filled(0, 16, 1.0), &camera()));
    assert!(!pyramid.is_valid());
}

#[test]
fn pyramid_remembers_its_camera() {
    let cam = camera();
    let mut pyramid = DepthPyramid::new(DepthConvention::Standard, ReductionStrategy::InPlace);
    pyramid.update(&ramp(16, 16), &cam);
    assert_eq!(pyramid.camera_position(), cam.position);
    assert_eq!(*pyramid.view_proj(), cam.view_proj);
}

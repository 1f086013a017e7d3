/// Axis-aligned bounds of nodes and patches

use cgmath::{Point3, Vector3};

use crate::camera::FrustumPlanes;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    /// Box centred at (x, z) on the XZ plane with the given half extent and height range
    pub fn from_center_xz(center: [f32; 2], half_extent: f32, min_y: f32, max_y: f32) -> Self {
        Self {
            min: Vector3::new(center[0] - half_extent, min_y, center[1] - half_extent),
            max: Vector3::new(center[0] + half_extent, max_y, center[1] + half_extent),
        }
    }

    pub fn corners(&self) -> [Vector3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vector3::new(a.x, a.y, a.z),
            Vector3::new(b.x, a.y, a.z),
            Vector3::new(a.x, b.y, a.z),
            Vector3::new(b.x, b.y, a.z),
            Vector3::new(a.x, a.y, b.z),
            Vector3::new(b.x, a.y, b.z),
            Vector3::new(a.x, b.y, b.z),
            Vector3::new(b.x, b.y, b.z),
        ]
    }

    /// False when the box lies fully outside any plane
    pub fn intersects_frustum(&self, frustum: &FrustumPlanes) -> bool {
        frustum.planes.iter().all(|plane| {
            // Corner furthest along the plane normal
            let p = Vector3::new(
                if plane[0] >= 0.0 { self.max.x } else { self.min.x },
                if plane[1] >= 0.0 { self.max.y } else { self.min.y },
                if plane[2] >= 0.0 { self.max.z } else { self.min.z },
            );
            plane[0] * p.x + plane[1] * p.y + plane[2] * p.z + plane[3] >= 0.0
        })
    }

    /// Euclidean distance from a point to the box, 0 inside
    pub fn distance_to(&self, point: Point3<f32>) -> f32 {
        let dx = (self.min.x - point.x).max(0.0).max(point.x - self.max.x);
        let dy = (self.min.y - point.y).max(0.0).max(point.y - self.max.y);
        let dz = (self.min.z - point.z).max(0.0).max(point.z - self.max.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraState;

    #[test]
    fn distance_is_zero_inside() {
        let aabb = Aabb::from_center_xz([0.0, 0.0], 10.0, 0.0, 5.0);
        assert_eq!(aabb.distance_to(Point3::new(1.0, 2.0, 3.0)), 0.0);
        assert_eq!(aabb.distance_to(Point3::new(0.0, 8.0, 0.0)), 3.0);
        assert_eq!(aabb.distance_to(Point3::new(13.0, 9.0, 0.0)), 5.0);
    }

    #[test]
    fn frustum_keeps_straddling_boxes() {
        let cam = CameraState::look_at(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 10.0),
            60.0,
            1.0,
            1.0,
            100.0,
        );
        let ahead = Aabb::new(Vector3::new(-1.0, -1.0, 20.0), Vector3::new(1.0, 1.0, 22.0));
        let behind = Aabb::new(Vector3::new(-1.0, -1.0, -22.0), Vector3::new(1.0, 1.0, -20.0));
        let straddle = Aabb::new(Vector3::new(-500.0, -1.0, 20.0), Vector3::new(500.0, 1.0, 22.0));
        assert!(ahead.intersects_frustum(&cam.frustum));
        assert!(!behind.intersects_frustum(&cam.frustum));
        assert!(straddle.intersects_frustum(&cam.frustum));
    }
}

/// Camera state for terrain traversal
///
/// The traversal only needs the camera position and the six frustum planes. Both are
/// derived here from a position and a view-projection matrix in wgpu clip space.

use bytemuck::{Pod, Zeroable};
use cgmath::{perspective, Deg, Matrix, Matrix4, Point3, Vector3, Vector4};

/// cgmath produces OpenGL clip space (z in [-1, 1]); wgpu expects z in [0, 1]
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Six inward-facing planes (a, b, c, d); a point p is inside when dot(n, p) + d >= 0
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct FrustumPlanes {
    pub planes: [[f32; 4]; 6],
}

impl FrustumPlanes {
    /// Extract planes from a row-vector view-projection (wgpu depth range)
    pub fn from_view_proj(view_proj: &Matrix4<f32>) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let raw = [
            r3 + r0, // left
            r3 - r0, // right
            r3 + r1, // bottom
            r3 - r1, // top
            r2,      // near
            r3 - r2, // far
        ];

        let mut planes = [[0.0; 4]; 6];
        for (out, plane) in planes.iter_mut().zip(raw.iter()) {
            *out = normalize_plane(*plane);
        }
        Self { planes }
    }

    /// Signed distance of a point to plane `i`
    pub fn distance(&self, i: usize, point: Vector3<f32>) -> f32 {
        let p = self.planes[i];
        p[0] * point.x + p[1] * point.y + p[2] * point.z + p[3]
    }
}

fn normalize_plane(plane: Vector4<f32>) -> [f32; 4] {
    let len = (plane.x * plane.x + plane.y * plane.y + plane.z * plane.z).sqrt();
    if len <= f32::EPSILON {
        return [plane.x, plane.y, plane.z, plane.w];
    }
    [plane.x / len, plane.y / len, plane.z / len, plane.w / len]
}

/// Camera snapshot for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: Point3<f32>,
    pub view_proj: Matrix4<f32>,
    pub frustum: FrustumPlanes,
}

impl CameraState {
    pub fn new(position: Point3<f32>, view_proj: Matrix4<f32>) -> Self {
        Self {
            position,
            view_proj,
            frustum: FrustumPlanes::from_view_proj(&view_proj),
        }
    }

    /// Right-handed perspective camera looking at `target`
    pub fn look_at(
        position: Point3<f32>,
        target: Point3<f32>,
        fovy_degrees: f32,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Self {
        let view = Matrix4::look_at_rh(position, target, Vector3::unit_y());
        let proj = OPENGL_TO_WGPU_MATRIX * perspective(Deg(fovy_degrees), aspect, znear, zfar);
        Self::new(position, proj * view)
    }

    /// Reversed-Z variant of `look_at`: near maps to 1, far maps to 0
    pub fn look_at_reversed_z(
        position: Point3<f32>,
        target: Point3<f32>,
        fovy_degrees: f32,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Self {
        #[rustfmt::skip]
        let flip = Matrix4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, -1.0, 0.0,
            0.0, 0.0, 1.0, 1.0,
        );
        let view = Matrix4::look_at_rh(position, target, Vector3::unit_y());
        let proj =
            flip * OPENGL_TO_WGPU_MATRIX * perspective(Deg(fovy_degrees), aspect, znear, zfar);
        Self::new(position, proj * view)
    }

    pub fn position_array(&self) -> [f32; 3] {
        [self.position.x, self.position.y, self.position.z]
    }
}

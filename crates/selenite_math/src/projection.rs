use glam::{Mat4, Vec3, Vec4};

use crate::plane::Plane;

/// Physical projection parameters of a camera: vertical field of view in
/// radians, aspect ratio and clip distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Lens {
    fn default() -> Self {
        Self {
            fov_y: 70.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Lens {
    pub fn perspective(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y,
            self.aspect.max(0.0001),
            self.near.max(0.0001),
            self.far.max(self.near + 0.0001),
        )
    }
}

/// Expresses a world-space plane in camera space, oriented to face away from
/// the camera. The sign flip keeps the clip half-space on the camera's side
/// regardless of which way the portal normal points; `offset` nudges the
/// plane constant so the clip sits slightly past the portal surface.
pub fn camera_space_clip_plane(
    view: Mat4,
    camera_position: Vec3,
    plane: &Plane,
    offset: f32,
) -> Vec4 {
    let facing = if (plane.position - camera_position).dot(plane.normal) < 0.0 {
        -1.0
    } else {
        1.0
    };

    let cam_space_pos = view.transform_point3(plane.position);
    let cam_space_normal = view.transform_vector3(plane.normal).normalize() * facing;
    let cam_space_dst = -cam_space_pos.dot(cam_space_normal) + offset;

    cam_space_normal.extend(cam_space_dst)
}

/// Oblique near-plane variant of the lens's perspective projection: clips at
/// `clip_plane_camera` (camera space) instead of the physical near plane.
/// Returns the unmodified projection when the derivation would be
/// degenerate.
pub fn oblique_projection(lens: &Lens, clip_plane_camera: Vec4) -> Mat4 {
    let proj = lens.perspective();
    let q = proj.inverse()
        * Vec4::new(
            clip_plane_camera.x.signum(),
            clip_plane_camera.y.signum(),
            1.0,
            1.0,
        );
    let denom = clip_plane_camera.dot(q);
    if denom.abs() < 1e-5 {
        return proj;
    }

    let c = clip_plane_camera * (2.0 / denom);
    let mut m = proj.to_cols_array_2d();
    m[0][2] = c.x - m[0][3];
    m[1][2] = c.y - m[1][3];
    m[2][2] = c.z - m[2][3];
    m[3][2] = c.w - m[3][3];
    Mat4::from_cols_array_2d(&m)
}

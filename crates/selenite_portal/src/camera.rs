use glam::{Mat4, Quat, Vec3};

use selenite_math::frame::Frame;
use selenite_math::frustum::{extract_frustum_planes, FrustumPlanes};
use selenite_math::projection::Lens;

/// A render camera: a world frame plus physical lens parameters, with an
/// optional projection override slot for the oblique near-clip matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub frame: Frame,
    pub lens: Lens,
    projection_override: Option<Mat4>,
}

impl Camera {
    pub fn new(frame: Frame, lens: Lens) -> Self {
        Self {
            frame,
            lens,
            projection_override: None,
        }
    }

    pub fn place(&mut self, position: Vec3, rotation: Quat) {
        self.frame.position = position;
        self.frame.rotation = rotation;
    }

    /// World-to-camera matrix. The camera looks along its frame's forward
    /// direction.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.frame.position, self.frame.forward(), self.frame.up())
    }

    /// The override if one is set, otherwise the lens's physical projection.
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_override
            .unwrap_or_else(|| self.lens.perspective())
    }

    pub fn set_projection_override(&mut self, projection: Option<Mat4>) {
        self.projection_override = projection;
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum_planes(&self) -> FrustumPlanes {
        extract_frustum_planes(self.view_projection())
    }
}

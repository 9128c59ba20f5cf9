use glam::{Mat4, Quat, Vec3};

/// World transform of a scene object: translation, rotation and non-uniform
/// scale, convertible to and from a column-major affine matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Frame {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Frame {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn world_to_local(&self) -> Mat4 {
        self.local_to_world().inverse()
    }

    /// Local +Z in world space. For portals this is the plane normal.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }
}

/// Re-anchors `object` from one portal's frame to the other:
/// `dest ∘ inverse(source) ∘ object`. Expresses the object relative to the
/// source portal, then reads that relative pose off the destination portal.
///
/// The same composition places the recursive virtual camera, a traveller's
/// clone visual and a teleported traveller.
pub fn through_portal(source: &Frame, dest: &Frame, object: &Frame) -> Frame {
    Frame::from_matrix(dest.local_to_world() * source.world_to_local() * object.local_to_world())
}

use glam::Vec3;

/// A plane given by a point on it and its (unit) normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub position: Vec3,
    pub normal: Vec3,
}

impl Plane {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self { position, normal }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.normal)
    }

    /// Which side of the plane `point` is on: +1 along the normal, -1
    /// against it. A point exactly on the plane yields 0; crossing detection
    /// only reacts to sign *changes*, so 0 never triggers a teleport on its
    /// own.
    pub fn side_of(&self, point: Vec3) -> i32 {
        let distance = self.signed_distance(point);
        if distance > 0.0 {
            1
        } else if distance < 0.0 {
            -1
        } else {
            0
        }
    }

    pub fn same_side(&self, a: Vec3, b: Vec3) -> bool {
        self.side_of(a) == self.side_of(b)
    }
}

/// Sign of an offset vector projected on a direction, matching
/// [`Plane::side_of`] when the offset is `point - plane.position`.
pub fn offset_side(offset: Vec3, direction: Vec3) -> i32 {
    let dot = offset.dot(direction);
    if dot > 0.0 {
        1
    } else if dot < 0.0 {
        -1
    } else {
        0
    }
}

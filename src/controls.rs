use glam::{Mat4, Vec3};
use std::f32::consts::PI;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    // Y turns about -Y, so that positive angles spin the scene to the right.
    fn direction(self) -> Vec3 {
        match self {
            Self::X => Vec3::X,
            Self::Y => Vec3::NEG_Y,
            Self::Z => Vec3::Z,
        }
    }
}

/// Absolute scale and rotation angles of the whole scene.
///
/// Every setter returns the delta that moves the instances from the old
/// value to the new one, ready to be passed to a refit.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformControls {
    scale: f32,
    rotation: [f32; 3],
}

impl Default for TransformControls {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation: [0.0; 3],
        }
    }
}

impl TransformControls {
    pub const MIN_SCALE: f32 = 0.01;

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Angle in radians, within `[-PI, PI]`.
    pub fn rotation(&self, axis: Axis) -> f32 {
        self.rotation[axis as usize]
    }

    pub fn set_scale(&mut self, scale: f32) -> Option<Mat4> {
        let scale = scale.max(Self::MIN_SCALE);
        if scale == self.scale {
            return None;
        }
        let ratio = scale / self.scale;
        self.scale = scale;
        Some(Mat4::from_scale(Vec3::splat(ratio)))
    }

    pub fn set_rotation(&mut self, axis: Axis, radians: f32) -> Option<Mat4> {
        let radians = radians.clamp(-PI, PI);
        let old = self.rotation[axis as usize];
        if radians == old {
            return None;
        }
        self.rotation[axis as usize] = radians;
        Some(Mat4::from_axis_angle(axis.direction(), radians - old))
    }
}

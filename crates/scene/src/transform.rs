//! Local transform of a scene node.
//!
//! Hierarchy lives in the [`Scene`](crate::Scene) arena; a [`Transform`]
//! only describes a node relative to its parent.
//!
//! # Example
//!
//! ```
//! use lumen_scene::Transform;
//! use glam::Vec3;
//!
//! let mut transform = Transform::new().with_position(Vec3::new(1.0, 0.0, 0.0));
//! transform.rotate_euler(Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
//! let point = transform.local_matrix().transform_point3(Vec3::ZERO);
//! assert!((point - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
//! ```

use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale relative to the parent node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Decomposes `matrix` into position, rotation and scale.
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Applies `(pitch, yaw, roll)` radians on top of the current rotation:
    /// `normalize(q_z(roll) * q_y(yaw) * q_x(pitch)) * rotation`.
    pub fn rotate_euler(&mut self, pitch_yaw_roll: Vec3) {
        let delta = Quat::from_rotation_z(pitch_yaw_roll.z)
            * Quat::from_rotation_y(pitch_yaw_roll.y)
            * Quat::from_rotation_x(pitch_yaw_roll.x);
        self.rotation = delta.normalize() * self.rotation;
    }

    pub fn translate(&mut self, delta: Vec3) {
        self.position += delta;
    }

    /// Matrix relative to the parent node.
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

/// Inverse transpose of `model`, or identity when `model` is singular.
pub fn normal_matrix(model: Mat4) -> Mat4 {
    const EPSILON: f32 = 1e-6;
    if model.determinant().abs() < EPSILON {
        Mat4::IDENTITY
    } else {
        model.inverse().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const EPSILON: f32 = 1e-5;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < EPSILON
    }

    #[test]
    fn test_transform_default() {
        let t = Transform::default();
        assert_eq!(t.position, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.local_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_transform_builder() {
        let t = Transform::new()
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(Vec3::splat(2.0));

        assert_eq!(t.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(t.scale, Vec3::splat(2.0));
    }

    #[test]
    fn test_rotate_euler_composition_order() {
        let (pitch, yaw, roll) = (0.3, -0.7, 1.1);
        let mut t = Transform::new().with_rotation(Quat::from_rotation_x(0.2));
        let before = t.rotation;
        t.rotate_euler(Vec3::new(pitch, yaw, roll));

        let expected = (Quat::from_rotation_z(roll)
            * Quat::from_rotation_y(yaw)
            * Quat::from_rotation_x(pitch))
        .normalize()
            * before;
        assert!(t.rotation.abs_diff_eq(expected, EPSILON));
    }

    #[test]
    fn test_rotate_euler_yaw_turns_forward() {
        let mut t = Transform::new();
        t.rotate_euler(Vec3::new(0.0, FRAC_PI_2, 0.0));
        // Yawing +90 degrees turns -Z into -X.
        assert!(approx_eq_vec3(t.forward(), Vec3::NEG_X));
    }

    #[test]
    fn test_from_matrix_round_trip() {
        let t = Transform::new()
            .with_position(Vec3::new(4.0, -1.0, 2.0))
            .with_rotation(Quat::from_rotation_y(0.5))
            .with_scale(Vec3::new(1.0, 2.0, 3.0));
        let back = Transform::from_matrix(t.local_matrix());
        assert!(approx_eq_vec3(back.position, t.position));
        assert!(approx_eq_vec3(back.scale, t.scale));
        assert!(back.rotation.abs_diff_eq(t.rotation, EPSILON));
    }

    #[test]
    fn test_normal_matrix_with_scale() {
        let model = Transform::new()
            .with_scale(Vec3::new(1.0, 2.0, 1.0))
            .local_matrix();
        assert_eq!(normal_matrix(model), model.inverse().transpose());
    }

    #[test]
    fn test_normal_matrix_non_invertible() {
        let model = Transform::new().with_scale(Vec3::ZERO).local_matrix();
        let normal = normal_matrix(model);
        assert_eq!(normal, Mat4::IDENTITY);
        assert!(!normal.is_nan());
    }

    #[test]
    fn test_direction_vectors() {
        let t = Transform::default();
        assert_eq!(t.forward(), Vec3::NEG_Z);
        assert_eq!(t.right(), Vec3::X);
        assert_eq!(t.up(), Vec3::Y);
    }
}

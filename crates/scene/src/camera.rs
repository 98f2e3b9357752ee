//! Camera components.
//!
//! A camera only carries its projection; its view comes from the node it is
//! attached to (see [`Scene::camera_view`](crate::Scene::camera_view)).

use glam::Mat4;

/// Projection type for the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub name: String,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            projection: Projection::Perspective {
                fov_y: 60.0_f32.to_radians(),
                aspect: 16.0 / 9.0,
                near: 0.1,
                far: 1000.0,
            },
        }
    }
}

impl Camera {
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            },
            ..Default::default()
        }
    }

    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            },
            ..Default::default()
        }
    }

    /// Updates the aspect ratio of a perspective projection.
    pub fn set_aspect(&mut self, new_aspect: f32) {
        if let Projection::Perspective { aspect, .. } = &mut self.projection {
            *aspect = new_aspect;
        }
    }

    /// Projection matrix with Vulkan's downward Y and `[0, 1]` depth.
    pub fn projection_matrix(&self) -> Mat4 {
        let mut proj = match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        };
        proj.y_axis.y *= -1.0;
        proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::perspective(90.0_f32.to_radians(), 1.0, 0.1, 100.0);
        let clip = camera.projection_matrix() * Vec4::new(0.0, 1.0, -1.0, 1.0);
        // Points above the view axis land in the upper half, which is -Y in Vulkan NDC.
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_depth_range_is_zero_to_one() {
        let camera = Camera::perspective(60.0_f32.to_radians(), 1.0, 1.0, 10.0);
        let proj = camera.projection_matrix();
        let near = proj.project_point3(Vec3::new(0.0, 0.0, -1.0));
        let far = proj.project_point3(Vec3::new(0.0, 0.0, -10.0));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_set_aspect_only_touches_perspective() {
        let mut camera = Camera::default();
        camera.set_aspect(2.0);
        assert!(matches!(camera.projection, Projection::Perspective { aspect, .. } if aspect == 2.0));

        let mut ortho = Camera::orthographic(-1.0, 1.0, -1.0, 1.0, 0.1, 10.0);
        let before = ortho.projection;
        ortho.set_aspect(2.0);
        assert_eq!(ortho.projection, before);
    }
}

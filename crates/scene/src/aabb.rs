//! Axis-aligned bounding boxes.

use glam::{Mat4, Vec3};

/// Axis-aligned bounding box. A reset box is empty (`min > max`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Smallest box containing every point; empty for no points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut aabb = Self::default();
        aabb.update_from(points);
        aabb
    }

    #[inline]
    pub fn min(&self) -> Vec3 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn update(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn update_from(&mut self, points: impl IntoIterator<Item = Vec3>) {
        for point in points {
            self.update(point);
        }
    }

    /// Box around the eight transformed corners.
    pub fn transform(&self, matrix: Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(self.corners().map(|corner| matrix.transform_point3(corner)))
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent along each axis.
    pub fn scale(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<Vec3> {
        vec![
            Vec3::new(1.0, -2.0, 0.5),
            Vec3::new(-3.0, 4.0, 2.0),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(2.5, 1.0, 3.0),
        ]
    }

    #[test]
    fn test_default_is_empty() {
        let aabb = Aabb::default();
        assert!(aabb.is_empty());
    }

    #[test]
    fn test_update_grows_to_contain_points() {
        let aabb = Aabb::from_points(points());
        assert!(!aabb.is_empty());
        assert_eq!(aabb.min(), Vec3::new(-3.0, -2.0, -1.0));
        assert_eq!(aabb.max(), Vec3::new(2.5, 4.0, 3.0));
        assert_eq!(aabb.center(), Vec3::new(-0.25, 1.0, 1.0));
        assert_eq!(aabb.scale(), Vec3::new(5.5, 6.0, 4.0));
    }

    #[test]
    fn test_permutation_invariance() {
        let forward = Aabb::from_points(points());
        let mut reversed_points = points();
        reversed_points.reverse();
        let reversed = Aabb::from_points(reversed_points);
        let mut rotated_points = points();
        rotated_points.rotate_left(2);
        let rotated = Aabb::from_points(rotated_points);

        assert_eq!(forward, reversed);
        assert_eq!(forward, rotated);
    }

    #[test]
    fn test_transform_translates_and_scales() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let moved = aabb.transform(Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(moved.center(), Vec3::new(10.0, 0.0, 0.0));

        let scaled = aabb.transform(Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)));
        assert_eq!(scaled.scale(), Vec3::new(4.0, 2.0, 2.0));
    }

    #[test]
    fn test_transform_rotation_keeps_box_axis_aligned() {
        let aabb = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let rotated = aabb.transform(Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let scale = rotated.scale();
        assert!((scale.x - 1.0).abs() < 1e-5);
        assert!((scale.y - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_reset_empties() {
        let mut aabb = Aabb::from_points(points());
        aabb.reset();
        assert!(aabb.is_empty());
        assert!(aabb.transform(Mat4::IDENTITY).is_empty());
    }
}

//! Light components.
//!
//! Position and direction are not stored on the light; they come from the
//! node the light is attached to. A light shines along its node's forward
//! axis (`-Z`).

use glam::Vec3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LightType {
    #[default]
    Directional,
    Point,
    Spot,
}

impl LightType {
    /// Value written into the light's type slot on the GPU.
    pub fn as_f32(self) -> f32 {
        match self {
            LightType::Directional => 0.0,
            LightType::Point => 1.0,
            LightType::Spot => 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub name: String,
    pub light_type: LightType,
    pub color: Vec3,
    pub intensity: f32,
    /// Attenuation range for point and spot lights
    pub range: f32,
    /// Inner cone angle of spot lights, radians
    pub inner_cone_angle: f32,
    /// Outer cone angle of spot lights, radians
    pub outer_cone_angle: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            name: "light".to_string(),
            light_type: LightType::Directional,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
            inner_cone_angle: 25.0_f32.to_radians(),
            outer_cone_angle: 37.0_f32.to_radians(),
        }
    }
}

impl Light {
    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn point(color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            color,
            intensity,
            range,
            ..Default::default()
        }
    }

    pub fn spot(color: Vec3, intensity: f32, range: f32, inner_cone_angle: f32, outer_cone_angle: f32) -> Self {
        Self {
            light_type: LightType::Spot,
            color,
            intensity,
            range,
            inner_cone_angle,
            outer_cone_angle,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_are_distinct() {
        let codes = [LightType::Directional, LightType::Point, LightType::Spot].map(LightType::as_f32);
        assert_eq!(codes, [0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_constructors_set_type() {
        assert_eq!(Light::point(Vec3::ONE, 2.0, 5.0).light_type, LightType::Point);
        let spot = Light::spot(Vec3::X, 1.0, 8.0, 0.2, 0.4);
        assert_eq!(spot.light_type, LightType::Spot);
        assert_eq!(spot.outer_cone_angle, 0.4);
    }
}

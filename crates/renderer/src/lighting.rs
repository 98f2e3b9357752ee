//! Light bucketing and the per-frame lights uniform.

use glam::{UVec4, Vec3, Vec4};
use lumen_rhi::buffer::BufferUsage;
use lumen_scene::{Light, LightType, Scene};
use tracing::error;

use crate::buffer_pool::BufferAllocation;
use crate::command_recorder::CommandRecorder;
use crate::error::RenderResult;
use crate::ubo::{LightData, LightsUniform, MAX_FORWARD_LIGHT_COUNT};

/// Specialization constant ids carrying the per-type light counts.
pub const DIRECTIONAL_LIGHT_COUNT_CONSTANT: u32 = 0;
pub const POINT_LIGHT_COUNT_CONSTANT: u32 = 1;
pub const SPOT_LIGHT_COUNT_CONSTANT: u32 = 2;

/// Encodes a light with its world-space position and direction.
pub fn encode_light(light: &Light, position: Vec3, direction: Vec3) -> LightData {
    LightData {
        position: position.extend(light.light_type.as_f32()),
        color: light.color.extend(light.intensity),
        direction: direction.extend(light.range),
        info: Vec4::new(light.inner_cone_angle, light.outer_cone_angle, 0.0, 0.0),
    }
}

/// Lights of one frame bucketed by type, plus the uniform they were
/// written to.
#[derive(Default)]
pub struct LightingState {
    directional_lights: Vec<LightData>,
    point_lights: Vec<LightData>,
    spot_lights: Vec<LightData>,
    light_buffer: Option<BufferAllocation>,
}

impl LightingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.directional_lights.clear();
        self.point_lights.clear();
        self.spot_lights.clear();
        self.light_buffer = None;
    }

    fn bucket_mut(&mut self, light_type: LightType) -> &mut Vec<LightData> {
        match light_type {
            LightType::Directional => &mut self.directional_lights,
            LightType::Point => &mut self.point_lights,
            LightType::Spot => &mut self.spot_lights,
        }
    }

    /// Adds a light to its bucket. Returns false and drops the light when
    /// the bucket is full.
    pub fn add_light(&mut self, light: &Light, position: Vec3, direction: Vec3) -> bool {
        let bucket = self.bucket_mut(light.light_type);
        if bucket.len() >= MAX_FORWARD_LIGHT_COUNT {
            return false;
        }
        bucket.push(encode_light(light, position, direction));
        true
    }

    /// Re-buckets every light of `scene`, logging the ones that do not fit.
    pub fn collect(&mut self, scene: &Scene) {
        self.clear();
        let mut dropped = [0usize; 3];
        for (light, position, direction) in scene.lights() {
            if !self.add_light(light, position, direction) {
                dropped[light.light_type as usize] += 1;
            }
        }
        for (light_type, count) in [LightType::Directional, LightType::Point, LightType::Spot]
            .into_iter()
            .zip(dropped)
        {
            if count > 0 {
                error!(
                    "Dropped {} {:?} light(s): at most {} per type are supported",
                    count, light_type, MAX_FORWARD_LIGHT_COUNT
                );
            }
        }
    }

    pub fn directional_lights(&self) -> &[LightData] {
        &self.directional_lights
    }

    pub fn point_lights(&self) -> &[LightData] {
        &self.point_lights
    }

    pub fn spot_lights(&self) -> &[LightData] {
        &self.spot_lights
    }

    /// `(directional, point, spot)` counts.
    pub fn counts(&self) -> [u32; 3] {
        [
            self.directional_lights.len() as u32,
            self.point_lights.len() as u32,
            self.spot_lights.len() as u32,
        ]
    }

    pub fn to_uniform(&self) -> LightsUniform {
        let mut uniform = LightsUniform::default();
        let [directional, point, spot] = self.counts();
        uniform.counts = UVec4::new(directional, point, spot, 0);
        uniform.directional_lights[..self.directional_lights.len()]
            .copy_from_slice(&self.directional_lights);
        uniform.point_lights[..self.point_lights.len()].copy_from_slice(&self.point_lights);
        uniform.spot_lights[..self.spot_lights.len()].copy_from_slice(&self.spot_lights);
        uniform
    }

    /// Writes the lights into a frame allocation and sets the count
    /// specialization constants on `recorder`. The uniform is allocated even
    /// when there are no lights.
    pub fn allocate(&mut self, recorder: &mut CommandRecorder) -> RenderResult<&BufferAllocation> {
        let uniform = self.to_uniform();
        let allocation = recorder.allocate_buffer(BufferUsage::Uniform, LightsUniform::SIZE as u64)?;
        allocation.update_pod(&uniform)?;

        let [directional, point, spot] = self.counts();
        recorder.set_specialization_constant(DIRECTIONAL_LIGHT_COUNT_CONSTANT, directional);
        recorder.set_specialization_constant(POINT_LIGHT_COUNT_CONSTANT, point);
        recorder.set_specialization_constant(SPOT_LIGHT_COUNT_CONSTANT, spot);

        Ok(self.light_buffer.insert(allocation))
    }

    /// The allocation written by the last [`allocate`](Self::allocate).
    pub fn light_buffer(&self) -> Option<&BufferAllocation> {
        self.light_buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use lumen_scene::Transform;

    #[test]
    fn test_encode_light_fields() {
        let light = Light::spot(Vec3::new(1.0, 0.5, 0.25), 3.0, 12.0, 0.2, 0.4);
        let data = encode_light(&light, Vec3::new(1.0, 2.0, 3.0), Vec3::NEG_Y);

        assert_eq!(data.position, Vec4::new(1.0, 2.0, 3.0, 2.0));
        assert_eq!(data.color, Vec4::new(1.0, 0.5, 0.25, 3.0));
        assert_eq!(data.direction, Vec4::new(0.0, -1.0, 0.0, 12.0));
        assert_eq!(data.info, Vec4::new(0.2, 0.4, 0.0, 0.0));
    }

    #[test]
    fn test_bucket_overflow_drops_excess() {
        let mut state = LightingState::new();
        let light = Light::point(Vec3::ONE, 1.0, 5.0);
        for _ in 0..MAX_FORWARD_LIGHT_COUNT {
            assert!(state.add_light(&light, Vec3::ZERO, Vec3::NEG_Z));
        }
        assert!(!state.add_light(&light, Vec3::ZERO, Vec3::NEG_Z));
        assert_eq!(state.counts(), [0, MAX_FORWARD_LIGHT_COUNT as u32, 0]);

        // Other buckets are unaffected by a full one.
        assert!(state.add_light(&Light::default(), Vec3::ZERO, Vec3::NEG_Z));
        assert_eq!(state.counts()[0], 1);
    }

    #[test]
    fn test_zero_lights_give_zero_counts() {
        let state = LightingState::new();
        let uniform = state.to_uniform();
        assert_eq!(uniform.counts, UVec4::ZERO);
        assert!(state.light_buffer().is_none());
    }

    #[test]
    fn test_collect_from_scene() {
        let mut scene = Scene::new("lights");
        let sun = scene.add_node(
            "sun",
            Transform::new().with_rotation(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2)),
            None,
        );
        scene.add_light(Light::directional(Vec3::ONE, 1.0), sun);
        for i in 0..(MAX_FORWARD_LIGHT_COUNT + 3) {
            let node = scene.add_node(
                format!("lamp {i}"),
                Transform::new().with_position(Vec3::new(i as f32, 1.0, 0.0)),
                None,
            );
            scene.add_light(Light::point(Vec3::ONE, 1.0, 4.0), node);
        }

        let mut state = LightingState::new();
        state.collect(&scene);
        assert_eq!(state.counts(), [1, MAX_FORWARD_LIGHT_COUNT as u32, 0]);

        let direction = state.directional_lights()[0].direction.truncate();
        assert!((direction - Vec3::NEG_Y).length() < 1e-5);
        assert_eq!(state.point_lights()[2].position, Vec4::new(2.0, 1.0, 0.0, 1.0));

        let uniform = state.to_uniform();
        assert_eq!(uniform.counts, UVec4::new(1, MAX_FORWARD_LIGHT_COUNT as u32, 0, 0));
        assert_eq!(uniform.directional_lights[0], state.directional_lights()[0]);
        assert_eq!(uniform.directional_lights[1], LightData::default());
    }
}

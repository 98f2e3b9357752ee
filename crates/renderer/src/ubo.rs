//! Uniform and push-constant layouts shared with the built-in shaders.
//!
//! These structures must match the GLSL blocks in `shaders/` exactly. All of
//! them are `#[repr(C)]`, `Pod` and padded to `vec4` granularity so that the
//! std140 layout naga computes lines up byte for byte.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec2, Vec3, Vec4};

/// Upper bound on lights of one type in a lighting uniform.
pub const MAX_FORWARD_LIGHT_COUNT: usize = 16;

/// Per-draw transform data, `set = 0, binding = 1` of the geometry shaders.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view-projection matrix (64 bytes)
/// - Offset 128: camera position, w unused (16 bytes)
/// - Total size: 144 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GlobalUniform {
    pub model: Mat4,
    pub view_proj: Mat4,
    pub camera_position: Vec4,
}

impl GlobalUniform {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, view_proj: Mat4, camera_position: Vec3) -> Self {
        Self {
            model,
            view_proj,
            camera_position: camera_position.extend(1.0),
        }
    }
}

/// Material factors pushed per draw.
///
/// # Memory Layout
///
/// - Offset 0: base color factor (16 bytes)
/// - Offset 16: emissive rgb, alpha cutoff (16 bytes)
/// - Offset 32: metallic, roughness, alpha mode, unused (16 bytes)
/// - Total size: 48 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct MaterialPushConstants {
    pub base_color_factor: Vec4,
    pub emissive_cutoff: Vec4,
    pub metallic_roughness: Vec4,
}

impl MaterialPushConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Camera data the deferred lighting pass needs to rebuild world positions,
/// `set = 0, binding = 6` of the lighting shader.
///
/// # Memory Layout
///
/// - Offset 0: inverse view-projection matrix (64 bytes)
/// - Offset 64: inverse resolution xy, unused zw (16 bytes)
/// - Offset 80: camera position, w unused (16 bytes)
/// - Total size: 96 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DeferredUniform {
    pub inv_view_proj: Mat4,
    pub inv_resolution: Vec4,
    pub camera_position: Vec4,
}

impl DeferredUniform {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view_proj: Mat4, resolution: Vec2, camera_position: Vec3) -> Self {
        let inv_resolution = Vec2::ONE / resolution.max(Vec2::ONE);
        Self {
            inv_view_proj: view_proj.inverse(),
            inv_resolution: inv_resolution.extend(0.0).extend(0.0),
            camera_position: camera_position.extend(1.0),
        }
    }
}

/// One encoded light: four `vec4`s.
///
/// - `position`: world position xyz, light type in w
/// - `color`: rgb, intensity in w
/// - `direction`: world direction xyz, range in w
/// - `info`: inner cone, outer cone, unused zw
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightData {
    pub position: Vec4,
    pub color: Vec4,
    pub direction: Vec4,
    pub info: Vec4,
}

/// Lights uniform shared by the forward and deferred lighting shaders.
///
/// # Memory Layout
///
/// - Offset 0: light counts (directional, point, spot, unused) (16 bytes)
/// - Offset 16: directional lights (16 * 64 bytes)
/// - Offset 1040: point lights (16 * 64 bytes)
/// - Offset 2064: spot lights (16 * 64 bytes)
/// - Total size: 3088 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightsUniform {
    pub counts: UVec4,
    pub directional_lights: [LightData; MAX_FORWARD_LIGHT_COUNT],
    pub point_lights: [LightData; MAX_FORWARD_LIGHT_COUNT],
    pub spot_lights: [LightData; MAX_FORWARD_LIGHT_COUNT],
}

impl Default for LightsUniform {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl LightsUniform {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

/// Lights uniform of forward shading, bound at `set = 0, binding = 4`.
pub type ForwardLights = LightsUniform;

/// Lights uniform of deferred shading, bound at `set = 0, binding = 7`.
pub type DeferredLights = LightsUniform;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_uniform_size() {
        // 2 Mat4 (2 * 64) + Vec4 (16) = 144 bytes
        assert_eq!(GlobalUniform::SIZE, 144);
        assert_eq!(std::mem::align_of::<GlobalUniform>(), 16);
    }

    #[test]
    fn test_material_push_constants_fit_minimum_limit() {
        // Vulkan guarantees at least 128 bytes of push constants.
        assert_eq!(MaterialPushConstants::SIZE, 48);
        assert!(MaterialPushConstants::SIZE <= 128);
    }

    #[test]
    fn test_deferred_uniform_size() {
        assert_eq!(DeferredUniform::SIZE, 96);
    }

    #[test]
    fn test_lights_uniform_layout() {
        assert_eq!(std::mem::size_of::<LightData>(), 64);
        assert_eq!(LightsUniform::SIZE, 16 + 3 * MAX_FORWARD_LIGHT_COUNT * 64);
        assert_eq!(std::mem::offset_of!(LightsUniform, point_lights), 1040);
        assert_eq!(std::mem::offset_of!(LightsUniform, spot_lights), 2064);
    }

    #[test]
    fn test_deferred_uniform_new() {
        let view_proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 10.0);
        let ubo = DeferredUniform::new(view_proj, Vec2::new(800.0, 600.0), Vec3::new(1.0, 2.0, 3.0));
        assert!((ubo.inv_view_proj * view_proj).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert_eq!(ubo.inv_resolution.x, 1.0 / 800.0);
        assert_eq!(ubo.inv_resolution.y, 1.0 / 600.0);
        assert_eq!(ubo.camera_position, Vec4::new(1.0, 2.0, 3.0, 1.0));
    }

    #[test]
    fn test_default_lights_are_zero() {
        let lights = LightsUniform::default();
        assert_eq!(lights.counts, UVec4::ZERO);
        assert!(bytemuck::bytes_of(&lights).iter().all(|&b| b == 0));
    }
}

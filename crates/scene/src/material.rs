//! Materials: factors, alpha mode and named textures.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Vec3, Vec4};
use lumen_rhi::image::ImageView;
use lumen_rhi::sampler::Sampler;

/// How a material's alpha is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    /// Alpha ignored, fully opaque
    #[default]
    Opaque,
    /// Fragments below `alpha_cutoff` are discarded
    Mask,
    /// Alpha blended over what is behind
    Blend,
}

/// A sampled texture bound to a material slot.
#[derive(Clone)]
pub struct Texture {
    pub view: Arc<ImageView>,
    pub sampler: Arc<Sampler>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("view", &self.view.handle())
            .field("sampler", &self.sampler.handle())
            .finish()
    }
}

/// Metallic-roughness material.
///
/// Textures are keyed by the shader resource they bind to, e.g.
/// `"base_color_texture"`.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub base_color_factor: Vec4,
    pub emissive: Vec3,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
    pub textures: HashMap<String, Texture>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "material".to_string(),
            base_color_factor: Vec4::ONE,
            emissive: Vec3::ZERO,
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            textures: HashMap::new(),
        }
    }
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, base_color_factor: Vec4) -> Self {
        self.base_color_factor = base_color_factor;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_alpha_mode(mut self, alpha_mode: AlphaMode) -> Self {
        self.alpha_mode = alpha_mode;
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>, texture: Texture) -> Self {
        self.textures.insert(name.into(), texture);
        self
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_opaque_white() {
        let material = Material::default();
        assert_eq!(material.base_color_factor, Vec4::ONE);
        assert!(!material.is_transparent());
        assert!(material.textures.is_empty());
    }

    #[test]
    fn test_blend_is_transparent() {
        let material = Material::new("glass").with_alpha_mode(AlphaMode::Blend);
        assert!(material.is_transparent());
        assert!(!Material::new("cutout").with_alpha_mode(AlphaMode::Mask).is_transparent());
    }
}

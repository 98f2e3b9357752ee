//! Structural hashing for cache keys.
//!
//! Every key is a 64-bit xxh3 hash. Objects that are already deduplicated
//! contribute their Vulkan handle rather than their contents.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use lumen_rhi::image::ImageView;
use lumen_rhi::render_pass::{Attachment, LoadStoreInfo, RenderPass, SubpassInfo};
use lumen_rhi::shader::{ShaderModule, ShaderResource};
use xxhash_rust::xxh3::Xxh3;

/// Hashes any `Hash` value with xxh3.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = Xxh3::new();
    value.hash(&mut hasher);
    hasher.finish()
}

pub fn hash_subresource_range<H: Hasher>(range: &vk::ImageSubresourceRange, state: &mut H) {
    range.aspect_mask.hash(state);
    range.base_mip_level.hash(state);
    range.level_count.hash(state);
    range.base_array_layer.hash(state);
    range.layer_count.hash(state);
}

/// Hashes `(handle, image handle, format, subresource range)`.
pub fn hash_image_view<H: Hasher>(view: &ImageView, state: &mut H) {
    view.handle().as_raw().hash(state);
    view.image().as_raw().hash(state);
    view.format().hash(state);
    hash_subresource_range(&view.subresource_range(), state);
}

pub fn hash_shader_modules<H: Hasher>(modules: &[Arc<ShaderModule>], state: &mut H) {
    modules.len().hash(state);
    for module in modules {
        module.id().hash(state);
    }
}

pub fn pipeline_layout_key(modules: &[Arc<ShaderModule>]) -> u64 {
    let mut hasher = Xxh3::new();
    hash_shader_modules(modules, &mut hasher);
    hasher.finish()
}

pub fn descriptor_set_layout_key(
    set_index: u32,
    modules: &[Arc<ShaderModule>],
    resources: &[ShaderResource],
) -> u64 {
    let mut hasher = Xxh3::new();
    set_index.hash(&mut hasher);
    hash_shader_modules(modules, &mut hasher);
    resources.hash(&mut hasher);
    hasher.finish()
}

pub fn render_pass_key(
    attachments: &[Attachment],
    load_store: &[LoadStoreInfo],
    subpasses: &[SubpassInfo],
) -> u64 {
    let mut hasher = Xxh3::new();
    attachments.hash(&mut hasher);
    load_store.hash(&mut hasher);
    subpasses.hash(&mut hasher);
    hasher.finish()
}

pub fn framebuffer_key(render_target_hash: u64, render_pass: &RenderPass) -> u64 {
    let mut hasher = Xxh3::new();
    render_target_hash.hash(&mut hasher);
    render_pass.handle().as_raw().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(format: vk::Format) -> Attachment {
        Attachment::new(
            format,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
    }

    #[test]
    fn test_hash_value_is_deterministic() {
        assert_eq!(hash_value(&(1u32, "a")), hash_value(&(1u32, "a")));
        assert_ne!(hash_value(&(1u32, "a")), hash_value(&(2u32, "a")));
    }

    #[test]
    fn test_render_pass_key_covers_every_input() {
        let attachments = [attachment(vk::Format::R8G8B8A8_UNORM)];
        let load_store = [LoadStoreInfo::default()];
        let subpasses = [SubpassInfo::default()];
        let base = render_pass_key(&attachments, &load_store, &subpasses);

        assert_eq!(base, render_pass_key(&attachments, &load_store, &subpasses));
        assert_ne!(
            base,
            render_pass_key(&[attachment(vk::Format::B8G8R8A8_SRGB)], &load_store, &subpasses)
        );
        assert_ne!(
            base,
            render_pass_key(&attachments, &[LoadStoreInfo::transient()], &subpasses)
        );
        let named = [SubpassInfo {
            debug_name: "geometry".to_string(),
            ..Default::default()
        }];
        assert_ne!(base, render_pass_key(&attachments, &load_store, &named));
    }

    #[test]
    fn test_subresource_range_hash() {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let hash = |r: &vk::ImageSubresourceRange| {
            let mut hasher = Xxh3::new();
            hash_subresource_range(r, &mut hasher);
            hasher.finish()
        };
        let mut other = range;
        other.level_count = 2;
        assert_eq!(hash(&range), hash(&range));
        assert_ne!(hash(&range), hash(&other));
    }
}

//! Deduplicating cache of Vulkan objects.
//!
//! One cache serves a logical device. Every request hashes its structural
//! input to a 64-bit key; identical requests return the same `Arc`. Each
//! object kind has its own `RwLock`ed map and creation happens under the
//! write lock after a re-check, so concurrent identical requests build one
//! object.
//!
//! Nothing is evicted while frames are in flight. [`ResourceCache::clear_framebuffers`]
//! runs on swapchain recreation and [`ResourceCache::clear`] at teardown,
//! both with the device idle.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use lumen_rhi::RhiError;
use lumen_rhi::descriptor::DescriptorSetLayout;
use lumen_rhi::device::Device;
use lumen_rhi::pipeline::{Pipeline, PipelineLayout, shader_sets};
use lumen_rhi::pipeline_state::PipelineState;
use lumen_rhi::render_pass::{Attachment, Framebuffer, LoadStoreInfo, RenderPass, SubpassInfo};
use lumen_rhi::shader::{
    ShaderModule, ShaderResource, ShaderSource, ShaderStage, ShaderVariant, aggregate_resources,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::hashing::{descriptor_set_layout_key, framebuffer_key, pipeline_layout_key, render_pass_key};
use crate::render_target::RenderTarget;

type CacheMap<T> = RwLock<HashMap<u64, Arc<T>>>;

/// Returns the cached object for `key`, creating it under the write lock.
fn request<T>(
    map: &CacheMap<T>,
    key: u64,
    resource: &'static str,
    create: impl FnOnce() -> Result<T, RhiError>,
) -> RenderResult<Arc<T>> {
    if let Some(existing) = map.read().get(&key) {
        return Ok(existing.clone());
    }

    let mut map = map.write();
    if let Some(existing) = map.get(&key) {
        return Ok(existing.clone());
    }

    let object = Arc::new(create().map_err(|source| RenderError::CacheBuild { resource, source })?);
    debug!("Cached new {} ({:#018x}), {} total", resource, key, map.len() + 1);
    map.insert(key, object.clone());
    Ok(object)
}

/// Object counts per map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub shader_modules: usize,
    pub descriptor_set_layouts: usize,
    pub pipeline_layouts: usize,
    pub render_passes: usize,
    pub framebuffers: usize,
    pub graphics_pipelines: usize,
    pub compute_pipelines: usize,
}

pub struct ResourceCache {
    device: Arc<Device>,
    pipeline_cache: vk::PipelineCache,
    shader_modules: CacheMap<ShaderModule>,
    descriptor_set_layouts: CacheMap<DescriptorSetLayout>,
    pipeline_layouts: CacheMap<PipelineLayout>,
    render_passes: CacheMap<RenderPass>,
    framebuffers: CacheMap<Framebuffer>,
    graphics_pipelines: CacheMap<Pipeline>,
    compute_pipelines: CacheMap<Pipeline>,
}

impl ResourceCache {
    pub fn new(device: Arc<Device>) -> RenderResult<Self> {
        let create_info = vk::PipelineCacheCreateInfo::default();
        let pipeline_cache = unsafe { device.handle().create_pipeline_cache(&create_info, None)? };
        info!("Resource cache created");

        Ok(Self {
            device,
            pipeline_cache,
            shader_modules: RwLock::default(),
            descriptor_set_layouts: RwLock::default(),
            pipeline_layouts: RwLock::default(),
            render_passes: RwLock::default(),
            framebuffers: RwLock::default(),
            graphics_pipelines: RwLock::default(),
            compute_pipelines: RwLock::default(),
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn request_shader_module(
        &self,
        stage: ShaderStage,
        source: &ShaderSource,
        variant: &ShaderVariant,
    ) -> RenderResult<Arc<ShaderModule>> {
        let key = ShaderModule::compute_id(stage, source, variant);
        request(&self.shader_modules, key, "shader module", || {
            ShaderModule::new(self.device.clone(), stage, source, variant)
        })
    }

    pub fn request_descriptor_set_layout(
        &self,
        set_index: u32,
        modules: &[Arc<ShaderModule>],
        resources: &[ShaderResource],
    ) -> RenderResult<Arc<DescriptorSetLayout>> {
        let key = descriptor_set_layout_key(set_index, modules, resources);
        request(&self.descriptor_set_layouts, key, "descriptor set layout", || {
            DescriptorSetLayout::new(self.device.clone(), set_index, resources)
        })
    }

    /// Layout for a set of stages; every set index up to the highest one
    /// used gets a (possibly empty) descriptor set layout.
    pub fn request_pipeline_layout(
        &self,
        modules: &[Arc<ShaderModule>],
    ) -> RenderResult<Arc<PipelineLayout>> {
        let key = pipeline_layout_key(modules);
        if let Some(existing) = self.pipeline_layouts.read().get(&key) {
            return Ok(existing.clone());
        }

        let resources = aggregate_resources(modules.iter().flat_map(|m| m.resources()));
        let sets = shader_sets(&resources);
        let set_count = sets.last_key_value().map_or(0, |(&set, _)| set + 1);
        let set_layouts = (0..set_count)
            .map(|set| {
                let resources = sets.get(&set).map(Vec::as_slice).unwrap_or(&[]);
                self.request_descriptor_set_layout(set, modules, resources)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        request(&self.pipeline_layouts, key, "pipeline layout", || {
            PipelineLayout::new(self.device.clone(), modules.to_vec(), set_layouts)
        })
    }

    pub fn request_render_pass(
        &self,
        attachments: &[Attachment],
        load_store: &[LoadStoreInfo],
        subpasses: &[SubpassInfo],
    ) -> RenderResult<Arc<RenderPass>> {
        let key = render_pass_key(attachments, load_store, subpasses);
        request(&self.render_passes, key, "render pass", || {
            RenderPass::new(self.device.clone(), attachments, load_store, subpasses)
        })
    }

    pub fn request_framebuffer(
        &self,
        target: &RenderTarget,
        render_pass: &Arc<RenderPass>,
    ) -> RenderResult<Arc<Framebuffer>> {
        let key = framebuffer_key(target.hash_value(), render_pass);
        request(&self.framebuffers, key, "framebuffer", || {
            Framebuffer::new(
                self.device.clone(),
                render_pass,
                &target.view_handles(),
                target.extent(),
            )
        })
    }

    pub fn request_graphics_pipeline(&self, state: &PipelineState) -> RenderResult<Arc<Pipeline>> {
        let key = state.hash_value();
        request(&self.graphics_pipelines, key, "graphics pipeline", || {
            Pipeline::new_graphics(self.device.clone(), self.pipeline_cache, state)
        })
    }

    pub fn request_compute_pipeline(&self, state: &PipelineState) -> RenderResult<Arc<Pipeline>> {
        let key = state.hash_value();
        request(&self.compute_pipelines, key, "compute pipeline", || {
            Pipeline::new_compute(self.device.clone(), self.pipeline_cache, state)
        })
    }

    /// Drops all framebuffers. The device must be idle.
    pub fn clear_framebuffers(&self) {
        let mut framebuffers = self.framebuffers.write();
        debug!("Clearing {} cached framebuffer(s)", framebuffers.len());
        framebuffers.clear();
    }

    /// Drops all pipelines. The device must be idle.
    pub fn clear_pipelines(&self) {
        self.graphics_pipelines.write().clear();
        self.compute_pipelines.write().clear();
    }

    /// Drops every cached object. The device must be idle.
    pub fn clear(&self) {
        self.clear_framebuffers();
        self.clear_pipelines();
        self.pipeline_layouts.write().clear();
        self.descriptor_set_layouts.write().clear();
        self.render_passes.write().clear();
        self.shader_modules.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            shader_modules: self.shader_modules.read().len(),
            descriptor_set_layouts: self.descriptor_set_layouts.read().len(),
            pipeline_layouts: self.pipeline_layouts.read().len(),
            render_passes: self.render_passes.read().len(),
            framebuffers: self.framebuffers.read().len(),
            graphics_pipelines: self.graphics_pipelines.read().len(),
            compute_pipelines: self.compute_pipelines.read().len(),
        }
    }
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Device wait before cache teardown failed: {}", e);
        }
        self.clear();
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_cache(self.pipeline_cache, None);
        }
        debug!("Resource cache destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_request_creates_once_per_key() {
        let map: CacheMap<u32> = RwLock::default();
        let calls = AtomicUsize::new(0);
        let create = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        };

        let a = request(&map, 1, "value", create).unwrap();
        let b = request(&map, 1, "value", create).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        request(&map, 2, "value", create).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(map.read().len(), 2);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let map: CacheMap<u32> = RwLock::default();
        let result = request(&map, 1, "value", || {
            Err(RhiError::PipelineError("boom".to_string()))
        });
        assert!(matches!(
            result,
            Err(RenderError::CacheBuild { resource: "value", .. })
        ));
        assert!(map.read().is_empty());
    }

    #[test]
    fn test_concurrent_requests_share_one_object() {
        let map: Arc<CacheMap<usize>> = Arc::new(RwLock::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = map.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    request(&map, 42, "value", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                    .unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}

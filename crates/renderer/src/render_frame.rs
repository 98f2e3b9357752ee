//! Per-swapchain-image frame resources.
//!
//! A [`RenderFrame`] owns everything a frame needs until the GPU is done
//! with it:
//!
//! - the [`RenderTarget`] the frame renders into
//! - one command pool per recording thread per queue family
//! - per-thread descriptor pools, cached descriptor sets and dynamic buffer
//!   pools (the [`FrameShared`] half, which recorders keep a handle to)
//! - a fence pool and a semaphore pool
//!
//! # Lifecycle
//!
//! ```text
//! reclaimable --request_*--> recording --submit--> in flight
//!      ^                                              |
//!      +---------------- reset() (fence wait) --------+
//! ```
//!
//! [`RenderFrame::reset`] blocks until every fence handed out by the frame
//! has signalled; only then are pools rewound.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use lumen_core::{BufferAllocationStrategy, DescriptorManagementStrategy, RendererConfig};
use lumen_rhi::buffer::BufferUsage;
use lumen_rhi::command::{CommandBufferResetMode, CommandPool};
use lumen_rhi::descriptor::{
    BindingMap, DescriptorPool, DescriptorSet, DescriptorSetLayout, hash_binding_infos,
};
use lumen_rhi::device::Device;
use lumen_rhi::sync::{FencePool, SemaphorePool};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::buffer_pool::{BufferAllocation, BufferPool, DEFAULT_BLOCK_SIZE};
use crate::command_recorder::CommandRecorder;
use crate::error::{RenderError, RenderResult};
use crate::render_target::RenderTarget;
use crate::resource_cache::ResourceCache;

/// Allocation and descriptor policies of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameConfig {
    pub buffer_block_size: vk::DeviceSize,
    pub buffer_allocation_strategy: BufferAllocationStrategy,
    pub descriptor_management_strategy: DescriptorManagementStrategy,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            buffer_block_size: DEFAULT_BLOCK_SIZE,
            buffer_allocation_strategy: BufferAllocationStrategy::default(),
            descriptor_management_strategy: DescriptorManagementStrategy::default(),
        }
    }
}

impl From<&RendererConfig> for FrameConfig {
    fn from(config: &RendererConfig) -> Self {
        Self {
            buffer_block_size: config.buffer_block_kib.max(1) * 1024,
            buffer_allocation_strategy: config.buffer_allocation_strategy,
            descriptor_management_strategy: config.descriptor_management_strategy,
        }
    }
}

/// Maps the configured reset mode onto the command pool's.
pub fn command_buffer_reset_mode(mode: lumen_core::CommandBufferResetMode) -> CommandBufferResetMode {
    match mode {
        lumen_core::CommandBufferResetMode::ResetPool => CommandBufferResetMode::ResetPool,
        lumen_core::CommandBufferResetMode::ResetIndividually => {
            CommandBufferResetMode::ResetIndividually
        }
        lumen_core::CommandBufferResetMode::AlwaysAllocate => CommandBufferResetMode::AlwaysAllocate,
    }
}

/// Descriptor set cache key.
///
/// With `update_after_bind`, the infos of update-after-bind bindings are
/// left out so the same set is found and rewritten in place.
pub fn descriptor_set_key(
    layout: &DescriptorSetLayout,
    buffer_infos: &BindingMap<vk::DescriptorBufferInfo>,
    image_infos: &BindingMap<vk::DescriptorImageInfo>,
    update_after_bind: bool,
) -> u64 {
    let mut hasher = Xxh3::new();
    layout.handle().as_raw().hash(&mut hasher);
    if update_after_bind {
        let keep = |binding: &u32| !layout.binding(*binding).is_some_and(|b| b.update_after_bind);
        let buffers: BindingMap<_> = buffer_infos
            .iter()
            .filter(|(binding, _)| keep(binding))
            .map(|(binding, elements)| (*binding, elements.clone()))
            .collect();
        let images: BindingMap<_> = image_infos
            .iter()
            .filter(|(binding, _)| keep(binding))
            .map(|(binding, elements)| (*binding, elements.clone()))
            .collect();
        hash_binding_infos(&buffers, &images, &mut hasher);
    } else {
        hash_binding_infos(buffer_infos, image_infos, &mut hasher);
    }
    hasher.finish()
}

/// Resources owned by one recording thread of a frame.
#[derive(Default)]
struct ThreadResources {
    descriptor_pools: HashMap<u64, DescriptorPool>,
    descriptor_sets: HashMap<u64, DescriptorSet>,
    buffer_pools: BTreeMap<BufferUsage, BufferPool>,
}

impl ThreadResources {
    fn descriptor_pool(&mut self, layout: &Arc<DescriptorSetLayout>) -> &mut DescriptorPool {
        self.descriptor_pools
            .entry(layout.handle().as_raw())
            .or_insert_with(|| DescriptorPool::new(layout.clone()))
    }

    fn clear_descriptors(&mut self) -> RenderResult<()> {
        self.descriptor_sets.clear();
        for pool in self.descriptor_pools.values_mut() {
            pool.reset()?;
        }
        Ok(())
    }
}

/// The part of a frame shared with the recorders it hands out.
pub struct FrameShared {
    device: Arc<Device>,
    cache: Arc<ResourceCache>,
    config: RwLock<FrameConfig>,
    threads: Vec<Mutex<ThreadResources>>,
}

impl FrameShared {
    fn new(device: Arc<Device>, cache: Arc<ResourceCache>, thread_count: usize, config: FrameConfig) -> Self {
        let threads = (0..thread_count.max(1))
            .map(|_| Mutex::new(ThreadResources::default()))
            .collect();
        Self {
            device,
            cache,
            config: RwLock::new(config),
            threads,
        }
    }

    fn thread(&self, thread_index: usize) -> RenderResult<&Mutex<ThreadResources>> {
        self.threads.get(thread_index).ok_or_else(|| {
            RenderError::InvalidState(format!(
                "thread index {} out of range ({} thread(s))",
                thread_index,
                self.threads.len()
            ))
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn config(&self) -> FrameConfig {
        *self.config.read()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Sub-allocates `size` bytes from the thread's pool for `usage`.
    pub fn allocate_buffer(
        &self,
        usage: BufferUsage,
        size: vk::DeviceSize,
        thread_index: usize,
    ) -> RenderResult<BufferAllocation> {
        let config = self.config();
        let mut thread = self.thread(thread_index)?.lock();
        let pool = thread.buffer_pools.entry(usage).or_insert_with(|| {
            BufferPool::new(self.device.clone(), usage, config.buffer_block_size)
        });
        pool.allocate(size, config.buffer_allocation_strategy)
    }

    /// Returns a descriptor set holding the given infos.
    pub fn request_descriptor_set(
        &self,
        layout: &Arc<DescriptorSetLayout>,
        buffer_infos: &BindingMap<vk::DescriptorBufferInfo>,
        image_infos: &BindingMap<vk::DescriptorImageInfo>,
        update_after_bind: bool,
        thread_index: usize,
    ) -> RenderResult<vk::DescriptorSet> {
        let strategy = self.config().descriptor_management_strategy;
        let mut thread = self.thread(thread_index)?.lock();

        match strategy {
            DescriptorManagementStrategy::StoreInCache => {
                let key = descriptor_set_key(layout, buffer_infos, image_infos, update_after_bind);
                if !thread.descriptor_sets.contains_key(&key) {
                    let handle = thread.descriptor_pool(layout).allocate()?;
                    thread
                        .descriptor_sets
                        .insert(key, DescriptorSet::new(layout.clone(), handle));
                }
                let Some(set) = thread.descriptor_sets.get_mut(&key) else {
                    return Err(RenderError::InvalidState("descriptor set vanished".to_string()));
                };
                set.write(buffer_infos, image_infos);
                Ok(set.handle())
            }
            DescriptorManagementStrategy::CreateDirectly => {
                let handle = thread.descriptor_pool(layout).allocate()?;
                let mut set = DescriptorSet::new(layout.clone(), handle);
                set.write(buffer_infos, image_infos);
                Ok(handle)
            }
        }
    }

    fn reset_threads(&self) -> RenderResult<()> {
        let clear_descriptors =
            self.config().descriptor_management_strategy == DescriptorManagementStrategy::CreateDirectly;
        for thread in &self.threads {
            let mut thread = thread.lock();
            for pool in thread.buffer_pools.values_mut() {
                pool.reset();
            }
            if clear_descriptors {
                thread.clear_descriptors()?;
            }
        }
        Ok(())
    }

    fn clear_descriptors(&self) -> RenderResult<()> {
        for thread in &self.threads {
            thread.lock().clear_descriptors()?;
        }
        Ok(())
    }
}

type CommandPools = HashMap<u32, Vec<Mutex<CommandPool>>>;

pub struct RenderFrame {
    shared: Arc<FrameShared>,
    render_target: RenderTarget,
    command_pools: RwLock<CommandPools>,
    fence_pool: Mutex<FencePool>,
    semaphore_pool: Mutex<SemaphorePool>,
}

impl RenderFrame {
    pub fn new(
        device: Arc<Device>,
        cache: Arc<ResourceCache>,
        render_target: RenderTarget,
        thread_count: usize,
        config: FrameConfig,
    ) -> Self {
        let fence_pool = FencePool::new(device.handle().clone());
        let semaphore_pool = SemaphorePool::new(device.handle().clone());
        Self {
            shared: Arc::new(FrameShared::new(device, cache, thread_count, config)),
            render_target,
            command_pools: RwLock::new(HashMap::new()),
            fence_pool: Mutex::new(fence_pool),
            semaphore_pool: Mutex::new(semaphore_pool),
        }
    }

    pub fn shared(&self) -> &Arc<FrameShared> {
        &self.shared
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    pub fn thread_count(&self) -> usize {
        self.shared.thread_count()
    }

    fn build_pools(
        &self,
        queue_family: u32,
        reset_mode: CommandBufferResetMode,
    ) -> RenderResult<Vec<Mutex<CommandPool>>> {
        (0..self.thread_count())
            .map(|thread| {
                CommandPool::new(self.device().clone(), queue_family, thread, reset_mode)
                    .map(Mutex::new)
                    .map_err(RenderError::from)
            })
            .collect()
    }

    /// Hands out a recorder from the calling thread's pool.
    ///
    /// Pools of `queue_family` built with a different reset mode are rebuilt
    /// after a device wait.
    pub fn request_command_buffer(
        &self,
        queue_family: u32,
        reset_mode: CommandBufferResetMode,
        level: vk::CommandBufferLevel,
        thread_index: usize,
    ) -> RenderResult<CommandRecorder> {
        if thread_index >= self.thread_count() {
            return Err(RenderError::InvalidState(format!(
                "thread index {} out of range ({} thread(s))",
                thread_index,
                self.thread_count()
            )));
        }

        let current_mode = self
            .command_pools
            .read()
            .get(&queue_family)
            .and_then(|pools| pools.first().map(|p| p.lock().reset_mode()));
        if current_mode != Some(reset_mode) {
            let mut pools = self.command_pools.write();
            let stale = pools
                .get(&queue_family)
                .and_then(|p| p.first().map(|p| p.lock().reset_mode()));
            if stale != Some(reset_mode) {
                if stale.is_some() {
                    debug!(
                        "Command pools of queue family {} switch to {:?}",
                        queue_family, reset_mode
                    );
                    self.device().wait_idle()?;
                }
                pools.insert(queue_family, self.build_pools(queue_family, reset_mode)?);
            }
        }

        let pools = self.command_pools.read();
        let Some(pool) = pools.get(&queue_family).and_then(|p| p.get(thread_index)) else {
            return Err(RenderError::InvalidState(format!(
                "no command pool for queue family {queue_family}"
            )));
        };
        let handle = pool.lock().request_command_buffer(level)?;
        Ok(CommandRecorder::new(
            self.shared.clone(),
            handle,
            level,
            thread_index,
        ))
    }

    pub fn allocate_buffer(
        &self,
        usage: BufferUsage,
        size: vk::DeviceSize,
        thread_index: usize,
    ) -> RenderResult<BufferAllocation> {
        self.shared.allocate_buffer(usage, size, thread_index)
    }

    pub fn request_descriptor_set(
        &self,
        layout: &Arc<DescriptorSetLayout>,
        buffer_infos: &BindingMap<vk::DescriptorBufferInfo>,
        image_infos: &BindingMap<vk::DescriptorImageInfo>,
        update_after_bind: bool,
        thread_index: usize,
    ) -> RenderResult<vk::DescriptorSet> {
        self.shared.request_descriptor_set(
            layout,
            buffer_infos,
            image_infos,
            update_after_bind,
            thread_index,
        )
    }

    /// Transient semaphore, recycled on the next [`reset`](Self::reset).
    pub fn request_semaphore(&self) -> RenderResult<vk::Semaphore> {
        Ok(self.semaphore_pool.lock().request_semaphore()?)
    }

    /// Semaphore owned by the caller until handed back with
    /// [`release_owned_semaphore`](Self::release_owned_semaphore).
    pub fn request_semaphore_with_ownership(&self) -> RenderResult<vk::Semaphore> {
        Ok(self.semaphore_pool.lock().request_semaphore_with_ownership()?)
    }

    pub fn release_owned_semaphore(&self, semaphore: vk::Semaphore) {
        self.semaphore_pool.lock().release_owned_semaphore(semaphore);
    }

    pub fn request_fence(&self) -> RenderResult<vk::Fence> {
        Ok(self.fence_pool.lock().request_fence()?)
    }

    /// Fences handed out since the last reset.
    pub fn active_fence_count(&self) -> usize {
        self.fence_pool.lock().active_count()
    }

    /// Waits for the frame's work and rewinds every pool.
    ///
    /// # Errors
    ///
    /// [`RenderError::FenceTimeout`] if the fence wait fails; the frame can
    /// not be reused after that.
    pub fn reset(&mut self) -> RenderResult<()> {
        {
            let mut fences = self.fence_pool.lock();
            fences.wait(u64::MAX).map_err(RenderError::FenceTimeout)?;
            fences.reset()?;
        }

        for pools in self.command_pools.get_mut().values() {
            for pool in pools {
                pool.lock().reset()?;
            }
        }

        self.shared.reset_threads()?;
        self.semaphore_pool.lock().reset();
        Ok(())
    }

    /// Swaps in a new target, e.g. after the swapchain was rebuilt.
    pub fn update_render_target(&mut self, render_target: RenderTarget) {
        self.render_target = render_target;
    }

    pub fn render_target(&self) -> &RenderTarget {
        &self.render_target
    }

    pub fn render_target_mut(&mut self) -> &mut RenderTarget {
        &mut self.render_target
    }

    pub fn set_buffer_allocation_strategy(&self, strategy: BufferAllocationStrategy) {
        self.shared.config.write().buffer_allocation_strategy = strategy;
    }

    pub fn set_descriptor_management_strategy(&self, strategy: DescriptorManagementStrategy) {
        self.shared.config.write().descriptor_management_strategy = strategy;
    }

    /// Drops all cached descriptor sets and returns them to their pools.
    ///
    /// The frame must not be in flight.
    pub fn clear_descriptors(&self) -> RenderResult<()> {
        self.shared.clear_descriptors()
    }
}

impl Drop for RenderFrame {
    fn drop(&mut self) {
        if let Err(e) = self.fence_pool.get_mut().wait(u64::MAX) {
            warn!("Waiting for frame fences before teardown failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_config_from_renderer_config() {
        let renderer = RendererConfig {
            buffer_block_kib: 64,
            buffer_allocation_strategy: BufferAllocationStrategy::OneAllocationPerBuffer,
            descriptor_management_strategy: DescriptorManagementStrategy::CreateDirectly,
            ..Default::default()
        };
        let config = FrameConfig::from(&renderer);
        assert_eq!(config.buffer_block_size, 64 * 1024);
        assert_eq!(
            config.buffer_allocation_strategy,
            BufferAllocationStrategy::OneAllocationPerBuffer
        );
        assert_eq!(
            config.descriptor_management_strategy,
            DescriptorManagementStrategy::CreateDirectly
        );
    }

    #[test]
    fn test_reset_mode_mapping() {
        use lumen_core::CommandBufferResetMode as Configured;
        assert_eq!(
            command_buffer_reset_mode(Configured::ResetPool),
            CommandBufferResetMode::ResetPool
        );
        assert_eq!(
            command_buffer_reset_mode(Configured::ResetIndividually),
            CommandBufferResetMode::ResetIndividually
        );
        assert_eq!(
            command_buffer_reset_mode(Configured::AlwaysAllocate),
            CommandBufferResetMode::AlwaysAllocate
        );
    }

    #[test]
    fn test_default_frame_config() {
        let config = FrameConfig::default();
        assert_eq!(config.buffer_block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(
            config.descriptor_management_strategy,
            DescriptorManagementStrategy::StoreInCache
        );
    }
}

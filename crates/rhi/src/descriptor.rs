//! Descriptor set layouts, pools and sets.
//!
//! - [`DescriptorSetLayout`] is built from the reflected resources of one set
//!   index. It remembers its bindings so writes can look up descriptor types.
//! - [`DescriptorPool`] serves one layout from a growing chain of Vulkan
//!   pools, each sized for [`MAX_SETS_PER_POOL`] sets of that layout.
//! - [`DescriptorSet`] remembers what was last written per
//!   `(binding, array element)` and only rewrites entries that are new,
//!   changed, or declared update-after-bind.
//!
//! Resource infos are passed as [`BindingMap`]s: binding, then array element.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::descriptor::{BindingMap, DescriptorPool, DescriptorSet, DescriptorSetLayout};
//! use lumen_rhi::shader::ShaderModule;
//!
//! # fn example(modules: &[Arc<ShaderModule>], device: Arc<lumen_rhi::device::Device>) -> lumen_rhi::RhiResult<()> {
//! let resources: Vec<_> = modules.iter().flat_map(|m| m.resources().iter().cloned()).collect();
//! let layout = Arc::new(DescriptorSetLayout::new(device, 0, &resources)?);
//! let mut pool = DescriptorPool::new(layout.clone());
//!
//! let mut set = DescriptorSet::new(layout, pool.allocate()?);
//! set.write(&BindingMap::new(), &BindingMap::new());
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{ShaderResource, ShaderResourceMode, aggregate_resources};

/// Sets allocated from each Vulkan pool in a chain.
pub const MAX_SETS_PER_POOL: u32 = 16;

/// `binding → array element → info`.
pub type BindingMap<T> = BTreeMap<u32, BTreeMap<u32, T>>;

/// One binding of a set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub update_after_bind: bool,
}

impl LayoutBinding {
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self.descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        )
    }

    pub fn is_buffer(&self) -> bool {
        matches!(
            self.descriptor_type,
            vk::DescriptorType::UNIFORM_BUFFER
                | vk::DescriptorType::STORAGE_BUFFER
                | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        )
    }
}

/// Layout bindings for `set_index`, sorted by binding number.
///
/// Resources of several stages sharing a binding are merged first.
pub fn layout_bindings(set_index: u32, resources: &[ShaderResource]) -> Vec<LayoutBinding> {
    let mut bindings: Vec<LayoutBinding> = aggregate_resources(resources)
        .iter()
        .filter(|r| r.set == set_index)
        .filter_map(|r| {
            r.descriptor_type().map(|descriptor_type| LayoutBinding {
                binding: r.binding,
                descriptor_type,
                count: r.array_size.max(1),
                stages: r.stages,
                update_after_bind: r.mode == ShaderResourceMode::UpdateAfterBind,
            })
        })
        .collect();
    bindings.sort_by_key(|b| b.binding);
    bindings
}

/// Pool sizes for `max_sets` sets of the given bindings.
pub fn pool_sizes(bindings: &[LayoutBinding], max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in bindings {
        *counts.entry(binding.descriptor_type.as_raw()).or_default() += binding.count;
    }
    counts
        .into_iter()
        .map(|(ty, count)| {
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::from_raw(ty))
                .descriptor_count(count * max_sets)
        })
        .collect()
}

/// Descriptor set layout for one set index.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    set_index: u32,
    bindings: Vec<LayoutBinding>,
    resources: Vec<ShaderResource>,
}

impl DescriptorSetLayout {
    /// Creates the layout of `set_index` from the resources of every stage.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Unsupported`] for update-after-bind bindings on a
    /// device without support, [`RhiError::InvalidArgument`] if dynamic and
    /// update-after-bind descriptors are mixed, or a Vulkan error.
    pub fn new(device: Arc<Device>, set_index: u32, resources: &[ShaderResource]) -> RhiResult<Self> {
        let bindings = layout_bindings(set_index, resources);
        let update_after_bind = bindings.iter().any(|b| b.update_after_bind);

        if update_after_bind {
            if !device.supports_update_after_bind() {
                return Err(RhiError::Unsupported(
                    "Update-after-bind descriptors are not supported by this device".into(),
                ));
            }
            if bindings.iter().any(LayoutBinding::is_dynamic) {
                return Err(RhiError::InvalidArgument(format!(
                    "Set {set_index} mixes dynamic and update-after-bind descriptors"
                )));
            }
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();
        let binding_flags: Vec<vk::DescriptorBindingFlags> = bindings
            .iter()
            .map(|b| {
                if b.update_after_bind {
                    vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect();
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        if update_after_bind {
            create_info = create_info
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut flags_info);
        }

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout for set {} with {} binding(s)",
            set_index,
            bindings.len()
        );

        Ok(Self {
            device,
            layout,
            set_index,
            bindings,
            resources: resources
                .iter()
                .filter(|r| r.set == set_index && r.resource_type.is_descriptor())
                .cloned()
                .collect(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    #[inline]
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    pub fn binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    /// Binding number of the resource called `name`.
    pub fn binding_by_name(&self, name: &str) -> Option<&LayoutBinding> {
        self.resources
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| self.binding(r.binding))
    }

    pub fn has_update_after_bind(&self) -> bool {
        self.bindings.iter().any(|b| b.update_after_bind)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Allocates sets of one layout from a chain of Vulkan pools.
pub struct DescriptorPool {
    layout: Arc<DescriptorSetLayout>,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    pools: Vec<vk::DescriptorPool>,
    allocated: Vec<u32>,
    current: usize,
}

impl DescriptorPool {
    pub fn new(layout: Arc<DescriptorSetLayout>) -> Self {
        let pool_sizes = pool_sizes(layout.bindings(), MAX_SETS_PER_POOL);
        Self {
            layout,
            pool_sizes,
            pools: Vec::new(),
            allocated: Vec::new(),
            current: 0,
        }
    }

    fn create_pool(&self) -> RhiResult<vk::DescriptorPool> {
        let flags = if self.layout.has_update_after_bind() {
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(MAX_SETS_PER_POOL)
            .pool_sizes(&self.pool_sizes);
        let pool = unsafe {
            self.layout
                .device()
                .handle()
                .create_descriptor_pool(&create_info, None)?
        };
        debug!(
            "Created descriptor pool #{} for set {}",
            self.pools.len(),
            self.layout.set_index()
        );
        Ok(pool)
    }

    /// Allocates one set, opening a new Vulkan pool when the current one is
    /// full.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation or allocation fails.
    pub fn allocate(&mut self) -> RhiResult<vk::DescriptorSet> {
        while self.current < self.pools.len() && self.allocated[self.current] >= MAX_SETS_PER_POOL
        {
            self.current += 1;
        }
        if self.current == self.pools.len() {
            let pool = self.create_pool()?;
            self.pools.push(pool);
            self.allocated.push(0);
        }

        let layouts = [self.layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pools[self.current])
            .set_layouts(&layouts);
        let set = unsafe {
            self.layout
                .device()
                .handle()
                .allocate_descriptor_sets(&alloc_info)?
        }
        .into_iter()
        .next()
        .ok_or(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))?;

        self.allocated[self.current] += 1;
        Ok(set)
    }

    /// Returns every set to its pool.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkResetDescriptorPool` fails.
    pub fn reset(&mut self) -> RhiResult<()> {
        let device = self.layout.device().handle();
        for pool in &self.pools {
            unsafe { device.reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())? };
        }
        self.allocated.iter_mut().for_each(|count| *count = 0);
        self.current = 0;
        Ok(())
    }

    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Number of Vulkan pools in the chain.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        let device = self.layout.device().handle();
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
    }
}

pub fn hash_buffer_info<H: Hasher>(info: &vk::DescriptorBufferInfo, state: &mut H) {
    info.buffer.as_raw().hash(state);
    info.offset.hash(state);
    info.range.hash(state);
}

pub fn hash_image_info<H: Hasher>(info: &vk::DescriptorImageInfo, state: &mut H) {
    info.sampler.as_raw().hash(state);
    info.image_view.as_raw().hash(state);
    info.image_layout.as_raw().hash(state);
}

/// Hashes the structure and contents of a pair of binding maps.
pub fn hash_binding_infos<H: Hasher>(
    buffer_infos: &BindingMap<vk::DescriptorBufferInfo>,
    image_infos: &BindingMap<vk::DescriptorImageInfo>,
    state: &mut H,
) {
    for (binding, elements) in buffer_infos {
        binding.hash(state);
        for (element, info) in elements {
            element.hash(state);
            hash_buffer_info(info, state);
        }
    }
    0xffu8.hash(state);
    for (binding, elements) in image_infos {
        binding.hash(state);
        for (element, info) in elements {
            element.hash(state);
            hash_image_info(info, state);
        }
    }
}

/// Entries of `current` that need a descriptor write: new, changed since the
/// last write, or flagged as always rewritten.
pub fn pending_writes(
    written: &HashMap<(u32, u32), u64>,
    current: impl IntoIterator<Item = ((u32, u32), u64)>,
    always: impl Fn(u32) -> bool,
) -> Vec<(u32, u32)> {
    current
        .into_iter()
        .filter(|(key, hash)| always(key.0) || written.get(key) != Some(hash))
        .map(|(key, _)| key)
        .collect()
}

/// A descriptor set plus the hashes of what was written into it.
pub struct DescriptorSet {
    layout: Arc<DescriptorSetLayout>,
    handle: vk::DescriptorSet,
    written: HashMap<(u32, u32), u64>,
}

impl DescriptorSet {
    pub fn new(layout: Arc<DescriptorSetLayout>, handle: vk::DescriptorSet) -> Self {
        Self {
            layout,
            handle,
            written: HashMap::new(),
        }
    }

    /// Writes the entries that differ from what the set already holds.
    ///
    /// Update-after-bind bindings are always rewritten. Entries for bindings
    /// the layout does not declare are skipped. Returns the number of
    /// descriptor writes issued.
    pub fn write(
        &mut self,
        buffer_infos: &BindingMap<vk::DescriptorBufferInfo>,
        image_infos: &BindingMap<vk::DescriptorImageInfo>,
    ) -> usize {
        let entry_hash = |hash: &dyn Fn(&mut Xxh3)| {
            let mut hasher = Xxh3::new();
            hash(&mut hasher);
            hasher.finish()
        };

        let mut current = Vec::new();
        for (&binding, elements) in buffer_infos {
            for (&element, info) in elements {
                current.push(((binding, element), entry_hash(&|h| hash_buffer_info(info, h))));
            }
        }
        for (&binding, elements) in image_infos {
            for (&element, info) in elements {
                current.push(((binding, element), entry_hash(&|h| hash_image_info(info, h))));
            }
        }
        let hashes: HashMap<(u32, u32), u64> = current.iter().copied().collect();

        let layout = &self.layout;
        let pending = pending_writes(&self.written, current, |binding| {
            layout.binding(binding).is_some_and(|b| b.update_after_bind)
        });

        let mut writes = Vec::with_capacity(pending.len());
        for (binding, element) in pending {
            let Some(layout_binding) = self.layout.binding(binding) else {
                warn!(
                    "Binding {} is not declared in set {}; skipping write",
                    binding,
                    self.layout.set_index()
                );
                continue;
            };
            let write = vk::WriteDescriptorSet::default()
                .dst_set(self.handle)
                .dst_binding(binding)
                .dst_array_element(element)
                .descriptor_type(layout_binding.descriptor_type);
            let write = if let Some(info) = buffer_infos.get(&binding).and_then(|e| e.get(&element))
            {
                write.buffer_info(std::slice::from_ref(info))
            } else if let Some(info) = image_infos.get(&binding).and_then(|e| e.get(&element)) {
                write.image_info(std::slice::from_ref(info))
            } else {
                continue;
            };
            writes.push(write);
            if let Some(hash) = hashes.get(&(binding, element)) {
                self.written.insert((binding, element), *hash);
            }
        }

        if !writes.is_empty() {
            unsafe {
                self.layout
                    .device()
                    .handle()
                    .update_descriptor_sets(&writes, &[]);
            }
        }
        writes.len()
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderResourceType;

    fn resource(
        resource_type: ShaderResourceType,
        set: u32,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> ShaderResource {
        ShaderResource {
            name: format!("res{set}_{binding}"),
            resource_type,
            mode: ShaderResourceMode::Static,
            stages,
            set,
            binding,
            array_size: 1,
            offset: 0,
            size: 16,
            location: 0,
        }
    }

    #[test]
    fn test_layout_bindings_filters_set_and_merges_stages() {
        let vs = vk::ShaderStageFlags::VERTEX;
        let fs = vk::ShaderStageFlags::FRAGMENT;
        let resources = [
            resource(ShaderResourceType::BufferUniform, 0, 1, vs),
            resource(ShaderResourceType::BufferUniform, 0, 1, fs),
            resource(ShaderResourceType::Image, 0, 0, fs),
            resource(ShaderResourceType::Sampler, 1, 0, fs),
            resource(ShaderResourceType::PushConstant, 0, 0, vs),
            resource(ShaderResourceType::Input, 0, 0, vs),
        ];
        let bindings = layout_bindings(0, &resources);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::SAMPLED_IMAGE);
        assert_eq!(bindings[1].stages, vs | fs);

        let set1 = layout_bindings(1, &resources);
        assert_eq!(set1.len(), 1);
        assert_eq!(set1[0].descriptor_type, vk::DescriptorType::SAMPLER);
    }

    #[test]
    fn test_update_after_bind_mode_flags_binding() {
        let mut image = resource(
            ShaderResourceType::Image,
            0,
            3,
            vk::ShaderStageFlags::FRAGMENT,
        );
        image.mode = ShaderResourceMode::UpdateAfterBind;
        image.array_size = 4;
        let bindings = layout_bindings(0, &[image]);
        assert!(bindings[0].update_after_bind);
        assert_eq!(bindings[0].count, 4);
    }

    #[test]
    fn test_pool_sizes_scale_with_sets() {
        let bindings = [
            LayoutBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
                update_after_bind: false,
            },
            LayoutBinding {
                binding: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 2,
                stages: vk::ShaderStageFlags::VERTEX,
                update_after_bind: false,
            },
            LayoutBinding {
                binding: 2,
                descriptor_type: vk::DescriptorType::SAMPLER,
                count: 1,
                stages: vk::ShaderStageFlags::FRAGMENT,
                update_after_bind: false,
            },
        ];
        let sizes = pool_sizes(&bindings, MAX_SETS_PER_POOL);
        assert_eq!(sizes.len(), 2);
        let uniform = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniform.descriptor_count, 3 * MAX_SETS_PER_POOL);
    }

    #[test]
    fn test_pending_writes_only_changed_entries() {
        let mut written = HashMap::new();
        written.insert((0, 0), 10);
        written.insert((1, 0), 20);

        let current = [((0, 0), 10), ((1, 0), 21), ((2, 0), 30)];
        let pending = pending_writes(&written, current, |_| false);
        assert_eq!(pending, vec![(1, 0), (2, 0)]);
    }

    #[test]
    fn test_pending_writes_always_includes_update_after_bind() {
        let mut written = HashMap::new();
        written.insert((0, 0), 10);
        written.insert((4, 0), 40);
        let current = [((0, 0), 10), ((4, 0), 40)];
        let pending = pending_writes(&written, current, |binding| binding == 4);
        assert_eq!(pending, vec![(4, 0)]);
    }

    #[test]
    fn test_binding_info_hash_is_order_sensitive_to_content() {
        let info = |offset| {
            vk::DescriptorBufferInfo::default()
                .buffer(vk::Buffer::from_raw(7))
                .offset(offset)
                .range(64)
        };
        let hash = |offset| {
            let mut buffers = BindingMap::new();
            buffers.entry(1).or_insert_with(BTreeMap::new).insert(0, info(offset));
            let mut hasher = Xxh3::new();
            hash_binding_infos(&buffers, &BindingMap::new(), &mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(0), hash(0));
        assert_ne!(hash(0), hash(256));
    }
}

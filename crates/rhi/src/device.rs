//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns everything whose lifetime is tied to the logical
//! device rather than to a frame:
//! - the graphics+present queue (submissions are serialized internally)
//! - the `gpu-allocator` instance shared by every buffer and image
//! - a device-level [`FencePool`] and command pool for one-shot uploads
//! - extension loaders for swapchain and debug labels
//!
//! Teardown order is explicit: the device waits idle, releases the upload
//! context and the allocator, then destroys `VkDevice`.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::device::Device;
//! use lumen_rhi::instance::{Instance, InstanceDesc};
//! use lumen_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(&InstanceDesc::default()).expect("instance");
//! let info = select_physical_device(&instance, None).expect("gpu");
//! let device = Device::new(&instance, &info).expect("device");
//! println!("push constant limit: {}", device.limits().max_push_constants_size);
//! ```

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::buffer::BufferUsage;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::sync::FencePool;

/// Alignment used for vertex, index and indirect sub-allocations.
pub const DEFAULT_BUFFER_ALIGNMENT: vk::DeviceSize = 16;

/// Device limits the runtime consults while recording.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpuLimits {
    pub max_push_constants_size: u32,
    pub max_bound_descriptor_sets: u32,
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    pub min_storage_buffer_offset_alignment: vk::DeviceSize,
    pub min_texel_buffer_offset_alignment: vk::DeviceSize,
    pub non_coherent_atom_size: vk::DeviceSize,
    pub max_uniform_buffer_range: u32,
    /// Nanoseconds per timestamp tick
    pub timestamp_period: f32,
}

impl GpuLimits {
    pub fn from_vk(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            max_push_constants_size: limits.max_push_constants_size,
            max_bound_descriptor_sets: limits.max_bound_descriptor_sets,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            min_texel_buffer_offset_alignment: limits.min_texel_buffer_offset_alignment,
            non_coherent_atom_size: limits.non_coherent_atom_size,
            max_uniform_buffer_range: limits.max_uniform_buffer_range,
            timestamp_period: limits.timestamp_period,
        }
    }

    /// Minimum offset alignment for sub-allocations of the given usage.
    pub fn buffer_alignment(&self, usage: BufferUsage) -> vk::DeviceSize {
        let alignment = match usage {
            BufferUsage::Uniform => self.min_uniform_buffer_offset_alignment,
            BufferUsage::Storage => self.min_storage_buffer_offset_alignment,
            BufferUsage::UniformTexel | BufferUsage::StorageTexel => {
                self.min_texel_buffer_offset_alignment
            }
            BufferUsage::Vertex
            | BufferUsage::Index
            | BufferUsage::Indirect
            | BufferUsage::Staging
            | BufferUsage::Readback => DEFAULT_BUFFER_ALIGNMENT,
        };
        alignment.max(1)
    }
}

impl Default for GpuLimits {
    /// The minimum guarantees of the Vulkan 1.2 core specification.
    fn default() -> Self {
        Self {
            max_push_constants_size: 128,
            max_bound_descriptor_sets: 4,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            min_texel_buffer_offset_alignment: 256,
            non_coherent_atom_size: 256,
            max_uniform_buffer_range: 16384,
            timestamp_period: 1.0,
        }
    }
}

/// Command pool and fences used for blocking one-shot submissions.
struct UploadContext {
    device: ash::Device,
    pool: vk::CommandPool,
    fences: FencePool,
}

impl Drop for UploadContext {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Vulkan logical device wrapper.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    limits: GpuLimits,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    upload: ManuallyDrop<Mutex<UploadContext>>,
    graphics_queue: vk::Queue,
    queue_lock: Mutex<()>,
    queue_families: QueueFamilyIndices,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    update_after_bind: bool,
}

impl Device {
    /// Creates the logical device.
    ///
    /// `VK_KHR_swapchain` is enabled when the physical device offers it and
    /// the instance has a surface loader. Update-after-bind descriptor
    /// features are enabled when supported.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation, allocator initialization or
    /// upload pool creation fails.
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let graphics_family = info.queue_families.graphics()?;
        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_family)
            .queue_priorities(&queue_priorities)];

        let enable_swapchain = info.supports_swapchain && instance.surface_loader().is_some();
        let mut extension_names = Vec::new();
        if enable_swapchain {
            extension_names.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
        if info.supports_update_after_bind {
            features_1_2 = features_1_2
                .descriptor_indexing(true)
                .descriptor_binding_uniform_buffer_update_after_bind(true)
                .descriptor_binding_sampled_image_update_after_bind(true)
                .descriptor_binding_storage_buffer_update_after_bind(true)
                .descriptor_binding_partially_bound(true);
        }

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(info.features.sampler_anisotropy == vk::TRUE)
            .fill_mode_non_solid(info.features.fill_mode_non_solid == vk::TRUE)
            .wide_lines(info.features.wide_lines == vk::TRUE)
            .depth_bias_clamp(info.features.depth_bias_clamp == vk::TRUE)
            .depth_bounds(info.features.depth_bounds == vk::TRUE)
            .sample_rate_shading(info.features.sample_rate_shading == vk::TRUE)
            .pipeline_statistics_query(info.features.pipeline_statistics_query == vk::TRUE);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };
        info!(
            "Logical device created on '{}' (swapchain: {}, update-after-bind: {})",
            info.device_name(),
            enable_swapchain,
            info.supports_update_after_bind
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("Graphics queue retrieved from family {}", graphics_family);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let upload_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let swapchain_loader =
            enable_swapchain.then(|| ash::khr::swapchain::Device::new(instance.handle(), &device));
        let debug_utils = instance
            .has_debug_utils()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &device));

        Ok(Arc::new(Self {
            upload: ManuallyDrop::new(Mutex::new(UploadContext {
                device: device.clone(),
                pool: upload_pool,
                fences: FencePool::new(device.clone()),
            })),
            device,
            physical_device: info.device,
            properties: info.properties,
            limits: GpuLimits::from_vk(&info.properties.limits),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            queue_lock: Mutex::new(()),
            queue_families: info.queue_families,
            swapchain_loader,
            debug_utils,
            update_after_bind: info.supports_update_after_bind,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn limits(&self) -> &GpuLimits {
        &self.limits
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue family used for graphics, transfer and presentation.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.queue_families.graphics_family.unwrap_or_default()
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    #[inline]
    pub fn supports_update_after_bind(&self) -> bool {
        self.update_after_bind
    }

    /// Debug-utils device loader, when the instance enabled debug utils.
    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    /// Swapchain extension loader.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Unsupported`] if the device was created without
    /// `VK_KHR_swapchain`.
    pub fn swapchain_loader(&self) -> RhiResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or_else(|| RhiError::Unsupported("VK_KHR_swapchain is not enabled".into()))
    }

    /// Waits for the device to become idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails (e.g. device lost).
    pub fn wait_idle(&self) -> RhiResult<()> {
        let _queue = self.queue_lock.lock();
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits work to the graphics queue.
    ///
    /// # Safety
    ///
    /// Every command buffer in `submits` must be fully recorded, and the
    /// semaphores and fence must be in a state that permits the submission.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkQueueSubmit` fails.
    pub unsafe fn submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()> {
        let _queue = self.queue_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }

    /// Queues a present on the graphics queue.
    ///
    /// Returns `Ok(true)` if the swapchain is suboptimal. The raw result is
    /// returned so the caller can treat `ERROR_OUT_OF_DATE_KHR` as a
    /// transient condition.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan result reported by `vkQueuePresentKHR`, or
    /// `ERROR_EXTENSION_NOT_PRESENT` if the swapchain extension is disabled.
    pub fn present(&self, present_info: &vk::PresentInfoKHR<'_>) -> Result<bool, vk::Result> {
        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        let _queue = self.queue_lock.lock();
        unsafe { loader.queue_present(self.graphics_queue, present_info) }
    }

    /// Records commands into a one-shot command buffer, submits them on the
    /// graphics queue and blocks until they have executed.
    ///
    /// The fence comes from the device-level fence pool and the command pool
    /// is reset afterwards, so repeated calls reuse the same objects.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, recording, submission or the wait fails.
    pub fn execute_one_shot<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let mut upload = self.upload.lock();
        let result = self.run_one_shot(&mut upload, record);

        let reset_fences = upload.fences.reset();
        unsafe {
            self.device
                .reset_command_pool(upload.pool, vk::CommandPoolResetFlags::empty())?;
        }
        result.and(reset_fences)
    }

    fn run_one_shot<F>(&self, upload: &mut UploadContext, record: F) -> RhiResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(upload.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info)? }
            .into_iter()
            .next()
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
        record(&self.device, command_buffer);
        unsafe { self.device.end_command_buffer(command_buffer)? };

        let fence = upload.fences.request_fence()?;
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe { self.submit(std::slice::from_ref(&submit_info), fence)? };

        upload.fences.wait(u64::MAX)?;
        Ok(())
    }

    /// Attaches a debug name to a Vulkan object when debug utils are enabled.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            debug!("Failed to name object: {:?}", e);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            ManuallyDrop::drop(&mut self.upload);
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash loaders are plain function tables, handles are Copy, and the
// allocator, upload context and queue are guarded by mutexes.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }

    #[test]
    fn test_buffer_alignment_per_usage() {
        let limits = GpuLimits {
            min_uniform_buffer_offset_alignment: 64,
            min_storage_buffer_offset_alignment: 32,
            min_texel_buffer_offset_alignment: 4,
            ..Default::default()
        };
        assert_eq!(limits.buffer_alignment(BufferUsage::Uniform), 64);
        assert_eq!(limits.buffer_alignment(BufferUsage::Storage), 32);
        assert_eq!(limits.buffer_alignment(BufferUsage::UniformTexel), 4);
        assert_eq!(limits.buffer_alignment(BufferUsage::Vertex), 16);
        assert_eq!(limits.buffer_alignment(BufferUsage::Index), 16);
        assert_eq!(limits.buffer_alignment(BufferUsage::Indirect), 16);
    }

    #[test]
    fn test_zero_alignment_clamped_to_one() {
        let limits = GpuLimits {
            min_uniform_buffer_offset_alignment: 0,
            ..Default::default()
        };
        assert_eq!(limits.buffer_alignment(BufferUsage::Uniform), 1);
    }
}

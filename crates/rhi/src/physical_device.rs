//! Physical device (GPU) selection.
//!
//! Selection works with or without a surface. With a surface the graphics
//! family must also be able to present to it, since the runtime drives one
//! graphics+present queue; headless runs only need a graphics family.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::instance::{Instance, InstanceDesc};
//! use lumen_rhi::physical_device::select_physical_device;
//!
//! let instance = Instance::new(&InstanceDesc::default()).expect("instance");
//! let info = select_physical_device(&instance, None).expect("No suitable GPU found");
//! println!("Selected GPU: {}", info.device_name());
//! ```

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Queue family indices chosen for a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics, compute, transfer and (if any) presentation.
    pub graphics_family: Option<u32>,
    /// Family able to present to the selection surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Whether the families satisfy the runtime's single-queue model.
    ///
    /// Presentation is only required when a surface took part in selection.
    #[inline]
    pub fn is_complete(&self, needs_present: bool) -> bool {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => graphics == present,
            (Some(_), None) => !needs_present,
            _ => false,
        }
    }

    /// The graphics family index.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if no graphics family was found.
    pub fn graphics(&self) -> RhiResult<u32> {
        self.graphics_family.ok_or(RhiError::NoSuitableGpu)
    }
}

/// Information about a physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    /// Whether `VK_KHR_swapchain` is available
    pub supports_swapchain: bool,
    /// Whether update-after-bind is available for uniform buffers, sampled
    /// images and storage buffers
    pub supports_update_after_bind: bool,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }

    /// Returns the total device local memory in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    /// Whether `format` supports the given optimal-tiling features.
    pub fn supports_format(
        &self,
        instance: &Instance,
        format: vk::Format,
        features: vk::FormatFeatureFlags,
    ) -> bool {
        let props = unsafe {
            instance
                .handle()
                .get_physical_device_format_properties(self.device, format)
        };
        props.optimal_tiling_features.contains(features)
    }

    /// First depth format from a preference list usable as a depth attachment.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Unsupported`] if none of the candidates qualifies.
    pub fn find_depth_format(&self, instance: &Instance) -> RhiResult<vk::Format> {
        const CANDIDATES: [vk::Format; 3] = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];
        CANDIDATES
            .into_iter()
            .find(|&format| {
                self.supports_format(
                    instance,
                    format,
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                )
            })
            .ok_or_else(|| RhiError::Unsupported("no depth attachment format".into()))
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device.
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `surface` - Surface that must be presentable, or `None` for headless use
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device meets the requirements.
pub fn select_physical_device(
    instance: &Instance,
    surface: Option<vk::SurfaceKHR>,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.handle().enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let mut suitable_devices: Vec<(PhysicalDeviceInfo, u32)> = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface))
        .map(|info| {
            let score = rate_device(info.properties.device_type, info.device_local_memory());
            debug!(
                "GPU '{}' ({}) - Score: {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .collect();

    suitable_devices.sort_by(|a, b| b.1.cmp(&a.1));
    let Some((selected, score)) = suitable_devices.into_iter().next() else {
        warn!("No suitable GPU found with required capabilities");
        return Err(RhiError::NoSuitableGpu);
    };

    let (major, minor, patch) = selected.api_version();
    info!(
        "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, Score: {}",
        selected.device_name(),
        selected.device_type_name(),
        major,
        minor,
        patch,
        score
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &Instance,
    device: vk::PhysicalDevice,
    surface: Option<vk::SurfaceKHR>,
) -> Option<PhysicalDeviceInfo> {
    let vk_instance = instance.handle();
    let properties = unsafe { vk_instance.get_physical_device_properties(device) };
    let features = unsafe { vk_instance.get_physical_device_features(device) };
    let memory_properties = unsafe { vk_instance.get_physical_device_memory_properties(device) };
    let device_name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if properties.api_version < vk::API_VERSION_1_2 {
        debug!("GPU '{}' skipped: Vulkan 1.2 not supported", device_name);
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface);
    if !queue_families.is_complete(surface.is_some()) {
        debug!(
            "GPU '{}' skipped: no graphics family{}",
            device_name,
            if surface.is_some() { " that can present" } else { "" }
        );
        return None;
    }

    let extensions =
        unsafe { vk_instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
    let supports_swapchain = extensions
        .iter()
        .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == ash::khr::swapchain::NAME));
    if surface.is_some() && !supports_swapchain {
        debug!("GPU '{}' skipped: VK_KHR_swapchain missing", device_name);
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_1_2);
    unsafe { vk_instance.get_physical_device_features2(device, &mut features2) };
    let supports_update_after_bind = features_1_2
        .descriptor_binding_uniform_buffer_update_after_bind
        == vk::TRUE
        && features_1_2.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
        && features_1_2.descriptor_binding_storage_buffer_update_after_bind == vk::TRUE;

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
        supports_swapchain,
        supports_update_after_bind,
    })
}

fn find_queue_families(
    instance: &Instance,
    device: vk::PhysicalDevice,
    surface: Option<vk::SurfaceKHR>,
) -> QueueFamilyIndices {
    let families = unsafe {
        instance
            .handle()
            .get_physical_device_queue_family_properties(device)
    };

    let can_present = |index: u32| match (surface, instance.surface_loader()) {
        (Some(surface), Some(loader)) => unsafe {
            loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        },
        _ => false,
    };

    let mut indices = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 || !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            continue;
        }
        if surface.is_none() {
            indices.graphics_family = Some(i);
            break;
        }
        if can_present(i) {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
    }
    indices
}

/// Higher scores indicate more desirable devices.
fn rate_device(device_type: vk::PhysicalDeviceType, device_local_bytes: u64) -> u32 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    let vram_mb = (device_local_bytes / (1024 * 1024)).min(8_000) as u32;
    type_score + vram_mb / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default_incomplete() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete(false));
        assert!(!indices.is_complete(true));
        assert!(indices.graphics().is_err());
    }

    #[test]
    fn test_headless_needs_only_graphics() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(indices.is_complete(false));
        assert!(!indices.is_complete(true));
    }

    #[test]
    fn test_split_graphics_and_present_rejected() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert!(!indices.is_complete(true));
    }

    #[test]
    fn test_discrete_outranks_integrated_regardless_of_memory() {
        let discrete = rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 256 << 20);
        let integrated = rate_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 64 << 30);
        assert!(discrete > integrated);
        let cpu = rate_device(vk::PhysicalDeviceType::CPU, 0);
        assert!(integrated > cpu);
    }
}

//! Swapchain management.
//!
//! [`Swapchain`] wraps `VkSwapchainKHR` together with the properties it was
//! built with. Property selection is split into small pure functions
//! (`choose_*`) driven by caller-supplied priority lists, so the policy can
//! be tested without a surface.
//!
//! The swapchain does not create image views; render targets wrap each image
//! with [`Image::from_swapchain`](crate::image::Image::from_swapchain) and
//! create their own views.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::swapchain::{Swapchain, SwapchainDesc};
//! use ash::vk;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     surface_loader: &ash::khr::surface::Instance,
//! #     surface: vk::SurfaceKHR,
//! #     semaphore: vk::Semaphore,
//! # ) -> lumen_rhi::RhiResult<()> {
//! let desc = SwapchainDesc::new(vk::Extent2D { width: 800, height: 600 });
//! let swapchain = Swapchain::new(device, surface_loader, surface, &desc)?;
//!
//! let (image_index, _suboptimal) = swapchain.acquire_next_image(semaphore, u64::MAX)?;
//! // ... render into swapchain.images()[image_index as usize] ...
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Present modes in the order the runtime prefers them by default.
pub const DEFAULT_PRESENT_MODE_PRIORITY: [vk::PresentModeKHR; 3] = [
    vk::PresentModeKHR::FIFO,
    vk::PresentModeKHR::MAILBOX,
    vk::PresentModeKHR::IMMEDIATE,
];

/// sRGB surface formats in the order the runtime prefers them by default.
pub const DEFAULT_SURFACE_FORMAT_PRIORITY: [vk::SurfaceFormatKHR; 2] = [
    vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    },
];

/// Surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// What the caller asks the swapchain to be.
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    pub extent: vk::Extent2D,
    /// Requested image count; `0` picks one more than the surface minimum.
    pub image_count: u32,
    /// Requested pre-transform; `None` keeps the surface's current transform.
    pub transform: Option<vk::SurfaceTransformFlagsKHR>,
    pub image_usage: vk::ImageUsageFlags,
    pub present_mode_priority: Vec<vk::PresentModeKHR>,
    pub surface_format_priority: Vec<vk::SurfaceFormatKHR>,
}

impl SwapchainDesc {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            image_count: 0,
            transform: None,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC,
            present_mode_priority: DEFAULT_PRESENT_MODE_PRIORITY.to_vec(),
            surface_format_priority: DEFAULT_SURFACE_FORMAT_PRIORITY.to_vec(),
        }
    }
}

/// The properties a swapchain was actually built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainProperties {
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub image_usage: vk::ImageUsageFlags,
}

/// Vulkan swapchain wrapper.
pub struct Swapchain {
    device: Arc<Device>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    properties: SwapchainProperties,
    desc: SwapchainDesc,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries fail, the surface supports no
    /// format or present mode, or swapchain creation fails.
    pub fn new(
        device: Arc<Device>,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        desc: &SwapchainDesc,
    ) -> RhiResult<Self> {
        Self::create(
            device,
            surface_loader.clone(),
            surface,
            desc.clone(),
            vk::SwapchainKHR::null(),
        )
    }

    /// Builds a replacement swapchain, handing this one over as the old
    /// swapchain. `self` is retired and should be dropped once the device is
    /// idle.
    ///
    /// # Errors
    ///
    /// Returns an error if swapchain creation fails.
    pub fn rebuild(&self, desc: &SwapchainDesc) -> RhiResult<Self> {
        info!(
            "Rebuilding swapchain: {}x{} -> {}x{}",
            self.properties.extent.width,
            self.properties.extent.height,
            desc.extent.width,
            desc.extent.height
        );
        Self::create(
            self.device.clone(),
            self.surface_loader.clone(),
            self.surface,
            desc.clone(),
            self.swapchain,
        )
    }

    fn create(
        device: Arc<Device>,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        desc: SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let capabilities = &support.capabilities;
        let properties = SwapchainProperties {
            extent: choose_extent(capabilities, desc.extent),
            image_count: choose_image_count(capabilities, desc.image_count),
            surface_format: choose_surface_format(
                &support.formats,
                &desc.surface_format_priority,
            ),
            present_mode: choose_present_mode(
                &support.present_modes,
                &desc.present_mode_priority,
            ),
            transform: choose_transform(capabilities, desc.transform),
            composite_alpha: choose_composite_alpha(capabilities.supported_composite_alpha),
            image_usage: choose_image_usage(capabilities.supported_usage_flags, desc.image_usage)?,
        };

        info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images",
            properties.extent.width,
            properties.extent.height,
            properties.surface_format.format,
            properties.present_mode,
            properties.image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(properties.image_count)
            .image_format(properties.surface_format.format)
            .image_color_space(properties.surface_format.color_space)
            .image_extent(properties.extent)
            .image_array_layers(1)
            .image_usage(properties.image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(properties.transform)
            .composite_alpha(properties.composite_alpha)
            .present_mode(properties.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = device.swapchain_loader()?;
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };
        debug!("Swapchain created with {} images", images.len());

        Ok(Self {
            device,
            surface_loader,
            surface,
            swapchain,
            images,
            properties,
            desc,
        })
    }

    /// Current surface capabilities, re-queried from the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails (e.g. surface lost).
    pub fn surface_capabilities(&self) -> RhiResult<vk::SurfaceCapabilitiesKHR> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device(), self.surface)?
        };
        Ok(capabilities)
    }

    /// Acquires the next image, signalling `semaphore` when it is ready.
    ///
    /// Returns `(image_index, suboptimal)`.
    ///
    /// # Errors
    ///
    /// Returns the raw Vulkan result (`TIMEOUT`, `NOT_READY`,
    /// `ERROR_OUT_OF_DATE_KHR`, ...) so the caller can classify it.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> Result<(u32, bool), vk::Result> {
        let loader = self
            .device
            .swapchain_loader()
            .map_err(|_| vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        unsafe { loader.acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null()) }
    }

    /// Presents `image_index` once `wait_semaphore` is signalled.
    ///
    /// Returns `Ok(true)` if the swapchain is suboptimal.
    ///
    /// # Errors
    ///
    /// Returns the raw Vulkan result, e.g. `ERROR_OUT_OF_DATE_KHR`.
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        self.device.present(&present_info)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.properties.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.properties.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.properties.present_mode
    }

    #[inline]
    pub fn transform(&self) -> vk::SurfaceTransformFlagsKHR {
        self.properties.transform
    }

    #[inline]
    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        self.properties.image_usage
    }

    #[inline]
    pub fn properties(&self) -> &SwapchainProperties {
        &self.properties
    }

    /// The request this swapchain was built from.
    #[inline]
    pub fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Ok(loader) = self.device.swapchain_loader() {
            unsafe { loader.destroy_swapchain(self.swapchain, None) };
            debug!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.properties.extent.width,
                self.properties.extent.height,
                self.images.len()
            );
        }
    }
}

/// First entry of `priority` the surface supports, else the first supported
/// format.
///
/// A single `UNDEFINED` entry means the surface accepts anything, so the top
/// priority is taken as-is.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    priority: &[vk::SurfaceFormatKHR],
) -> vk::SurfaceFormatKHR {
    let fallback = priority
        .first()
        .copied()
        .unwrap_or(DEFAULT_SURFACE_FORMAT_PRIORITY[0]);

    match available {
        [] => return fallback,
        [only] if only.format == vk::Format::UNDEFINED => return fallback,
        _ => {}
    }

    for wanted in priority {
        if let Some(format) = available
            .iter()
            .find(|f| f.format == wanted.format && f.color_space == wanted.color_space)
        {
            debug!("Selected surface format {:?}", format.format);
            return *format;
        }
    }

    warn!(
        "No preferred surface format available, using {:?}",
        available[0].format
    );
    available[0]
}

/// First entry of `priority` the surface supports, else FIFO.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    priority: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    let chosen = priority
        .iter()
        .find(|mode| available.contains(mode))
        .copied()
        .unwrap_or(vk::PresentModeKHR::FIFO);
    debug!("Selected present mode {:?}", chosen);
    chosen
}

/// The surface's current extent when defined, otherwise `requested` clamped
/// to the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };
    if extent != requested {
        warn!(
            "Requested extent {}x{} not supported, using {}x{}",
            requested.width, requested.height, extent.width, extent.height
        );
    }
    extent
}

/// `requested` clamped to the surface limits; `0` means minimum + 1.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let wanted = if requested == 0 {
        capabilities.min_image_count + 1
    } else {
        requested
    };
    let max = if capabilities.max_image_count == 0 {
        u32::MAX
    } else {
        capabilities.max_image_count
    };
    wanted.clamp(capabilities.min_image_count, max)
}

pub fn choose_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: Option<vk::SurfaceTransformFlagsKHR>,
) -> vk::SurfaceTransformFlagsKHR {
    match requested {
        Some(transform) if capabilities.supported_transforms.contains(transform) => transform,
        Some(transform) => {
            warn!(
                "Surface transform {:?} not supported, using {:?}",
                transform, capabilities.current_transform
            );
            capabilities.current_transform
        }
        None => capabilities.current_transform,
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|mode| supported.contains(*mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// The requested usage restricted to what the surface supports.
///
/// # Errors
///
/// Returns [`RhiError::Unsupported`] if color attachment usage is missing.
pub fn choose_image_usage(
    supported: vk::ImageUsageFlags,
    requested: vk::ImageUsageFlags,
) -> RhiResult<vk::ImageUsageFlags> {
    if !supported.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        return Err(RhiError::Unsupported(
            "Swapchain images cannot be color attachments".into(),
        ));
    }
    let usage = (requested & supported) | vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if usage != requested | vk::ImageUsageFlags::COLOR_ATTACHMENT {
        warn!(
            "Swapchain image usage {:?} not fully supported, using {:?}",
            requested, usage
        );
    }
    Ok(usage)
}

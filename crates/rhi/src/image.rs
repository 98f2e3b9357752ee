//! Images, image views and layout transitions.
//!
//! [`Image`] either owns a `VkImage` plus its allocation, or wraps a
//! swapchain image it must not destroy ([`Image::from_swapchain`]).
//! [`ImageView`] keeps the facts the resource cache hashes: its own handle,
//! the image handle, format and subresource range.
//!
//! [`ImageBarrier`] carries the stage/access masks of a layout transition;
//! [`ImageBarrier::transition`] fills them in for the transitions the
//! runtime performs.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::buffer::{Buffer, BufferUsage};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Whether the format has a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Whether the format has a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Aspect flags covering every component of the format.
pub fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    let mut aspect = vk::ImageAspectFlags::empty();
    if is_depth_format(format) {
        aspect |= vk::ImageAspectFlags::DEPTH;
    }
    if has_stencil_component(format) {
        aspect |= vk::ImageAspectFlags::STENCIL;
    }
    if aspect.is_empty() {
        vk::ImageAspectFlags::COLOR
    } else {
        aspect
    }
}

/// Image creation parameters.
#[derive(Clone, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub tiling: vk::ImageTiling,
    pub flags: vk::ImageCreateFlags,
    pub location: MemoryLocation,
    pub name: String,
}

impl ImageDesc {
    /// Single-sample, single-mip 2D image in device-local memory.
    pub fn new_2d(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
            array_layers: 1,
            tiling: vk::ImageTiling::OPTIMAL,
            flags: vk::ImageCreateFlags::empty(),
            location: MemoryLocation::GpuOnly,
            name: "image".to_string(),
        }
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn image_type(&self) -> vk::ImageType {
        if self.extent.depth > 1 {
            vk::ImageType::TYPE_3D
        } else if self.extent.height > 1 {
            vk::ImageType::TYPE_2D
        } else {
            vk::ImageType::TYPE_1D
        }
    }
}

/// A GPU image, owned or borrowed from a swapchain.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    allocation: Option<Allocation>,
    extent: vk::Extent3D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
    samples: vk::SampleCountFlags,
    mip_levels: u32,
    array_layers: u32,
    owned: bool,
}

impl Image {
    /// Creates an image and binds allocator-managed memory to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is empty or creation, allocation or
    /// binding fails.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.extent.depth == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "Image '{}' has an empty extent",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(desc.image_type())
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name: &desc.name,
            requirements,
            location: desc.location,
            linear: desc.tiling == vk::ImageTiling::LINEAR,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        debug!(
            "Created image '{}': {}x{} {:?}",
            desc.name, desc.extent.width, desc.extent.height, desc.format
        );

        Ok(Self {
            device,
            image,
            allocation: Some(allocation),
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
            samples: desc.samples,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            owned: true,
        })
    }

    /// Wraps a swapchain image without taking ownership of it.
    pub fn from_swapchain(
        device: Arc<Device>,
        image: vk::Image,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            device,
            image,
            allocation: None,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
            array_layers: 1,
            owned: false,
        }
    }

    /// Uploads tightly packed texel data into mip 0, layer 0 and leaves the
    /// image in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the staging buffer cannot be created or the copy
    /// submission fails.
    pub fn upload(&self, data: &[u8]) -> RhiResult<()> {
        let staging = Buffer::new_with_data(self.device.clone(), BufferUsage::Staging, data)?;
        let range = self.subresource_range();
        let to_transfer = ImageBarrier::transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let to_shader = ImageBarrier::transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(range.aspect_mask)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(self.extent);

        self.device.execute_one_shot(|dev, cmd| unsafe {
            to_transfer.record(dev, cmd, self.image, range);
            dev.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            to_shader.record(dev, cmd, self.image, range);
        })
    }

    /// Range covering every mip level and layer of the image.
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask(self.format))
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(self.array_layers)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().lock().free(allocation)
        {
            error!("Failed to free image allocation: {:?}", e);
        }
        unsafe { self.device.handle().destroy_image(self.image, None) };
    }
}

/// A view onto an [`Image`].
pub struct ImageView {
    device: Arc<Device>,
    view: vk::ImageView,
    image: vk::Image,
    format: vk::Format,
    subresource_range: vk::ImageSubresourceRange,
    extent: vk::Extent3D,
}

impl ImageView {
    /// Creates a 2D view over the whole image in its own format.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkCreateImageView` fails.
    pub fn new(image: &Image) -> RhiResult<Self> {
        Self::with_range(
            image,
            vk::ImageViewType::TYPE_2D,
            image.format(),
            image.subresource_range(),
        )
    }

    /// Creates a view with explicit type, format and range.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkCreateImageView` fails.
    pub fn with_range(
        image: &Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        subresource_range: vk::ImageSubresourceRange,
    ) -> RhiResult<Self> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(view_type)
            .format(format)
            .subresource_range(subresource_range);
        let view = unsafe { image.device().handle().create_image_view(&view_info, None)? };

        Ok(Self {
            device: image.device().clone(),
            view,
            image: image.handle(),
            format,
            subresource_range,
            extent: image.extent(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        self.subresource_range
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_image_view(self.view, None) };
    }
}

/// Synchronization scope of an image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

impl ImageBarrier {
    /// Stage and access masks for a transition between two layouts.
    ///
    /// Unknown pairs fall back to a full `ALL_COMMANDS` memory barrier.
    pub fn transition(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        use vk::AccessFlags as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags as S;

        let (src_stage, src_access) = match old_layout {
            L::UNDEFINED => (S::TOP_OF_PIPE, A::empty()),
            L::TRANSFER_DST_OPTIMAL => (S::TRANSFER, A::TRANSFER_WRITE),
            L::TRANSFER_SRC_OPTIMAL => (S::TRANSFER, A::TRANSFER_READ),
            L::COLOR_ATTACHMENT_OPTIMAL => {
                (S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_WRITE)
            }
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL | L::DEPTH_ATTACHMENT_OPTIMAL => (
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            L::SHADER_READ_ONLY_OPTIMAL => (S::FRAGMENT_SHADER, A::SHADER_READ),
            L::PRESENT_SRC_KHR => (S::BOTTOM_OF_PIPE, A::empty()),
            _ => (S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        };

        let (dst_stage, dst_access) = match new_layout {
            L::TRANSFER_DST_OPTIMAL => (S::TRANSFER, A::TRANSFER_WRITE),
            L::TRANSFER_SRC_OPTIMAL => (S::TRANSFER, A::TRANSFER_READ),
            L::COLOR_ATTACHMENT_OPTIMAL => (
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            ),
            L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL | L::DEPTH_ATTACHMENT_OPTIMAL => (
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            L::SHADER_READ_ONLY_OPTIMAL => (S::FRAGMENT_SHADER, A::SHADER_READ),
            L::PRESENT_SRC_KHR => (S::BOTTOM_OF_PIPE, A::empty()),
            _ => (S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        };

        Self {
            src_stage,
            dst_stage,
            src_access,
            dst_access,
            old_layout,
            new_layout,
        }
    }

    /// Records the barrier for `image` into `cmd`.
    ///
    /// # Safety
    ///
    /// `cmd` must be in the recording state and `image` must be valid.
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range);
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage,
                self.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

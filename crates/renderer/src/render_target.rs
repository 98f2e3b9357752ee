//! Render targets: the images a render pass draws into.
//!
//! A [`RenderTarget`] owns a list of images (the first is usually the
//! swapchain image), one view per image, and the [`Attachment`] description
//! of each. Input and output index lists say which attachments the current
//! subpass reads and writes. Attachment layouts change only through
//! [`RenderTarget::transition`] or [`RenderTarget::set_layout`].

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use lumen_rhi::image::{Image, ImageBarrier, ImageDesc, ImageView};
use lumen_rhi::render_pass::Attachment;
use tracing::debug;
use xxhash_rust::xxh3::Xxh3;

use crate::command_recorder::CommandRecorder;
use crate::error::{RenderError, RenderResult};
use crate::hashing::hash_image_view;

/// Default depth format.
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Attachment order of the deferred G-buffer target.
pub mod gbuffer {
    pub const SWAPCHAIN: u32 = 0;
    pub const DEPTH: u32 = 1;
    pub const ALBEDO: u32 = 2;
    pub const NORMAL: u32 = 3;
    pub const MATERIAL: u32 = 4;
    pub const POSITION: u32 = 5;
    pub const EMISSIVE: u32 = 6;
}

pub struct RenderTarget {
    extent: vk::Extent2D,
    images: Vec<Image>,
    views: Vec<Arc<ImageView>>,
    attachments: Vec<Attachment>,
    input_attachments: Vec<u32>,
    output_attachments: Vec<u32>,
}

impl RenderTarget {
    /// Builds a target over `images`, which must all share one extent.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidState`] for an empty list or mismatched
    /// extents, or a Vulkan error if a view cannot be created.
    pub fn new(images: Vec<Image>) -> RenderResult<Self> {
        let Some(first) = images.first() else {
            return Err(RenderError::InvalidState(
                "render target needs at least one image".to_string(),
            ));
        };
        let extent = first.extent_2d();
        if let Some(image) = images.iter().find(|i| i.extent_2d() != extent) {
            return Err(RenderError::InvalidState(format!(
                "render target images differ in extent: {}x{} vs {}x{}",
                extent.width,
                extent.height,
                image.extent_2d().width,
                image.extent_2d().height
            )));
        }

        let views = images
            .iter()
            .map(|image| ImageView::new(image).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let attachments = images
            .iter()
            .map(|image| Attachment::new(image.format(), image.samples(), image.usage()))
            .collect();

        debug!(
            "Render target {}x{} with {} attachment(s)",
            extent.width,
            extent.height,
            images.len()
        );

        Ok(Self {
            extent,
            images,
            views,
            attachments,
            input_attachments: Vec::new(),
            output_attachments: vec![0],
        })
    }

    /// Color image plus a transient depth buffer of the same extent.
    pub fn with_depth(color: Image) -> RenderResult<Self> {
        let depth = Image::new(
            color.device().clone(),
            &ImageDesc::new_2d(
                color.extent_2d(),
                DEFAULT_DEPTH_FORMAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            )
            .with_name("depth"),
        )?;
        Self::new(vec![color, depth])
    }

    /// Color image plus the G-buffer in [`gbuffer`] order.
    pub fn deferred(color: Image) -> RenderResult<Self> {
        let device = color.device().clone();
        let extent = color.extent_2d();
        let read_usage = vk::ImageUsageFlags::INPUT_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let gbuffer_image = |format: vk::Format, usage: vk::ImageUsageFlags, name: &str| {
            Image::new(
                device.clone(),
                &ImageDesc::new_2d(extent, format, usage | read_usage).with_name(name),
            )
        };
        let color_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;

        let depth = gbuffer_image(
            DEFAULT_DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            "gbuffer depth",
        )?;
        let albedo = gbuffer_image(vk::Format::R8G8B8A8_UNORM, color_usage, "gbuffer albedo")?;
        let normal = gbuffer_image(vk::Format::A2B10G10R10_UNORM_PACK32, color_usage, "gbuffer normal")?;
        let material = gbuffer_image(vk::Format::R8G8B8A8_UNORM, color_usage, "gbuffer material")?;
        let position = gbuffer_image(vk::Format::R16G16B16A16_SFLOAT, color_usage, "gbuffer position")?;
        let emissive = gbuffer_image(vk::Format::R16G16B16A16_SFLOAT, color_usage, "gbuffer emissive")?;

        Self::new(vec![color, depth, albedo, normal, material, position, emissive])
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn image(&self, index: u32) -> Option<&Image> {
        self.images.get(index as usize)
    }

    pub fn views(&self) -> &[Arc<ImageView>] {
        &self.views
    }

    pub fn view(&self, index: u32) -> Option<&Arc<ImageView>> {
        self.views.get(index as usize)
    }

    pub fn view_handles(&self) -> Vec<vk::ImageView> {
        self.views.iter().map(|v| v.handle()).collect()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn set_input_attachments(&mut self, inputs: Vec<u32>) {
        self.input_attachments = inputs;
    }

    pub fn input_attachments(&self) -> &[u32] {
        &self.input_attachments
    }

    pub fn set_output_attachments(&mut self, outputs: Vec<u32>) {
        self.output_attachments = outputs;
    }

    pub fn output_attachments(&self) -> &[u32] {
        &self.output_attachments
    }

    /// Layout the attachment is known to be in.
    pub fn layout(&self, index: u32) -> Option<vk::ImageLayout> {
        self.attachments.get(index as usize).map(|a| a.initial_layout)
    }

    /// Records that the attachment is now in `layout` without a barrier.
    pub fn set_layout(&mut self, index: u32, layout: vk::ImageLayout) {
        if let Some(attachment) = self.attachments.get_mut(index as usize) {
            attachment.initial_layout = layout;
        }
    }

    /// Records a layout transition barrier and updates the tracked layout.
    pub fn transition(
        &mut self,
        recorder: &CommandRecorder,
        index: u32,
        new_layout: vk::ImageLayout,
    ) -> RenderResult<()> {
        let (Some(view), Some(old_layout)) = (self.view(index), self.layout(index)) else {
            return Err(RenderError::InvalidState(format!(
                "attachment {index} out of range"
            )));
        };
        if old_layout == new_layout {
            return Ok(());
        }
        recorder.image_memory_barrier(view, &ImageBarrier::transition(old_layout, new_layout));
        self.set_layout(index, new_layout);
        Ok(())
    }

    /// Hash over extent, views, attachment descriptions and index lists.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = Xxh3::new();
        self.extent.width.hash(&mut hasher);
        self.extent.height.hash(&mut hasher);
        for view in &self.views {
            hash_image_view(view, &mut hasher);
        }
        self.attachments.hash(&mut hasher);
        self.input_attachments.hash(&mut hasher);
        self.output_attachments.hash(&mut hasher);
        hasher.finish()
    }
}

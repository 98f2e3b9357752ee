//! Render passes and framebuffers.
//!
//! A [`RenderPass`] is described by the attachments of a render target, a
//! load/store pair per attachment and one [`SubpassInfo`] per subpass.
//! Subpass layouts are derived from how each subpass uses an attachment:
//! outputs are in attachment-optimal layouts, inputs in read-only layouts.
//! The final layout of an attachment is the layout of its last use.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::is_depth_format;

/// Description of one render target attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub initial_layout: vk::ImageLayout,
}

impl Attachment {
    pub fn new(format: vk::Format, samples: vk::SampleCountFlags, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            samples,
            usage,
            initial_layout: vk::ImageLayout::UNDEFINED,
        }
    }

    pub fn is_depth(&self) -> bool {
        is_depth_format(self.format)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoadStoreInfo {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
}

impl Default for LoadStoreInfo {
    fn default() -> Self {
        Self {
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
        }
    }
}

impl LoadStoreInfo {
    pub fn new(load_op: vk::AttachmentLoadOp, store_op: vk::AttachmentStoreOp) -> Self {
        Self { load_op, store_op }
    }

    /// Clear on load, discard on store.
    pub fn transient() -> Self {
        Self::new(vk::AttachmentLoadOp::CLEAR, vk::AttachmentStoreOp::DONT_CARE)
    }
}

/// How one subpass uses the attachments of the target, by attachment index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubpassInfo {
    pub input_attachments: Vec<u32>,
    pub output_attachments: Vec<u32>,
    pub color_resolve_attachments: Vec<u32>,
    pub disable_depth_stencil_attachment: bool,
    pub depth_stencil_resolve_attachment: Option<u32>,
    pub depth_stencil_resolve_mode: vk::ResolveModeFlags,
    pub debug_name: String,
}

impl Default for SubpassInfo {
    fn default() -> Self {
        Self {
            input_attachments: Vec::new(),
            output_attachments: vec![0],
            color_resolve_attachments: Vec::new(),
            disable_depth_stencil_attachment: false,
            depth_stencil_resolve_attachment: None,
            depth_stencil_resolve_mode: vk::ResolveModeFlags::NONE,
            debug_name: String::new(),
        }
    }
}

/// Attachment references of one subpass, resolved against the attachments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SubpassRefs {
    inputs: Vec<(u32, vk::ImageLayout, vk::ImageAspectFlags)>,
    colors: Vec<(u32, vk::ImageLayout)>,
    resolves: Vec<(u32, vk::ImageLayout)>,
    depth: Option<(u32, vk::ImageLayout)>,
    depth_resolve: Option<(u32, vk::ImageLayout)>,
}

fn read_only_layout(attachment: &Attachment) -> vk::ImageLayout {
    if attachment.is_depth() {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

fn attachment_layout(attachment: &Attachment) -> vk::ImageLayout {
    if attachment.is_depth() {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    }
}

fn aspect_of(attachment: &Attachment) -> vk::ImageAspectFlags {
    if attachment.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn check_index(attachments: &[Attachment], index: u32) -> RhiResult<&Attachment> {
    attachments.get(index as usize).ok_or_else(|| {
        RhiError::InvalidArgument(format!(
            "attachment index {index} out of range ({} attachments)",
            attachments.len()
        ))
    })
}

/// Resolves subpass references; an empty subpass list means one subpass
/// writing every color attachment.
fn resolve_subpasses(attachments: &[Attachment], subpasses: &[SubpassInfo]) -> RhiResult<Vec<SubpassRefs>> {
    let default_subpass;
    let subpasses = if subpasses.is_empty() {
        default_subpass = [SubpassInfo {
            output_attachments: (0..attachments.len() as u32)
                .filter(|&i| !attachments[i as usize].is_depth())
                .collect(),
            ..Default::default()
        }];
        &default_subpass[..]
    } else {
        subpasses
    };

    let depth_index = attachments
        .iter()
        .position(Attachment::is_depth)
        .map(|i| i as u32);

    subpasses
        .iter()
        .map(|info| {
            let mut refs = SubpassRefs::default();
            for &i in &info.input_attachments {
                let a = check_index(attachments, i)?;
                refs.inputs.push((i, read_only_layout(a), aspect_of(a)));
            }
            for &i in &info.output_attachments {
                let a = check_index(attachments, i)?;
                if !a.is_depth() {
                    refs.colors.push((i, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
                }
            }
            for &i in &info.color_resolve_attachments {
                check_index(attachments, i)?;
                refs.resolves.push((i, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
            }
            if !refs.resolves.is_empty() && refs.resolves.len() != refs.colors.len() {
                return Err(RhiError::InvalidArgument(format!(
                    "subpass '{}' has {} color outputs but {} resolve attachments",
                    info.debug_name,
                    refs.colors.len(),
                    refs.resolves.len()
                )));
            }
            let reads_depth = refs
                .inputs
                .iter()
                .any(|(i, _, _)| Some(*i) == depth_index);
            if !info.disable_depth_stencil_attachment && !reads_depth {
                refs.depth = depth_index.map(|i| (i, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
            }
            if let Some(i) = info.depth_stencil_resolve_attachment {
                check_index(attachments, i)?;
                if info.depth_stencil_resolve_mode != vk::ResolveModeFlags::NONE {
                    refs.depth_resolve = Some((i, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
                }
            }
            Ok(refs)
        })
        .collect()
}

/// Layout each attachment ends the pass in: the layout of its last use.
fn final_layouts(attachments: &[Attachment], refs: &[SubpassRefs]) -> Vec<vk::ImageLayout> {
    let mut layouts: Vec<Option<vk::ImageLayout>> = vec![None; attachments.len()];
    for subpass in refs {
        let used = subpass
            .inputs
            .iter()
            .map(|&(i, l, _)| (i, l))
            .chain(subpass.colors.iter().copied())
            .chain(subpass.resolves.iter().copied())
            .chain(subpass.depth)
            .chain(subpass.depth_resolve);
        for (i, layout) in used {
            layouts[i as usize] = Some(layout);
        }
    }
    layouts
        .into_iter()
        .zip(attachments)
        .map(|(layout, attachment)| match layout {
            Some(layout) => layout,
            None if attachment.initial_layout != vk::ImageLayout::UNDEFINED => attachment.initial_layout,
            None => attachment_layout(attachment),
        })
        .collect()
}

/// Vulkan render pass created through `vkCreateRenderPass2`.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    subpass_count: u32,
    color_output_counts: Vec<u32>,
    final_layouts: Vec<vk::ImageLayout>,
}

impl RenderPass {
    /// Creates a render pass.
    ///
    /// `load_store` may be shorter than `attachments`; missing entries use
    /// [`LoadStoreInfo::default`].
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if a subpass references an
    /// attachment that does not exist, or a Vulkan error on creation failure.
    pub fn new(
        device: Arc<Device>,
        attachments: &[Attachment],
        load_store: &[LoadStoreInfo],
        subpasses: &[SubpassInfo],
    ) -> RhiResult<Self> {
        let refs = resolve_subpasses(attachments, subpasses)?;
        let final_layouts = final_layouts(attachments, &refs);

        let descriptions: Vec<vk::AttachmentDescription2> = attachments
            .iter()
            .enumerate()
            .map(|(i, attachment)| {
                let ops = load_store.get(i).copied().unwrap_or_default();
                let (stencil_load, stencil_store) = if attachment.is_depth() {
                    (ops.load_op, ops.store_op)
                } else {
                    (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
                };
                vk::AttachmentDescription2::default()
                    .format(attachment.format)
                    .samples(attachment.samples)
                    .load_op(ops.load_op)
                    .store_op(ops.store_op)
                    .stencil_load_op(stencil_load)
                    .stencil_store_op(stencil_store)
                    .initial_layout(attachment.initial_layout)
                    .final_layout(final_layouts[i])
            })
            .collect();

        let reference = |(i, layout): (u32, vk::ImageLayout)| {
            vk::AttachmentReference2::default()
                .attachment(i)
                .layout(layout)
                .aspect_mask(aspect_of(&attachments[i as usize]))
        };

        // Reference arrays must outlive the subpass descriptions pointing at them.
        let input_refs: Vec<Vec<vk::AttachmentReference2>> = refs
            .iter()
            .map(|s| {
                s.inputs
                    .iter()
                    .map(|&(i, layout, aspect)| {
                        vk::AttachmentReference2::default()
                            .attachment(i)
                            .layout(layout)
                            .aspect_mask(aspect)
                    })
                    .collect()
            })
            .collect();
        let color_refs: Vec<Vec<vk::AttachmentReference2>> = refs
            .iter()
            .map(|s| s.colors.iter().copied().map(reference).collect())
            .collect();
        let resolve_refs: Vec<Vec<vk::AttachmentReference2>> = refs
            .iter()
            .map(|s| s.resolves.iter().copied().map(reference).collect())
            .collect();
        let depth_refs: Vec<Option<vk::AttachmentReference2>> =
            refs.iter().map(|s| s.depth.map(reference)).collect();
        let depth_resolve_refs: Vec<Option<vk::AttachmentReference2>> =
            refs.iter().map(|s| s.depth_resolve.map(reference)).collect();

        let resolve_modes: Vec<vk::ResolveModeFlags> = if subpasses.is_empty() {
            vec![vk::ResolveModeFlags::NONE]
        } else {
            subpasses.iter().map(|s| s.depth_stencil_resolve_mode).collect()
        };
        let mut depth_resolves: Vec<vk::SubpassDescriptionDepthStencilResolve> = depth_resolve_refs
            .iter()
            .zip(&resolve_modes)
            .map(|(reference, mode)| {
                let resolve = vk::SubpassDescriptionDepthStencilResolve::default()
                    .depth_resolve_mode(*mode)
                    .stencil_resolve_mode(vk::ResolveModeFlags::NONE);
                match reference {
                    Some(r) => resolve.depth_stencil_resolve_attachment(r),
                    None => resolve,
                }
            })
            .collect();

        let mut descriptions_sub = Vec::with_capacity(refs.len());
        for (i, resolve) in depth_resolves.iter_mut().enumerate() {
            let mut desc = vk::SubpassDescription2::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .input_attachments(&input_refs[i])
                .color_attachments(&color_refs[i]);
            if !resolve_refs[i].is_empty() {
                desc = desc.resolve_attachments(&resolve_refs[i]);
            }
            if let Some(depth) = &depth_refs[i] {
                desc = desc.depth_stencil_attachment(depth);
            }
            if depth_resolve_refs[i].is_some() {
                desc = desc.push_next(resolve);
            }
            descriptions_sub.push(desc);
        }

        let dependencies = subpass_dependencies(refs.len() as u32);

        let create_info = vk::RenderPassCreateInfo2::default()
            .attachments(&descriptions)
            .subpasses(&descriptions_sub)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass2(&create_info, None)? };

        debug!(
            "Created render pass: {} attachment(s), {} subpass(es)",
            attachments.len(),
            refs.len()
        );

        Ok(Self {
            device,
            render_pass,
            subpass_count: refs.len() as u32,
            color_output_counts: refs.iter().map(|s| s.colors.len() as u32).collect(),
            final_layouts,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn subpass_count(&self) -> u32 {
        self.subpass_count
    }

    /// Number of color outputs of `subpass`, zero when out of range.
    pub fn color_output_count(&self, subpass: u32) -> u32 {
        self.color_output_counts
            .get(subpass as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn final_layouts(&self) -> &[vk::ImageLayout] {
        &self.final_layouts
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

/// Chain of by-region dependencies: each subpass reads what the previous
/// one wrote.
fn subpass_dependencies(count: u32) -> Vec<vk::SubpassDependency2<'static>> {
    (1..count)
        .map(|i| {
            vk::SubpassDependency2::default()
                .src_subpass(i - 1)
                .dst_subpass(i)
                .src_stage_mask(
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                )
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION)
        })
        .collect()
}

/// Vulkan framebuffer binding image views to a render pass.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidArgument(
                "framebuffer extent must be non-zero".to_string(),
            ));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        debug!(
            "Created framebuffer {}x{} with {} view(s)",
            extent.width,
            extent.height,
            views.len()
        );

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> Attachment {
        Attachment::new(
            vk::Format::R8G8B8A8_UNORM,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        )
    }

    fn depth() -> Attachment {
        Attachment::new(
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_1,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    #[test]
    fn test_default_subpass_writes_all_colors() {
        let attachments = [color(), depth(), color()];
        let refs = resolve_subpasses(&attachments, &[]).unwrap();
        assert_eq!(refs.len(), 1);
        let colors: Vec<u32> = refs[0].colors.iter().map(|(i, _)| *i).collect();
        assert_eq!(colors, vec![0, 2]);
        assert_eq!(
            refs[0].depth,
            Some((1, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL))
        );
    }

    #[test]
    fn test_deferred_layouts() {
        // 0 swapchain, 1 depth, 2 albedo, 3 normal
        let attachments = [color(), depth(), color(), color()];
        let subpasses = [
            SubpassInfo {
                output_attachments: vec![2, 3],
                ..Default::default()
            },
            SubpassInfo {
                input_attachments: vec![1, 2, 3],
                output_attachments: vec![0],
                disable_depth_stencil_attachment: true,
                ..Default::default()
            },
        ];
        let refs = resolve_subpasses(&attachments, &subpasses).unwrap();
        assert!(refs[1].depth.is_none());
        assert_eq!(
            refs[1].inputs[0],
            (
                1,
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                vk::ImageAspectFlags::DEPTH
            )
        );

        let layouts = final_layouts(&attachments, &refs);
        assert_eq!(layouts[0], vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(layouts[1], vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(layouts[2], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_out_of_range_attachment_is_rejected() {
        let subpasses = [SubpassInfo {
            output_attachments: vec![4],
            ..Default::default()
        }];
        assert!(matches!(
            resolve_subpasses(&[color()], &subpasses),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve_count_must_match_outputs() {
        let subpasses = [SubpassInfo {
            output_attachments: vec![0],
            color_resolve_attachments: vec![1, 2],
            ..Default::default()
        }];
        let attachments = [color(), color(), color()];
        assert!(resolve_subpasses(&attachments, &subpasses).is_err());
    }

    #[test]
    fn test_unused_attachment_keeps_initial_layout() {
        let mut unused = color();
        unused.initial_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        let attachments = [color(), unused];
        let subpasses = [SubpassInfo::default()];
        let refs = resolve_subpasses(&attachments, &subpasses).unwrap();
        let layouts = final_layouts(&attachments, &refs);
        assert_eq!(layouts[1], vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_dependency_chain() {
        assert!(subpass_dependencies(1).is_empty());
        let deps = subpass_dependencies(3);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].src_subpass, 1);
        assert_eq!(deps[1].dst_subpass, 2);
    }
}

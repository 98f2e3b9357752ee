//! Command buffer recording with deferred state binding.
//!
//! A [`CommandRecorder`] wraps one `vk::CommandBuffer` handed out by a
//! [`RenderFrame`](crate::render_frame::RenderFrame). Pipeline state,
//! resource bindings and push constants are staged on the recorder and only
//! turned into Vulkan bind calls when a draw or dispatch needs them:
//!
//! ```text
//! set_*_state / bind_* / push_constants      (staged)
//!                 |
//! draw / dispatch -> flush:
//!     1. pipeline      (only if the pipeline state hash changed)
//!     2. push constants (only if bytes are staged)
//!     3. descriptor sets (only dirty sets or sets whose layout changed)
//! ```

use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::descriptor::BindingMap;
use lumen_rhi::device::Device;
use lumen_rhi::image::{Image, ImageBarrier, ImageView, is_depth_format};
use lumen_rhi::pipeline::PipelineLayout;
use lumen_rhi::pipeline_state::{
    ColorBlendState, DepthStencilState, InputAssemblyState, MultisampleState, PipelineState,
    RasterizationState, VertexInputState, ViewportState,
};
use lumen_rhi::query::QueryPool;
use lumen_rhi::render_pass::{Framebuffer, LoadStoreInfo, RenderPass, SubpassInfo};
use lumen_rhi::sampler::Sampler;
use tracing::warn;

use crate::binding_state::{ResourceBindingState, ResourceInfo, SetLayoutBindings};
use crate::buffer_pool::BufferAllocation;
use crate::error::{RenderError, RenderResult};
use crate::render_frame::FrameShared;
use crate::render_target::RenderTarget;

/// Fails when `staged + additional` bytes exceed the push constant limit.
pub fn check_push_constant_size(staged: usize, additional: usize, limit: u32) -> RenderResult<()> {
    let size = staged + additional;
    if size > limit as usize {
        return Err(RenderError::PushConstantOverflow { size, limit });
    }
    Ok(())
}

/// Image layout a descriptor of `descriptor_type` reads `format` in, or
/// `None` when the type takes no image info.
///
/// Combined image samplers always read shader-read-only images. Input
/// attachments and separate sampled images follow the attachment's format,
/// since a render pass leaves depth attachments depth-read-only.
pub fn descriptor_image_layout(
    descriptor_type: vk::DescriptorType,
    format: Option<vk::Format>,
) -> Option<vk::ImageLayout> {
    let depth = format.is_some_and(is_depth_format);
    match descriptor_type {
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        vk::DescriptorType::SAMPLED_IMAGE | vk::DescriptorType::INPUT_ATTACHMENT => Some(if depth {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        }),
        vk::DescriptorType::STORAGE_IMAGE => Some(vk::ImageLayout::GENERAL),
        vk::DescriptorType::SAMPLER => Some(vk::ImageLayout::UNDEFINED),
        _ => None,
    }
}

/// Synchronization scope of a buffer memory barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBarrier {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl BufferBarrier {
    /// Transfer writes made visible to host reads.
    pub fn transfer_to_host() -> Self {
        Self {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::HOST,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::HOST_READ,
        }
    }
}

/// Records into one command buffer of a render frame.
pub struct CommandRecorder {
    device: Arc<Device>,
    frame: Arc<FrameShared>,
    handle: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
    thread_index: usize,
    render_pass: Option<Arc<RenderPass>>,
    framebuffer: Option<Arc<Framebuffer>>,
    subpass_index: u32,
    render_area: vk::Extent2D,
    pipeline_state: PipelineState,
    resource_binding_state: ResourceBindingState,
    /// `set index -> layout bound at that index by the last flush`
    descriptor_set_layout_binding_state: SetLayoutBindings,
    stored_push_constants: Vec<u8>,
    max_push_constants_size: u32,
    update_after_bind: bool,
}

impl CommandRecorder {
    pub(crate) fn new(
        frame: Arc<FrameShared>,
        handle: vk::CommandBuffer,
        level: vk::CommandBufferLevel,
        thread_index: usize,
    ) -> Self {
        let device = frame.device().clone();
        let max_push_constants_size = device.limits().max_push_constants_size;
        Self {
            device,
            frame,
            handle,
            level,
            thread_index,
            render_pass: None,
            framebuffer: None,
            subpass_index: 0,
            render_area: vk::Extent2D::default(),
            pipeline_state: PipelineState::new(),
            resource_binding_state: ResourceBindingState::new(),
            descriptor_set_layout_binding_state: SetLayoutBindings::default(),
            stored_push_constants: Vec::new(),
            max_push_constants_size,
            update_after_bind: false,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn frame(&self) -> &Arc<FrameShared> {
        &self.frame
    }

    pub fn render_pass(&self) -> Option<&Arc<RenderPass>> {
        self.render_pass.as_ref()
    }

    pub fn framebuffer(&self) -> Option<&Arc<Framebuffer>> {
        self.framebuffer.as_ref()
    }

    pub fn subpass_index(&self) -> u32 {
        self.subpass_index
    }

    pub fn render_area(&self) -> vk::Extent2D {
        self.render_area
    }

    pub fn pipeline_state(&self) -> &PipelineState {
        &self.pipeline_state
    }

    pub fn resource_binding_state(&self) -> &ResourceBindingState {
        &self.resource_binding_state
    }

    pub fn stored_push_constants(&self) -> &[u8] {
        &self.stored_push_constants
    }

    /// Sub-allocates per-frame memory on this recorder's thread.
    pub fn allocate_buffer(
        &self,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RenderResult<BufferAllocation> {
        self.frame.allocate_buffer(usage, size, self.thread_index)
    }

    /// Starts recording and drops all staged state.
    ///
    /// Secondary recorders continue the render pass of `inheritance`.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidState`] for a secondary recorder whose primary
    /// is not inside a render pass.
    pub fn begin(
        &mut self,
        flags: vk::CommandBufferUsageFlags,
        inheritance: Option<&CommandRecorder>,
    ) -> RenderResult<()> {
        self.pipeline_state.reset();
        self.resource_binding_state.reset();
        self.descriptor_set_layout_binding_state.clear();
        self.stored_push_constants.clear();
        self.render_pass = None;
        self.framebuffer = None;
        self.subpass_index = 0;

        if self.level == vk::CommandBufferLevel::PRIMARY {
            let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
            unsafe { self.device.handle().begin_command_buffer(self.handle, &begin_info)? };
            return Ok(());
        }

        let (Some(primary), Some(render_pass), Some(framebuffer)) = (
            inheritance,
            inheritance.and_then(|p| p.render_pass.clone()),
            inheritance.and_then(|p| p.framebuffer.clone()),
        ) else {
            return Err(RenderError::InvalidState(
                "secondary recorder needs a primary inside a render pass".to_string(),
            ));
        };

        let inheritance_info = vk::CommandBufferInheritanceInfo::default()
            .render_pass(render_pass.handle())
            .subpass(primary.subpass_index)
            .framebuffer(framebuffer.handle());
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(flags | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(&inheritance_info);
        unsafe { self.device.handle().begin_command_buffer(self.handle, &begin_info)? };

        self.subpass_index = primary.subpass_index;
        self.render_area = primary.render_area;
        self.enter_subpass(&render_pass);
        self.render_pass = Some(render_pass);
        self.framebuffer = Some(framebuffer);
        self.set_default_dynamic_state();
        Ok(())
    }

    pub fn end(&mut self) -> RenderResult<()> {
        unsafe { self.device.handle().end_command_buffer(self.handle)? };
        Ok(())
    }

    fn enter_subpass(&mut self, render_pass: &Arc<RenderPass>) {
        self.pipeline_state.set_render_pass(Some(render_pass.clone()));
        self.pipeline_state.set_subpass_index(self.subpass_index);
        self.pipeline_state
            .set_color_blend_attachment_count(render_pass.color_output_count(self.subpass_index) as usize);
    }

    /// Full-area viewport and scissor plus neutral values for the other
    /// dynamic states every pipeline declares.
    fn set_default_dynamic_state(&self) {
        let extent = self.render_area;
        self.set_viewport(
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        self.set_scissor(
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            }],
        );
        self.set_line_width(1.0);
        self.set_depth_bias(0.0, 0.0, 0.0);
        self.set_blend_constants([0.0; 4]);
        self.set_depth_bounds(0.0, 1.0);
    }

    /// Begins a render pass over `target`.
    ///
    /// The render pass and framebuffer come from the resource cache. The
    /// target's tracked layouts are advanced to the layouts the pass leaves
    /// its attachments in.
    pub fn begin_render_pass(
        &mut self,
        target: &mut RenderTarget,
        load_store: &[LoadStoreInfo],
        clear_values: &[vk::ClearValue],
        subpasses: &[SubpassInfo],
        contents: vk::SubpassContents,
    ) -> RenderResult<()> {
        let cache = self.frame.cache().clone();
        let render_pass = cache.request_render_pass(target.attachments(), load_store, subpasses)?;
        let framebuffer = cache.request_framebuffer(target, &render_pass)?;
        let extent = target.extent();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .handle()
                .cmd_begin_render_pass(self.handle, &begin_info, contents);
        }

        for (index, layout) in render_pass.final_layouts().iter().enumerate() {
            target.set_layout(index as u32, *layout);
        }

        self.pipeline_state.reset();
        self.resource_binding_state.reset();
        self.descriptor_set_layout_binding_state.clear();
        self.stored_push_constants.clear();
        self.subpass_index = 0;
        self.render_area = extent;
        self.enter_subpass(&render_pass);
        self.render_pass = Some(render_pass);
        self.framebuffer = Some(framebuffer);

        if contents == vk::SubpassContents::INLINE {
            self.set_default_dynamic_state();
        }
        Ok(())
    }

    /// Advances to the next subpass. Pipeline state, resource bindings and
    /// staged push constants do not carry over.
    pub fn next_subpass(&mut self, contents: vk::SubpassContents) -> RenderResult<()> {
        let Some(render_pass) = self.render_pass.clone() else {
            return Err(RenderError::InvalidState(
                "next_subpass outside a render pass".to_string(),
            ));
        };
        if self.subpass_index + 1 >= render_pass.subpass_count() {
            return Err(RenderError::InvalidState(format!(
                "render pass has only {} subpass(es)",
                render_pass.subpass_count()
            )));
        }

        self.subpass_index += 1;
        self.pipeline_state.reset();
        self.enter_subpass(&render_pass);
        self.resource_binding_state.reset();
        self.stored_push_constants.clear();

        unsafe { self.device.handle().cmd_next_subpass(self.handle, contents) };
        Ok(())
    }

    pub fn end_render_pass(&mut self) {
        unsafe { self.device.handle().cmd_end_render_pass(self.handle) };
        self.render_pass = None;
        self.framebuffer = None;
    }

    pub fn execute_commands(&self, secondaries: &[&CommandRecorder]) {
        let handles: Vec<vk::CommandBuffer> = secondaries.iter().map(|r| r.handle).collect();
        if handles.is_empty() {
            return;
        }
        unsafe { self.device.handle().cmd_execute_commands(self.handle, &handles) };
    }

    pub fn bind_pipeline_layout(&mut self, layout: Arc<PipelineLayout>) {
        self.pipeline_state.set_pipeline_layout(layout);
    }

    pub fn set_specialization_constant<T: bytemuck::Pod>(&mut self, constant_id: u32, value: T) {
        self.pipeline_state.set_specialization_constant(constant_id, value);
    }

    pub fn set_specialization_constant_bytes(&mut self, constant_id: u32, data: &[u8]) {
        self.pipeline_state
            .set_specialization_constant_bytes(constant_id, data);
    }

    pub fn bind_buffer(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.resource_binding_state
            .bind_buffer(buffer.clone(), offset, range, set, binding, array_element);
    }

    /// Binds a frame allocation as a whole.
    pub fn bind_allocation(&mut self, allocation: &BufferAllocation, set: u32, binding: u32, array_element: u32) {
        self.bind_buffer(
            allocation.buffer(),
            allocation.offset(),
            allocation.size(),
            set,
            binding,
            array_element,
        );
    }

    /// Binds an image view, with a sampler for combined image samplers.
    pub fn bind_image(
        &mut self,
        view: &Arc<ImageView>,
        sampler: Option<&Arc<Sampler>>,
        set: u32,
        binding: u32,
        array_element: u32,
    ) {
        self.resource_binding_state.bind_image(
            Some(view.clone()),
            sampler.cloned(),
            set,
            binding,
            array_element,
        );
    }

    pub fn bind_sampler(&mut self, sampler: &Arc<Sampler>, set: u32, binding: u32, array_element: u32) {
        self.resource_binding_state
            .bind_image(None, Some(sampler.clone()), set, binding, array_element);
    }

    /// Binds an attachment the current subpass reads.
    pub fn bind_input(&mut self, view: &Arc<ImageView>, set: u32, binding: u32, array_element: u32) {
        self.resource_binding_state
            .bind_input(view.clone(), set, binding, array_element);
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[&Buffer], offsets: &[vk::DeviceSize]) {
        let handles: Vec<vk::Buffer> = buffers.iter().map(|b| b.handle()).collect();
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.handle, first_binding, &handles, offsets);
        }
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_index_buffer(self.handle, buffer.handle(), offset, index_type);
        }
    }

    pub fn set_vertex_input_state(&mut self, state: VertexInputState) {
        self.pipeline_state.set_vertex_input_state(state);
    }

    pub fn set_input_assembly_state(&mut self, state: InputAssemblyState) {
        self.pipeline_state.set_input_assembly_state(state);
    }

    pub fn set_rasterization_state(&mut self, state: RasterizationState) {
        self.pipeline_state.set_rasterization_state(state);
    }

    pub fn set_viewport_state(&mut self, state: ViewportState) {
        self.pipeline_state.set_viewport_state(state);
    }

    pub fn set_multisample_state(&mut self, state: MultisampleState) {
        self.pipeline_state.set_multisample_state(state);
    }

    pub fn set_depth_stencil_state(&mut self, state: DepthStencilState) {
        self.pipeline_state.set_depth_stencil_state(state);
    }

    pub fn set_color_blend_state(&mut self, state: ColorBlendState) {
        self.pipeline_state.set_color_blend_state(state);
    }

    pub fn set_viewport(&self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.handle, first_viewport, viewports);
        }
    }

    pub fn set_scissor(&self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.handle, first_scissor, scissors);
        }
    }

    pub fn set_line_width(&self, line_width: f32) {
        unsafe { self.device.handle().cmd_set_line_width(self.handle, line_width) };
    }

    pub fn set_depth_bias(&self, constant_factor: f32, clamp: f32, slope_factor: f32) {
        unsafe {
            self.device
                .handle()
                .cmd_set_depth_bias(self.handle, constant_factor, clamp, slope_factor);
        }
    }

    pub fn set_blend_constants(&self, blend_constants: [f32; 4]) {
        unsafe {
            self.device
                .handle()
                .cmd_set_blend_constants(self.handle, &blend_constants);
        }
    }

    pub fn set_depth_bounds(&self, min_depth_bounds: f32, max_depth_bounds: f32) {
        unsafe {
            self.device
                .handle()
                .cmd_set_depth_bounds(self.handle, min_depth_bounds, max_depth_bounds);
        }
    }

    /// With update-after-bind, unchanged update-after-bind bindings are
    /// left out of descriptor rewrites.
    pub fn set_update_after_bind(&mut self, update_after_bind: bool) {
        self.update_after_bind = update_after_bind;
    }

    /// Stages a push constant value after the bytes already staged.
    pub fn push_constants<T: bytemuck::Pod>(&mut self, value: &T) -> RenderResult<()> {
        self.push_constants_bytes(bytemuck::bytes_of(value))
    }

    /// # Errors
    ///
    /// [`RenderError::PushConstantOverflow`] if the staged bytes would
    /// exceed `maxPushConstantsSize`; nothing is staged in that case.
    pub fn push_constants_bytes(&mut self, bytes: &[u8]) -> RenderResult<()> {
        check_push_constant_size(
            self.stored_push_constants.len(),
            bytes.len(),
            self.max_push_constants_size,
        )?;
        self.stored_push_constants.extend_from_slice(bytes);
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RenderResult<()> {
        self.flush(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.device.handle().cmd_draw(
                self.handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RenderResult<()> {
        self.flush(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.device.handle().cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    pub fn draw_indexed_indirect(
        &mut self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) -> RenderResult<()> {
        self.flush(vk::PipelineBindPoint::GRAPHICS)?;
        unsafe {
            self.device.handle().cmd_draw_indexed_indirect(
                self.handle,
                buffer.handle(),
                offset,
                draw_count,
                stride,
            );
        }
        Ok(())
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) -> RenderResult<()> {
        self.flush(vk::PipelineBindPoint::COMPUTE)?;
        unsafe {
            self.device
                .handle()
                .cmd_dispatch(self.handle, group_count_x, group_count_y, group_count_z);
        }
        Ok(())
    }

    pub fn dispatch_indirect(&mut self, buffer: &Buffer, offset: vk::DeviceSize) -> RenderResult<()> {
        self.flush(vk::PipelineBindPoint::COMPUTE)?;
        unsafe {
            self.device
                .handle()
                .cmd_dispatch_indirect(self.handle, buffer.handle(), offset);
        }
        Ok(())
    }

    /// Inline buffer update; `data` must be at most 65536 bytes and a
    /// multiple of four.
    pub fn update_buffer(&self, buffer: &Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe {
            self.device
                .handle()
                .cmd_update_buffer(self.handle, buffer.handle(), offset, data);
        }
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.handle, src.handle(), dst.handle(), regions);
        }
    }

    /// Copies between images in `TRANSFER_SRC_OPTIMAL` / `TRANSFER_DST_OPTIMAL`.
    pub fn copy_image(&self, src: &Image, dst: &Image, regions: &[vk::ImageCopy]) {
        unsafe {
            self.device.handle().cmd_copy_image(
                self.handle,
                src.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    pub fn copy_buffer_to_image(&self, src: &Buffer, dst: &Image, regions: &[vk::BufferImageCopy]) {
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.handle,
                src.handle(),
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    pub fn copy_image_to_buffer(
        &self,
        src: &Image,
        src_layout: vk::ImageLayout,
        dst: &Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.handle().cmd_copy_image_to_buffer(
                self.handle,
                src.handle(),
                src_layout,
                dst.handle(),
                regions,
            );
        }
    }

    pub fn blit_image(&self, src: &Image, dst: &Image, regions: &[vk::ImageBlit], filter: vk::Filter) {
        unsafe {
            self.device.handle().cmd_blit_image(
                self.handle,
                src.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
                filter,
            );
        }
    }

    pub fn resolve_image(&self, src: &Image, dst: &Image, regions: &[vk::ImageResolve]) {
        unsafe {
            self.device.handle().cmd_resolve_image(
                self.handle,
                src.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    pub fn image_memory_barrier(&self, view: &ImageView, barrier: &ImageBarrier) {
        unsafe {
            barrier.record(
                self.device.handle(),
                self.handle,
                view.image(),
                view.subresource_range(),
            );
        }
    }

    pub fn buffer_memory_barrier(
        &self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        barrier: &BufferBarrier,
    ) {
        let buffer_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.handle())
            .offset(offset)
            .size(size);
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.handle,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[buffer_barrier],
                &[],
            );
        }
    }

    pub fn reset_query_pool(&self, pool: &QueryPool, first_query: u32, query_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_reset_query_pool(self.handle, pool.handle(), first_query, query_count);
        }
    }

    pub fn begin_query(&self, pool: &QueryPool, query: u32, flags: vk::QueryControlFlags) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_query(self.handle, pool.handle(), query, flags);
        }
    }

    pub fn end_query(&self, pool: &QueryPool, query: u32) {
        unsafe { self.device.handle().cmd_end_query(self.handle, pool.handle(), query) };
    }

    pub fn write_timestamp(&self, stage: vk::PipelineStageFlags, pool: &QueryPool, query: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_write_timestamp(self.handle, stage, pool.handle(), query);
        }
    }

    /// Opens a debug label region. No-op without debug utils.
    pub fn begin_label(&self, name: &str, color: [f32; 4]) {
        let Some(debug_utils) = self.device.debug_utils() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(self.handle, &label) };
    }

    pub fn end_label(&self) {
        if let Some(debug_utils) = self.device.debug_utils() {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.handle) };
        }
    }

    fn flush(&mut self, bind_point: vk::PipelineBindPoint) -> RenderResult<()> {
        self.flush_pipeline_state(bind_point)?;
        self.flush_push_constants();
        self.flush_descriptor_state(bind_point)
    }

    fn flush_pipeline_state(&mut self, bind_point: vk::PipelineBindPoint) -> RenderResult<()> {
        if !self.pipeline_state.is_dirty() {
            return Ok(());
        }

        let cache = self.frame.cache();
        let pipeline = if bind_point == vk::PipelineBindPoint::COMPUTE {
            cache.request_compute_pipeline(&self.pipeline_state)?
        } else {
            cache.request_graphics_pipeline(&self.pipeline_state)?
        };
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.handle, bind_point, pipeline.handle());
        }
        self.pipeline_state.clear_dirty();
        Ok(())
    }

    fn flush_push_constants(&mut self) {
        if self.stored_push_constants.is_empty() {
            return;
        }
        let Some(layout) = self.pipeline_state.pipeline_layout() else {
            warn!("Push constants staged without a pipeline layout; dropping them");
            self.stored_push_constants.clear();
            return;
        };

        let size = self.stored_push_constants.len() as u32;
        let stages = layout.push_constant_range_stage(0, size);
        if stages.is_empty() {
            warn!(
                "No push constant range covers {} byte(s); dropping them",
                size
            );
        } else {
            unsafe {
                self.device.handle().cmd_push_constants(
                    self.handle,
                    layout.handle(),
                    stages,
                    0,
                    &self.stored_push_constants,
                );
            }
        }
        self.stored_push_constants.clear();
    }

    fn flush_descriptor_state(&mut self, bind_point: vk::PipelineBindPoint) -> RenderResult<()> {
        let Some(layout) = self.pipeline_state.pipeline_layout().cloned() else {
            return Err(RenderError::InvalidState(
                "draw or dispatch without a pipeline layout".to_string(),
            ));
        };

        let update_sets = self.descriptor_set_layout_binding_state.changed_sets(
            layout
                .set_layouts()
                .iter()
                .enumerate()
                .map(|(set_index, set_layout)| (set_index as u32, set_layout.handle())),
        );

        if !self.resource_binding_state.is_dirty() && update_sets.is_empty() {
            return Ok(());
        }

        let pending: Vec<u32> = self
            .resource_binding_state
            .sets()
            .iter()
            .filter(|(set, resources)| resources.is_dirty() || update_sets.contains(set))
            .map(|(set, _)| *set)
            .collect();

        for set_index in pending {
            let Some(set_layout) = layout.set_layout(set_index) else {
                continue;
            };
            let Some(resource_set) = self.resource_binding_state.set(set_index) else {
                continue;
            };

            let mut buffer_infos: BindingMap<vk::DescriptorBufferInfo> = BTreeMap::new();
            let mut image_infos: BindingMap<vk::DescriptorImageInfo> = BTreeMap::new();
            let mut dynamic_offsets = Vec::new();

            for (&binding, elements) in resource_set.bindings() {
                let Some(layout_binding) = set_layout.binding(binding) else {
                    continue;
                };
                for (&array_element, info) in elements {
                    if self.update_after_bind && layout_binding.update_after_bind && !info.dirty {
                        continue;
                    }
                    if layout_binding.is_buffer() {
                        let Some(buffer_info) = buffer_info(info) else {
                            continue;
                        };
                        let buffer_info = if layout_binding.is_dynamic() {
                            dynamic_offsets.push(buffer_info.offset as u32);
                            buffer_info.offset(0)
                        } else {
                            buffer_info
                        };
                        buffer_infos
                            .entry(binding)
                            .or_default()
                            .insert(array_element, buffer_info);
                    } else if info.is_image() {
                        let Some(image_info) = image_info(info, layout_binding.descriptor_type) else {
                            warn!(
                                "Skipping image bound at set {} binding {}: {:?} takes no image",
                                set_index, binding, layout_binding.descriptor_type
                            );
                            continue;
                        };
                        image_infos
                            .entry(binding)
                            .or_default()
                            .insert(array_element, image_info);
                    }
                }
            }

            let descriptor_set = self.frame.request_descriptor_set(
                set_layout,
                &buffer_infos,
                &image_infos,
                self.update_after_bind,
                self.thread_index,
            )?;
            unsafe {
                self.device.handle().cmd_bind_descriptor_sets(
                    self.handle,
                    bind_point,
                    layout.handle(),
                    set_index,
                    &[descriptor_set],
                    &dynamic_offsets,
                );
            }
            self.descriptor_set_layout_binding_state
                .mark_bound(set_index, set_layout.handle());
            self.resource_binding_state.clear_dirty_set(set_index);
        }

        // Sets without staged resources have nothing to bind.
        for set_index in update_sets {
            if let Some(set_layout) = layout.set_layout(set_index) {
                self.descriptor_set_layout_binding_state
                    .mark_bound(set_index, set_layout.handle());
            }
        }

        self.resource_binding_state.clear_dirty();
        Ok(())
    }
}

fn buffer_info(info: &ResourceInfo) -> Option<vk::DescriptorBufferInfo> {
    let buffer = info.buffer.as_ref()?;
    Some(
        vk::DescriptorBufferInfo::default()
            .buffer(buffer.handle())
            .offset(info.offset)
            .range(info.range),
    )
}

fn image_info(info: &ResourceInfo, descriptor_type: vk::DescriptorType) -> Option<vk::DescriptorImageInfo> {
    let view = info.image_view.as_ref();
    let layout = descriptor_image_layout(descriptor_type, view.map(|v| v.format()))?;
    Some(
        vk::DescriptorImageInfo::default()
            .sampler(info.sampler.as_ref().map_or(vk::Sampler::null(), |s| s.handle()))
            .image_view(view.map_or(vk::ImageView::null(), |v| v.handle()))
            .image_layout(layout),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constants_exactly_at_limit() {
        assert!(check_push_constant_size(0, 128, 128).is_ok());
        assert!(check_push_constant_size(64, 64, 128).is_ok());
    }

    #[test]
    fn test_push_constants_one_byte_over() {
        let err = check_push_constant_size(128, 1, 128).unwrap_err();
        assert!(matches!(
            err,
            RenderError::PushConstantOverflow { size: 129, limit: 128 }
        ));
    }

    #[test]
    fn test_push_constants_cumulative_overflow() {
        assert!(check_push_constant_size(0, 96, 128).is_ok());
        assert!(matches!(
            check_push_constant_size(96, 96, 128),
            Err(RenderError::PushConstantOverflow { size: 192, .. })
        ));
    }

    #[test]
    fn test_descriptor_image_layouts() {
        use vk::DescriptorType as D;
        use vk::ImageLayout as L;

        let color = Some(vk::Format::R8G8B8A8_UNORM);
        let depth = Some(vk::Format::D32_SFLOAT);
        assert_eq!(descriptor_image_layout(D::COMBINED_IMAGE_SAMPLER, color), Some(L::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(descriptor_image_layout(D::COMBINED_IMAGE_SAMPLER, depth), Some(L::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(descriptor_image_layout(D::SAMPLED_IMAGE, depth), Some(L::DEPTH_STENCIL_READ_ONLY_OPTIMAL));
        assert_eq!(descriptor_image_layout(D::INPUT_ATTACHMENT, color), Some(L::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(descriptor_image_layout(D::INPUT_ATTACHMENT, depth), Some(L::DEPTH_STENCIL_READ_ONLY_OPTIMAL));
        assert_eq!(descriptor_image_layout(D::STORAGE_IMAGE, color), Some(L::GENERAL));
        assert_eq!(descriptor_image_layout(D::STORAGE_IMAGE, depth), Some(L::GENERAL));
        assert_eq!(descriptor_image_layout(D::SAMPLER, None), Some(L::UNDEFINED));
    }

    #[test]
    fn test_descriptor_image_layout_rejects_buffer_types() {
        use vk::DescriptorType as D;

        let color = Some(vk::Format::R8G8B8A8_UNORM);
        assert_eq!(descriptor_image_layout(D::UNIFORM_BUFFER, color), None);
        assert_eq!(descriptor_image_layout(D::STORAGE_BUFFER_DYNAMIC, None), None);
    }
}

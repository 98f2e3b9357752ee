//! Pipeline layouts and pipelines.
//!
//! - [`PipelineLayout`] is derived from a set of shader modules: their
//!   reflected resources are aggregated, grouped by descriptor set, and the
//!   push constant block becomes a single range.
//! - [`Pipeline`] is a graphics or compute pipeline built from a
//!   [`PipelineState`].

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::descriptor::DescriptorSetLayout;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::pipeline_state::{DYNAMIC_STATES, GraphicsStateInfo, PipelineState};
use crate::shader::{ShaderModule, ShaderResource, ShaderResourceType, ShaderStage, aggregate_resources};

/// Descriptor resources grouped by set index.
pub fn shader_sets(resources: &[ShaderResource]) -> BTreeMap<u32, Vec<ShaderResource>> {
    let mut sets: BTreeMap<u32, Vec<ShaderResource>> = BTreeMap::new();
    for resource in resources.iter().filter(|r| r.resource_type.is_descriptor()) {
        sets.entry(resource.set).or_default().push(resource.clone());
    }
    sets
}

/// Stage flags of the push constant range that covers `[offset, offset + size)`.
///
/// Returns empty flags when no range covers it.
pub fn push_constant_range_stage(
    resources: &[ShaderResource],
    offset: u32,
    size: u32,
) -> vk::ShaderStageFlags {
    resources
        .iter()
        .filter(|r| r.resource_type == ShaderResourceType::PushConstant)
        .filter(|r| offset >= r.offset && offset + size <= r.offset + r.size)
        .fold(vk::ShaderStageFlags::empty(), |flags, r| flags | r.stages)
}

/// Vulkan pipeline layout derived from shader reflection.
///
/// The layout is immutable after creation and shared between recorders.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
    shader_modules: Vec<Arc<ShaderModule>>,
    resources: Vec<ShaderResource>,
    shader_sets: BTreeMap<u32, Vec<ShaderResource>>,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
}

impl PipelineLayout {
    /// Creates a pipeline layout.
    ///
    /// `set_layouts[i]` must be the layout of set `i`; sets without
    /// resources still need an (empty) layout when a higher set is used.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if a module stage repeats or
    /// graphics and compute stages are mixed.
    pub fn new(
        device: Arc<Device>,
        shader_modules: Vec<Arc<ShaderModule>>,
        set_layouts: Vec<Arc<DescriptorSetLayout>>,
    ) -> RhiResult<Self> {
        validate_stages(&shader_modules)?;

        let resources = aggregate_resources(shader_modules.iter().flat_map(|m| m.resources()));
        let shader_sets = shader_sets(&resources);

        if let Some((&max_set, _)) = shader_sets.last_key_value()
            && set_layouts.len() <= max_set as usize
        {
            return Err(RhiError::PipelineError(format!(
                "set {max_set} is used but only {} set layout(s) were given",
                set_layouts.len()
            )));
        }

        let push_constant_ranges: Vec<vk::PushConstantRange> = resources
            .iter()
            .filter(|r| r.resource_type == ShaderResourceType::PushConstant && r.size > 0)
            .map(|r| vk::PushConstantRange {
                stage_flags: r.stages,
                offset: r.offset,
                size: r.size,
            })
            .collect();

        let set_layout_handles: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|l| l.handle()).collect();

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layout_handles)
            .push_constant_ranges(&push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout for [{}] with {} set layout(s) and {} push constant range(s)",
            shader_modules
                .iter()
                .map(|m| m.debug_name())
                .collect::<Vec<_>>()
                .join(", "),
            set_layout_handles.len(),
            push_constant_ranges.len()
        );

        Ok(Self {
            device,
            layout,
            shader_modules,
            resources,
            shader_sets,
            set_layouts,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn shader_modules(&self) -> &[Arc<ShaderModule>] {
        &self.shader_modules
    }

    /// Aggregated resources of all stages.
    pub fn resources(&self) -> &[ShaderResource] {
        &self.resources
    }

    pub fn shader_sets(&self) -> &BTreeMap<u32, Vec<ShaderResource>> {
        &self.shader_sets
    }

    pub fn set_layout(&self, set_index: u32) -> Option<&Arc<DescriptorSetLayout>> {
        self.set_layouts.get(set_index as usize)
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    pub fn push_constant_range_stage(&self, offset: u32, size: u32) -> vk::ShaderStageFlags {
        push_constant_range_stage(&self.resources, offset, size)
    }

    /// Graphics unless the only stage is compute.
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self.shader_modules.as_slice() {
            [module] if module.stage() == ShaderStage::Compute => vk::PipelineBindPoint::COMPUTE,
            _ => vk::PipelineBindPoint::GRAPHICS,
        }
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

fn validate_stages(modules: &[Arc<ShaderModule>]) -> RhiResult<()> {
    let stages: Vec<ShaderStage> = modules.iter().map(|m| m.stage()).collect();
    check_stage_set(&stages)
}

fn check_stage_set(stages: &[ShaderStage]) -> RhiResult<()> {
    if stages.is_empty() {
        return Err(RhiError::PipelineError(
            "pipeline layout needs at least one shader module".to_string(),
        ));
    }
    let mut sorted = stages.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != stages.len() {
        return Err(RhiError::PipelineError(
            "duplicate shader stage in pipeline layout".to_string(),
        ));
    }
    if stages.contains(&ShaderStage::Compute) && stages.len() > 1 {
        return Err(RhiError::PipelineError(
            "compute stage cannot be combined with graphics stages".to_string(),
        ));
    }
    Ok(())
}

/// Vulkan pipeline handle with its bind point.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Builds a graphics pipeline from `state`.
    ///
    /// Viewport, scissor, line width, depth bias, blend constants and depth
    /// bounds are dynamic.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if the state has no layout or no
    /// render pass, or the layout is a compute layout.
    pub fn new_graphics(
        device: Arc<Device>,
        cache: vk::PipelineCache,
        state: &PipelineState,
    ) -> RhiResult<Self> {
        let layout = state
            .pipeline_layout()
            .ok_or_else(|| RhiError::PipelineError("pipeline layout is required".to_string()))?;
        let render_pass = state
            .render_pass()
            .ok_or_else(|| RhiError::PipelineError("render pass is required".to_string()))?;
        if layout.bind_point() != vk::PipelineBindPoint::GRAPHICS {
            return Err(RhiError::PipelineError(
                "graphics pipeline requested with a compute layout".to_string(),
            ));
        }

        let info = GraphicsStateInfo::new(state);
        let specialization = info.specialization_info();

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = layout
            .shader_modules()
            .iter()
            .map(|m| m.stage_create_info().specialization_info(&specialization))
            .collect();

        let vertex_input_state = info.vertex_input();
        let input_assembly_state = state.input_assembly_info();
        let viewport_state = state.viewport_info();
        let rasterization_state = state.rasterization_info();
        let multisample_state = info.multisample(state);
        let depth_stencil_state = state.depth_stencil_info();
        let color_blend_state = info.color_blend(state);
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&DYNAMIC_STATES);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(state.subpass_index());

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(cache, &[create_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        info!(
            "Graphics pipeline created (subpass {}, {} stage(s))",
            state.subpass_index(),
            stages.len()
        );

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    /// Builds a compute pipeline from the layout's single compute module.
    pub fn new_compute(
        device: Arc<Device>,
        cache: vk::PipelineCache,
        state: &PipelineState,
    ) -> RhiResult<Self> {
        let layout = state
            .pipeline_layout()
            .ok_or_else(|| RhiError::PipelineError("pipeline layout is required".to_string()))?;
        let module = match layout.shader_modules() {
            [module] if module.stage() == ShaderStage::Compute => module,
            _ => {
                return Err(RhiError::PipelineError(
                    "compute pipeline needs exactly one compute module".to_string(),
                ));
            }
        };

        let info = GraphicsStateInfo::new(state);
        let specialization = info.specialization_info();
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(module.stage_create_info().specialization_info(&specialization))
            .layout(layout.handle());

        let pipeline = unsafe {
            device
                .handle()
                .create_compute_pipelines(cache, &[create_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        info!("Compute pipeline created from '{}'", module.debug_name());

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!(
            "{} pipeline destroyed",
            if self.bind_point == vk::PipelineBindPoint::GRAPHICS {
                "Graphics"
            } else {
                "Compute"
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderResourceMode;

    fn resource(
        resource_type: ShaderResourceType,
        stages: vk::ShaderStageFlags,
        set: u32,
        binding: u32,
        size: u32,
    ) -> ShaderResource {
        ShaderResource {
            name: format!("r{set}_{binding}"),
            resource_type,
            mode: ShaderResourceMode::Static,
            stages,
            set,
            binding,
            array_size: 1,
            offset: 0,
            size,
            location: 0,
        }
    }

    #[test]
    fn test_shader_sets_group_descriptors() {
        let resources = vec![
            resource(ShaderResourceType::BufferUniform, vk::ShaderStageFlags::VERTEX, 0, 1, 64),
            resource(ShaderResourceType::Image, vk::ShaderStageFlags::FRAGMENT, 0, 2, 0),
            resource(ShaderResourceType::BufferStorage, vk::ShaderStageFlags::FRAGMENT, 2, 0, 16),
            resource(ShaderResourceType::PushConstant, vk::ShaderStageFlags::VERTEX, 0, 0, 32),
            resource(ShaderResourceType::Input, vk::ShaderStageFlags::VERTEX, 0, 0, 0),
        ];
        let sets = shader_sets(&resources);
        assert_eq!(sets.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(sets[&0].len(), 2);
        assert_eq!(sets[&2][0].resource_type, ShaderResourceType::BufferStorage);
    }

    #[test]
    fn test_push_constant_range_lookup() {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let resources = vec![resource(ShaderResourceType::PushConstant, stages, 0, 0, 128)];

        assert_eq!(push_constant_range_stage(&resources, 0, 128), stages);
        assert_eq!(push_constant_range_stage(&resources, 64, 64), stages);
        assert!(push_constant_range_stage(&resources, 0, 129).is_empty());
        assert!(push_constant_range_stage(&[], 0, 4).is_empty());
    }

    #[test]
    fn test_stage_set_validation() {
        assert!(check_stage_set(&[ShaderStage::Vertex, ShaderStage::Fragment]).is_ok());
        assert!(check_stage_set(&[ShaderStage::Compute]).is_ok());
        assert!(check_stage_set(&[]).is_err());
        assert!(check_stage_set(&[ShaderStage::Vertex, ShaderStage::Vertex]).is_err());
        assert!(check_stage_set(&[ShaderStage::Compute, ShaderStage::Fragment]).is_err());
    }
}

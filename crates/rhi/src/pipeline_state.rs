//! Declarative pipeline state with dirty tracking.
//!
//! [`PipelineState`] aggregates everything a `VkPipeline` is built from:
//! the layout, the render pass and subpass, specialization constants and the
//! fixed-function sub-states. Setters mark the state dirty only when a value
//! actually changes, and [`PipelineState::clear_dirty`] records the hash of
//! the flushed state, so setting a field back to its flushed value leaves
//! the state clean again.
//!
//! Viewport, scissor, line width, depth bias, blend constants and depth
//! bounds are dynamic states and set on the command buffer directly.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use xxhash_rust::xxh3::Xxh3;

use crate::pipeline::PipelineLayout;
use crate::render_pass::RenderPass;

/// Dynamic states every graphics pipeline declares.
pub const DYNAMIC_STATES: [vk::DynamicState; 6] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::LINE_WIDTH,
    vk::DynamicState::DEPTH_BIAS,
    vk::DynamicState::BLEND_CONSTANTS,
    vk::DynamicState::DEPTH_BOUNDS,
];

/// Primitive topology for input assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveTopology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
            PolygonMode::Point => vk::PolygonMode::POINT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
    FrontAndBack,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    #[default]
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
            BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
            BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
            BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexInputAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexInputState {
    pub bindings: Vec<VertexInputBinding>,
    pub attributes: Vec<VertexInputAttribute>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InputAssemblyState {
    pub topology: PrimitiveTopology,
    pub primitive_restart_enable: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RasterizationState {
    pub depth_clamp_enable: bool,
    pub rasterizer_discard_enable: bool,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_bias_enable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewportState {
    pub viewport_count: u32,
    pub scissor_count: u32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            viewport_count: 1,
            scissor_count: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultisampleState {
    pub rasterization_samples: vk::SampleCountFlags,
    pub sample_shading_enable: bool,
    pub min_sample_shading: f32,
    pub sample_mask: u32,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            sample_shading_enable: false,
            min_sample_shading: 0.0,
            sample_mask: 0,
            alpha_to_coverage_enable: false,
            alpha_to_one_enable: false,
        }
    }
}

impl Hash for MultisampleState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rasterization_samples.hash(state);
        self.sample_shading_enable.hash(state);
        self.min_sample_shading.to_bits().hash(state);
        self.sample_mask.hash(state);
        self.alpha_to_coverage_enable.hash(state);
        self.alpha_to_one_enable.hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilOpState {
    pub fail_op: vk::StencilOp,
    pub pass_op: vk::StencilOp,
    pub depth_fail_op: vk::StencilOp,
    pub compare_op: CompareOp,
}

impl Default for StencilOpState {
    fn default() -> Self {
        Self {
            fail_op: vk::StencilOp::REPLACE,
            pass_op: vk::StencilOp::REPLACE,
            depth_fail_op: vk::StencilOp::REPLACE,
            compare_op: CompareOp::Never,
        }
    }
}

impl StencilOpState {
    fn to_vk(self) -> vk::StencilOpState {
        vk::StencilOpState::default()
            .fail_op(self.fail_op)
            .pass_op(self.pass_op)
            .depth_fail_op(self.depth_fail_op)
            .compare_op(self.compare_op.to_vk())
            .compare_mask(!0)
            .write_mask(!0)
            .reference(!0)
    }
}

/// Depth test and write on, `LessOrEqual` against a depth cleared to 1.0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: CompareOp,
    pub depth_bounds_test_enable: bool,
    pub stencil_test_enable: bool,
    pub front: StencilOpState,
    pub back: StencilOpState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: CompareOp::LessOrEqual,
            depth_bounds_test_enable: false,
            stencil_test_enable: false,
            front: StencilOpState::default(),
            back: StencilOpState::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorBlendAttachmentState {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachmentState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachmentState {
    /// Alpha-over: `src * src_alpha + dst * (1 - src_alpha)`.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: BlendFactor::SrcAlpha,
            dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
            src_alpha_blend_factor: BlendFactor::SrcAlpha,
            dst_alpha_blend_factor: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor.to_vk(),
            dst_color_blend_factor: self.dst_color_blend_factor.to_vk(),
            color_blend_op: self.color_blend_op.to_vk(),
            src_alpha_blend_factor: self.src_alpha_blend_factor.to_vk(),
            dst_alpha_blend_factor: self.dst_alpha_blend_factor.to_vk(),
            alpha_blend_op: self.alpha_blend_op.to_vk(),
            color_write_mask: self.color_write_mask,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColorBlendState {
    pub logic_op_enable: bool,
    pub logic_op: vk::LogicOp,
    pub attachments: Vec<ColorBlendAttachmentState>,
}

impl Default for ColorBlendState {
    fn default() -> Self {
        Self {
            logic_op_enable: false,
            logic_op: vk::LogicOp::CLEAR,
            attachments: Vec::new(),
        }
    }
}

/// Specialization constants by constant id, stored as raw bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SpecializationConstantState {
    constants: BTreeMap<u32, Vec<u8>>,
}

impl SpecializationConstantState {
    /// Returns true if the stored bytes changed.
    pub fn set_constant_bytes(&mut self, constant_id: u32, data: &[u8]) -> bool {
        if self.constants.get(&constant_id).map(Vec::as_slice) == Some(data) {
            return false;
        }
        self.constants.insert(constant_id, data.to_vec());
        true
    }

    pub fn set_constant<T: bytemuck::Pod>(&mut self, constant_id: u32, value: T) -> bool {
        self.set_constant_bytes(constant_id, bytemuck::bytes_of(&value))
    }

    pub fn constants(&self) -> &BTreeMap<u32, Vec<u8>> {
        &self.constants
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Packs the constants into one blob with its map entries.
    pub fn pack(&self) -> (Vec<vk::SpecializationMapEntry>, Vec<u8>) {
        let mut entries = Vec::with_capacity(self.constants.len());
        let mut data = Vec::new();
        for (id, bytes) in &self.constants {
            entries.push(
                vk::SpecializationMapEntry::default()
                    .constant_id(*id)
                    .offset(data.len() as u32)
                    .size(bytes.len()),
            );
            data.extend_from_slice(bytes);
        }
        (entries, data)
    }
}

/// Everything a graphics or compute pipeline is built from.
#[derive(Clone, Default)]
pub struct PipelineState {
    pipeline_layout: Option<Arc<PipelineLayout>>,
    render_pass: Option<Arc<RenderPass>>,
    subpass_index: u32,
    specialization_constants: SpecializationConstantState,
    vertex_input: VertexInputState,
    input_assembly: InputAssemblyState,
    rasterization: RasterizationState,
    viewport: ViewportState,
    multisample: MultisampleState,
    depth_stencil: DepthStencilState,
    color_blend: ColorBlendState,
    dirty: bool,
    flushed_hash: Option<u64>,
}

macro_rules! state_setter {
    ($(#[$doc:meta])* $setter:ident, $getter:ident, $field:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $setter(&mut self, state: $ty) {
            if self.$field != state {
                self.$field = state;
                self.dirty = true;
            }
        }

        pub fn $getter(&self) -> &$ty {
            &self.$field
        }
    };
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to defaults; nothing has been flushed yet.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_pipeline_layout(&mut self, layout: Arc<PipelineLayout>) {
        let changed = self
            .pipeline_layout
            .as_ref()
            .is_none_or(|current| current.handle() != layout.handle());
        if changed {
            self.pipeline_layout = Some(layout);
            self.dirty = true;
        }
    }

    pub fn set_render_pass(&mut self, render_pass: Option<Arc<RenderPass>>) {
        let current = self.render_pass.as_ref().map(|r| r.handle());
        if current != render_pass.as_ref().map(|r| r.handle()) {
            self.render_pass = render_pass;
            self.dirty = true;
        }
    }

    pub fn set_subpass_index(&mut self, subpass_index: u32) {
        if self.subpass_index != subpass_index {
            self.subpass_index = subpass_index;
            self.dirty = true;
        }
    }

    pub fn set_specialization_constant_bytes(&mut self, constant_id: u32, data: &[u8]) {
        if self
            .specialization_constants
            .set_constant_bytes(constant_id, data)
        {
            self.dirty = true;
        }
    }

    pub fn set_specialization_constant<T: bytemuck::Pod>(&mut self, constant_id: u32, value: T) {
        self.set_specialization_constant_bytes(constant_id, bytemuck::bytes_of(&value));
    }

    state_setter!(set_vertex_input_state, vertex_input_state, vertex_input, VertexInputState);
    state_setter!(
        set_input_assembly_state,
        input_assembly_state,
        input_assembly,
        InputAssemblyState
    );
    state_setter!(
        set_rasterization_state,
        rasterization_state,
        rasterization,
        RasterizationState
    );
    state_setter!(set_viewport_state, viewport_state, viewport, ViewportState);
    state_setter!(set_multisample_state, multisample_state, multisample, MultisampleState);
    state_setter!(
        set_depth_stencil_state,
        depth_stencil_state,
        depth_stencil,
        DepthStencilState
    );
    state_setter!(set_color_blend_state, color_blend_state, color_blend, ColorBlendState);

    /// Resizes the blend attachment list, filling with default attachments.
    pub fn set_color_blend_attachment_count(&mut self, count: usize) {
        if self.color_blend.attachments.len() != count {
            self.color_blend
                .attachments
                .resize(count, ColorBlendAttachmentState::default());
            self.dirty = true;
        }
    }

    pub fn pipeline_layout(&self) -> Option<&Arc<PipelineLayout>> {
        self.pipeline_layout.as_ref()
    }

    pub fn render_pass(&self) -> Option<&Arc<RenderPass>> {
        self.render_pass.as_ref()
    }

    pub fn subpass_index(&self) -> u32 {
        self.subpass_index
    }

    pub fn specialization_constant_state(&self) -> &SpecializationConstantState {
        &self.specialization_constants
    }

    /// Changed since the last [`clear_dirty`](Self::clear_dirty).
    pub fn is_dirty(&self) -> bool {
        self.dirty && self.flushed_hash != Some(self.hash_value())
    }

    /// Records the current state as flushed.
    pub fn clear_dirty(&mut self) {
        self.flushed_hash = Some(self.hash_value());
        self.dirty = false;
    }

    /// 64-bit hash covering every field, used as the pipeline cache key.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = Xxh3::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl Hash for PipelineState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.pipeline_layout {
            Some(layout) => {
                layout.handle().as_raw().hash(state);
                for module in layout.shader_modules() {
                    module.id().hash(state);
                }
            }
            None => 0u64.hash(state),
        }
        self.render_pass
            .as_ref()
            .map_or(0, |r| r.handle().as_raw())
            .hash(state);
        self.subpass_index.hash(state);
        self.specialization_constants.hash(state);
        self.vertex_input.hash(state);
        self.input_assembly.hash(state);
        self.rasterization.hash(state);
        self.viewport.hash(state);
        self.multisample.hash(state);
        self.depth_stencil.hash(state);
        self.color_blend.hash(state);
    }
}

/// Vulkan create-info pieces derived from a [`PipelineState`].
///
/// Owns the arrays the create infos point into.
pub struct GraphicsStateInfo {
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub sample_mask: [u32; 1],
    pub specialization_entries: Vec<vk::SpecializationMapEntry>,
    pub specialization_data: Vec<u8>,
}

impl GraphicsStateInfo {
    pub fn new(state: &PipelineState) -> Self {
        let vertex_bindings = state
            .vertex_input
            .bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: b.input_rate,
            })
            .collect();
        let vertex_attributes = state
            .vertex_input
            .attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect();
        let blend_attachments = state
            .color_blend
            .attachments
            .iter()
            .map(ColorBlendAttachmentState::to_vk)
            .collect();
        let (specialization_entries, specialization_data) = state.specialization_constants.pack();

        Self {
            vertex_bindings,
            vertex_attributes,
            blend_attachments,
            sample_mask: [state.multisample.sample_mask],
            specialization_entries,
            specialization_data,
        }
    }

    pub fn specialization_info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo::default()
            .map_entries(&self.specialization_entries)
            .data(&self.specialization_data)
    }

    pub fn vertex_input(&self) -> vk::PipelineVertexInputStateCreateInfo<'_> {
        vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes)
    }

    pub fn multisample<'a>(&'a self, state: &PipelineState) -> vk::PipelineMultisampleStateCreateInfo<'a> {
        let ms = &state.multisample;
        let info = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(ms.rasterization_samples)
            .sample_shading_enable(ms.sample_shading_enable)
            .min_sample_shading(ms.min_sample_shading)
            .alpha_to_coverage_enable(ms.alpha_to_coverage_enable)
            .alpha_to_one_enable(ms.alpha_to_one_enable);
        if ms.sample_mask != 0 {
            info.sample_mask(&self.sample_mask)
        } else {
            info
        }
    }

    pub fn color_blend<'a>(&'a self, state: &PipelineState) -> vk::PipelineColorBlendStateCreateInfo<'a> {
        vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(state.color_blend.logic_op_enable)
            .logic_op(state.color_blend.logic_op)
            .attachments(&self.blend_attachments)
            .blend_constants([1.0; 4])
    }
}

impl PipelineState {
    pub fn input_assembly_info(&self) -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.input_assembly.topology.to_vk())
            .primitive_restart_enable(self.input_assembly.primitive_restart_enable)
    }

    pub fn viewport_info(&self) -> vk::PipelineViewportStateCreateInfo<'static> {
        vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(self.viewport.viewport_count)
            .scissor_count(self.viewport.scissor_count)
    }

    pub fn rasterization_info(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        let r = &self.rasterization;
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(r.depth_clamp_enable)
            .rasterizer_discard_enable(r.rasterizer_discard_enable)
            .polygon_mode(r.polygon_mode.to_vk())
            .cull_mode(r.cull_mode.to_vk())
            .front_face(r.front_face.to_vk())
            .depth_bias_enable(r.depth_bias_enable)
            .line_width(1.0)
    }

    pub fn depth_stencil_info(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        let ds = &self.depth_stencil;
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(ds.depth_test_enable)
            .depth_write_enable(ds.depth_write_enable)
            .depth_compare_op(ds.depth_compare_op.to_vk())
            .depth_bounds_test_enable(ds.depth_bounds_test_enable)
            .stencil_test_enable(ds.stencil_test_enable)
            .front(ds.front.to_vk())
            .back(ds.back.to_vk())
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_clean() {
        let state = PipelineState::new();
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_change_marks_dirty_and_clear_resets() {
        let mut state = PipelineState::new();
        state.set_rasterization_state(RasterizationState {
            cull_mode: CullMode::None,
            ..Default::default()
        });
        assert!(state.is_dirty());
        state.clear_dirty();
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_setting_same_value_stays_clean() {
        let mut state = PipelineState::new();
        state.clear_dirty();
        state.set_input_assembly_state(InputAssemblyState::default());
        state.set_subpass_index(0);
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_revert_to_flushed_value_is_clean() {
        let mut state = PipelineState::new();
        state.clear_dirty();

        let wireframe = RasterizationState {
            polygon_mode: PolygonMode::Line,
            ..Default::default()
        };
        state.set_rasterization_state(wireframe);
        assert!(state.is_dirty());
        state.set_rasterization_state(RasterizationState::default());
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_hash_tracks_every_sub_state() {
        let base = PipelineState::new();
        let base_hash = base.hash_value();

        let mut state = base.clone();
        state.set_multisample_state(MultisampleState {
            min_sample_shading: 0.5,
            ..Default::default()
        });
        assert_ne!(state.hash_value(), base_hash);

        let mut state = base.clone();
        state.set_specialization_constant(0, 3u32);
        assert_ne!(state.hash_value(), base_hash);

        let mut state = base.clone();
        state.set_color_blend_attachment_count(2);
        assert_ne!(state.hash_value(), base_hash);

        let mut state = base.clone();
        state.set_vertex_input_state(VertexInputState {
            bindings: vec![VertexInputBinding {
                binding: 0,
                stride: 12,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![],
        });
        assert_ne!(state.hash_value(), base_hash);

        assert_eq!(PipelineState::new().hash_value(), base_hash);
    }

    #[test]
    fn test_specialization_constants_pack() {
        let mut constants = SpecializationConstantState::default();
        assert!(constants.set_constant(1, 7u32));
        assert!(constants.set_constant(0, 2u32));
        assert!(!constants.set_constant(0, 2u32));

        let (entries, data) = constants.pack();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].constant_id, 0);
        assert_eq!(entries[1].offset, 4);
        assert_eq!(data, [2, 0, 0, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn test_blend_attachment_count_resize() {
        let mut state = PipelineState::new();
        state.set_color_blend_attachment_count(3);
        assert_eq!(state.color_blend_state().attachments.len(), 3);
        let info = GraphicsStateInfo::new(&state);
        assert_eq!(info.blend_attachments.len(), 3);
        assert_eq!(
            info.blend_attachments[0].color_write_mask,
            vk::ColorComponentFlags::RGBA
        );
    }

    #[test]
    fn test_alpha_blend_factors() {
        let blend = ColorBlendAttachmentState::alpha_blend().to_vk();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blend.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
    }
}

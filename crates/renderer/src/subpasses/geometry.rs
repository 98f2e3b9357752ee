//! Scene traversal shared by the forward and G-buffer subpasses.

use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::pipeline::PipelineLayout;
use lumen_rhi::pipeline_state::{
    BlendFactor, ColorBlendAttachmentState, ColorBlendState, CullMode, MultisampleState,
    RasterizationState, VertexInputAttribute, VertexInputBinding, VertexInputState,
};
use lumen_rhi::shader::{ShaderResourceType, ShaderSource, ShaderStage, ShaderVariant};
use lumen_scene::{AlphaMode, Material, SubMesh};
use tracing::warn;

use crate::command_recorder::CommandRecorder;
use crate::error::RenderResult;
use crate::render_target::gbuffer;
use crate::subpass::{FrameContext, Subpass, SubpassCore};
use crate::ubo::{GlobalUniform, MaterialPushConstants};

pub const GEOMETRY_VERT: &str = include_str!("../../shaders/geometry.vert");
pub const GBUFFER_FRAG: &str = include_str!("../../shaders/gbuffer.frag");

/// Binding of the per-draw [`GlobalUniform`] in set 0.
pub const GLOBAL_UNIFORM_BINDING: u32 = 1;

/// Vertex attribute names by the location the built-in shaders read them at.
const ATTRIBUTE_LOCATIONS: [(&str, u32); 3] = [("position", 0), ("normal", 1), ("texcoord_0", 2)];

/// Defines enabled for a submesh, by attribute or texture name.
const ATTRIBUTE_DEFINES: [(&str, &str); 2] = [("normal", "HAS_NORMAL"), ("texcoord_0", "HAS_TEXCOORD_0")];
const TEXTURE_DEFINES: [(&str, &str); 1] = [("base_color_texture", "HAS_BASE_COLOR_TEXTURE")];

/// One submesh instance queued for drawing.
#[derive(Clone, Copy)]
pub struct DrawItem<'a> {
    pub submesh: &'a SubMesh,
    pub material: &'a Material,
    pub model: Mat4,
    /// Squared distance from the camera to the instance's bounds center
    pub distance: f32,
}

/// Splits the scene's submeshes into opaque draws sorted front to back and
/// transparent draws sorted back to front.
pub fn sort_draws<'a>(
    ctx: &FrameContext<'a>,
    default_material: &'a Material,
) -> (Vec<DrawItem<'a>>, Vec<DrawItem<'a>>) {
    let scene = ctx.scene();
    let camera_position = scene.world_position(scene.camera_node(ctx.camera()));

    let mut opaque = Vec::new();
    let mut transparent = Vec::new();
    for (_, mesh, model) in scene.mesh_instances() {
        let bounds = mesh.bounds.transform(model);
        let center = if bounds.is_empty() {
            model.w_axis.truncate()
        } else {
            bounds.center()
        };
        let distance = center.distance_squared(camera_position);

        for submesh in &mesh.submeshes {
            let material = submesh
                .material
                .map_or(default_material, |id| scene.material(id));
            let item = DrawItem {
                submesh,
                material,
                model,
                distance,
            };
            if material.is_transparent() {
                transparent.push(item);
            } else {
                opaque.push(item);
            }
        }
    }

    opaque.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    transparent.sort_by(|a, b| b.distance.total_cmp(&a.distance));
    (opaque, transparent)
}

/// Alpha-over for color; alpha accumulates towards opaque.
pub fn transparent_blend_attachment() -> ColorBlendAttachmentState {
    ColorBlendAttachmentState {
        src_alpha_blend_factor: BlendFactor::One,
        ..ColorBlendAttachmentState::alpha_blend()
    }
}

/// Shader variant of a submesh: its own defines plus the attributes and
/// textures it provides.
pub fn submesh_variant(submesh: &SubMesh, material: &Material) -> ShaderVariant {
    let mut variant = submesh.shader_variant.clone();
    for (attribute, define) in ATTRIBUTE_DEFINES {
        if submesh.attributes.contains_key(attribute) {
            variant.add_define(define);
        }
    }
    for (texture, define) in TEXTURE_DEFINES {
        if material.textures.contains_key(texture) {
            variant.add_define(define);
        }
    }
    variant
}

/// Vertex input state matching the layout's vertex inputs to the submesh
/// attributes, one binding per attribute buffer.
pub fn vertex_input_state(layout: &PipelineLayout, submesh: &SubMesh) -> (VertexInputState, Vec<Arc<Buffer>>) {
    let mut state = VertexInputState::default();
    let mut buffers = Vec::new();

    let inputs = layout.resources().iter().filter(|r| {
        r.resource_type == ShaderResourceType::Input && r.stages.contains(vk::ShaderStageFlags::VERTEX)
    });
    for input in inputs {
        let attribute = submesh.attribute(&input.name).or_else(|| {
            ATTRIBUTE_LOCATIONS
                .iter()
                .find(|(_, location)| *location == input.location)
                .and_then(|(name, _)| submesh.attribute(name))
        });
        let Some((attribute, buffer)) = attribute else {
            warn!(
                "Submesh '{}' has no attribute for vertex input {} at location {}",
                submesh.name, input.name, input.location
            );
            continue;
        };

        let binding = state.bindings.len() as u32;
        state.bindings.push(VertexInputBinding {
            binding,
            stride: attribute.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        state.attributes.push(VertexInputAttribute {
            location: input.location,
            binding,
            format: attribute.format,
            offset: attribute.offset,
        });
        buffers.push(buffer.clone());
    }
    (state, buffers)
}

pub fn material_push_constants(material: &Material) -> MaterialPushConstants {
    let alpha_mask = if material.alpha_mode == AlphaMode::Mask { 1.0 } else { 0.0 };
    MaterialPushConstants {
        base_color_factor: material.base_color_factor,
        emissive_cutoff: material.emissive.extend(material.alpha_cutoff),
        metallic_roughness: glam::Vec4::new(
            material.metallic_factor,
            material.roughness_factor,
            alpha_mask,
            0.0,
        ),
    }
}

/// Records every mesh of the scene with the core's shaders: opaque first,
/// then transparent with alpha blending.
pub fn draw_scene(core: &SubpassCore, recorder: &mut CommandRecorder, ctx: &FrameContext<'_>) -> RenderResult<()> {
    let default_material = Material::default();
    let (opaque, transparent) = sort_draws(ctx, &default_material);

    let scene = ctx.scene();
    let view_proj = scene.camera_view_proj(ctx.camera());
    let camera_position = scene.world_position(scene.camera_node(ctx.camera()));

    recorder.set_multisample_state(MultisampleState {
        rasterization_samples: core.sample_count(),
        ..Default::default()
    });

    for item in &opaque {
        draw_submesh(core, recorder, item, view_proj, camera_position)?;
    }

    if !transparent.is_empty() {
        let attachment_count = recorder.pipeline_state().color_blend_state().attachments.len();
        recorder.set_color_blend_state(ColorBlendState {
            attachments: vec![transparent_blend_attachment(); attachment_count],
            ..Default::default()
        });
        for item in &transparent {
            draw_submesh(core, recorder, item, view_proj, camera_position)?;
        }
    }
    Ok(())
}

fn draw_submesh(
    core: &SubpassCore,
    recorder: &mut CommandRecorder,
    item: &DrawItem<'_>,
    view_proj: Mat4,
    camera_position: Vec3,
) -> RenderResult<()> {
    let submesh = item.submesh;
    let cache = recorder.frame().cache().clone();
    let variant = submesh_variant(submesh, item.material);
    let vertex = cache.request_shader_module(ShaderStage::Vertex, core.vertex_source(), &variant)?;
    let fragment = cache.request_shader_module(ShaderStage::Fragment, core.fragment_source(), &variant)?;
    let layout = cache.request_pipeline_layout(&[vertex, fragment])?;

    let (vertex_input, vertex_buffers) = vertex_input_state(&layout, submesh);
    recorder.bind_pipeline_layout(layout.clone());
    recorder.set_vertex_input_state(vertex_input);
    recorder.set_rasterization_state(RasterizationState {
        cull_mode: if item.material.double_sided {
            CullMode::None
        } else {
            CullMode::Back
        },
        ..Default::default()
    });

    let global = recorder.allocate_buffer(BufferUsage::Uniform, GlobalUniform::SIZE as u64)?;
    global.update_pod(&GlobalUniform::new(item.model, view_proj, camera_position))?;
    recorder.bind_allocation(&global, 0, GLOBAL_UNIFORM_BINDING, 0);

    recorder.push_constants(&material_push_constants(item.material))?;

    if let Some(set_layout) = layout.set_layout(0) {
        for (name, texture) in &item.material.textures {
            if let Some(binding) = set_layout.binding_by_name(name) {
                let sampler = (binding.descriptor_type == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .then_some(&texture.sampler);
                recorder.bind_image(&texture.view, sampler, 0, binding.binding, 0);
            }
            if let Some(binding) = set_layout.binding_by_name(&format!("{name}_sampler")) {
                recorder.bind_sampler(&texture.sampler, 0, binding.binding, 0);
            }
        }
    }

    let buffers: Vec<&Buffer> = vertex_buffers.iter().map(Arc::as_ref).collect();
    let offsets = vec![0; buffers.len()];
    if !buffers.is_empty() {
        recorder.bind_vertex_buffers(0, &buffers, &offsets);
    }

    match &submesh.index_buffer {
        Some(index_buffer) => {
            recorder.bind_index_buffer(index_buffer, 0, submesh.index_type);
            recorder.draw_indexed(submesh.index_count, 1, submesh.index_offset, 0, 0)
        }
        _ => recorder.draw(submesh.vertex_count, 1, 0, 0),
    }
}

/// Writes the scene into the G-buffer of a deferred target.
pub struct GeometrySubpass {
    core: SubpassCore,
}

impl Default for GeometrySubpass {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometrySubpass {
    /// Built-in G-buffer shaders writing albedo, normal, material, position
    /// and emissive.
    pub fn new() -> Self {
        let mut core = SubpassCore::new(
            ShaderSource::new("geometry.vert", GEOMETRY_VERT),
            ShaderSource::new("gbuffer.frag", GBUFFER_FRAG),
        );
        core.set_output_attachments(vec![
            gbuffer::ALBEDO,
            gbuffer::NORMAL,
            gbuffer::MATERIAL,
            gbuffer::POSITION,
            gbuffer::EMISSIVE,
        ]);
        core.set_debug_name("geometry");
        Self { core }
    }

    /// Custom shaders writing attachment 0.
    pub fn with_shaders(vertex_source: ShaderSource, fragment_source: ShaderSource) -> Self {
        Self {
            core: SubpassCore::new(vertex_source, fragment_source),
        }
    }
}

impl Subpass for GeometrySubpass {
    fn core(&self) -> &SubpassCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SubpassCore {
        &mut self.core
    }

    fn draw(&mut self, recorder: &mut CommandRecorder, ctx: &FrameContext<'_>) -> RenderResult<()> {
        draw_scene(&self.core, recorder, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use lumen_scene::VertexAttribute;

    #[test]
    fn test_transparent_blend_is_alpha_over() {
        let blend = transparent_blend_attachment();
        assert!(blend.blend_enable);
        assert_eq!(blend.src_color_blend_factor, BlendFactor::SrcAlpha);
        assert_eq!(blend.dst_color_blend_factor, BlendFactor::OneMinusSrcAlpha);
        assert_eq!(blend.src_alpha_blend_factor, BlendFactor::One);
    }

    #[test]
    fn test_material_push_constants_encoding() {
        let mut material = Material::new("m")
            .with_base_color(Vec4::new(0.5, 0.25, 1.0, 0.75))
            .with_emissive(Vec3::new(1.0, 0.0, 0.0))
            .with_alpha_mode(AlphaMode::Mask);
        material.alpha_cutoff = 0.3;
        material.metallic_factor = 0.9;
        material.roughness_factor = 0.1;

        let push = material_push_constants(&material);
        assert_eq!(push.base_color_factor, Vec4::new(0.5, 0.25, 1.0, 0.75));
        assert_eq!(push.emissive_cutoff, Vec4::new(1.0, 0.0, 0.0, 0.3));
        assert_eq!(push.metallic_roughness, Vec4::new(0.9, 0.1, 1.0, 0.0));
    }

    #[test]
    fn test_submesh_variant_defines() {
        let mut submesh = SubMesh::new("s");
        submesh
            .attributes
            .insert("normal".to_string(), VertexAttribute::new(vk::Format::R32G32B32_SFLOAT, 12));
        submesh.shader_variant.add_define("CUSTOM");

        let variant = submesh_variant(&submesh, &Material::default());
        assert!(variant.defines().contains_key("CUSTOM"));
        assert!(variant.defines().contains_key("HAS_NORMAL"));
        assert!(!variant.defines().contains_key("HAS_TEXCOORD_0"));
        assert!(!variant.defines().contains_key("HAS_BASE_COLOR_TEXTURE"));
    }
}

//! GLSL to SPIR-V compilation and resource reflection with `naga`.
//!
//! Sources are parsed by the GLSL frontend with the variant's defines,
//! validated, and written out as SPIR-V. Resources are read from the naga
//! module rather than from the SPIR-V, so no separate reflection library is
//! needed.

use ash::vk;
use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ArraySize, Binding, ImageClass, Module, TypeInner};
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::shader::{
    ShaderResource, ShaderResourceMode, ShaderResourceType, ShaderSource, ShaderStage,
    ShaderVariant,
};

/// SPIR-V words and the resources the shader declares.
#[derive(Debug)]
pub struct CompiledShader {
    pub spirv: Vec<u32>,
    pub resources: Vec<ShaderResource>,
}

fn naga_stage(stage: ShaderStage) -> RhiResult<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Ok(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Ok(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Ok(naga::ShaderStage::Compute),
        other => Err(RhiError::Unsupported(format!(
            "GLSL compilation of {other} shaders"
        ))),
    }
}

/// Compiles `source` for `stage` with the defines and resource modes of
/// `variant`.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] on parse, validation or SPIR-V
/// generation failure, and [`RhiError::Unsupported`] for stages the GLSL
/// frontend cannot handle.
pub fn compile_glsl(
    stage: ShaderStage,
    source: &ShaderSource,
    variant: &ShaderVariant,
) -> RhiResult<CompiledShader> {
    let naga_stage = naga_stage(stage)?;

    let mut options = glsl::Options::from(naga_stage);
    for (name, value) in variant.defines() {
        options.defines.insert(name.clone(), value.clone());
    }

    let module = glsl::Frontend::default()
        .parse(&options, source.source())
        .map_err(|e| RhiError::ShaderError(format!("{}: {:?}", source.name(), e)))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| RhiError::ShaderError(format!("{}: {:?}", source.name(), e)))?;

    let mut spv_options = spv::Options::default();
    spv_options
        .flags
        .remove(spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    let pipeline_options = spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: "main".to_string(),
    };
    let spirv = spv::write_vec(&module, &info, &spv_options, Some(&pipeline_options))
        .map_err(|e| RhiError::ShaderError(format!("{}: {:?}", source.name(), e)))?;

    let resources = reflect(&module, stage, variant);
    debug!(
        "Compiled {} shader '{}': {} words, {} resources",
        stage,
        source.name(),
        spirv.len(),
        resources.len()
    );

    Ok(CompiledShader { spirv, resources })
}

/// Resources declared by the `main` entry point of `module`.
pub fn reflect(module: &Module, stage: ShaderStage, variant: &ShaderVariant) -> Vec<ShaderResource> {
    let stages = stage.to_vk_stage();
    let mut resources = Vec::new();

    for (_, var) in module.global_variables.iter() {
        let ty = &module.types[var.ty];
        let var_name = var.name.clone();
        let name = var_name
            .clone()
            .or_else(|| ty.name.clone())
            .unwrap_or_default();
        let mode = var_name
            .as_deref()
            .and_then(|n| variant.resource_mode(n))
            .or_else(|| ty.name.as_deref().and_then(|n| variant.resource_mode(n)))
            .unwrap_or_default();

        let mut resource = ShaderResource {
            name,
            resource_type: ShaderResourceType::BufferUniform,
            mode,
            stages,
            set: 0,
            binding: 0,
            array_size: 1,
            offset: 0,
            size: 0,
            location: 0,
        };
        if let Some(binding) = &var.binding {
            resource.set = binding.group;
            resource.binding = binding.binding;
        }

        match var.space {
            AddressSpace::Uniform => {
                resource.size = ty.inner.size(module.to_ctx());
            }
            AddressSpace::Storage { .. } => {
                resource.resource_type = ShaderResourceType::BufferStorage;
                resource.size = ty.inner.size(module.to_ctx());
            }
            AddressSpace::PushConstant => {
                resource.resource_type = ShaderResourceType::PushConstant;
                resource.size = ty.inner.size(module.to_ctx());
                resource.mode = ShaderResourceMode::Static;
            }
            AddressSpace::Handle => {
                let (inner, array_size) = match ty.inner {
                    TypeInner::BindingArray { base, size } => {
                        let count = match size {
                            ArraySize::Constant(n) => n.get(),
                            _ => 1,
                        };
                        (&module.types[base].inner, count)
                    }
                    ref inner => (inner, 1),
                };
                resource.array_size = array_size;
                resource.resource_type = match inner {
                    TypeInner::Image {
                        class: ImageClass::Storage { .. },
                        ..
                    } => ShaderResourceType::ImageStorage,
                    TypeInner::Image { .. } => ShaderResourceType::Image,
                    TypeInner::Sampler { .. } => ShaderResourceType::Sampler,
                    _ => continue,
                };
            }
            _ => continue,
        }

        if resource.resource_type.is_descriptor() && var.binding.is_none() {
            continue;
        }
        resources.push(resource);
    }

    if let Some(entry) = module.entry_points.iter().find(|ep| ep.name == "main") {
        for argument in &entry.function.arguments {
            collect_locations(
                module,
                argument.name.as_deref(),
                argument.ty,
                argument.binding.as_ref(),
                ShaderResourceType::Input,
                stages,
                &mut resources,
            );
        }
        if let Some(result) = &entry.function.result {
            collect_locations(
                module,
                None,
                result.ty,
                result.binding.as_ref(),
                ShaderResourceType::Output,
                stages,
                &mut resources,
            );
        }
    }

    resources
}

/// Adds one resource per `Location` binding, descending into structs.
fn collect_locations(
    module: &Module,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    resource_type: ShaderResourceType,
    stages: vk::ShaderStageFlags,
    resources: &mut Vec<ShaderResource>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            resources.push(ShaderResource {
                name: name.unwrap_or_default().to_string(),
                resource_type,
                mode: ShaderResourceMode::Static,
                stages,
                set: 0,
                binding: 0,
                array_size: 1,
                offset: 0,
                size: module.types[ty].inner.size(module.to_ctx()),
                location: *location,
            });
        }
        Some(_) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(
                        module,
                        member.name.as_deref(),
                        member.ty,
                        member.binding.as_ref(),
                        resource_type,
                        stages,
                        resources,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = r#"#version 450
layout(location = 0) in vec3 position;
#ifdef HAS_NORMAL
layout(location = 2) in vec3 normal;
#endif

layout(set = 0, binding = 1) uniform GlobalUniform {
    mat4 model;
    mat4 view_proj;
    vec3 camera_position;
} global_uniform;

layout(push_constant) uniform MaterialPush {
    vec4 base_color;
    float metallic;
    float roughness;
} material;

layout(location = 0) out vec4 o_color;

void main() {
#ifdef HAS_NORMAL
    o_color = vec4(normal, material.metallic);
#else
    o_color = material.base_color;
#endif
    gl_Position = global_uniform.view_proj * global_uniform.model * vec4(position, 1.0);
}
"#;

    const FRAGMENT: &str = r#"#version 450
layout(set = 0, binding = 2) uniform texture2D base_color_texture;
layout(set = 0, binding = 3) uniform sampler base_color_sampler;
layout(set = 1, binding = 0) buffer Counters { uint hits[]; } counters;

layout(location = 0) in vec4 in_color;
layout(location = 0) out vec4 o_color;

void main() {
    o_color = in_color * texture(sampler2D(base_color_texture, base_color_sampler), vec2(0.5));
}
"#;

    fn find<'a>(resources: &'a [ShaderResource], ty: ShaderResourceType) -> Vec<&'a ShaderResource> {
        resources.iter().filter(|r| r.resource_type == ty).collect()
    }

    #[test]
    fn test_vertex_reflection() {
        let source = ShaderSource::new("test.vert", VERTEX);
        let compiled = compile_glsl(ShaderStage::Vertex, &source, &ShaderVariant::new()).unwrap();
        assert!(!compiled.spirv.is_empty());
        assert_eq!(compiled.spirv[0], 0x0723_0203);

        let uniforms = find(&compiled.resources, ShaderResourceType::BufferUniform);
        assert_eq!(uniforms.len(), 1);
        assert_eq!((uniforms[0].set, uniforms[0].binding), (0, 1));
        assert!(uniforms[0].size >= 128 + 12);
        assert_eq!(uniforms[0].stages, vk::ShaderStageFlags::VERTEX);

        let push = find(&compiled.resources, ShaderResourceType::PushConstant);
        assert_eq!(push.len(), 1);
        assert!(push[0].size >= 24);

        let inputs = find(&compiled.resources, ShaderResourceType::Input);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].location, 0);
        assert_eq!(find(&compiled.resources, ShaderResourceType::Output).len(), 1);
    }

    #[test]
    fn test_defines_select_code() {
        let source = ShaderSource::new("test.vert", VERTEX);
        let mut variant = ShaderVariant::new();
        variant.add_define("HAS_NORMAL");
        let compiled = compile_glsl(ShaderStage::Vertex, &source, &variant).unwrap();
        let mut locations: Vec<u32> = find(&compiled.resources, ShaderResourceType::Input)
            .iter()
            .map(|r| r.location)
            .collect();
        locations.sort_unstable();
        assert_eq!(locations, vec![0, 2]);
    }

    #[test]
    fn test_fragment_reflection() {
        let source = ShaderSource::new("test.frag", FRAGMENT);
        let compiled =
            compile_glsl(ShaderStage::Fragment, &source, &ShaderVariant::new()).unwrap();

        let images = find(&compiled.resources, ShaderResourceType::Image);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "base_color_texture");
        assert_eq!(images[0].binding, 2);

        let samplers = find(&compiled.resources, ShaderResourceType::Sampler);
        assert_eq!(samplers.len(), 1);
        assert_eq!(samplers[0].binding, 3);

        let storage = find(&compiled.resources, ShaderResourceType::BufferStorage);
        assert_eq!(storage.len(), 1);
        assert_eq!((storage[0].set, storage[0].binding), (1, 0));
    }

    #[test]
    fn test_variant_mode_override() {
        let source = ShaderSource::new("test.vert", VERTEX);
        let mut variant = ShaderVariant::new();
        variant.set_resource_mode("global_uniform", ShaderResourceMode::Dynamic);
        let compiled = compile_glsl(ShaderStage::Vertex, &source, &variant).unwrap();
        let uniform = find(&compiled.resources, ShaderResourceType::BufferUniform)[0];
        assert_eq!(uniform.mode, ShaderResourceMode::Dynamic);
        assert_eq!(
            uniform.descriptor_type(),
            Some(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        );
    }

    #[test]
    fn test_parse_error_is_reported() {
        let source = ShaderSource::new("broken.frag", "#version 450\nvoid main( {\n");
        let err = compile_glsl(ShaderStage::Fragment, &source, &ShaderVariant::new()).unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(ref msg) if msg.contains("broken.frag")));
    }

    #[test]
    fn test_geometry_stage_is_unsupported() {
        let source = ShaderSource::new("x.geom", "#version 450\nvoid main() {}\n");
        let err = compile_glsl(ShaderStage::Geometry, &source, &ShaderVariant::new()).unwrap_err();
        assert!(matches!(err, RhiError::Unsupported(_)));
    }
}

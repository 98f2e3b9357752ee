//! Shader sources, variants, reflected resources and shader modules.
//!
//! - [`ShaderSource`] is GLSL text identified by the hash of that text.
//! - [`ShaderVariant`] adds preprocessor defines and per-resource mode
//!   overrides; its id is the hash of both.
//! - [`ShaderModule`] is the compiled `VkShaderModule` together with the
//!   resources reflected from it. Its id combines stage, source id and
//!   variant id, which is what the resource cache deduplicates on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::device::Device;
//! use lumen_rhi::shader::{ShaderModule, ShaderSource, ShaderStage, ShaderVariant};
//!
//! # fn example(device: Arc<Device>) -> lumen_rhi::RhiResult<()> {
//! let source = ShaderSource::new("triangle.vert", "#version 450\nvoid main() {}\n");
//! let mut variant = ShaderVariant::default();
//! variant.add_define("HAS_NORMAL");
//!
//! let module = ShaderModule::new(device, ShaderStage::Vertex, &source, &variant)?;
//! let _stage_info = module.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ash::vk;
use tracing::debug;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

use crate::device::Device;
use crate::error::RhiResult;
use crate::shader_compiler;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// GLSL source text.
#[derive(Clone, Debug)]
pub struct ShaderSource {
    id: u64,
    name: String,
    source: Arc<str>,
}

impl ShaderSource {
    pub fn new(name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        let source: Arc<str> = source.into();
        Self {
            id: xxh3_64(source.as_bytes()),
            name: name.into(),
            source,
        }
    }

    /// Hash of the source text.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// How a descriptor resource is declared in its set layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShaderResourceMode {
    #[default]
    Static,
    /// Uniform and storage buffers become `*_DYNAMIC` descriptors
    Dynamic,
    UpdateAfterBind,
}

/// Defines and resource-mode overrides applied when compiling a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderVariant {
    defines: BTreeMap<String, String>,
    modes: BTreeMap<String, ShaderResourceMode>,
}

impl ShaderVariant {
    pub fn new() -> Self {
        Self::default()
    }

    /// `#define name` (optionally `name=value`).
    pub fn add_define(&mut self, define: &str) {
        let (name, value) = define.split_once('=').unwrap_or((define, ""));
        self.defines.insert(name.to_string(), value.to_string());
    }

    pub fn add_definitions<'a>(&mut self, defines: impl IntoIterator<Item = &'a str>) {
        for define in defines {
            self.add_define(define);
        }
    }

    pub fn remove_define(&mut self, name: &str) {
        self.defines.remove(name);
    }

    /// Declares the named resource with `mode` instead of `Static`.
    pub fn set_resource_mode(&mut self, resource: &str, mode: ShaderResourceMode) {
        self.modes.insert(resource.to_string(), mode);
    }

    pub fn defines(&self) -> &BTreeMap<String, String> {
        &self.defines
    }

    pub fn resource_mode(&self, resource: &str) -> Option<ShaderResourceMode> {
        self.modes.get(resource).copied()
    }

    /// Hash of the defines and mode overrides.
    pub fn id(&self) -> u64 {
        let mut hasher = Xxh3::new();
        self.defines.hash(&mut hasher);
        self.modes.hash(&mut hasher);
        hasher.finish()
    }
}

/// Kind of a reflected shader resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderResourceType {
    Input,
    InputAttachment,
    Output,
    Image,
    ImageSampler,
    ImageStorage,
    Sampler,
    BufferUniform,
    BufferStorage,
    PushConstant,
}

impl ShaderResourceType {
    /// Whether the resource lives in a descriptor set.
    pub fn is_descriptor(self) -> bool {
        !matches!(
            self,
            ShaderResourceType::Input | ShaderResourceType::Output | ShaderResourceType::PushConstant
        )
    }
}

/// A resource reflected from a compiled shader.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderResource {
    pub name: String,
    pub resource_type: ShaderResourceType,
    pub mode: ShaderResourceMode,
    pub stages: vk::ShaderStageFlags,
    pub set: u32,
    pub binding: u32,
    pub array_size: u32,
    /// Push constant byte offset
    pub offset: u32,
    /// Block size in bytes for buffers and push constants
    pub size: u32,
    /// Location of stage inputs and outputs
    pub location: u32,
}

impl ShaderResource {
    /// Descriptor type this resource occupies, or `None` for non-descriptors.
    pub fn descriptor_type(&self) -> Option<vk::DescriptorType> {
        let dynamic = self.mode == ShaderResourceMode::Dynamic;
        let ty = match self.resource_type {
            ShaderResourceType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
            ShaderResourceType::Image => vk::DescriptorType::SAMPLED_IMAGE,
            ShaderResourceType::ImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ShaderResourceType::ImageStorage => vk::DescriptorType::STORAGE_IMAGE,
            ShaderResourceType::Sampler => vk::DescriptorType::SAMPLER,
            ShaderResourceType::BufferUniform if dynamic => {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            }
            ShaderResourceType::BufferUniform => vk::DescriptorType::UNIFORM_BUFFER,
            ShaderResourceType::BufferStorage if dynamic => {
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
            }
            ShaderResourceType::BufferStorage => vk::DescriptorType::STORAGE_BUFFER,
            ShaderResourceType::Input
            | ShaderResourceType::Output
            | ShaderResourceType::PushConstant => return None,
        };
        Some(ty)
    }
}

/// Merges the resources of several stages.
///
/// Descriptors sharing `(set, binding)` and push constants combine their
/// stage flags (push constants also take the largest size). Stage inputs
/// and outputs are kept per stage.
pub fn aggregate_resources<'a>(
    resources: impl IntoIterator<Item = &'a ShaderResource>,
) -> Vec<ShaderResource> {
    let mut merged: Vec<ShaderResource> = Vec::new();
    for resource in resources {
        let existing = merged.iter_mut().find(|r| match resource.resource_type {
            ShaderResourceType::Input | ShaderResourceType::Output => false,
            ShaderResourceType::PushConstant => r.resource_type == ShaderResourceType::PushConstant,
            _ => r.resource_type.is_descriptor() && r.set == resource.set && r.binding == resource.binding,
        });
        match existing {
            Some(existing) => {
                existing.stages |= resource.stages;
                existing.size = existing.size.max(resource.size);
                existing.array_size = existing.array_size.max(resource.array_size);
                if resource.mode != ShaderResourceMode::Static {
                    existing.mode = resource.mode;
                }
            }
            None => merged.push(resource.clone()),
        }
    }
    merged
}

/// A compiled `VkShaderModule` and its reflected resources.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
    id: u64,
    debug_name: String,
    resources: Vec<ShaderResource>,
}

impl ShaderModule {
    /// Compiles `source` with `variant` and creates the module.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if compilation fails, or a Vulkan
    /// error if module creation fails.
    pub fn new(
        device: Arc<Device>,
        stage: ShaderStage,
        source: &ShaderSource,
        variant: &ShaderVariant,
    ) -> RhiResult<Self> {
        let compiled = shader_compiler::compile_glsl(stage, source, variant)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&compiled.spirv);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };
        device.set_object_name(module, source.name());

        debug!(
            "Created {} shader module '{}' ({} resources)",
            stage,
            source.name(),
            compiled.resources.len()
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point: CString::from(c"main"),
            id: Self::compute_id(stage, source, variant),
            debug_name: source.name().to_string(),
            resources: compiled.resources,
        })
    }

    /// The cache key of a module: stage, source id and variant id.
    pub fn compute_id(stage: ShaderStage, source: &ShaderSource, variant: &ShaderVariant) -> u64 {
        let mut hasher = Xxh3::new();
        stage.hash(&mut hasher);
        source.id().hash(&mut hasher);
        variant.id().hash(&mut hasher);
        hasher.finish()
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    #[inline]
    pub fn resources(&self) -> &[ShaderResource] {
        &self.resources
    }

    /// Stage info for pipeline creation; borrows the entry point name.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_shader_module(self.module, None) };
        debug!("Destroyed {} shader module '{}'", self.stage, self.debug_name);
    }
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("name", &self.debug_name)
            .field("stage", &self.stage)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(
        resource_type: ShaderResourceType,
        stages: vk::ShaderStageFlags,
        binding: u32,
    ) -> ShaderResource {
        ShaderResource {
            name: format!("r{binding}"),
            resource_type,
            mode: ShaderResourceMode::Static,
            stages,
            set: 0,
            binding,
            array_size: 1,
            offset: 0,
            size: 64,
            location: 0,
        }
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(ShaderStage::Vertex.to_vk_stage(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.to_vk_stage(), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderStage::Compute.to_vk_stage(), vk::ShaderStageFlags::COMPUTE);
        assert_eq!(format!("{}", ShaderStage::TessControl), "tessellation control");
    }

    #[test]
    fn test_source_id_depends_on_text_only() {
        let a = ShaderSource::new("a.vert", "void main() {}");
        let b = ShaderSource::new("b.vert", "void main() {}");
        let c = ShaderSource::new("a.vert", "void main() { }");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_variant_id_tracks_defines_and_modes() {
        let mut a = ShaderVariant::new();
        a.add_definitions(["HAS_NORMAL", "LIGHT_COUNT=4"]);
        let mut b = ShaderVariant::new();
        b.add_definitions(["LIGHT_COUNT=4", "HAS_NORMAL"]);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.defines().get("LIGHT_COUNT").map(String::as_str), Some("4"));

        b.set_resource_mode("global", ShaderResourceMode::Dynamic);
        assert_ne!(a.id(), b.id());

        b.remove_define("HAS_NORMAL");
        assert!(!b.defines().contains_key("HAS_NORMAL"));
    }

    #[test]
    fn test_dynamic_mode_changes_descriptor_type() {
        let mut uniform = resource(ShaderResourceType::BufferUniform, vk::ShaderStageFlags::VERTEX, 1);
        assert_eq!(uniform.descriptor_type(), Some(vk::DescriptorType::UNIFORM_BUFFER));
        uniform.mode = ShaderResourceMode::Dynamic;
        assert_eq!(
            uniform.descriptor_type(),
            Some(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
        );
        let push = resource(ShaderResourceType::PushConstant, vk::ShaderStageFlags::VERTEX, 0);
        assert_eq!(push.descriptor_type(), None);
    }

    #[test]
    fn test_aggregate_merges_stages() {
        let vs = vk::ShaderStageFlags::VERTEX;
        let fs = vk::ShaderStageFlags::FRAGMENT;
        let mut small_push = resource(ShaderResourceType::PushConstant, fs, 0);
        small_push.size = 32;
        let resources = [
            resource(ShaderResourceType::BufferUniform, vs, 1),
            resource(ShaderResourceType::PushConstant, vs, 0),
            resource(ShaderResourceType::Input, vs, 0),
            resource(ShaderResourceType::BufferUniform, fs, 1),
            resource(ShaderResourceType::Image, fs, 2),
            small_push,
        ];
        let merged = aggregate_resources(&resources);
        assert_eq!(merged.len(), 4);

        let uniform = merged.iter().find(|r| r.binding == 1).unwrap();
        assert_eq!(uniform.stages, vs | fs);
        let push = merged
            .iter()
            .find(|r| r.resource_type == ShaderResourceType::PushConstant)
            .unwrap();
        assert_eq!(push.stages, vs | fs);
        assert_eq!(push.size, 64);
    }
}

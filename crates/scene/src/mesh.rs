//! Meshes and their GPU-resident submeshes.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use lumen_rhi::buffer::Buffer;
use lumen_rhi::shader::ShaderVariant;

use crate::aabb::Aabb;
use crate::scene::MaterialId;

/// Layout of one named vertex attribute inside its buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub format: vk::Format,
    pub stride: u32,
    pub offset: u32,
}

impl VertexAttribute {
    pub fn new(format: vk::Format, stride: u32) -> Self {
        Self {
            format,
            stride,
            offset: 0,
        }
    }
}

/// A drawable range of geometry with a single material.
///
/// Each attribute (`"position"`, `"normal"`, `"texcoord_0"`, ...) has its own
/// buffer, keyed by the same name as in `attributes`.
#[derive(Clone, Default)]
pub struct SubMesh {
    pub name: String,
    pub vertex_buffers: HashMap<String, Arc<Buffer>>,
    pub attributes: HashMap<String, VertexAttribute>,
    pub index_buffer: Option<Arc<Buffer>>,
    pub index_type: vk::IndexType,
    pub index_offset: u32,
    pub vertex_count: u32,
    pub index_count: u32,
    pub material: Option<MaterialId>,
    /// Defines the geometry shaders are compiled with for this submesh
    pub shader_variant: ShaderVariant,
}

impl SubMesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index_type: vk::IndexType::UINT32,
            ..Default::default()
        }
    }

    /// Adds an attribute stream and its buffer.
    pub fn set_attribute(&mut self, name: &str, attribute: VertexAttribute, buffer: Arc<Buffer>) {
        self.attributes.insert(name.to_string(), attribute);
        self.vertex_buffers.insert(name.to_string(), buffer);
    }

    pub fn attribute(&self, name: &str) -> Option<(&VertexAttribute, &Arc<Buffer>)> {
        Some((self.attributes.get(name)?, self.vertex_buffers.get(name)?))
    }

    pub fn set_indices(&mut self, buffer: Arc<Buffer>, index_type: vk::IndexType, index_count: u32) {
        self.index_buffer = Some(buffer);
        self.index_type = index_type;
        self.index_count = index_count;
    }

    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some() && self.index_count > 0
    }
}

impl std::fmt::Debug for SubMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut attributes: Vec<&str> = self.attributes.keys().map(String::as_str).collect();
        attributes.sort_unstable();
        f.debug_struct("SubMesh")
            .field("name", &self.name)
            .field("attributes", &attributes)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .field("material", &self.material)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub submeshes: Vec<SubMesh>,
    /// Object-space bounds of every submesh
    pub bounds: Aabb,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_submesh(mut self, submesh: SubMesh) -> Self {
        self.submeshes.push(submesh);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submesh_defaults_to_u32_indices() {
        let submesh = SubMesh::new("empty");
        assert_eq!(submesh.index_type, vk::IndexType::UINT32);
        assert!(!submesh.is_indexed());
        assert!(submesh.attribute("position").is_none());
    }

    #[test]
    fn test_vertex_attribute_offset_defaults_to_zero() {
        let attribute = VertexAttribute::new(vk::Format::R32G32B32_SFLOAT, 12);
        assert_eq!(attribute.offset, 0);
        assert_eq!(attribute.stride, 12);
    }
}

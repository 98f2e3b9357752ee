//! Built-in meshes uploaded to device-local memory through a staging copy.

use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec3};
use lumen_rhi::RhiResult;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::device::Device;
use tracing::debug;

use crate::aabb::Aabb;
use crate::mesh::{Mesh, SubMesh, VertexAttribute};
use crate::scene::MaterialId;

/// CPU-side geometry with one stream per attribute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl Geometry {
    /// Single triangle covering the whole viewport in clip space.
    pub fn fullscreen_triangle() -> Self {
        Self {
            positions: vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(3.0, -1.0, 0.0),
                Vec3::new(-1.0, 3.0, 0.0),
            ],
            normals: vec![Vec3::Z; 3],
            texcoords: vec![Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(0.0, 2.0)],
            indices: vec![0, 1, 2],
        }
    }

    /// Unit quad in the XZ plane facing `+Y`, centered on the origin.
    pub fn quad(size: f32) -> Self {
        let h = size * 0.5;
        Self {
            positions: vec![
                Vec3::new(-h, 0.0, -h),
                Vec3::new(-h, 0.0, h),
                Vec3::new(h, 0.0, h),
                Vec3::new(h, 0.0, -h),
            ],
            normals: vec![Vec3::Y; 4],
            texcoords: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Axis-aligned cube with per-face normals.
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        // (normal, tangent u, tangent v) per face, counter-clockwise seen from outside
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        let mut geometry = Self::default();
        for (normal, u, v) in faces {
            let base = geometry.positions.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                geometry.positions.push((normal + u * su + v * sv) * h);
                geometry.normals.push(normal);
                geometry
                    .texcoords
                    .push(Vec2::new((su + 1.0) * 0.5, (1.0 - sv) * 0.5));
            }
            geometry
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        geometry
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// Uploads every stream and returns a single-submesh mesh.
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer cannot be created or the staging copy
    /// fails.
    pub fn upload(&self, device: &Arc<Device>, name: &str, material: Option<MaterialId>) -> RhiResult<Mesh> {
        let mut submesh = SubMesh::new(name);

        let position = Buffer::new_device_local(
            device.clone(),
            BufferUsage::Vertex,
            bytemuck::cast_slice(&self.positions),
        )?;
        submesh.set_attribute(
            "position",
            VertexAttribute::new(vk::Format::R32G32B32_SFLOAT, size_of::<Vec3>() as u32),
            Arc::new(position),
        );

        if !self.normals.is_empty() {
            let normal = Buffer::new_device_local(
                device.clone(),
                BufferUsage::Vertex,
                bytemuck::cast_slice(&self.normals),
            )?;
            submesh.set_attribute(
                "normal",
                VertexAttribute::new(vk::Format::R32G32B32_SFLOAT, size_of::<Vec3>() as u32),
                Arc::new(normal),
            );
        }

        if !self.texcoords.is_empty() {
            let texcoord = Buffer::new_device_local(
                device.clone(),
                BufferUsage::Vertex,
                bytemuck::cast_slice(&self.texcoords),
            )?;
            submesh.set_attribute(
                "texcoord_0",
                VertexAttribute::new(vk::Format::R32G32_SFLOAT, size_of::<Vec2>() as u32),
                Arc::new(texcoord),
            );
        }

        submesh.vertex_count = self.positions.len() as u32;
        if !self.indices.is_empty() {
            let indices = Buffer::new_device_local(
                device.clone(),
                BufferUsage::Index,
                bytemuck::cast_slice(&self.indices),
            )?;
            submesh.set_indices(Arc::new(indices), vk::IndexType::UINT32, self.indices.len() as u32);
        }
        submesh.material = material;

        debug!(
            "Uploaded mesh '{}': {} vertices, {} indices",
            name,
            submesh.vertex_count,
            submesh.index_count
        );

        Ok(Mesh {
            name: name.to_string(),
            submeshes: vec![submesh],
            bounds: self.bounds(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_streams(geometry: &Geometry) {
        assert_eq!(geometry.positions.len(), geometry.normals.len());
        assert_eq!(geometry.positions.len(), geometry.texcoords.len());
        assert_eq!(geometry.indices.len() % 3, 0);
        assert!(
            geometry
                .indices
                .iter()
                .all(|&i| (i as usize) < geometry.positions.len())
        );
    }

    #[test]
    fn test_fullscreen_triangle_covers_clip_space() {
        let geometry = Geometry::fullscreen_triangle();
        check_streams(&geometry);
        let bounds = geometry.bounds();
        assert!(bounds.min().x <= -1.0 && bounds.min().y <= -1.0);
        assert!(bounds.max().x >= 1.0 && bounds.max().y >= 1.0);
    }

    #[test]
    fn test_quad_faces_up() {
        let geometry = Geometry::quad(2.0);
        check_streams(&geometry);
        assert_eq!(geometry.bounds().scale(), Vec3::new(2.0, 0.0, 2.0));

        // Winding is counter-clockwise seen from +Y.
        let [a, b, c] = [0, 1, 2].map(|i| geometry.positions[geometry.indices[i] as usize]);
        assert!((b - a).cross(c - a).dot(Vec3::Y) > 0.0);
    }

    #[test]
    fn test_cube_winding_faces_outward() {
        let geometry = Geometry::cube(1.0);
        check_streams(&geometry);
        assert_eq!(geometry.positions.len(), 24);
        assert_eq!(geometry.bounds().scale(), Vec3::ONE);

        for triangle in geometry.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| geometry.positions[triangle[i] as usize]);
            let normal = geometry.normals[triangle[0] as usize];
            assert!((b - a).cross(c - a).dot(normal) > 0.0);
        }
    }
}

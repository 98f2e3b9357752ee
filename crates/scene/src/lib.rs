//! Scene graph and components.
//!
//! Scenes are typed arenas:
//! - Nodes with local transforms and parent/child indices
//! - Cameras and lights attached to nodes
//! - Meshes with per-attribute GPU buffers and materials
//! - Bounding boxes and built-in primitives

pub mod aabb;
pub mod camera;
pub mod light;
pub mod material;
pub mod mesh;
pub mod primitives;
pub mod scene;
pub mod transform;

pub use aabb::Aabb;
pub use camera::{Camera, Projection};
pub use light::{Light, LightType};
pub use material::{AlphaMode, Material, Texture};
pub use mesh::{Mesh, SubMesh, VertexAttribute};
pub use primitives::Geometry;
pub use scene::{CameraId, LightId, MaterialId, MeshId, Node, NodeId, Scene};
pub use transform::{Transform, normal_matrix};

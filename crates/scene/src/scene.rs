//! Arena-backed scene graph.
//!
//! Every component lives in a `Vec` owned by [`Scene`] and is addressed by a
//! typed index. Nodes refer to their parent, children and attached components
//! through those indices, so the graph has no reference cycles.

use glam::{Mat4, Vec3};

use crate::aabb::Aabb;
use crate::camera::Camera;
use crate::light::Light;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::transform::Transform;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of a [`Node`] in its scene.
    NodeId
);
arena_id!(CameraId);
arena_id!(LightId);
arena_id!(MeshId);
arena_id!(MaterialId);

#[derive(Clone, Debug, Default)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    pub mesh: Option<MeshId>,
    pub camera: Option<CameraId>,
    pub light: Option<LightId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    pub name: String,
    nodes: Vec<Node>,
    cameras: Vec<Camera>,
    camera_nodes: Vec<NodeId>,
    lights: Vec<Light>,
    light_nodes: Vec<NodeId>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a node under `parent`, or as a root when `parent` is `None`.
    pub fn add_node(&mut self, name: impl Into<String>, transform: Transform, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.into(),
            transform,
            parent,
            ..Default::default()
        });
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(id);
        }
        id
    }

    /// Moves `node` under `parent`. Fails if that would create a cycle.
    pub fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> bool {
        if let Some(parent) = parent {
            let mut current = Some(parent);
            while let Some(ancestor) = current {
                if ancestor == node {
                    return false;
                }
                current = self.nodes[ancestor.index()].parent;
            }
        }
        if let Some(old) = self.nodes[node.index()].parent {
            self.nodes[old.index()].children.retain(|&child| child != node);
        }
        self.nodes[node.index()].parent = parent;
        if let Some(parent) = parent {
            self.nodes[parent.index()].children.push(node);
        }
        true
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    /// Transform from the node's space to world space, composed through
    /// every ancestor.
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = self.nodes[id.index()].transform.local_matrix();
        let mut current = self.nodes[id.index()].parent;
        while let Some(parent) = current {
            let node = &self.nodes[parent.index()];
            matrix = node.transform.local_matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    pub fn world_position(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id).w_axis.truncate()
    }

    /// World-space forward axis (`-Z`) of a node.
    pub fn world_forward(&self, id: NodeId) -> Vec3 {
        self.world_matrix(id)
            .transform_vector3(Vec3::NEG_Z)
            .normalize_or_zero()
    }

    pub fn add_camera(&mut self, camera: Camera, node: NodeId) -> CameraId {
        let id = CameraId(self.cameras.len() as u32);
        self.cameras.push(camera);
        self.camera_nodes.push(node);
        self.nodes[node.index()].camera = Some(id);
        id
    }

    pub fn camera(&self, id: CameraId) -> &Camera {
        &self.cameras[id.index()]
    }

    pub fn camera_mut(&mut self, id: CameraId) -> &mut Camera {
        &mut self.cameras[id.index()]
    }

    pub fn camera_node(&self, id: CameraId) -> NodeId {
        self.camera_nodes[id.index()]
    }

    pub fn cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        (0..self.cameras.len() as u32).map(CameraId)
    }

    /// View matrix of a camera: the inverse of its node's world matrix.
    pub fn camera_view(&self, id: CameraId) -> Mat4 {
        self.world_matrix(self.camera_node(id)).inverse()
    }

    pub fn camera_view_proj(&self, id: CameraId) -> Mat4 {
        self.camera(id).projection_matrix() * self.camera_view(id)
    }

    pub fn add_light(&mut self, light: Light, node: NodeId) -> LightId {
        let id = LightId(self.lights.len() as u32);
        self.lights.push(light);
        self.light_nodes.push(node);
        self.nodes[node.index()].light = Some(id);
        id
    }

    pub fn light(&self, id: LightId) -> &Light {
        &self.lights[id.index()]
    }

    pub fn light_node(&self, id: LightId) -> NodeId {
        self.light_nodes[id.index()]
    }

    /// Lights with their world position and direction.
    pub fn lights(&self) -> impl Iterator<Item = (&Light, Vec3, Vec3)> {
        self.lights.iter().zip(&self.light_nodes).map(|(light, &node)| {
            (light, self.world_position(node), self.world_forward(node))
        })
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(mesh);
        id
    }

    pub fn mesh(&self, id: MeshId) -> &Mesh {
        &self.meshes[id.index()]
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(material);
        id
    }

    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.index()]
    }

    /// Nodes carrying a mesh, with the mesh and the node's world matrix.
    pub fn mesh_instances(&self) -> impl Iterator<Item = (NodeId, &Mesh, Mat4)> {
        self.nodes().filter_map(|(id, node)| {
            let mesh = node.mesh?;
            Some((id, &self.meshes[mesh.index()], self.world_matrix(id)))
        })
    }

    /// World-space bounds of every mesh instance.
    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::default();
        for (_, mesh, world) in self.mesh_instances() {
            let instance = mesh.bounds.transform(world);
            if !instance.is_empty() {
                bounds.update_from([instance.min(), instance.max()]);
            }
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use std::f32::consts::FRAC_PI_2;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_world_matrix_composes_parents() {
        let mut scene = Scene::new("test");
        let root = scene.add_node(
            "root",
            Transform::new().with_position(Vec3::new(10.0, 0.0, 0.0)),
            None,
        );
        let child = scene.add_node(
            "child",
            Transform::new()
                .with_position(Vec3::new(0.0, 5.0, 0.0))
                .with_scale(Vec3::splat(2.0)),
            Some(root),
        );
        let grandchild = scene.add_node(
            "grandchild",
            Transform::new().with_position(Vec3::new(1.0, 0.0, 0.0)),
            Some(child),
        );

        assert_eq!(scene.world_position(child), Vec3::new(10.0, 5.0, 0.0));
        // Child scale doubles the grandchild's local offset.
        assert_eq!(scene.world_position(grandchild), Vec3::new(12.0, 5.0, 0.0));
        assert_eq!(scene.node(root).children(), &[child]);
        assert_eq!(scene.node(grandchild).parent(), Some(child));
    }

    #[test]
    fn test_world_matrix_with_rotated_parent() {
        let mut scene = Scene::new("test");
        let root = scene.add_node(
            "root",
            Transform::new().with_rotation(Quat::from_rotation_y(FRAC_PI_2)),
            None,
        );
        let child = scene.add_node(
            "child",
            Transform::new().with_position(Vec3::new(0.0, 0.0, -1.0)),
            Some(root),
        );
        let position = scene.world_position(child);
        assert!((position - Vec3::new(-1.0, 0.0, 0.0)).length() < EPSILON);
        assert!((scene.world_forward(child) - Vec3::NEG_X).length() < EPSILON);
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let mut scene = Scene::new("test");
        let a = scene.add_node("a", Transform::new(), None);
        let b = scene.add_node("b", Transform::new(), Some(a));
        assert!(!scene.set_parent(a, Some(b)));
        assert!(!scene.set_parent(a, Some(a)));

        let c = scene.add_node("c", Transform::new(), None);
        assert!(scene.set_parent(b, Some(c)));
        assert!(scene.node(a).children().is_empty());
        assert_eq!(scene.node(c).children(), &[b]);
    }

    #[test]
    fn test_camera_view_is_inverse_world() {
        let mut scene = Scene::new("test");
        let node = scene.add_node(
            "camera",
            Transform::new().with_position(Vec3::new(0.0, 0.0, 5.0)),
            None,
        );
        let camera = scene.add_camera(Camera::default(), node);
        assert_eq!(scene.node(node).camera, Some(camera));

        let view = scene.camera_view(camera);
        let origin_in_view = view.transform_point3(Vec3::ZERO);
        assert!((origin_in_view - Vec3::new(0.0, 0.0, -5.0)).length() < EPSILON);
    }

    #[test]
    fn test_lights_take_position_and_direction_from_node() {
        let mut scene = Scene::new("test");
        let node = scene.add_node(
            "sun",
            Transform::new()
                .with_position(Vec3::new(1.0, 2.0, 3.0))
                .with_rotation(Quat::from_rotation_x(-FRAC_PI_2)),
            None,
        );
        scene.add_light(Light::default(), node);

        let (_, position, direction) = scene.lights().next().unwrap();
        assert_eq!(position, Vec3::new(1.0, 2.0, 3.0));
        assert!((direction - Vec3::NEG_Y).length() < EPSILON);
    }

    #[test]
    fn test_find_node_by_name() {
        let mut scene = Scene::new("test");
        scene.add_node("a", Transform::new(), None);
        let b = scene.add_node("b", Transform::new(), None);
        assert_eq!(scene.find_node("b"), Some(b));
        assert_eq!(scene.find_node("missing"), None);
    }
}

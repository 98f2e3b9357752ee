//! Procedural scene: a floor, a ring of cubes, a glass cube and a few lights.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, TAU};
use std::sync::Arc;

use glam::{Quat, Vec3, Vec4};
use lumen_rhi::RhiResult;
use lumen_rhi::device::Device;
use lumen_scene::{AlphaMode, Camera, CameraId, Geometry, Light, Material, MeshId, NodeId, Scene, Transform};

const CUBE_COUNT: usize = 8;
const RING_RADIUS: f32 = 4.0;

pub struct DemoScene {
    pub scene: Scene,
    pub camera: CameraId,
    pub camera_node: NodeId,
}

fn place(scene: &mut Scene, name: &str, transform: Transform, mesh: MeshId) -> NodeId {
    let node = scene.add_node(name, transform, None);
    scene.node_mut(node).mesh = Some(mesh);
    node
}

/// Builds the scene and uploads its meshes.
pub fn build(device: &Arc<Device>, aspect: f32) -> RhiResult<DemoScene> {
    let mut scene = Scene::new("demo");

    let floor_material = scene.add_material(
        Material::new("floor").with_base_color(Vec4::new(0.6, 0.6, 0.6, 1.0)),
    );
    let floor = scene.add_mesh(Geometry::quad(20.0).upload(device, "floor", Some(floor_material))?);
    place(&mut scene, "floor", Transform::new(), floor);

    for i in 0..CUBE_COUNT {
        let angle = i as f32 / CUBE_COUNT as f32 * TAU;
        let hue = Vec3::new(angle.cos(), (angle + TAU / 3.0).cos(), (angle + 2.0 * TAU / 3.0).cos());
        let color = (hue * 0.5 + 0.5).extend(1.0);
        let material = scene.add_material(
            Material::new(format!("cube {i}")).with_base_color(color),
        );
        let mesh = scene.add_mesh(Geometry::cube(1.0).upload(device, "cube", Some(material))?);
        place(
            &mut scene,
            &format!("cube {i}"),
            Transform::new()
                .with_position(Vec3::new(angle.cos() * RING_RADIUS, 0.5, angle.sin() * RING_RADIUS))
                .with_rotation(Quat::from_rotation_y(angle)),
            mesh,
        );
    }

    let glass = scene.add_material(
        Material::new("glass")
            .with_base_color(Vec4::new(0.4, 0.7, 1.0, 0.4))
            .with_alpha_mode(AlphaMode::Blend),
    );
    let glass_mesh = scene.add_mesh(Geometry::cube(1.5).upload(device, "glass cube", Some(glass))?);
    place(
        &mut scene,
        "glass cube",
        Transform::new().with_position(Vec3::new(0.0, 0.75, 0.0)),
        glass_mesh,
    );

    let emissive = scene.add_material(
        Material::new("lamp")
            .with_base_color(Vec4::new(0.0, 0.0, 0.0, 1.0))
            .with_emissive(Vec3::new(1.0, 0.8, 0.4)),
    );
    let lamp_mesh = scene.add_mesh(Geometry::cube(0.2).upload(device, "lamp", Some(emissive))?);

    let sun = scene.add_node(
        "sun",
        Transform::new().with_rotation(Quat::from_rotation_x(-FRAC_PI_4) * Quat::from_rotation_y(FRAC_PI_4)),
        None,
    );
    scene.add_light(Light::directional(Vec3::new(1.0, 0.95, 0.9), 0.6), sun);

    for (i, color) in [Vec3::new(1.0, 0.3, 0.2), Vec3::new(0.2, 0.4, 1.0)].into_iter().enumerate() {
        let x = if i == 0 { -2.5 } else { 2.5 };
        let lamp = place(
            &mut scene,
            &format!("lamp {i}"),
            Transform::new().with_position(Vec3::new(x, 2.0, 2.0)),
            lamp_mesh,
        );
        scene.add_light(Light::point(color, 2.0, 8.0), lamp);
    }

    let spot = scene.add_node(
        "spot",
        Transform::new()
            .with_position(Vec3::new(0.0, 6.0, 0.0))
            .with_rotation(Quat::from_rotation_x(-FRAC_PI_2)),
        None,
    );
    scene.add_light(Light::spot(Vec3::ONE, 3.0, 12.0, 0.3, 0.5), spot);

    let camera_node = scene.add_node(
        "camera",
        Transform::new()
            .with_position(Vec3::new(0.0, 3.0, 9.0))
            .with_rotation(Quat::from_rotation_x(-0.3)),
        None,
    );
    let camera = scene.add_camera(
        Camera::perspective(60f32.to_radians(), aspect, 0.1, 100.0),
        camera_node,
    );

    tracing::info!(
        "Demo scene built: {} mesh instance(s), {} light(s)",
        scene.mesh_instances().count(),
        scene.lights().count()
    );
    Ok(DemoScene {
        scene,
        camera,
        camera_node,
    })
}

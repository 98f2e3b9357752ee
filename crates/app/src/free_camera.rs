//! Fly-through camera driven by WASD/QE and right-mouse look.

use glam::{EulerRot, Quat, Vec2, Vec3};
use lumen_platform::{InputState, KeyCode, MouseButton};
use lumen_scene::Transform;

const PITCH_LIMIT: f32 = 89.0 * std::f32::consts::PI / 180.0;
const MAX_LOOK_DELTA: f32 = 100.0;

pub struct FreeCamera {
    pub yaw: f32,
    pub pitch: f32,
    /// Units per second.
    pub speed: f32,
    /// Radians per pixel of mouse motion.
    pub sensitivity: f32,
}

impl FreeCamera {
    /// Starts with the orientation `transform` already has.
    pub fn from_transform(transform: &Transform) -> Self {
        let (yaw, pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
        Self {
            yaw,
            pitch,
            speed: 4.0,
            sensitivity: 0.003,
        }
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }

    pub fn look(&mut self, delta: Vec2) {
        let delta = delta.clamp(Vec2::splat(-MAX_LOOK_DELTA), Vec2::splat(MAX_LOOK_DELTA));
        self.yaw -= delta.x * self.sensitivity;
        self.pitch = (self.pitch - delta.y * self.sensitivity).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Applies this frame's input to `transform`.
    pub fn update(&mut self, transform: &mut Transform, input: &InputState, delta_time: f32) {
        if input.is_mouse_down(MouseButton::Right) && !input.was_mouse_pressed(MouseButton::Right) {
            self.look(input.mouse_motion());
        }
        transform.rotation = self.rotation();

        let axis = |positive: KeyCode, negative: KeyCode| {
            f32::from(u8::from(input.is_key_down(positive))) - f32::from(u8::from(input.is_key_down(negative)))
        };
        let direction = transform.forward() * axis(KeyCode::KeyW, KeyCode::KeyS)
            + transform.right() * axis(KeyCode::KeyD, KeyCode::KeyA)
            + Vec3::Y * axis(KeyCode::KeyE, KeyCode::KeyQ);

        let boost = if input.is_key_down(KeyCode::ShiftLeft) { 3.0 } else { 1.0 };
        transform.translate(direction.normalize_or_zero() * self.speed * boost * delta_time);
    }
}

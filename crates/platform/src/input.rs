//! Keyboard and mouse state recorded from winit events.
//!
//! [`InputState`] only records; what a key means is up to the application.

use std::collections::HashSet;
use std::hash::Hash;

use glam::Vec2;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::PhysicalKey;

pub use winit::keyboard::KeyCode;

/// Pixels per scroll line for trackpads reporting pixel deltas.
const PIXELS_PER_LINE: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u16),
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        match button {
            winit::event::MouseButton::Left => Self::Left,
            winit::event::MouseButton::Right => Self::Right,
            winit::event::MouseButton::Middle => Self::Middle,
            winit::event::MouseButton::Back => Self::Other(3),
            winit::event::MouseButton::Forward => Self::Other(4),
            winit::event::MouseButton::Other(id) => Self::Other(id),
        }
    }
}

/// Held buttons plus the edges seen since the last [`InputState::end_frame`].
#[derive(Debug)]
struct ButtonSet<T> {
    held: HashSet<T>,
    pressed: HashSet<T>,
    released: HashSet<T>,
}

impl<T> Default for ButtonSet<T> {
    fn default() -> Self {
        Self {
            held: HashSet::new(),
            pressed: HashSet::new(),
            released: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> ButtonSet<T> {
    fn set(&mut self, button: T, down: bool) {
        if down {
            if self.held.insert(button) {
                self.pressed.insert(button);
            }
        } else if self.held.remove(&button) {
            self.released.insert(button);
        }
    }

    fn clear_edges(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }

    fn clear(&mut self) {
        for button in self.held.drain() {
            self.released.insert(button);
        }
        self.pressed.clear();
    }
}

#[derive(Debug, Default)]
pub struct InputState {
    keys: ButtonSet<KeyCode>,
    buttons: ButtonSet<MouseButton>,
    cursor: Option<Vec2>,
    cursor_delta: Vec2,
    motion: Vec2,
    scroll: Vec2,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a window event. Returns whether it was an input event.
    pub fn process_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.keys.set(key, event.state == ElementState::Pressed);
                }
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.buttons
                    .set(MouseButton::from(*button), *state == ElementState::Pressed);
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.on_cursor_moved(Vec2::new(position.x as f32, position.y as f32));
                true
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                true
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.scroll += match delta {
                    MouseScrollDelta::LineDelta(x, y) => Vec2::new(*x, *y),
                    MouseScrollDelta::PixelDelta(p) => {
                        Vec2::new(p.x as f32, p.y as f32) / PIXELS_PER_LINE
                    }
                };
                true
            }
            WindowEvent::Focused(false) => {
                self.keys.clear();
                self.buttons.clear();
                true
            }
            _ => false,
        }
    }

    /// Records raw relative mouse motion (`DeviceEvent::MouseMotion`).
    pub fn on_mouse_motion(&mut self, dx: f64, dy: f64) {
        self.motion += Vec2::new(dx as f32, dy as f32);
    }

    pub fn set_key(&mut self, key: KeyCode, down: bool) {
        self.keys.set(key, down);
    }

    pub fn set_mouse_button(&mut self, button: MouseButton, down: bool) {
        self.buttons.set(button, down);
    }

    fn on_cursor_moved(&mut self, position: Vec2) {
        if let Some(previous) = self.cursor {
            self.cursor_delta += position - previous;
        }
        self.cursor = Some(position);
    }

    /// Clears per-frame edges and deltas. Call once the frame has read them.
    pub fn end_frame(&mut self) {
        self.keys.clear_edges();
        self.buttons.clear_edges();
        self.cursor_delta = Vec2::ZERO;
        self.motion = Vec2::ZERO;
        self.scroll = Vec2::ZERO;
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.held.contains(&key)
    }

    pub fn was_key_pressed(&self, key: KeyCode) -> bool {
        self.keys.pressed.contains(&key)
    }

    pub fn was_key_released(&self, key: KeyCode) -> bool {
        self.keys.released.contains(&key)
    }

    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.buttons.held.contains(&button)
    }

    pub fn was_mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons.pressed.contains(&button)
    }

    /// Cursor position in physical pixels, `None` outside the window.
    pub fn cursor_position(&self) -> Option<Vec2> {
        self.cursor
    }

    /// Cursor movement since the last [`Self::end_frame`].
    pub fn cursor_delta(&self) -> Vec2 {
        self.cursor_delta
    }

    /// Raw mouse motion since the last [`Self::end_frame`].
    pub fn mouse_motion(&self) -> Vec2 {
        self.motion
    }

    /// Scroll in lines since the last [`Self::end_frame`].
    pub fn scroll_delta(&self) -> Vec2 {
        self.scroll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_edges() {
        let mut input = InputState::new();
        input.set_key(KeyCode::KeyW, true);
        assert!(input.is_key_down(KeyCode::KeyW));
        assert!(input.was_key_pressed(KeyCode::KeyW));

        input.end_frame();
        input.set_key(KeyCode::KeyW, true);
        assert!(input.is_key_down(KeyCode::KeyW));
        assert!(!input.was_key_pressed(KeyCode::KeyW));

        input.set_key(KeyCode::KeyW, false);
        assert!(!input.is_key_down(KeyCode::KeyW));
        assert!(input.was_key_released(KeyCode::KeyW));
    }

    #[test]
    fn test_cursor_delta_accumulates() {
        let mut input = InputState::new();
        input.on_cursor_moved(Vec2::new(10.0, 10.0));
        assert_eq!(input.cursor_delta(), Vec2::ZERO);

        input.on_cursor_moved(Vec2::new(13.0, 8.0));
        input.on_cursor_moved(Vec2::new(15.0, 8.0));
        assert_eq!(input.cursor_delta(), Vec2::new(5.0, -2.0));

        input.end_frame();
        assert_eq!(input.cursor_delta(), Vec2::ZERO);
        assert_eq!(input.cursor_position(), Some(Vec2::new(15.0, 8.0)));
    }

    #[test]
    fn test_focus_loss_releases_everything() {
        let mut input = InputState::new();
        input.set_key(KeyCode::ShiftLeft, true);
        input.set_mouse_button(MouseButton::Right, true);

        assert!(input.process_event(&WindowEvent::Focused(false)));
        assert!(!input.is_key_down(KeyCode::ShiftLeft));
        assert!(!input.is_mouse_down(MouseButton::Right));
        assert!(input.was_key_released(KeyCode::ShiftLeft));
    }

    #[test]
    fn test_raw_motion() {
        let mut input = InputState::new();
        input.on_mouse_motion(1.5, -2.0);
        input.on_mouse_motion(0.5, 1.0);
        assert_eq!(input.mouse_motion(), Vec2::new(2.0, -1.0));
    }
}

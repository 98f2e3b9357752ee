//! Platform layer: winit windows, Vulkan surfaces and input recording.

mod input;
mod window;

pub use input::{InputState, KeyCode, MouseButton};
pub use window::{Surface, Window};

pub use winit::event::{DeviceEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};

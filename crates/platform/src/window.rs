//! winit window plus the Vulkan surface created for it.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use lumen_core::{Error, Result, WindowConfig};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

/// A `vk::SurfaceKHR` destroyed on drop.
///
/// The instance it was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by `Window::create_surface` from the loader's
        // instance; nothing else destroys it.
        unsafe { self.loader.destroy_surface(self.handle, None) };
        tracing::debug!("Vulkan surface destroyed");
    }
}

pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    /// Opens a resizable window sized and titled from `config`.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let window = Self {
            window: Arc::new(window),
        };
        let extent = window.extent();
        tracing::info!(
            "Window '{}' created: {}x{} (scale {:.2})",
            config.title,
            extent.width,
            extent.height,
            window.scale_factor()
        );
        Ok(window)
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn inner_arc(&self) -> Arc<WinitWindow> {
        self.window.clone()
    }

    /// Current drawable size in physical pixels.
    pub fn extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    /// DPI scale between logical and physical pixels.
    pub fn scale_factor(&self) -> f64 {
        self.window.scale_factor()
    }

    /// Width over height; 1.0 while minimised.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            return 1.0;
        }
        extent.width as f32 / extent.height as f32
    }

    /// Whether the window currently has no drawable area.
    pub fn is_minimized(&self) -> bool {
        let extent = self.extent();
        extent.width == 0 || extent.height == 0
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    /// Instance extensions this window's display needs for a surface.
    ///
    /// The pointers reference static strings owned by the loader.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Surface(format!("no display handle: {e}")))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| Error::Surface(format!("cannot enumerate surface extensions: {e}")))?;

        tracing::debug!(
            "Surface extensions: {:?}",
            extensions
                .iter()
                // SAFETY: ash-window returns pointers to static, nul-terminated names.
                .map(|&name| unsafe { CStr::from_ptr(name) })
                .collect::<Vec<_>>()
        );
        Ok(extensions.to_vec())
    }

    /// Creates a surface for this window on `instance`.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Surface(format!("no display handle: {e}")))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Surface(format!("no window handle: {e}")))?;

        // SAFETY: both handles come from a live winit window and the caller
        // keeps `instance` alive for as long as the surface.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
        }
        .map_err(|e| Error::Surface(format!("vkCreateSurfaceKHR failed: {e}")))?;

        tracing::info!("Vulkan surface created");
        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }
}

//! Vulkan instance management.
//!
//! [`Instance`] owns the loader entry, the `VkInstance`, the optional debug
//! messenger and the surface extension loader. Window-system extensions are
//! supplied by the caller (see `lumen_platform::Window::required_extensions`),
//! so the same instance type serves windowed and headless runs.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::instance::{Instance, InstanceDesc};
//!
//! let instance = Instance::new(&InstanceDesc {
//!     enable_validation: cfg!(debug_assertions),
//!     enable_headless_surface: true,
//!     ..Default::default()
//! })
//! .expect("Failed to create Vulkan instance");
//! assert!(instance.surface_loader().is_some());
//! ```

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// API version requested from the loader.
pub const API_VERSION: u32 = vk::API_VERSION_1_2;

/// Parameters for [`Instance::new`].
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub application_name: String,
    /// Enable the validation layer and route its messages to `tracing`
    pub enable_validation: bool,
    /// Window-system surface extensions (e.g. from `ash_window`)
    pub surface_extensions: Vec<*const c_char>,
    /// Enable `VK_EXT_headless_surface` when the loader offers it
    pub enable_headless_surface: bool,
}

impl Default for InstanceDesc {
    fn default() -> Self {
        Self {
            application_name: "Lumen".to_string(),
            enable_validation: false,
            surface_extensions: Vec::new(),
            enable_headless_surface: false,
        }
    }
}

/// Vulkan instance wrapper.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: Option<ash::khr::surface::Instance>,
    headless_surface: Option<ash::ext::headless_surface::Instance>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader cannot be found, a requested surface
    /// extension is missing, or instance creation fails. Missing validation
    /// or headless support is logged and tolerated.
    pub fn new(desc: &InstanceDesc) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let available = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let has_extension = |name: &CStr| {
            available
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name))
        };

        let validation_available = desc.enable_validation
            && Self::is_validation_layer_available(&entry)?
            && has_extension(ash::ext::debug_utils::NAME);
        if desc.enable_validation && !validation_available {
            warn!("Validation requested but the layer or debug utils are unavailable");
        }

        let headless_available =
            desc.enable_headless_surface && has_extension(ash::ext::headless_surface::NAME);
        if desc.enable_headless_surface && !headless_available {
            warn!("VK_EXT_headless_surface requested but not offered by the loader");
        }

        for &ext in &desc.surface_extensions {
            let name = unsafe { CStr::from_ptr(ext) };
            if !has_extension(name) {
                return Err(RhiError::Unsupported(format!(
                    "instance extension {} is not available",
                    name.to_string_lossy()
                )));
            }
        }

        let app_name = CString::new(desc.application_name.as_str())
            .map_err(|e| RhiError::InvalidArgument(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Lumen")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        let mut extensions = desc.surface_extensions.clone();
        let wants_surface = !extensions.is_empty() || headless_available;
        if wants_surface && !extensions.contains(&ash::khr::surface::NAME.as_ptr()) {
            extensions.push(ash::khr::surface::NAME.as_ptr());
        }
        if headless_available {
            extensions.push(ash::ext::headless_surface::NAME.as_ptr());
        }
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created ({} extension(s), validation: {})",
            extensions.len(),
            validation_available
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        let surface_loader =
            wants_surface.then(|| ash::khr::surface::Instance::new(&entry, &instance));
        let headless_surface = headless_available
            .then(|| ash::ext::headless_surface::Instance::new(&entry, &instance));

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            surface_loader,
            headless_surface,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether the validation layer and debug messenger are active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Whether debug-utils labels and object names can be used on devices.
    #[inline]
    pub fn has_debug_utils(&self) -> bool {
        self.debug_utils.is_some()
    }

    /// Surface extension loader, present when any surface extension is enabled.
    #[inline]
    pub fn surface_loader(&self) -> Option<&ash::khr::surface::Instance> {
        self.surface_loader.as_ref()
    }

    /// Whether [`Instance::create_headless_surface`] can be used.
    #[inline]
    pub fn supports_headless_surface(&self) -> bool {
        self.headless_surface.is_some()
    }

    /// Creates a surface that is not tied to any window.
    ///
    /// The surface reports an undefined current extent, so the swapchain
    /// extent is whatever the caller requests.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Unsupported`] if the instance was created without
    /// `VK_EXT_headless_surface`.
    pub fn create_headless_surface(&self) -> RhiResult<vk::SurfaceKHR> {
        let loader = self.headless_surface.as_ref().ok_or_else(|| {
            RhiError::Unsupported("VK_EXT_headless_surface is not enabled".into())
        })?;
        let create_info = vk::HeadlessSurfaceCreateInfoEXT::default();
        let surface = unsafe { loader.create_headless_surface(&create_info, None)? };
        info!("Headless surface created");
        Ok(surface)
    }

    /// Destroys a surface created from this instance.
    ///
    /// # Safety
    ///
    /// No swapchain created from `surface` may still be alive.
    pub unsafe fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        if let Some(loader) = &self.surface_loader {
            unsafe { loader.destroy_surface(surface, None) };
        }
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER_NAME)))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Forwards validation layer messages to `tracing`.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "lumen::vulkan", "[{}] {}", kind, message);
    } else {
        warn!(target: "lumen::vulkan", "[{}] {}", kind, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_creation_without_validation() {
        match Instance::new(&InstanceDesc::default()) {
            Ok(instance) => {
                assert!(!instance.has_validation());
                assert!(instance.surface_loader().is_none());
            }
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_headless_surface_request_enables_surface_loader() {
        let desc = InstanceDesc {
            enable_headless_surface: true,
            ..Default::default()
        };
        match Instance::new(&desc) {
            Ok(instance) => {
                if instance.supports_headless_surface() {
                    assert!(instance.surface_loader().is_some());
                    let surface = instance.create_headless_surface().unwrap();
                    unsafe { instance.destroy_surface(surface) };
                } else {
                    assert!(instance.create_headless_surface().is_err());
                }
            }
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    #[test]
    fn test_missing_surface_extension_is_unsupported() {
        let desc = InstanceDesc {
            surface_extensions: vec![c"VK_LUMEN_not_a_real_extension".as_ptr()],
            ..Default::default()
        };
        match Instance::new(&desc) {
            Ok(_) => panic!("bogus extension accepted"),
            Err(RhiError::Unsupported(msg)) => assert!(msg.contains("VK_LUMEN")),
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}

// Vulkan instance and presentation surface
//
// Responsibilities:
// - Load the Vulkan library
// - Instance creation with the surface extensions the display needs
// - Optional validation layers, routed into `log`
// - Surface creation from a raw window handle

use ash::vk;
use ash::{extensions::ext::DebugUtils, extensions::khr, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::error::{RenderError, RenderResult, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance wrapper, destroys the debug messenger and instance on drop.
///
/// Shared through `Arc` by the surface and the device so it is the last
/// Vulkan object to go.
pub struct VulkanInstance {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance able to present to `display`.
    ///
    /// `display` is `None` for headless use (tests, offline uploads).
    pub fn new(
        app_name: &str,
        display: Option<RawDisplayHandle>,
        enable_validation: bool,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"mesh-renderer";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .or_fail("Failed to query surface extensions")?
                .to_vec(),
            None => Vec::new(),
        };

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation layers requested but not installed");
        }
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        Self::check_extension_support(&entry, &extensions)?;

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .or_fail("Failed to create Vulkan instance")?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_utils,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| has_layer(&layers, VALIDATION_LAYER))
            .unwrap_or(false)
    }

    fn check_extension_support(entry: &Entry, required: &[*const c_char]) -> RenderResult<()> {
        let available = entry
            .enumerate_instance_extension_properties(None)
            .or_fail("Failed to enumerate instance extensions")?;

        for &name in required {
            let name = unsafe { CStr::from_ptr(name) };
            let found = available
                .iter()
                .any(|ext| fixed_name(&ext.extension_name) == name);
            if !found {
                return Err(RenderError::MissingExtension(
                    name.to_string_lossy().into_owned(),
                ));
            }
        }

        Ok(())
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
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

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .or_fail("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Presentation surface bound to the caller's window.
pub struct Surface {
    pub loader: khr::Surface,
    pub handle: vk::SurfaceKHR,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new(
        instance: Arc<VulkanInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RenderResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .or_fail("Failed to create surface")?;

        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        Ok(Self {
            loader,
            handle,
            _instance: instance,
        })
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }
        .or_fail("Failed to query surface capabilities")
    }

    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.handle)
        }
        .or_fail("Failed to query surface formats")
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> RenderResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }
        .or_fail("Failed to query surface present modes")
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)
        }
        .unwrap_or(false)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

// Debug callback for validation layers
/// Name stored in one of Vulkan's fixed-size, NUL-terminated arrays
fn fixed_name(raw: &[c_char]) -> &CStr {
    unsafe { CStr::from_ptr(raw.as_ptr()) }
}

fn has_layer(layers: &[vk::LayerProperties], name: &CStr) -> bool {
    layers.iter().any(|layer| fixed_name(&layer.layer_name) == name)
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

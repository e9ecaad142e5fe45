// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (first device that meets every requirement)
// - Logical device + graphics/presentation queue creation
// - Cached device and memory properties

use ash::{extensions::khr, vk};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::instance::{Surface, VulkanInstance};
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Queue family locations on a physical device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub presentation: Option<u32>,
}

impl QueueFamilyIndices {
    /// Walk the families in order and stop as soon as both roles are filled.
    ///
    /// A later family may replace an earlier match for the same role while
    /// the other role is still missing.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut indices = Self::default();

        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }
            if family.queue_count > 0 && supports_present(i) {
                indices.presentation = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.presentation.is_some()
    }

    /// Distinct family indices, one queue gets created per entry.
    pub fn unique_families(&self) -> BTreeSet<u32> {
        self.graphics.into_iter().chain(self.presentation).collect()
    }
}

/// Everything device selection looks at, gathered up front so the decision
/// itself needs no GPU.
#[derive(Debug, Clone, Default)]
pub struct DeviceCandidate {
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<CString>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl DeviceCandidate {
    pub fn is_suitable(&self, required_extensions: &[&CStr], needs_surface: bool) -> bool {
        let extensions_supported = required_extensions
            .iter()
            .all(|required| self.extensions.iter().any(|ext| ext.as_c_str() == *required));

        let surface_valid =
            !needs_surface || (!self.formats.is_empty() && !self.present_modes.is_empty());

        self.queue_families.is_complete() && extensions_supported && surface_valid
    }
}

/// Index of the first suitable candidate. No ranking between suitable devices.
pub fn select_first_suitable(
    candidates: &[DeviceCandidate],
    required_extensions: &[&CStr],
    needs_surface: bool,
) -> Option<usize> {
    candidates
        .iter()
        .position(|candidate| candidate.is_suitable(required_extensions, needs_surface))
}

/// A device whose properties can't be queried is rejected, not fatal
fn candidate_or_unsuitable(
    index: usize,
    described: RenderResult<DeviceCandidate>,
) -> DeviceCandidate {
    described.unwrap_or_else(|e| {
        log::warn!("Skipping physical device {}: {}", index, e);
        DeviceCandidate::default()
    })
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles, possibly the same queue twice
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub present_queue: vk::Queue,
    pub present_queue_family: u32,

    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Select a GPU and create the logical device.
    ///
    /// With `surface` set, the device must be able to present to it. Without
    /// one the graphics family doubles as the presentation family.
    pub fn new(instance: Arc<VulkanInstance>, surface: Option<&Surface>) -> RenderResult<Arc<Self>> {
        let required_extensions: Vec<&CStr> = match surface {
            Some(_) => vec![khr::Swapchain::name()],
            None => vec![],
        };

        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance.instance, surface, &required_extensions)?;

        let graphics_queue_family = queue_families.graphics.ok_or(RenderError::NoSuitableDevice)?;
        let present_queue_family = queue_families
            .presentation
            .ok_or(RenderError::NoSuitableDevice)?;

        let device = Self::create_logical_device(
            &instance.instance,
            physical_device,
            &queue_families,
            &required_extensions,
        )?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_queue_family, 0) };

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "Queue families: graphics {}, presentation {}",
            graphics_queue_family,
            present_queue_family
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            graphics_queue,
            graphics_queue_family,
            present_queue,
            present_queue_family,
            properties,
            memory_properties,
        }))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: Option<&Surface>,
        required_extensions: &[&CStr],
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .or_fail("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            log::error!("No Vulkan-capable GPU found");
            return Err(RenderError::NoSuitableDevice);
        }

        let candidates: Vec<DeviceCandidate> = devices
            .iter()
            .enumerate()
            .map(|(i, &device)| {
                candidate_or_unsuitable(i, Self::describe(instance, device, surface))
            })
            .collect();

        let index = select_first_suitable(&candidates, required_extensions, surface.is_some())
            .ok_or(RenderError::NoSuitableDevice)?;

        Ok((devices[index], candidates[index].queue_families))
    }

    fn describe(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface: Option<&Surface>,
    ) -> RenderResult<DeviceCandidate> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let queue_families = match surface {
            Some(surface) => QueueFamilyIndices::find(&families, |i| surface.supports_present(device, i)),
            None => {
                let mut indices = QueueFamilyIndices::find(&families, |_| false);
                indices.presentation = indices.graphics;
                indices
            }
        };

        let extensions: Vec<CString> =
            unsafe { instance.enumerate_device_extension_properties(device) }
                .or_fail("Failed to enumerate device extensions")?
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
                .collect();

        // Surface details are only queried once the swapchain extension is known to exist
        let has_swapchain = extensions
            .iter()
            .any(|ext| ext.as_c_str() == khr::Swapchain::name());
        let (formats, present_modes) = match surface {
            Some(surface) if has_swapchain => {
                (surface.formats(device)?, surface.present_modes(device)?)
            }
            _ => (Vec::new(), Vec::new()),
        };

        Ok(DeviceCandidate {
            queue_families,
            extensions,
            formats,
            present_modes,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilyIndices,
        required_extensions: &[&CStr],
    ) -> RenderResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_extensions.iter().map(|ext| ext.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .or_fail("Failed to create logical device")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.or_fail("Failed to wait for device idle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();
        unsafe { self.device.destroy_device(None) };
    }
}

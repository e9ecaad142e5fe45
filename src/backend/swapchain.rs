// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The selection helpers are plain functions over queried surface data.

use ash::{extensions::khr, vk};
use std::sync::Arc;

use super::instance::Surface;
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// Pick the surface format.
///
/// A lone UNDEFINED entry means the surface has no preference.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> RenderResult<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    match formats {
        [] => Err(RenderError::UnsupportedSurface("no surface formats")),
        [only] if only.format == vk::Format::UNDEFINED => Ok(preferred),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                matches!(
                    f.format,
                    vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM
                ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(formats[0])),
    }
}

/// `preferred` if the surface offers it, FIFO otherwise (always supported)
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped when the surface has a maximum (0 = none)
pub fn determine_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        width: u32,
        height: u32,
        preferred_mode: vk::PresentModeKHR,
    ) -> RenderResult<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_caps = surface.capabilities(device.physical_device)?;
        let formats = surface.formats(device.physical_device)?;
        let present_modes = surface.present_modes(device.physical_device)?;

        let surface_format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, preferred_mode);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = determine_image_count(&surface_caps);

        log::info!(
            "Surface format {:?}, present mode {:?}",
            surface_format.format,
            present_mode
        );

        let queue_family_indices = [device.graphics_queue_family, device.present_queue_family];
        let concurrent = device.graphics_queue_family != device.present_queue_family;

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        create_info = if concurrent {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain_loader = khr::Swapchain::new(&device.instance.instance, &device.device);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .or_fail("Failed to create swapchain")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RenderError::Vulkan {
                    what: "Failed to get swapchain images",
                    result: e,
                });
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        // Partially built views are released by Drop if a later one fails
        let mut chain = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            present_mode,
            extent,
            device,
        };

        for i in 0..chain.images.len() {
            let view = chain.create_image_view(chain.images[i])?;
            chain.image_views.push(view);
        }

        Ok(chain)
    }

    fn create_image_view(&self, image: vk::Image) -> RenderResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.device.create_image_view(&create_info, None) }
            .or_fail("Failed to create image view")
    }

    /// Destroy the current chain, then build a new one for the new size.
    ///
    /// If the rebuild fails `self` is left empty and safe to drop.
    pub fn recreate(
        &mut self,
        surface: &Surface,
        width: u32,
        height: u32,
        preferred_mode: vk::PresentModeKHR,
    ) -> RenderResult<()> {
        self.release();
        *self = Self::new(self.device.clone(), surface, width, height, preferred_mode)?;
        Ok(())
    }

    fn release(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering. Returns the index and the suboptimal flag.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RenderResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .or_frame_fail("Failed to acquire swapchain image")
    }

    /// Present rendered image to screen. Returns the suboptimal flag.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RenderResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .or_frame_fail("Failed to present swapchain image")
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release();
    }
}

// Synchronization primitives
//
// Fences and semaphores for GPU-CPU and GPU-GPU sync, one set per frame in flight

use ash::vk;

use crate::error::{RenderResult, VkResultExt};

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };

        // Null handles are ignored by destroy, so a partial set can be released
        let result = unsafe {
            device
                .create_semaphore(&semaphore_info, None)
                .map(|s| sync.image_available = s)
                .and_then(|()| device.create_semaphore(&semaphore_info, None))
                .map(|s| sync.render_finished = s)
                .and_then(|()| device.create_fence(&fence_info, None))
                .map(|f| sync.in_flight_fence = f)
        };

        if let Err(e) = result.or_fail("Failed to create frame sync objects") {
            sync.destroy(device);
            return Err(e);
        }

        Ok(sync)
    }

    /// One set per slot
    pub fn create_all(device: &ash::Device, frames_in_flight: usize) -> RenderResult<Vec<Self>> {
        let mut frames = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match Self::new(device) {
                Ok(sync) => frames.push(sync),
                Err(e) => {
                    Self::destroy_all(device, &frames);
                    return Err(e);
                }
            }
        }
        Ok(frames)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }

    pub fn destroy_all(device: &ash::Device, frames: &[Self]) {
        for sync in frames {
            sync.destroy(device);
        }
    }
}

// Frame scheduler - frames in flight
//
// Drives acquire -> submit -> present over N slots. Each slot owns one fence
// and two semaphores; swapchain images are tracked separately because the
// image count and the slot count differ.
//
// Per frame, strictly in this order:
//   1. wait on the slot fence
//   2. reset it
//   3. acquire an image (signals the slot's image-available semaphore)
//   4. if that image is still owned by another slot, wait on that slot too
//   5. submit the image's command buffer, arming the slot fence
//   6. present
//   7. next slot

use crate::error::{RenderError, RenderResult};

/// Result of a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
}

/// The GPU side of a frame. Slot arguments select fences and semaphores,
/// image arguments select command buffers.
pub trait FrameBackend {
    fn wait_for_fence(&mut self, slot: usize) -> RenderResult<()>;
    fn reset_fence(&mut self, slot: usize) -> RenderResult<()>;
    fn acquire_next_image(&mut self, slot: usize) -> RenderResult<AcquiredImage>;
    /// The image's previous submission has retired; refresh its commands if needed
    fn prepare_image(&mut self, image_index: u32) -> RenderResult<()>;
    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, nothing pending
    Idle,
    /// Fence reset, waiting for an image
    Acquiring,
    /// Fence armed by a queue submission
    Submitted,
    /// Handed to the presentation engine
    Presented,
}

/// What one call to [`FrameScheduler::draw_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub slot: usize,
    /// `None` when acquisition found the swapchain out of date
    pub image_index: Option<u32>,
    pub needs_recreate: bool,
}

#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    current_slot: usize,
    slot_states: Vec<SlotState>,
    image_owners: Vec<Option<usize>>,
}

impl FrameScheduler {
    /// `frames_in_flight` is raised to 1 if zero
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            frames_in_flight,
            current_slot: 0,
            slot_states: vec![SlotState::Idle; frames_in_flight],
            image_owners: vec![None; image_count],
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// `None` for a slot past `frames_in_flight`
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slot_states.get(slot).copied()
    }

    /// Slot that last submitted work for `image_index`
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.image_owners.get(image_index as usize).copied().flatten()
    }

    /// Start over after the swapchain and sync objects were rebuilt.
    ///
    /// Only valid once the device is idle and every fence is signaled again.
    pub fn reset(&mut self, image_count: usize) {
        self.current_slot = 0;
        self.slot_states.fill(SlotState::Idle);
        self.image_owners = vec![None; image_count];
    }

    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> RenderResult<FrameOutcome> {
        let slot = self.current_slot;

        backend.wait_for_fence(slot)?;
        self.slot_states[slot] = SlotState::Idle;

        backend.reset_fence(slot)?;
        self.slot_states[slot] = SlotState::Acquiring;

        let acquired = match backend.acquire_next_image(slot) {
            Ok(acquired) => acquired,
            Err(RenderError::SwapchainOutOfDate) => {
                // The slot fence stays unsignaled; the caller rebuilds sync objects
                log::debug!("Swapchain out of date on acquire (slot {})", slot);
                return Ok(FrameOutcome {
                    slot,
                    image_index: None,
                    needs_recreate: true,
                });
            }
            Err(e) => return Err(e),
        };
        let image_index = acquired.index;

        if image_index as usize >= self.image_owners.len() {
            self.image_owners.resize(image_index as usize + 1, None);
        }
        if let Some(owner) = self.image_owners[image_index as usize] {
            if owner != slot {
                backend.wait_for_fence(owner)?;
            }
        }
        self.image_owners[image_index as usize] = Some(slot);

        backend.prepare_image(image_index)?;

        backend.submit(slot, image_index)?;
        self.slot_states[slot] = SlotState::Submitted;

        let needs_recreate = match backend.present(slot, image_index) {
            Ok(PresentStatus::Optimal) => acquired.suboptimal,
            Ok(PresentStatus::Suboptimal) | Err(RenderError::SwapchainOutOfDate) => true,
            Err(e) => return Err(e),
        };
        self.slot_states[slot] = SlotState::Presented;

        self.current_slot = (slot + 1) % self.frames_in_flight;

        Ok(FrameOutcome {
            slot,
            image_index: Some(image_index),
            needs_recreate,
        })
    }
}

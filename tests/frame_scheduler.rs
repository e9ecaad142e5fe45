// Frame scheduler against a simulated GPU
//
// The simulated queue completes work whenever a fence is waited on, which is
// enough to check ordering: no slot is reused and no image is re-recorded
// before the fence covering its last submission has been seen signaled.

use mesh_renderer::backend::frame::{
    AcquiredImage, FrameBackend, FrameScheduler, PresentStatus, SlotState,
};
use mesh_renderer::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fence {
    Signaled,
    Unsignaled,
    /// Armed by a submission that has not been waited on yet
    Pending,
}

struct SimulatedGpu {
    fences: Vec<Fence>,
    /// Slot that last submitted each image, and whether that work retired
    image_submissions: Vec<Option<(usize, bool)>>,
    acquire_order: Vec<u32>,
    frame: usize,
    submits: Vec<(usize, u32)>,
    presents: Vec<(usize, u32)>,
    out_of_date_on_frame: Option<usize>,
}

impl SimulatedGpu {
    fn new(frames_in_flight: usize, image_count: usize, acquire_order: Vec<u32>) -> Self {
        Self {
            fences: vec![Fence::Signaled; frames_in_flight],
            image_submissions: vec![None; image_count],
            acquire_order,
            frame: 0,
            submits: Vec::new(),
            presents: Vec::new(),
            out_of_date_on_frame: None,
        }
    }
}

impl FrameBackend for SimulatedGpu {
    fn wait_for_fence(&mut self, slot: usize) -> RenderResult<()> {
        assert_ne!(
            self.fences[slot],
            Fence::Unsignaled,
            "waiting on slot {} would never return",
            slot
        );
        self.fences[slot] = Fence::Signaled;
        for submission in self.image_submissions.iter_mut().flatten() {
            if submission.0 == slot {
                submission.1 = true;
            }
        }
        Ok(())
    }

    fn reset_fence(&mut self, slot: usize) -> RenderResult<()> {
        assert_eq!(self.fences[slot], Fence::Signaled, "reset before wait on slot {}", slot);
        self.fences[slot] = Fence::Unsignaled;
        Ok(())
    }

    fn acquire_next_image(&mut self, _slot: usize) -> RenderResult<AcquiredImage> {
        if self.out_of_date_on_frame == Some(self.frame) {
            self.out_of_date_on_frame = None;
            return Err(RenderError::SwapchainOutOfDate);
        }
        let index = self.acquire_order[self.frame % self.acquire_order.len()];
        self.frame += 1;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn prepare_image(&mut self, image_index: u32) -> RenderResult<()> {
        if let Some((slot, retired)) = self.image_submissions[image_index as usize] {
            assert!(
                retired,
                "image {} touched while slot {} still renders to it",
                image_index, slot
            );
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        assert_eq!(
            self.fences[slot],
            Fence::Unsignaled,
            "slot {} submitted without wait and reset",
            slot
        );
        self.fences[slot] = Fence::Pending;
        self.image_submissions[image_index as usize] = Some((slot, false));
        self.submits.push((slot, image_index));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentStatus> {
        self.presents.push((slot, image_index));
        Ok(PresentStatus::Optimal)
    }
}

fn run(frames_in_flight: usize, image_count: usize, order: Vec<u32>, frames: usize) -> SimulatedGpu {
    let mut scheduler = FrameScheduler::new(frames_in_flight, image_count);
    let mut gpu = SimulatedGpu::new(frames_in_flight, image_count, order);

    for _ in 0..frames {
        let outcome = scheduler.draw_frame(&mut gpu).unwrap();
        assert!(!outcome.needs_recreate);
    }
    gpu
}

#[test]
fn slots_advance_modulo_frames_in_flight() {
    let gpu = run(3, 3, vec![0, 1, 2], 10);

    let slots: Vec<usize> = gpu.submits.iter().map(|&(slot, _)| slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn submits_use_the_acquired_image_not_the_slot() {
    // Three slots over two images, so slot and image index drift apart
    let gpu = run(3, 2, vec![1, 0], 6);

    assert_eq!(
        gpu.submits,
        vec![(0, 1), (1, 0), (2, 1), (0, 0), (1, 1), (2, 0)]
    );
    assert_eq!(gpu.presents, gpu.submits);
}

#[test]
fn irregular_acquire_order_never_races() {
    // The presentation engine may return images out of order
    let order = vec![0, 2, 2, 1, 0, 0, 1, 2, 1, 1, 0, 2];

    for frames_in_flight in 1..=4 {
        run(frames_in_flight, 3, order.clone(), 60);
    }
}

#[test]
fn more_slots_than_images() {
    run(4, 2, vec![0, 1], 40);
}

#[test]
fn out_of_date_leaves_slot_for_recreation() {
    let mut scheduler = FrameScheduler::new(2, 3);
    let mut gpu = SimulatedGpu::new(2, 3, vec![0, 1, 2]);
    gpu.out_of_date_on_frame = Some(1);

    scheduler.draw_frame(&mut gpu).unwrap();
    let outcome = scheduler.draw_frame(&mut gpu).unwrap();

    assert!(outcome.needs_recreate);
    assert_eq!(outcome.slot, 1);
    assert_eq!(outcome.image_index, None);
    assert_eq!(scheduler.slot_state(1), Some(SlotState::Acquiring));
    assert_eq!(gpu.submits.len(), 1);

    // What the renderer does after rebuilding the swapchain and sync objects
    let mut gpu = SimulatedGpu::new(2, 3, vec![2, 0, 1]);
    scheduler.reset(3);
    let outcome = scheduler.draw_frame(&mut gpu).unwrap();

    assert_eq!(outcome.slot, 0);
    assert_eq!(outcome.image_index, Some(2));
    assert!(!outcome.needs_recreate);
}

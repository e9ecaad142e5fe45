// Renderer - ties the backend together
//
// Owns every Vulkan object for one window. Objects that depend on the
// swapchain are rebuilt together whenever it goes out of date or the window
// is resized.

use ash::vk;
use glam::Mat4;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::frame::{AcquiredImage, PresentStatus};
use crate::backend::{
    pipeline, shader, CommandRecorder, DrawItem, FrameBackend, FrameScheduler, FrameSync,
    GraphicsPipeline, Scene, Surface, Swapchain, VulkanDevice, VulkanInstance,
};
use crate::error::{RenderResult, VkResultExt};
use crate::mesh::{Mesh, MeshData, MeshId};

/// Settings the renderer needs, usually built from `Config::renderer_config`
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub app_name: String,
    /// Used when the surface offers it, FIFO otherwise
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub enable_validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "Mesh Renderer".to_string(),
            present_mode: vk::PresentModeKHR::MAILBOX,
            clear_color: [0.6, 0.65, 0.4, 1.0],
            max_frames_in_flight: 3,
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

pub struct Renderer {
    // Explicitly destroyed in Drop
    meshes: Vec<Mesh>,
    frames: Vec<FrameSync>,
    scheduler: FrameScheduler,
    recorder: CommandRecorder,
    framebuffers: Vec<vk::Framebuffer>,
    pipeline: GraphicsPipeline,

    vertex_spirv: Vec<u32>,
    fragment_spirv: Vec<u32>,
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    framebuffer_size: (u32, u32),
    needs_recreate: bool,

    // Field order is drop order
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<VulkanDevice>,
    _instance: Arc<VulkanInstance>,
}

impl Renderer {
    pub fn new<W>(window: &W, framebuffer_size: (u32, u32), config: &RendererConfig) -> RenderResult<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        let display = window.raw_display_handle();

        let vertex_spirv = shader::load_spirv(&config.vertex_shader)?;
        let fragment_spirv = shader::load_spirv(&config.fragment_shader)?;

        let instance = VulkanInstance::new(&config.app_name, Some(display), config.enable_validation)?;
        let surface = Surface::new(instance.clone(), display, window.raw_window_handle())?;
        let device = VulkanDevice::new(instance.clone(), Some(&surface))?;

        let (width, height) = framebuffer_size;
        let swapchain = Swapchain::new(device.clone(), &surface, width, height, config.present_mode)?;

        let recorder = CommandRecorder::new(&device.device, device.graphics_queue_family)?;
        let scheduler = FrameScheduler::new(config.max_frames_in_flight, swapchain.image_count());

        // From here on Drop releases whatever has been created
        let mut renderer = Self {
            meshes: Vec::new(),
            frames: Vec::new(),
            scheduler,
            recorder,
            framebuffers: Vec::new(),
            pipeline: GraphicsPipeline::default(),
            vertex_spirv,
            fragment_spirv,
            clear_color: config.clear_color,
            present_mode: config.present_mode,
            framebuffer_size,
            needs_recreate: false,
            swapchain,
            surface,
            device,
            _instance: instance,
        };

        renderer.frames =
            FrameSync::create_all(&renderer.device.device, renderer.scheduler.frames_in_flight())?;
        renderer.build_swapchain_objects()?;

        log::info!(
            "Renderer ready: {} swapchain images, {:?}, {} frames in flight",
            renderer.swapchain.image_count(),
            renderer.swapchain.present_mode,
            renderer.scheduler.frames_in_flight()
        );

        Ok(renderer)
    }

    /// Upload a mesh; its buffers are populated before this returns
    pub fn add_mesh(&mut self, data: &MeshData) -> RenderResult<MeshId> {
        let mesh = Mesh::upload(
            &self.device,
            self.recorder.pool(),
            self.device.graphics_queue,
            data,
        )?;

        self.meshes.push(mesh);
        self.recorder.mark_all_stale();

        log::debug!(
            "Added mesh {} ({} vertices, {} indices)",
            self.meshes.len() - 1,
            data.vertex_count(),
            data.index_count()
        );
        Ok(MeshId(self.meshes.len() - 1))
    }

    /// Replace a mesh's model matrix. Takes effect on the next frame.
    pub fn update_model(&mut self, id: MeshId, model: Mat4) {
        match self.meshes.get_mut(id.0) {
            Some(mesh) => {
                mesh.set_model(model);
                self.recorder.mark_all_stale();
            }
            None => log::warn!("update_model: no mesh with id {}", id.0),
        }
    }

    /// New framebuffer size; the swapchain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.framebuffer_size = (width, height);
        self.needs_recreate = true;
    }

    fn is_minimized(&self) -> bool {
        self.framebuffer_size.0 == 0 || self.framebuffer_size.1 == 0
    }

    /// Render and present one frame
    pub fn draw(&mut self) -> RenderResult<()> {
        if self.needs_recreate {
            self.recreate_swapchain()?;
        }
        if self.is_minimized() {
            return Ok(());
        }

        let draws: Vec<DrawItem> = self.meshes.iter().map(Mesh::draw_item).collect();

        let mut backend = VulkanFrameBackend {
            device: &self.device,
            swapchain: &self.swapchain,
            frames: &self.frames,
            recorder: &mut self.recorder,
            framebuffers: &self.framebuffers,
            pipeline: &self.pipeline,
            clear_color: self.clear_color,
            draws: &draws,
        };

        let outcome = self.scheduler.draw_frame(&mut backend)?;
        if outcome.needs_recreate {
            log::debug!("Swapchain needs recreation after slot {}", outcome.slot);
            self.needs_recreate = true;
        }

        Ok(())
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        if self.is_minimized() {
            return Ok(());
        }
        let (width, height) = self.framebuffer_size;
        log::info!("Recreating swapchain: {}x{}", width, height);

        self.device.wait_idle()?;

        self.destroy_swapchain_objects();
        // A fence may have been reset without a submission behind it
        FrameSync::destroy_all(&self.device.device, &self.frames);
        self.frames.clear();

        self.swapchain
            .recreate(&self.surface, width, height, self.present_mode)?;
        self.frames =
            FrameSync::create_all(&self.device.device, self.scheduler.frames_in_flight())?;
        self.build_swapchain_objects()?;

        self.needs_recreate = false;
        Ok(())
    }

    /// Pipeline, framebuffers and fully recorded command buffers for the current swapchain
    fn build_swapchain_objects(&mut self) -> RenderResult<()> {
        let device = &self.device.device;
        let extent = self.swapchain.extent;

        self.pipeline = GraphicsPipeline::new(
            &self.device,
            self.swapchain.format,
            extent,
            &self.vertex_spirv,
            &self.fragment_spirv,
        )?;

        self.framebuffers = pipeline::create_framebuffers(
            device,
            &self.swapchain.image_views,
            self.pipeline.render_pass,
            extent,
        )?;

        self.recorder.allocate(device, self.swapchain.image_count())?;

        let draws: Vec<DrawItem> = self.meshes.iter().map(Mesh::draw_item).collect();
        let scene = Scene {
            framebuffers: &self.framebuffers,
            extent,
            clear_color: self.clear_color,
            pipeline: &self.pipeline,
            draws: &draws,
        };
        self.recorder.record_all(device, &scene)?;

        self.scheduler.reset(self.swapchain.image_count());
        Ok(())
    }

    fn destroy_swapchain_objects(&mut self) {
        let device = &self.device.device;

        pipeline::destroy_framebuffers(device, &self.framebuffers);
        self.framebuffers.clear();

        self.pipeline.destroy(device);
        self.pipeline = GraphicsPipeline::default();
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Shutting down renderer...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("Device did not go idle before teardown: {}", e);
        }

        let device = &self.device.device;
        for mesh in self.meshes.drain(..) {
            mesh.destroy(device);
        }
        FrameSync::destroy_all(device, &self.frames);
        self.frames.clear();
        self.recorder.destroy(device);

        self.destroy_swapchain_objects();
        // Swapchain, surface, device and instance follow in field order
    }
}

/// One frame's view of the renderer
struct VulkanFrameBackend<'a> {
    device: &'a VulkanDevice,
    swapchain: &'a Swapchain,
    frames: &'a [FrameSync],
    recorder: &'a mut CommandRecorder,
    framebuffers: &'a [vk::Framebuffer],
    pipeline: &'a GraphicsPipeline,
    clear_color: [f32; 4],
    draws: &'a [DrawItem],
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_fence(&mut self, slot: usize) -> RenderResult<()> {
        let fences = [self.frames[slot].in_flight_fence];
        unsafe { self.device.device.wait_for_fences(&fences, true, u64::MAX) }
            .or_frame_fail("Failed to wait for in-flight fence")
    }

    fn reset_fence(&mut self, slot: usize) -> RenderResult<()> {
        let fences = [self.frames[slot].in_flight_fence];
        unsafe { self.device.device.reset_fences(&fences) }
            .or_frame_fail("Failed to reset in-flight fence")
    }

    fn acquire_next_image(&mut self, slot: usize) -> RenderResult<AcquiredImage> {
        let (index, suboptimal) = self
            .swapchain
            .acquire_next_image(self.frames[slot].image_available)?;
        Ok(AcquiredImage { index, suboptimal })
    }

    fn prepare_image(&mut self, image_index: u32) -> RenderResult<()> {
        let scene = Scene {
            framebuffers: self.framebuffers,
            extent: self.swapchain.extent,
            clear_color: self.clear_color,
            pipeline: self.pipeline,
            draws: self.draws,
        };

        if self.recorder.refresh(&self.device.device, image_index, &scene)? {
            log::trace!("Re-recorded command buffer for image {}", image_index);
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        let sync = &self.frames[slot];

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.recorder.command_buffer(image_index)?];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .or_frame_fail("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentStatus> {
        let suboptimal = self.swapchain.present(
            self.device.present_queue,
            image_index,
            self.frames[slot].render_finished,
        )?;

        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        })
    }
}

// Command buffer recording
//
// One primary command buffer per swapchain image, all recorded with the same
// fixed draw sequence. Recording goes through `CommandEncoder` so the
// sequence can be checked without a GPU.

use ash::vk;
use glam::Mat4;

use super::pipeline::GraphicsPipeline;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// The commands the scene needs, in the order they are issued
pub trait CommandEncoder {
    fn begin(&mut self) -> RenderResult<()>;
    fn begin_render_pass(&mut self, target: &RenderTarget);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn push_model(&mut self, layout: vk::PipelineLayout, model: &Mat4);
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);
    fn draw_indexed(&mut self, index_count: u32);
    fn end_render_pass(&mut self);
    fn end(&mut self) -> RenderResult<()>;
}

/// Where one command buffer renders to
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Everything needed to draw one mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub model: Mat4,
}

/// Encode the full frame: clear, then every mesh in order
pub fn record_scene<E: CommandEncoder>(
    encoder: &mut E,
    target: &RenderTarget,
    pipeline: &GraphicsPipeline,
    draws: &[DrawItem],
) -> RenderResult<()> {
    encoder.begin()?;
    encoder.begin_render_pass(target);
    encoder.bind_pipeline(pipeline.pipeline);

    for draw in draws {
        encoder.push_model(pipeline.layout, &draw.model);
        encoder.bind_vertex_buffer(draw.vertex_buffer);
        encoder.bind_index_buffer(draw.index_buffer);
        encoder.draw_indexed(draw.index_count);
    }

    encoder.end_render_pass();
    encoder.end()
}

/// Forwards to `ash` for a single command buffer
pub struct VulkanEncoder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> VulkanEncoder<'a> {
    pub fn new(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
        }
    }
}

impl CommandEncoder for VulkanEncoder<'_> {
    fn begin(&mut self) -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
        }
        .or_fail("Failed to begin command buffer")
    }

    fn begin_render_pass(&mut self, target: &RenderTarget) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: target.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(target.render_pass)
            .framebuffer(target.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    fn push_model(&mut self, layout: vk::PipelineLayout, model: &Mat4) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(model),
            );
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device.cmd_bind_index_buffer(
                self.command_buffer,
                buffer,
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.command_buffer, index_count, 1, 0, 0, 0);
        }
    }

    fn end_render_pass(&mut self) {
        unsafe { self.device.cmd_end_render_pass(self.command_buffer) };
    }

    fn end(&mut self) -> RenderResult<()> {
        unsafe { self.device.end_command_buffer(self.command_buffer) }
            .or_fail("Failed to end command buffer")
    }
}

/// What every image's command buffer draws. Only the framebuffer differs
/// between images.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    /// Indexed by swapchain image index
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: &'a GraphicsPipeline,
    pub draws: &'a [DrawItem],
}

impl Scene<'_> {
    pub fn target(&self, image_index: u32) -> RenderResult<RenderTarget> {
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or(RenderError::Frame {
                what: "No framebuffer for acquired image",
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        Ok(RenderTarget {
            render_pass: self.pipeline.render_pass,
            framebuffer,
            extent: self.extent,
            clear_color: self.clear_color,
        })
    }
}

/// One command buffer per swapchain image, indexed by image index.
///
/// A buffer is stale when the scene changed after it was recorded. The
/// `*_with` methods take an encoder factory, called with the buffer about to
/// be recorded.
#[derive(Debug, Default)]
pub struct ImageCommands {
    buffers: Vec<vk::CommandBuffer>,
    stale: Vec<bool>,
}

impl ImageCommands {
    /// Every buffer starts stale
    pub fn new(buffers: Vec<vk::CommandBuffer>) -> Self {
        let stale = vec![true; buffers.len()];
        Self { buffers, stale }
    }

    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn command_buffer(&self, image_index: u32) -> RenderResult<vk::CommandBuffer> {
        self.buffers
            .get(image_index as usize)
            .copied()
            .ok_or(RenderError::Frame {
                what: "No command buffer for acquired image",
                result: vk::Result::ERROR_UNKNOWN,
            })
    }

    pub fn is_stale(&self, image_index: u32) -> bool {
        self.stale.get(image_index as usize).copied().unwrap_or(false)
    }

    /// Called whenever the draw list or a model matrix changes
    pub fn mark_all_stale(&mut self) {
        self.stale.iter_mut().for_each(|stale| *stale = true);
    }

    /// Record one image's buffer against that image's framebuffer. The
    /// buffer stays stale if recording fails.
    pub fn record_with<E, F>(
        &mut self,
        image_index: u32,
        scene: &Scene<'_>,
        encoder_for: F,
    ) -> RenderResult<()>
    where
        E: CommandEncoder,
        F: FnOnce(vk::CommandBuffer) -> RenderResult<E>,
    {
        let command_buffer = self.command_buffer(image_index)?;
        let target = scene.target(image_index)?;

        let mut encoder = encoder_for(command_buffer)?;
        record_scene(&mut encoder, &target, scene.pipeline, scene.draws)?;

        self.stale[image_index as usize] = false;
        Ok(())
    }

    /// Record every buffer. Needs exactly one framebuffer per buffer.
    pub fn record_all_with<E, F>(
        &mut self,
        scene: &Scene<'_>,
        mut encoder_for: F,
    ) -> RenderResult<()>
    where
        E: CommandEncoder,
        F: FnMut(vk::CommandBuffer) -> RenderResult<E>,
    {
        if scene.framebuffers.len() != self.buffers.len() {
            return Err(RenderError::Frame {
                what: "Framebuffer count does not match command buffers",
                result: vk::Result::ERROR_UNKNOWN,
            });
        }

        for image_index in 0..self.buffers.len() as u32 {
            self.record_with(image_index, scene, &mut encoder_for)?;
        }
        Ok(())
    }

    /// Re-record the image's buffer if it is stale. Returns whether it did.
    ///
    /// The caller guarantees the buffer is not pending on the GPU.
    pub fn refresh_with<E, F>(
        &mut self,
        image_index: u32,
        scene: &Scene<'_>,
        encoder_for: F,
    ) -> RenderResult<bool>
    where
        E: CommandEncoder,
        F: FnOnce(vk::CommandBuffer) -> RenderResult<E>,
    {
        if !self.is_stale(image_index) {
            return Ok(false);
        }
        self.record_with(image_index, scene, encoder_for)?;
        Ok(true)
    }
}

/// Encoders for the device. Each buffer is reset before it is recorded again.
fn device_encoder<'a>(
    device: &'a ash::Device,
) -> impl FnMut(vk::CommandBuffer) -> RenderResult<VulkanEncoder<'a>> + 'a {
    move |command_buffer| {
        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
        .or_fail("Failed to reset command buffer")?;

        Ok(VulkanEncoder::new(device, command_buffer))
    }
}

/// Command pool plus the per-image buffers allocated from it.
///
/// Released with [`CommandRecorder::destroy`].
pub struct CommandRecorder {
    pool: vk::CommandPool,
    images: ImageCommands,
}

impl CommandRecorder {
    /// Buffers in the pool can be reset one at a time for re-recording
    pub fn new(device: &ash::Device, queue_family: u32) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .or_fail("Failed to create command pool")?;

        Ok(Self {
            pool,
            images: ImageCommands::default(),
        })
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Replace the current buffers with `count` fresh ones, all stale
    pub fn allocate(&mut self, device: &ash::Device, count: usize) -> RenderResult<()> {
        self.free(device);

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .or_fail("Failed to allocate command buffers")?;
        self.images = ImageCommands::new(buffers);

        log::debug!("Allocated {} command buffers", self.images.len());
        Ok(())
    }

    fn free(&mut self, device: &ash::Device) {
        if !self.images.is_empty() {
            unsafe { device.free_command_buffers(self.pool, self.images.buffers()) };
        }
        self.images = ImageCommands::default();
    }

    pub fn command_buffer(&self, image_index: u32) -> RenderResult<vk::CommandBuffer> {
        self.images.command_buffer(image_index)
    }

    pub fn mark_all_stale(&mut self) {
        self.images.mark_all_stale();
    }

    /// Record every buffer. The device must be idle.
    pub fn record_all(&mut self, device: &ash::Device, scene: &Scene<'_>) -> RenderResult<()> {
        self.images.record_all_with(scene, device_encoder(device))?;
        log::debug!("Recorded {} command buffers", self.images.len());
        Ok(())
    }

    /// Re-record the image's buffer if the scene changed since it was recorded
    pub fn refresh(
        &mut self,
        device: &ash::Device,
        image_index: u32,
        scene: &Scene<'_>,
    ) -> RenderResult<bool> {
        self.images.refresh_with(image_index, scene, device_encoder(device))
    }

    /// Destroys the pool, which frees every buffer allocated from it
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
        self.pool = vk::CommandPool::null();
        self.images = ImageCommands::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn images(count: u64) -> ImageCommands {
        ImageCommands::new((1..=count).map(vk::CommandBuffer::from_raw).collect())
    }

    fn pipeline() -> GraphicsPipeline {
        GraphicsPipeline {
            render_pass: vk::RenderPass::from_raw(7),
            ..Default::default()
        }
    }

    fn scene<'a>(framebuffers: &'a [vk::Framebuffer], pipeline: &'a GraphicsPipeline) -> Scene<'a> {
        Scene {
            framebuffers,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            clear_color: [0.0, 0.0, 0.0, 1.0],
            pipeline,
            draws: &[],
        }
    }

    #[test]
    fn test_new_buffers_start_stale() {
        let mut images = images(3);
        assert!((0..3).all(|i| images.is_stale(i)));

        images.stale = vec![false; 3];
        images.mark_all_stale();
        assert!((0..3).all(|i| images.is_stale(i)));
    }

    #[test]
    fn test_command_buffer_by_image_index() {
        let images = images(2);

        assert_eq!(images.command_buffer(1).unwrap().as_raw(), 2);
        assert!(images.command_buffer(2).is_err());
        assert!(!images.is_stale(5));
    }

    #[test]
    fn test_scene_target_uses_image_framebuffer() {
        let framebuffers = [vk::Framebuffer::from_raw(10), vk::Framebuffer::from_raw(11)];
        let pipeline = pipeline();
        let scene = scene(&framebuffers, &pipeline);

        let target = scene.target(1).unwrap();
        assert_eq!(target.framebuffer.as_raw(), 11);
        assert_eq!(target.render_pass.as_raw(), 7);
        assert_eq!(target.extent.width, 800);

        assert!(scene.target(2).is_err());
    }

    #[test]
    fn test_default_is_empty() {
        let images = ImageCommands::default();
        assert!(images.is_empty());
        assert_eq!(images.len(), 0);
        assert!(images.buffers().is_empty());
    }
}

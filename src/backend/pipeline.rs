// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, blending.
// Viewport and scissor are baked in, so the whole thing is rebuilt with the
// swapchain.

use ash::vk;
use std::mem::{offset_of, size_of};

use super::shader::create_shader_module;
use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::mesh::Vertex;

/// Size of the model matrix push constant
pub const PUSH_CONSTANT_SIZE: u32 = size_of::<glam::Mat4>() as u32;

/// Create a render pass with a single color attachment presented at the end
pub fn create_render_pass(device: &ash::Device, format: vk::Format) -> RenderResult<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    let dependencies = subpass_dependencies();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }
        .or_fail("Failed to create render pass")
}

/// Layout transitions into and out of the subpass, both anchored at BOTTOM_OF_PIPE
pub fn subpass_dependencies() -> [vk::SubpassDependency; 2] {
    let attachment_rw =
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

    [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .src_access_mask(vk::AccessFlags::MEMORY_READ)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(attachment_rw)
            .build(),
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(attachment_rw)
            .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ)
            .build(),
    ]
}

/// Create framebuffers for each swapchain image
pub fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RenderResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(RenderError::Vulkan {
                    what: "Failed to create framebuffer",
                    result: e,
                });
            }
        }
    }

    Ok(framebuffers)
}

pub fn destroy_framebuffers(device: &ash::Device, framebuffers: &[vk::Framebuffer]) {
    for &framebuffer in framebuffers {
        unsafe { device.destroy_framebuffer(framebuffer, None) };
    }
}

/// Vertex input description for interleaved position + color
pub fn vertex_input_info() -> (
    [vk::VertexInputBindingDescription; 1],
    [vk::VertexInputAttributeDescription; 2],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };

    let position_attr = vk::VertexInputAttributeDescription {
        binding: 0,
        location: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: offset_of!(Vertex, position) as u32,
    };

    let color_attr = vk::VertexInputAttributeDescription {
        binding: 0,
        location: 1,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: offset_of!(Vertex, color) as u32,
    };

    ([binding], [position_attr, color_attr])
}

/// Standard alpha blending on color, source alpha passed through
pub fn color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::RGBA,
    }
}

/// Render pass, layout and pipeline. Released with [`GraphicsPipeline::destroy`].
///
/// The default value holds null handles, which destroy accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphicsPipeline {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    pub fn new(
        device: &VulkanDevice,
        format: vk::Format,
        extent: vk::Extent2D,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
    ) -> RenderResult<Self> {
        let device = &device.device;
        let render_pass = create_render_pass(device, format)?;

        let layout = match create_pipeline_layout(device) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        match create_pipeline(device, render_pass, layout, extent, vertex_spirv, fragment_spirv)
        {
            Ok(pipeline) => {
                log::debug!("Created graphics pipeline for {}x{}", extent.width, extent.height);
                Ok(Self {
                    render_pass,
                    layout,
                    pipeline,
                })
            }
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(layout, None);
                    device.destroy_render_pass(render_pass, None);
                }
                Err(e)
            }
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn create_pipeline_layout(device: &ash::Device) -> RenderResult<vk::PipelineLayout> {
    // Model matrix, one per draw
    let push_constant_ranges = &[vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: PUSH_CONSTANT_SIZE,
    }];

    let layout_info =
        vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(push_constant_ranges);

    unsafe { device.create_pipeline_layout(&layout_info, None) }
        .or_fail("Failed to create pipeline layout")
}

fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vertex_spirv: &[u32],
    fragment_spirv: &[u32],
) -> RenderResult<vk::Pipeline> {
    let vert_shader = create_shader_module(device, vertex_spirv)?;
    let frag_shader = match create_shader_module(device, fragment_spirv) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.destroy_shader_module(vert_shader, None) };
            return Err(e);
        }
    };

    let entry_point = c"main";

    let shader_stages = &[
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(entry_point)
            .build(),
    ];

    let (bindings, attributes) = vertex_input_info();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewports = &[vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = &[vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let color_blend_attachments = &[color_blend_attachment()];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let result = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    // Modules are only needed while the pipeline is being built
    unsafe {
        device.destroy_shader_module(vert_shader, None);
        device.destroy_shader_module(frag_shader, None);
    }

    let pipelines = result
        .map_err(|(_, e)| e)
        .or_fail("Failed to create graphics pipeline")?;

    Ok(pipelines[0])
}

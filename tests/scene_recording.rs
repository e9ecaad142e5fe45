// Command stream recorded for a two-quad scene, checked without a GPU

use ash::vk::{self, Handle};
use glam::Mat4;
use mesh_renderer::backend::command::{
    record_scene, CommandEncoder, DrawItem, ImageCommands, RenderTarget, Scene,
};
use mesh_renderer::backend::GraphicsPipeline;
use mesh_renderer::{MeshData, RenderError, RenderResult, Vertex};
use std::cell::RefCell;

#[derive(Debug, Clone, PartialEq)]
enum Cmd {
    Begin,
    BeginRenderPass { framebuffer: u64, clear: [f32; 4] },
    BindPipeline(u64),
    PushModel(Mat4),
    BindVertexBuffer(u64),
    BindIndexBuffer(u64),
    DrawIndexed(u32),
    EndRenderPass,
    End,
}

/// Every command issued, tagged with the command buffer it went into
type CommandLog = RefCell<Vec<(u64, Cmd)>>;

struct RecordingEncoder<'a> {
    command_buffer: u64,
    log: &'a CommandLog,
}

impl RecordingEncoder<'_> {
    fn push(&self, cmd: Cmd) {
        self.log.borrow_mut().push((self.command_buffer, cmd));
    }
}

impl CommandEncoder for RecordingEncoder<'_> {
    fn begin(&mut self) -> RenderResult<()> {
        self.push(Cmd::Begin);
        Ok(())
    }

    fn begin_render_pass(&mut self, target: &RenderTarget) {
        self.push(Cmd::BeginRenderPass {
            framebuffer: target.framebuffer.as_raw(),
            clear: target.clear_color,
        });
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.push(Cmd::BindPipeline(pipeline.as_raw()));
    }

    fn push_model(&mut self, _layout: vk::PipelineLayout, model: &Mat4) {
        self.push(Cmd::PushModel(*model));
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.push(Cmd::BindVertexBuffer(buffer.as_raw()));
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.push(Cmd::BindIndexBuffer(buffer.as_raw()));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        self.push(Cmd::DrawIndexed(index_count));
    }

    fn end_render_pass(&mut self) {
        self.push(Cmd::EndRenderPass);
    }

    fn end(&mut self) -> RenderResult<()> {
        self.push(Cmd::End);
        Ok(())
    }
}

fn encoder_for<'a>(
    log: &'a CommandLog,
) -> impl FnMut(vk::CommandBuffer) -> RenderResult<RecordingEncoder<'a>> + 'a {
    move |command_buffer| {
        Ok(RecordingEncoder {
            command_buffer: command_buffer.as_raw(),
            log,
        })
    }
}

/// Commands that went into one command buffer, in order
fn stream(log: &CommandLog, command_buffer: vk::CommandBuffer) -> Vec<Cmd> {
    log.borrow()
        .iter()
        .filter(|(buffer, _)| *buffer == command_buffer.as_raw())
        .map(|(_, cmd)| cmd.clone())
        .collect()
}

fn times_recorded(log: &CommandLog, command_buffer: vk::CommandBuffer) -> usize {
    stream(log, command_buffer)
        .iter()
        .filter(|cmd| **cmd == Cmd::Begin)
        .count()
}

fn draw_calls(commands: &[Cmd]) -> Vec<&Cmd> {
    commands
        .iter()
        .filter(|c| matches!(c, Cmd::DrawIndexed(_)))
        .collect()
}

const CLEAR: [f32; 4] = [0.6, 0.65, 0.4, 1.0];

fn quad(x: f32) -> MeshData {
    let vertices = vec![
        Vertex::new([x + 0.4, -0.4, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([x + 0.4, 0.4, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([x - 0.4, 0.4, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([x - 0.4, -0.4, 0.0], [1.0, 1.0, 0.0]),
    ];
    MeshData::new(vertices, vec![0, 1, 2, 2, 3, 0]).unwrap()
}

/// Draw items as `Mesh::draw_item` would build them, with fake buffer handles
fn scene() -> Vec<DrawItem> {
    [quad(-0.5), quad(0.5)]
        .iter()
        .enumerate()
        .map(|(i, mesh)| DrawItem {
            vertex_buffer: vk::Buffer::from_raw(100 + i as u64),
            index_buffer: vk::Buffer::from_raw(200 + i as u64),
            index_count: mesh.index_count(),
            model: Mat4::from_translation(glam::Vec3::X * i as f32),
        })
        .collect()
}

fn pipeline() -> GraphicsPipeline {
    GraphicsPipeline {
        render_pass: vk::RenderPass::from_raw(1),
        layout: vk::PipelineLayout::from_raw(2),
        pipeline: vk::Pipeline::from_raw(3),
    }
}

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1366,
    height: 768,
};

fn record_image(framebuffer: u64, draws: &[DrawItem]) -> Vec<Cmd> {
    let target = RenderTarget {
        render_pass: vk::RenderPass::from_raw(1),
        framebuffer: vk::Framebuffer::from_raw(framebuffer),
        extent: EXTENT,
        clear_color: CLEAR,
    };

    let log = CommandLog::default();
    let mut encoder = RecordingEncoder {
        command_buffer: 0,
        log: &log,
    };
    record_scene(&mut encoder, &target, &pipeline(), draws).unwrap();
    stream(&log, vk::CommandBuffer::from_raw(0))
}

fn framebuffers(handles: &[u64]) -> Vec<vk::Framebuffer> {
    handles.iter().copied().map(vk::Framebuffer::from_raw).collect()
}

/// Command buffers as the pool would hand them out, one per image
fn image_commands(count: u64) -> ImageCommands {
    ImageCommands::new((50..50 + count).map(vk::CommandBuffer::from_raw).collect())
}

fn scene_of<'a>(
    framebuffers: &'a [vk::Framebuffer],
    pipeline: &'a GraphicsPipeline,
    draws: &'a [DrawItem],
) -> Scene<'a> {
    Scene {
        framebuffers,
        extent: EXTENT,
        clear_color: CLEAR,
        pipeline,
        draws,
    }
}

#[test]
fn every_image_gets_its_own_framebuffer_and_both_quads() {
    let draws = scene();
    let pipeline = pipeline();
    let framebuffers = framebuffers(&[10, 11, 12]);
    let log = CommandLog::default();

    let mut images = image_commands(3);
    assert_eq!(images.len(), 3);
    images
        .record_all_with(&scene_of(&framebuffers, &pipeline, &draws), encoder_for(&log))
        .unwrap();

    for (image_index, &command_buffer) in images.buffers().iter().enumerate() {
        let commands = stream(&log, command_buffer);

        assert_eq!(times_recorded(&log, command_buffer), 1);
        assert_eq!(
            commands[1],
            Cmd::BeginRenderPass {
                framebuffer: 10 + image_index as u64,
                clear: CLEAR
            }
        );
        assert_eq!(
            draw_calls(&commands),
            vec![&Cmd::DrawIndexed(6), &Cmd::DrawIndexed(6)]
        );
        assert!(!images.is_stale(image_index as u32));
    }
}

#[test]
fn stale_image_is_rerecorded_exactly_once() {
    let draws = scene();
    let pipeline = pipeline();
    let framebuffers = framebuffers(&[10, 11, 12]);
    let scene = scene_of(&framebuffers, &pipeline, &draws);
    let log = CommandLog::default();

    let mut images = image_commands(3);
    images.record_all_with(&scene, encoder_for(&log)).unwrap();
    log.borrow_mut().clear();

    // Fresh buffers are submitted as they are
    assert!(!images.refresh_with(1, &scene, encoder_for(&log)).unwrap());
    assert!(log.borrow().is_empty());

    images.mark_all_stale();
    assert!(images.refresh_with(1, &scene, encoder_for(&log)).unwrap());
    assert!(!images.refresh_with(1, &scene, encoder_for(&log)).unwrap());

    let image_1 = images.buffers()[1];
    assert_eq!(times_recorded(&log, image_1), 1);
    assert_eq!(
        stream(&log, image_1)[1],
        Cmd::BeginRenderPass {
            framebuffer: 11,
            clear: CLEAR
        }
    );

    // The other images wait until they are acquired
    assert!(images.is_stale(0));
    assert!(!images.is_stale(1));
    assert!(images.is_stale(2));
    assert_eq!(times_recorded(&log, images.buffers()[0]), 0);
    assert_eq!(times_recorded(&log, images.buffers()[2]), 0);
}

#[test]
fn failed_recording_keeps_image_stale() {
    let draws = scene();
    let pipeline = pipeline();
    let framebuffers = framebuffers(&[10, 11]);
    let scene = scene_of(&framebuffers, &pipeline, &draws);

    let mut images = image_commands(2);
    let result = images.refresh_with(0, &scene, |_| {
        Err::<RecordingEncoder, _>(RenderError::Vulkan {
            what: "Failed to reset command buffer",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        })
    });

    assert!(result.is_err());
    assert!(images.is_stale(0));
}

#[test]
fn framebuffer_count_must_match_images() {
    let draws = scene();
    let pipeline = pipeline();
    let framebuffers = framebuffers(&[10, 11]);
    let log = CommandLog::default();

    let mut images = image_commands(3);
    let result =
        images.record_all_with(&scene_of(&framebuffers, &pipeline, &draws), encoder_for(&log));

    assert!(result.is_err());
    assert!(log.borrow().is_empty());
    assert!((0..3).all(|i| images.is_stale(i)));
}

#[test]
fn full_sequence_for_one_image() {
    let draws = scene();
    let commands = record_image(10, &draws);

    assert_eq!(
        commands,
        vec![
            Cmd::Begin,
            Cmd::BeginRenderPass {
                framebuffer: 10,
                clear: CLEAR
            },
            Cmd::BindPipeline(3),
            Cmd::PushModel(draws[0].model),
            Cmd::BindVertexBuffer(100),
            Cmd::BindIndexBuffer(200),
            Cmd::DrawIndexed(6),
            Cmd::PushModel(draws[1].model),
            Cmd::BindVertexBuffer(101),
            Cmd::BindIndexBuffer(201),
            Cmd::DrawIndexed(6),
            Cmd::EndRenderPass,
            Cmd::End,
        ]
    );
}

#[test]
fn empty_scene_still_clears() {
    let commands = record_image(10, &[]);

    assert_eq!(commands.len(), 5);
    assert!(matches!(commands[1], Cmd::BeginRenderPass { .. }));
    assert!(!commands.iter().any(|c| matches!(c, Cmd::DrawIndexed(_))));
}

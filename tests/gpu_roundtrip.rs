// Staging upload and read-back on a real device
//
// Runs headless. Machines without a Vulkan driver skip these tests.

use ash::vk;
use mesh_renderer::backend::buffer::{self, GpuBuffer};
use mesh_renderer::backend::{CommandRecorder, VulkanDevice, VulkanInstance};
use mesh_renderer::{Mesh, MeshData, Vertex};
use std::sync::Arc;

struct Gpu {
    recorder: CommandRecorder,
    device: Arc<VulkanDevice>,
}

impl Gpu {
    fn queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    fn pool(&self) -> vk::CommandPool {
        self.recorder.pool()
    }
}

impl Drop for Gpu {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.recorder.destroy(&self.device.device);
    }
}

fn headless_gpu() -> Option<Gpu> {
    let _ = env_logger::builder().is_test(true).try_init();

    let instance = match VulkanInstance::new("gpu-roundtrip", None, false) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("skipping: {}", e);
            return None;
        }
    };
    let device = match VulkanDevice::new(instance, None) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("skipping: {}", e);
            return None;
        }
    };
    let recorder = CommandRecorder::new(&device.device, device.graphics_queue_family).ok()?;

    Some(Gpu { recorder, device })
}

fn upload(gpu: &Gpu, bytes: &[u8]) -> GpuBuffer {
    buffer::upload_via_staging(
        &gpu.device,
        gpu.pool(),
        gpu.queue(),
        bytes,
        vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
    )
    .unwrap()
}

#[test]
fn staging_roundtrip_preserves_bytes() {
    let Some(gpu) = headless_gpu() else { return };

    for size in [1usize, 4, 24, 1000, 65536 + 3] {
        let bytes: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();

        let buffer = upload(&gpu, &bytes);
        let read = buffer::read_back(&gpu.device, gpu.pool(), gpu.queue(), &buffer).unwrap();
        buffer.destroy(&gpu.device.device);

        assert_eq!(read, bytes, "mismatch for {} bytes", size);
    }
}

#[test]
fn mesh_upload_keeps_counts_and_contents() {
    let Some(gpu) = headless_gpu() else { return };

    let data = MeshData::new(
        vec![
            Vertex::new([0.9, -0.3, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([0.9, 0.1, 0.0], [0.0, 1.0, 0.0]),
            Vertex::new([0.1, 0.3, 0.0], [0.0, 0.0, 1.0]),
            Vertex::new([0.1, -0.3, 0.0], [1.0, 1.0, 0.0]),
        ],
        vec![0, 1, 2, 2, 3, 0],
    )
    .unwrap();

    let mesh = Mesh::upload(&gpu.device, gpu.pool(), gpu.queue(), &data).unwrap();
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.index_count(), 6);
    assert_eq!(mesh.model(), glam::Mat4::IDENTITY);

    let vertices =
        buffer::read_back(&gpu.device, gpu.pool(), gpu.queue(), mesh.vertex_buffer()).unwrap();
    let indices =
        buffer::read_back(&gpu.device, gpu.pool(), gpu.queue(), mesh.index_buffer()).unwrap();

    assert_eq!(vertices, data.vertex_bytes());
    assert_eq!(indices, data.index_bytes());

    mesh.destroy(&gpu.device.device);
}

#[test]
fn empty_upload_is_rejected() {
    let Some(gpu) = headless_gpu() else { return };

    let result = buffer::upload_via_staging(
        &gpu.device,
        gpu.pool(),
        gpu.queue(),
        &[],
        vk::BufferUsageFlags::VERTEX_BUFFER,
    );
    assert!(result.is_err());
}

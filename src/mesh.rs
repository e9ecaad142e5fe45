// Mesh data and GPU meshes
//
// `MeshData` is validated host data. `Mesh` owns the two device-local
// buffers built from it plus the model matrix pushed when it is drawn.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::buffer::{self, GpuBuffer};
use crate::backend::{DrawItem, VulkanDevice};
use crate::error::{RenderError, RenderResult};

/// Interleaved vertex, matches shader locations 0 (position) and 1 (color)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self {
            position: Vec3::from_array(position),
            color: Vec3::from_array(color),
        }
    }
}

/// Opaque handle returned by `Renderer::add_mesh`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) usize);

/// Indexed triangle list, checked on construction
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl MeshData {
    /// Rejects empty input and indices that point past the last vertex
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> RenderResult<Self> {
        if vertices.is_empty() {
            return Err(RenderError::InvalidMesh("no vertices".into()));
        }
        if indices.is_empty() {
            return Err(RenderError::InvalidMesh("no indices".into()));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::InvalidMesh(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }

        Ok(Self { vertices, indices })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// A mesh resident in device-local memory. Released with [`Mesh::destroy`].
#[derive(Debug)]
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    vertex_count: u32,
    index_buffer: GpuBuffer,
    index_count: u32,
    model: Mat4,
}

impl Mesh {
    /// Upload both buffers through staging; both are complete on return.
    ///
    /// Buffers also carry TRANSFER_SRC so they can be read back for checks.
    pub fn upload(
        device: &VulkanDevice,
        pool: vk::CommandPool,
        queue: vk::Queue,
        data: &MeshData,
    ) -> RenderResult<Self> {
        let vertex_buffer = buffer::upload_via_staging(
            device,
            pool,
            queue,
            data.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        )?;

        let index_buffer = match buffer::upload_via_staging(
            device,
            pool,
            queue,
            data.index_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                vertex_buffer.destroy(&device.device);
                return Err(e);
            }
        };

        Ok(Self {
            vertex_buffer,
            vertex_count: data.vertex_count(),
            index_buffer,
            index_count: data.index_count(),
            model: Mat4::IDENTITY,
        })
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    pub fn draw_item(&self) -> DrawItem {
        DrawItem {
            vertex_buffer: self.vertex_buffer.buffer,
            index_buffer: self.index_buffer.buffer,
            index_count: self.index_count,
            model: self.model,
        }
    }

    /// The device must be idle or at least done with this mesh
    pub fn destroy(self, device: &ash::Device) {
        self.index_buffer.destroy(device);
        self.vertex_buffer.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Vec<Vertex> {
        vec![
            Vertex::new([-0.1, -0.4, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([-0.1, 0.4, 0.0], [0.0, 1.0, 0.0]),
            Vertex::new([-0.9, 0.4, 0.0], [0.0, 0.0, 1.0]),
            Vertex::new([-0.9, -0.4, 0.0], [1.0, 1.0, 0.0]),
        ]
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::align_of::<Vertex>(), 4);
    }

    #[test]
    fn test_counts_match_input() {
        let mesh = MeshData::new(quad(), vec![0, 1, 2, 2, 3, 0]).unwrap();

        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.index_count(), 6);
        assert_eq!(mesh.vertices(), quad().as_slice());
        assert_eq!(mesh.indices(), &[0, 1, 2, 2, 3, 0]);
        assert_eq!(mesh.vertex_bytes().len(), 4 * 24);
        assert_eq!(mesh.index_bytes().len(), 6 * 4);
    }

    #[test]
    fn test_vertex_bytes_are_interleaved() {
        let mesh = MeshData::new(quad(), vec![0]).unwrap();
        let floats: &[f32] = bytemuck::cast_slice(mesh.vertex_bytes());

        assert_eq!(&floats[..6], &[-0.1, -0.4, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            MeshData::new(vec![], vec![0]),
            Err(RenderError::InvalidMesh(_))
        ));
        assert!(matches!(
            MeshData::new(quad(), vec![]),
            Err(RenderError::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let err = MeshData::new(quad(), vec![0, 1, 4]).unwrap_err();
        assert!(err.to_string().contains("index 4"));
    }

    #[test]
    fn test_draw_item_follows_model() {
        use ash::vk::Handle;

        let buffer = |raw| GpuBuffer {
            buffer: vk::Buffer::from_raw(raw),
            memory: vk::DeviceMemory::null(),
            size: 0,
        };
        let mut mesh = Mesh {
            vertex_buffer: buffer(1),
            vertex_count: 4,
            index_buffer: buffer(2),
            index_count: 6,
            model: Mat4::IDENTITY,
        };

        let moved = Mat4::from_translation(Vec3::new(0.5, 0.0, 0.0));
        mesh.set_model(moved);
        assert_eq!(mesh.model(), moved);

        let item = mesh.draw_item();
        assert_eq!(item.model, moved);
        assert_eq!(item.vertex_buffer.as_raw(), 1);
        assert_eq!(item.index_buffer.as_raw(), 2);
        assert_eq!(item.index_count, 6);
    }
}

// Buffer utilities for vertex and index data
//
// Raw device memory: pick a memory type, allocate, bind. Device-local data is
// written through a host-visible staging buffer and a one-shot transfer.
// Nothing here keeps state; device, pool and queue are always passed in.

use ash::vk;

use super::VulkanDevice;
use crate::error::{RenderError, RenderResult, VkResultExt};

/// A buffer and the memory bound to it. Released with [`GpuBuffer::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// First memory type allowed by `allowed_types` whose flags contain `required`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    allowed_types: u32,
    required: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            allowed_types & (1u32 << *i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RenderError::NoSuitableMemoryType {
            allowed_types,
            required,
        })
}

/// Create a buffer with its own allocation, bound at offset 0
pub fn create_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> RenderResult<GpuBuffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .or_fail("Failed to create buffer")?;

    let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let memory = find_memory_type_index(
        &device.memory_properties,
        mem_requirements.memory_type_bits,
        memory_properties,
    )
    .and_then(|memory_type_index| {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        unsafe { device.device.allocate_memory(&alloc_info, None) }
            .or_fail("Failed to allocate buffer memory")
    });

    let memory = match memory {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let gpu_buffer = GpuBuffer {
        buffer,
        memory,
        size,
    };

    if let Err(e) = unsafe { device.device.bind_buffer_memory(buffer, memory, 0) } {
        gpu_buffer.destroy(&device.device);
        return Err(RenderError::Vulkan {
            what: "Failed to bind buffer memory",
            result: e,
        });
    }

    Ok(gpu_buffer)
}

/// Record into a throwaway command buffer, submit it and block until the
/// queue is idle. The command buffer goes back to the pool on every path.
pub fn one_time_submit<F>(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    record: F,
) -> RenderResult<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
        .or_fail("Failed to allocate transfer command buffer")?[0];

    let result = (|| -> RenderResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
            .or_fail("Failed to begin transfer command buffer")?;

        record(command_buffer);

        unsafe { device.end_command_buffer(command_buffer) }
            .or_fail("Failed to end transfer command buffer")?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .or_fail("Failed to submit transfer command buffer")?;
            device
                .queue_wait_idle(queue)
                .or_fail("Failed to wait for transfer queue")
        }
    })();

    unsafe { device.free_command_buffers(pool, &[command_buffer]) };

    result
}

/// Copy `size` bytes from `src` to `dst`, blocking until done
pub fn copy_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> RenderResult<()> {
    one_time_submit(device, pool, queue, |cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    })
}

fn create_staging_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> RenderResult<GpuBuffer> {
    create_buffer(
        device,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

fn write_mapped(device: &ash::Device, target: &GpuBuffer, data: &[u8]) -> RenderResult<()> {
    unsafe {
        let ptr = device
            .map_memory(target.memory, 0, target.size, vk::MemoryMapFlags::empty())
            .or_fail("Failed to map staging memory")? as *mut u8;

        ptr.copy_from_nonoverlapping(data.as_ptr(), data.len());
        device.unmap_memory(target.memory);
    }
    Ok(())
}

/// Upload `data` into a new device-local buffer with `final_usage`.
///
/// The staging buffer never outlives this call, whatever the outcome. The
/// returned buffer is fully populated because the copy is waited on.
pub fn upload_via_staging(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    queue: vk::Queue,
    data: &[u8],
    final_usage: vk::BufferUsageFlags,
) -> RenderResult<GpuBuffer> {
    if data.is_empty() {
        return Err(RenderError::InvalidMesh("cannot upload an empty buffer".into()));
    }
    let size = data.len() as vk::DeviceSize;

    let staging = create_staging_buffer(device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;

    let result = write_mapped(&device.device, &staging, data).and_then(|()| {
        let target = create_buffer(
            device,
            size,
            final_usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        match copy_buffer(&device.device, pool, queue, staging.buffer, target.buffer, size) {
            Ok(()) => Ok(target),
            Err(e) => {
                target.destroy(&device.device);
                Err(e)
            }
        }
    });

    staging.destroy(&device.device);

    if let Ok(target) = &result {
        log::debug!("Uploaded {} bytes to buffer {:?}", size, target.buffer);
    }
    result
}

/// Debug path: copy a device-local buffer back to the host.
///
/// `source` must have been created with `TRANSFER_SRC` usage.
pub fn read_back(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    queue: vk::Queue,
    source: &GpuBuffer,
) -> RenderResult<Vec<u8>> {
    let staging = create_staging_buffer(device, source.size, vk::BufferUsageFlags::TRANSFER_DST)?;

    let result = copy_buffer(
        &device.device,
        pool,
        queue,
        source.buffer,
        staging.buffer,
        source.size,
    )
    .and_then(|()| unsafe {
        let ptr = device
            .device
            .map_memory(staging.memory, 0, staging.size, vk::MemoryMapFlags::empty())
            .or_fail("Failed to map read-back memory")? as *const u8;

        let bytes = std::slice::from_raw_parts(ptr, source.size as usize).to_vec();
        device.device.unmap_memory(staging.memory);
        Ok(bytes)
    });

    staging.destroy(&device.device);
    result
}

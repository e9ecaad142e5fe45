// Shader module loading
//
// Vulkan consumes SPIR-V words. Binaries are read from disk at startup so
// they can be swapped without rebuilding the renderer.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::{RenderError, RenderResult, VkResultExt};

/// Read a SPIR-V binary from disk
pub fn load_spirv(path: impl AsRef<Path>) -> RenderResult<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;

    decode_spirv(&bytes).map_err(|e| RenderError::Shader(format!("{}: {}", path.display(), e)))
}

/// Decode SPIR-V bytes into words, checking size and magic number
pub fn decode_spirv(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| RenderError::Shader(e.to_string()))
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.create_shader_module(&create_info, None) }
        .or_fail("Failed to create shader module")
}

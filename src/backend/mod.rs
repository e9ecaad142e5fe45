// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with explicit control over every object.
// Long-lived objects (instance, surface, device, swapchain) clean up on Drop;
// everything created per swapchain or per mesh has an explicit destroy.

pub mod buffer;
pub mod command;
pub mod device;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::GpuBuffer;
pub use command::{CommandEncoder, CommandRecorder, DrawItem, ImageCommands, RenderTarget, Scene};
pub use device::VulkanDevice;
pub use frame::{FrameBackend, FrameOutcome, FrameScheduler};
pub use instance::{Surface, VulkanInstance};
pub use pipeline::GraphicsPipeline;
pub use swapchain::Swapchain;
pub use sync::FrameSync;

// Renderer error types
//
// Every failure the library can report, grouped into three categories:
// the environment can't run us, a GPU object couldn't be created, or a
// frame failed mid-loop. The binary treats all of them as fatal.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan loader could not be found or opened
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("No GPU satisfies the renderer requirements")]
    NoSuitableDevice,

    #[error("Required extension not available: {0}")]
    MissingExtension(String),

    #[error("Surface is not usable: {0}")]
    UnsupportedSurface(&'static str),

    /// A create/allocate/bind call failed during setup
    #[error("{what}: {result}")]
    Vulkan {
        what: &'static str,
        result: vk::Result,
    },

    #[error("No memory type in {allowed_types:#b} supports {required:?}")]
    NoSuitableMemoryType {
        allowed_types: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Acquire, submit or present failed
    #[error("Frame failed, {what}: {result}")]
    Frame {
        what: &'static str,
        result: vk::Result,
    },

    #[error("Swapchain out of date")]
    SwapchainOutOfDate,
}

/// Coarse classification of [`RenderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No device, extension, format or mode satisfies the requirements
    Unsupported,
    /// A GPU object or host resource could not be created
    Resource,
    /// Acquisition, submission or presentation failed mid-loop
    Frame,
}

impl RenderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RenderError::Loading(_)
            | RenderError::NoSuitableDevice
            | RenderError::MissingExtension(_)
            | RenderError::UnsupportedSurface(_) => ErrorCategory::Unsupported,
            RenderError::Vulkan { .. }
            | RenderError::NoSuitableMemoryType { .. }
            | RenderError::Shader(_)
            | RenderError::InvalidMesh(_)
            | RenderError::Io(_) => ErrorCategory::Resource,
            RenderError::Frame { .. } | RenderError::SwapchainOutOfDate => ErrorCategory::Frame,
        }
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Attach a short description to a raw `ash` result.
pub trait VkResultExt<T> {
    /// Setup-time failure
    fn or_fail(self, what: &'static str) -> RenderResult<T>;
    /// Per-frame failure; `ERROR_OUT_OF_DATE_KHR` maps to [`RenderError::SwapchainOutOfDate`]
    fn or_frame_fail(self, what: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn or_fail(self, what: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Vulkan { what, result })
    }

    fn or_frame_fail(self, what: &'static str) -> RenderResult<T> {
        self.map_err(|result| match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::SwapchainOutOfDate,
            result => RenderError::Frame { what, result },
        })
    }
}

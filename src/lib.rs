// Mesh renderer - a small Vulkan renderer for indexed, vertex-colored meshes
//
// The library takes raw window/display handles and owns everything Vulkan.
// Windowing and the event loop belong to the caller (see src/main.rs).

pub mod backend;
pub mod config;
pub mod error;
pub mod mesh;
pub mod renderer;

pub use config::Config;
pub use error::{ErrorCategory, RenderError, RenderResult};
pub use mesh::{Mesh, MeshData, MeshId, Vertex};
pub use renderer::{Renderer, RendererConfig};

pub mod backend;
pub mod context;
pub mod framebuffer;
pub mod quad;
pub mod shader;
pub mod software;
pub mod transfer;
pub mod types;
pub mod wgpu_backend;

pub use backend::GpuBackend;
pub use context::GpuContext;
pub use quad::RenderOrientation;
pub use types::{PixelFormat, TextureId, TextureTarget, TextureUnit};

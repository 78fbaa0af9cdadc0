//! The device interface every processor talks to.
//!
//! Failures never panic here: creation calls log and hand back an invalid id,
//! draws return `false`. Callers decide whether that is fatal.

use crate::gpu::shader::ProgramSource;
use crate::gpu::types::{
    DrawCall, FramebufferId, FramebufferStatus, GpuStats, ProgramId, TextureDesc, TextureId,
};

pub trait GpuBackend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether the device is usable.
    fn is_valid(&self) -> bool;

    fn set_clear_color(&mut self, color: [f32; 4]);
    fn clear_color(&self) -> [f32; 4];

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;
    fn delete_texture(&mut self, id: TextureId);
    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc>;

    /// Upload tightly packed pixels in the texture's own format to mip 0.
    fn write_texture(&mut self, id: TextureId, data: &[u8]) -> bool;

    /// Read mip 0 back as tightly packed RGBA8.
    fn read_texture(&mut self, id: TextureId, out: &mut [u8]) -> bool;

    /// Rebuild all mip levels from level 0.
    fn generate_mipmaps(&mut self, id: TextureId);

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn attach_texture(&mut self, fb: FramebufferId, texture: TextureId) -> FramebufferStatus;
    fn delete_framebuffer(&mut self, fb: FramebufferId);

    /// Compile and link. `Err` carries the human-readable log.
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, String>;
    fn delete_program(&mut self, id: ProgramId);

    /// Execute one fullscreen-quad draw. The target is bound for the draw only.
    fn draw(&mut self, call: &DrawCall) -> bool;

    fn set_display_size(&mut self, width: u32, height: u32);
    fn display_size(&self) -> (u32, u32);

    /// Read the display target back as RGBA8.
    fn read_display(&mut self, out: &mut [u8]) -> bool;

    /// Block until all submitted work has completed.
    fn finish(&mut self);

    /// Whether persistent mapped transfer buffers are available.
    fn supports_mapped_transfer(&self) -> bool {
        false
    }

    fn stats(&self) -> GpuStats;
}

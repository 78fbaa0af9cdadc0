//! Offscreen render target with one attached color texture.

use crate::gpu::context::GpuContext;
use crate::gpu::transfer::MemTransfer;
use crate::gpu::types::{FramebufferId, FramebufferStatus, TextureId};

pub struct FramebufferTarget {
    gpu: GpuContext,
    id: FramebufferId,
    transfer: Box<dyn MemTransfer>,
    tex_w: u32,
    tex_h: u32,
    mipmapped: bool,
    /// Owning processor, for log messages.
    owner: String,
}

impl FramebufferTarget {
    pub fn new(gpu: &GpuContext, owner: &str) -> Self {
        let id = gpu.backend().create_framebuffer();
        if !id.is_valid() {
            log::error!("{}: framebuffer creation failed", owner);
        }
        Self {
            gpu: gpu.clone(),
            id,
            transfer: gpu.new_transfer(),
            tex_w: 0,
            tex_h: 0,
            mipmapped: false,
            owner: owner.to_string(),
        }
    }

    /// (Re)create the attached texture. Mipmapped textures are rounded up to
    /// power-of-two dimensions. Returns the size actually allocated.
    pub fn create_attached_tex(&mut self, width: u32, height: u32, gen_mipmap: bool) -> (u32, u32) {
        assert!(
            width > 0 && height > 0,
            "{}: attached texture size must be positive, got {}x{}",
            self.owner,
            width,
            height
        );
        let (w, h) = if gen_mipmap {
            (width.next_power_of_two(), height.next_power_of_two())
        } else {
            (width, height)
        };

        // In-flight draws may still reference the old texture.
        self.gpu.finish();
        self.transfer.release_output();
        let texture = self.transfer.prepare_output(w, h, gen_mipmap);

        let status = self.gpu.backend().attach_texture(self.id, texture);
        if status != FramebufferStatus::Complete {
            log::error!(
                "{}: framebuffer {} incomplete after attaching texture {} ({:?})",
                self.owner,
                self.id.0,
                texture.0,
                status
            );
        }
        if gen_mipmap && (w, h) != (width, height) {
            log::debug!("{}: rounded {}x{} up to {}x{} for mipmapping", self.owner, width, height, w, h);
        }

        self.tex_w = w;
        self.tex_h = h;
        self.mipmapped = gen_mipmap;
        (w, h)
    }

    /// Drop the attached texture, keeping the framebuffer object.
    pub fn destroy_attached_tex(&mut self) {
        if self.transfer.output_texture_id().is_valid() {
            self.gpu.finish();
            self.transfer.release_output();
        }
        self.tex_w = 0;
        self.tex_h = 0;
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn attached_texture_id(&self) -> TextureId {
        self.transfer.output_texture_id()
    }

    pub fn width(&self) -> u32 {
        self.tex_w
    }

    pub fn height(&self) -> u32 {
        self.tex_h
    }

    pub fn is_mipmapped(&self) -> bool {
        self.mipmapped
    }

    pub fn generate_mipmaps(&self) {
        let texture = self.attached_texture_id();
        if self.mipmapped && texture.is_valid() {
            self.gpu.backend().generate_mipmaps(texture);
        }
    }

    /// Copy the attached texture to host memory as RGBA8.
    pub fn read_buffer(&mut self, buf: &mut [u8]) {
        self.gpu.finish();
        self.transfer.from_gpu(buf);
    }

    pub fn transfer(&self) -> &dyn MemTransfer {
        self.transfer.as_ref()
    }

    pub fn transfer_mut(&mut self) -> &mut dyn MemTransfer {
        self.transfer.as_mut()
    }
}

impl Drop for FramebufferTarget {
    fn drop(&mut self) {
        self.transfer.release_output();
        self.transfer.release_input();
        self.gpu.backend().delete_framebuffer(self.id);
    }
}

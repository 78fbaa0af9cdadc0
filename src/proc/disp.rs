//! Final stage that draws to the display surface instead of a texture.

use crate::gpu::context::GpuContext;
use crate::gpu::types::{RenderTarget, TextureId};
use crate::proc::filter::FilterBase;
use crate::proc::noop::NoopKernel;
use crate::proc::{InputTexture, OutputSize, ProcBase, Processor};

pub struct DispRenderProc {
    filter: FilterBase,
    width: u32,
    height: u32,
}

impl DispRenderProc {
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "display size must be positive, got {}x{}", width, height);
        let mut filter = FilterBase::new(gpu, Box::new(NoopKernel));
        filter.base.set_output_size(OutputSize::Absolute { width, height });
        Self { filter, width, height }
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Processor for DispRenderProc {
    fn base(&self) -> &ProcBase {
        &self.filter.base
    }

    fn base_mut(&mut self) -> &mut ProcBase {
        &mut self.filter.base
    }

    fn init(&mut self, in_w: u32, in_h: u32, order: usize, _prepare_for_external_input: bool) -> usize {
        let base = &mut self.filter.base;
        base.set_order(order);
        base.set_in_frame_size(in_w, in_h);
        base.gpu().backend().set_display_size(self.width, self.height);
        if !self.filter.has_shader() {
            self.filter.build_shader();
        }
        self.filter.base.mark_initialized();
        1
    }

    fn reinit(&mut self, in_w: u32, in_h: u32, _prepare_for_external_input: bool) -> usize {
        let base = &mut self.filter.base;
        assert!(base.is_initialized(), "{}: reinit() before init()", base.name());
        if base.in_frame_size() != (in_w, in_h) {
            log::debug!("{}: reinit {:?} -> {}x{}", base.name(), base.in_frame_size(), in_w, in_h);
            base.set_in_frame_size(in_w, in_h);
        }
        1
    }

    /// The display surface is owned by the backend.
    fn create_fbo_tex(&mut self, _gen_mipmap: bool) {}

    fn use_texture(&mut self, texture: InputTexture, _position: usize) {
        self.filter.set_input_target(0, texture.target);
        self.filter.base.set_input(texture);
    }

    fn render(&mut self, _position: usize) -> bool {
        let input = self.filter.base.input();
        self.filter
            .draw_to(&[input], RenderTarget::Display, (self.width, self.height))
    }

    /// The display has no texture; downstream readers see the input.
    fn output_texture(&self) -> TextureId {
        self.filter.base.input().id
    }

    fn result_data(&mut self, buf: &mut [u8]) {
        let gpu = self.filter.base.gpu();
        gpu.finish();
        if !gpu.backend().read_display(buf) {
            log::error!("{}: display readback failed", self.name());
        }
    }
}

//! Several internal passes exposed as one processor.
//!
//! Sizes thread through the passes like they do through a pipeline. Only the
//! first pass takes external pixel data and only its output may be
//! mipmapped. Pass `i > 0` always samples pass `i - 1`.

use crate::gpu::context::GpuContext;
use crate::gpu::transfer::MemTransfer;
use crate::gpu::types::{PixelFormat, TextureId, TextureTarget};
use crate::proc::filter::FilterProc;
use crate::proc::{ExternalInput, InputTexture, OutputSize, ProcBase, Processor};

pub struct MultiPassProc {
    base: ProcBase,
    passes: Vec<FilterProc>,
}

impl MultiPassProc {
    pub fn new(gpu: &GpuContext, name: &str, passes: Vec<FilterProc>) -> Self {
        assert!(passes.len() > 1, "{}: a multi-pass processor needs at least two passes", name);
        Self {
            base: ProcBase::new(gpu, name),
            passes,
        }
    }

    pub fn passes(&self) -> &[FilterProc] {
        &self.passes
    }

    fn last(&self) -> &FilterProc {
        &self.passes[self.passes.len() - 1]
    }

    fn last_mut(&mut self) -> &mut FilterProc {
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    /// Point every later pass at its predecessor's output.
    fn wire_passes(&mut self) {
        for i in 1..self.passes.len() {
            let prev = &self.passes[i - 1];
            let texture = InputTexture::new(prev.output_texture(), prev.texture_unit(), TextureTarget::Texture2D);
            self.passes[i].use_texture(texture, 0);
        }
    }

    fn sync_sizes(&mut self) {
        let input = self.passes[0].in_frame_size();
        let output = self.last().out_frame_size();
        self.base.set_frame_sizes(input, output);
    }
}

impl Processor for MultiPassProc {
    fn base(&self) -> &ProcBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcBase {
        &mut self.base
    }

    fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) -> usize {
        self.base.set_order(order);
        let (mut w, mut h) = (in_w, in_h);
        for (i, pass) in self.passes.iter_mut().enumerate() {
            pass.init(w, h, order, i == 0 && prepare_for_external_input);
            (w, h) = pass.out_frame_size();
        }
        self.sync_sizes();
        self.base.mark_initialized();
        self.passes.len()
    }

    fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> usize {
        let (mut w, mut h) = (in_w, in_h);
        for (i, pass) in self.passes.iter_mut().enumerate() {
            pass.reinit(w, h, i == 0 && prepare_for_external_input);
            (w, h) = pass.out_frame_size();
        }
        self.sync_sizes();
        self.passes.len()
    }

    fn create_fbo_tex(&mut self, gen_mipmap: bool) {
        for i in 0..self.passes.len() {
            self.passes[i].create_fbo_tex(i == 0 && gen_mipmap);
            // Power-of-two rounding may have changed this pass's output size.
            if let Some(next) = self.passes.get(i + 1) {
                let out = self.passes[i].out_frame_size();
                if next.in_frame_size() != out {
                    self.passes[i + 1].reinit(out.0, out.1, false);
                }
            }
        }
        self.wire_passes();
        self.sync_sizes();
    }

    fn use_texture(&mut self, texture: InputTexture, position: usize) {
        self.base.set_input(texture);
        self.passes[0].use_texture(texture, position);
    }

    fn render(&mut self, position: usize) -> bool {
        self.wire_passes();
        if !self.passes[0].render(position) {
            return false;
        }
        self.passes[1..].iter_mut().all(|pass| pass.render(0))
    }

    fn output_texture(&self) -> TextureId {
        self.last().output_texture()
    }

    fn set_output_size(&mut self, size: OutputSize) {
        self.base.set_output_size(size);
        self.passes[0].set_output_size(size);
    }

    fn set_input_format(&mut self, format: PixelFormat) {
        self.base.set_input_format(format);
        self.passes[0].set_input_format(format);
    }

    fn external_input(&self) -> ExternalInput {
        self.passes[0].external_input()
    }

    fn set_external_input_data(&mut self, data: &[u8]) {
        self.passes[0].set_external_input_data(data);
    }

    fn result_data(&mut self, buf: &mut [u8]) {
        self.last_mut().result_data(buf);
    }

    fn input_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.passes[0].input_transfer_mut()
    }

    fn output_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.last_mut().output_transfer_mut()
    }

    fn cleanup(&mut self) {
        for pass in &mut self.passes {
            pass.cleanup();
        }
        self.base.cleanup();
    }

    fn print_info(&self) {
        let (in_w, in_h) = self.in_frame_size();
        let (out_w, out_h) = self.out_frame_size();
        log::info!(
            "[{}] {}: {}x{} -> {}x{} in {} passes",
            self.order(),
            self.name(),
            in_w,
            in_h,
            out_w,
            out_h,
            self.passes.len()
        );
        for pass in &self.passes {
            pass.print_info();
        }
    }
}

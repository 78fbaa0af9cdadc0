//! First-order temporal IIR filters.
//!
//! The low pass blends the current frame with its own previous output,
//! `y[n] = mix(y[n - 1], x[n], alpha)`. Past outputs are committed to an
//! internal FIFO and the newest one feeds back on the next frame, so the
//! blend never samples the texture it is writing. The high pass additionally
//! outputs `|x[n] - y[n]|`.
//!
//! The first frame after (re)initialization has no history; it is blended
//! with itself so the output starts at the input instead of at black.

use crate::gpu::context::GpuContext;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::transfer::MemTransfer;
use crate::gpu::types::{PixelFormat, TextureId, TextureTarget};
use crate::proc::blend::{blend, diff};
use crate::proc::fifo::FifoProc;
use crate::proc::multi_input::MultiInputProc;
use crate::proc::{ExternalInput, InputTexture, OutputSize, ProcBase, Processor};

pub const DEFAULT_FIFO_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IirMode {
    LowPass,
    HighPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feedback {
    /// No delayed frame yet.
    Cold,
    Steady,
}

pub struct IirProc {
    base: ProcBase,
    mode: IirMode,
    blend: MultiInputProc,
    fifo: FifoProc,
    diff: Option<MultiInputProc>,
    feedback: Feedback,
}

impl IirProc {
    pub fn new(gpu: &GpuContext, mode: IirMode, alpha: f32, fifo_depth: usize) -> Self {
        let name = match mode {
            IirMode::LowPass => "low_pass",
            IirMode::HighPass => "high_pass",
        };
        let mut blend = blend(gpu, alpha.clamp(0.0, 1.0));
        // The delayed slot is supplied by the proc itself every frame.
        blend.set_wait_for_texture(1, false);
        Self {
            base: ProcBase::new(gpu, name),
            mode,
            blend,
            fifo: FifoProc::new(gpu, fifo_depth),
            diff: (mode == IirMode::HighPass).then(|| diff(gpu, 1.0)),
            feedback: Feedback::Cold,
        }
    }

    pub fn low_pass(gpu: &GpuContext, alpha: f32) -> Self {
        Self::new(gpu, IirMode::LowPass, alpha, DEFAULT_FIFO_DEPTH)
    }

    pub fn high_pass(gpu: &GpuContext, alpha: f32) -> Self {
        Self::new(gpu, IirMode::HighPass, alpha, DEFAULT_FIFO_DEPTH)
    }

    pub fn mode(&self) -> IirMode {
        self.mode
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.blend.set_param("alpha", alpha);
    }

    /// Strength of the high-pass difference; ignored by the low pass.
    pub fn set_strength(&mut self, strength: f32) {
        if let Some(diff) = self.diff.as_mut() {
            diff.set_param("strength", strength);
        }
    }

    pub fn fifo(&self) -> &FifoProc {
        &self.fifo
    }

    /// Drop the feedback history; the next frame starts cold.
    pub fn reset(&mut self) {
        self.feedback = Feedback::Cold;
        self.fifo.clear();
    }

    fn output(&self) -> &MultiInputProc {
        self.diff.as_ref().unwrap_or(&self.blend)
    }

    fn output_mut(&mut self) -> &mut MultiInputProc {
        match self.diff.as_mut() {
            Some(diff) => diff,
            None => &mut self.blend,
        }
    }

    fn sync_sizes(&mut self) {
        let input = self.blend.in_frame_size();
        let output = self.output().out_frame_size();
        self.base.set_frame_sizes(input, output);
    }
}

impl Processor for IirProc {
    fn base(&self) -> &ProcBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcBase {
        &mut self.base
    }

    fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) -> usize {
        self.base.set_order(order);
        self.blend.init(in_w, in_h, order, prepare_for_external_input);
        let (w, h) = self.blend.out_frame_size();
        self.fifo.init(w, h, order, false);
        if let Some(diff) = self.diff.as_mut() {
            diff.init(w, h, order, false);
        }
        self.sync_sizes();
        self.reset();
        self.base.mark_initialized();
        if self.diff.is_some() {
            3
        } else {
            2
        }
    }

    fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> usize {
        if self.blend.in_frame_size() != (in_w, in_h) {
            self.blend.reinit(in_w, in_h, prepare_for_external_input);
            let (w, h) = self.blend.out_frame_size();
            self.fifo.reinit(w, h, false);
            if let Some(diff) = self.diff.as_mut() {
                diff.reinit(w, h, false);
            }
            self.sync_sizes();
            self.reset();
        }
        if self.diff.is_some() {
            3
        } else {
            2
        }
    }

    fn create_fbo_tex(&mut self, gen_mipmap: bool) {
        let low_pass = self.diff.is_none();
        self.blend.create_fbo_tex(gen_mipmap && low_pass);
        let (w, h) = self.blend.out_frame_size();
        if self.fifo.in_frame_size() != (w, h) {
            self.fifo.reinit(w, h, false);
        }
        self.fifo.create_fbo_tex(false);
        if let Some(diff) = self.diff.as_mut() {
            if diff.in_frame_size() != (w, h) {
                diff.reinit(w, h, false);
            }
            diff.create_fbo_tex(gen_mipmap);
        }
        self.sync_sizes();
        self.reset();
    }

    fn use_texture(&mut self, texture: InputTexture, position: usize) {
        if position != 0 {
            log::warn!("{}: single-input processor got input at position {}", self.name(), position);
        }
        self.base.set_input(texture);
    }

    fn render(&mut self, _position: usize) -> bool {
        let input = self.base.input();
        let delayed = match self.feedback {
            Feedback::Cold => input,
            Feedback::Steady => InputTexture::new(
                self.fifo.newest_texture(),
                input.unit.offset(1),
                TextureTarget::Texture2D,
            ),
        };
        self.blend.use_texture(input, 0);
        self.blend.use_texture(delayed, 1);
        if !self.blend.render(1) {
            return false;
        }

        let blended = InputTexture::new(
            self.blend.output_texture(),
            self.blend.texture_unit(),
            TextureTarget::Texture2D,
        );
        self.fifo.use_texture(blended, 0);
        if !self.fifo.render(0) {
            return false;
        }

        if let Some(diff) = self.diff.as_mut() {
            diff.use_texture(input, 0);
            diff.use_texture(blended, 1);
            if !diff.render(1) {
                return false;
            }
        }
        self.feedback = Feedback::Steady;
        true
    }

    fn output_texture(&self) -> TextureId {
        self.output().output_texture()
    }

    fn set_input_format(&mut self, format: PixelFormat) {
        self.base.set_input_format(format);
        self.blend.set_input_format(format);
    }

    /// The blend sets the filter's resolution; the FIFO and diff follow it.
    fn set_output_size(&mut self, size: OutputSize) {
        self.base.set_output_size(size);
        self.blend.set_output_size(size);
    }

    fn set_render_orientation(&mut self, orientation: RenderOrientation) {
        if orientation != RenderOrientation::Standard {
            log::warn!("{}: feedback filters only render in standard orientation", self.name());
        }
    }

    fn external_input(&self) -> ExternalInput {
        self.blend.external_input()
    }

    fn set_external_input_data(&mut self, data: &[u8]) {
        self.blend.set_external_input_data(data);
    }

    fn result_data(&mut self, buf: &mut [u8]) {
        self.output_mut().result_data(buf);
    }

    fn input_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.blend.input_transfer_mut()
    }

    fn output_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.output_mut().output_transfer_mut()
    }

    fn cleanup(&mut self) {
        self.blend.cleanup();
        self.fifo.cleanup();
        if let Some(diff) = self.diff.as_mut() {
            diff.cleanup();
        }
        self.base.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::types::{TextureDesc, TextureUnit};

    fn solid(gpu: &GpuContext, value: u8) -> TextureId {
        let mut backend = gpu.backend();
        let id = backend.create_texture(&TextureDesc::rgba(2, 2));
        backend.write_texture(id, &[value, value, value, 255].repeat(4));
        id
    }

    fn step(proc: &mut IirProc, input: TextureId) -> u8 {
        proc.use_texture(InputTexture::texture_2d(input, TextureUnit(0)), 0);
        assert!(proc.render(0));
        let mut buf = [0u8; 16];
        proc.result_data(&mut buf);
        buf[0]
    }

    #[test]
    fn test_alpha_one_passes_input_through() {
        let gpu = GpuContext::software();
        let frames = [solid(&gpu, 40), solid(&gpu, 90), solid(&gpu, 170)];
        let mut proc = IirProc::low_pass(&gpu, 1.0);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        for (frame, expected) in frames.iter().zip([40, 90, 170]) {
            assert_eq!(step(&mut proc, *frame), expected);
        }
    }

    #[test]
    fn test_cold_start_outputs_first_frame() {
        let gpu = GpuContext::software();
        let frame = solid(&gpu, 200);
        let mut proc = IirProc::low_pass(&gpu, 0.25);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        assert_eq!(step(&mut proc, frame), 200);
    }

    #[test]
    fn test_low_pass_step_response_is_first_order() {
        let gpu = GpuContext::software();
        let (dark, bright) = (solid(&gpu, 0), solid(&gpu, 240));
        let mut proc = IirProc::low_pass(&gpu, 0.5);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        let mut seen = vec![step(&mut proc, dark)];
        for _ in 0..4 {
            seen.push(step(&mut proc, bright));
        }
        assert_eq!(seen, vec![0, 120, 180, 210, 225]);
    }

    #[test]
    fn test_feedback_latency_ignores_fifo_depth() {
        let gpu = GpuContext::software();
        let (dark, bright) = (solid(&gpu, 0), solid(&gpu, 240));
        let mut proc = IirProc::new(&gpu, IirMode::LowPass, 0.5, 4);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        step(&mut proc, dark);
        assert_eq!(step(&mut proc, bright), 120);
        assert_eq!(step(&mut proc, bright), 180);
    }

    #[test]
    fn test_output_size_scales_every_stage() {
        let gpu = GpuContext::software();
        let mut proc = IirProc::high_pass(&gpu, 0.5);
        proc.set_output_size(OutputSize::Scale(0.5));
        proc.init(8, 8, 0, false);
        proc.create_fbo_tex(false);
        assert_eq!(proc.out_frame_size(), (4, 4));
        assert_eq!(proc.fifo().out_frame_size(), (4, 4));
    }

    #[test]
    fn test_high_pass_of_constant_is_black() {
        let gpu = GpuContext::software();
        let frame = solid(&gpu, 120);
        let mut proc = IirProc::high_pass(&gpu, 0.5);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        for _ in 0..4 {
            assert_eq!(step(&mut proc, frame), 0);
        }
    }

    #[test]
    fn test_reinit_restarts_cold() {
        let gpu = GpuContext::software();
        let (dark, bright) = (solid(&gpu, 0), solid(&gpu, 200));
        let mut proc = IirProc::low_pass(&gpu, 0.5);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        step(&mut proc, dark);
        step(&mut proc, dark);

        proc.reinit(4, 4, false);
        proc.reinit(2, 2, false);
        proc.create_fbo_tex(false);
        assert_eq!(step(&mut proc, bright), 200);
    }
}

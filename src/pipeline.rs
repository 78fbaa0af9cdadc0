//! The linear pipeline manager.
//!
//! Owns an ordered list of processors and drives them through
//! `init` -> `prepare(w, h, format)` -> (`set_input_data` | `set_input_texture`)
//! -> `process` -> `output_data`. `prepare` may be called again with a new
//! size; it is a no-op when nothing changed.

use crate::gpu::context::GpuContext;
use crate::gpu::transfer::{BufferKind, TransferKind};
use crate::gpu::types::{PixelFormat, TextureId, TextureTarget, TextureUnit};
use crate::proc::{DispRenderProc, ExternalInput, InputTexture, Processor};

/// Background of every cleared target.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Initialized,
    Prepared {
        width: u32,
        height: u32,
        format: PixelFormat,
    },
}

pub struct Pipeline {
    gpu: GpuContext,
    processors: Vec<Box<dyn Processor>>,
    display: Option<DispRenderProc>,
    state: State,
    use_mipmaps: bool,
    clear_color: [f32; 4],
    /// Caller-owned input texture, replacing host uploads.
    external_texture: Option<InputTexture>,
    /// Upload textures allocated by the first processor.
    input: ExternalInput,
}

impl Pipeline {
    pub fn new(gpu: &GpuContext) -> Self {
        Self {
            gpu: gpu.clone(),
            processors: Vec::new(),
            display: None,
            state: State::Uninitialized,
            use_mipmaps: true,
            clear_color: DEFAULT_CLEAR_COLOR,
            external_texture: None,
            input: ExternalInput::default(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Append a stage. Panics once `init` has been called.
    pub fn add_processor(&mut self, processor: impl Processor + 'static) -> usize {
        self.add_boxed(Box::new(processor))
    }

    pub fn add_boxed(&mut self, processor: Box<dyn Processor>) -> usize {
        if self.state != State::Uninitialized {
            log::error!("cannot add processor '{}' after init()", processor.name());
            panic!("cannot add processor '{}' after init()", processor.name());
        }
        self.processors.push(processor);
        self.processors.len() - 1
    }

    /// Draw the final stage to a `width`x`height` display surface as well.
    /// Panics once `init` has been called.
    pub fn create_display(&mut self, width: u32, height: u32) {
        assert!(
            self.state == State::Uninitialized,
            "create_display() must be called before init()"
        );
        self.display = Some(DispRenderProc::new(&self.gpu, width, height));
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn processor(&self, index: usize) -> Option<&dyn Processor> {
        self.processors.get(index).map(|p| p.as_ref())
    }

    pub fn processor_mut(&mut self, index: usize) -> Option<&mut (dyn Processor + 'static)> {
        self.processors.get_mut(index).map(|p| p.as_mut())
    }

    pub fn display(&self) -> Option<&DispRenderProc> {
        self.display.as_ref()
    }

    /// Whether processors feeding a downscaling stage get mipmapped outputs.
    pub fn set_use_mipmaps(&mut self, enabled: bool) {
        self.use_mipmaps = enabled;
    }

    pub fn use_mipmaps(&self) -> bool {
        self.use_mipmaps
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
        if self.state != State::Uninitialized {
            self.gpu.backend().set_clear_color(color);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state != State::Uninitialized
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self.state, State::Prepared { .. })
    }

    /// Switch new framebuffer targets to the mapped transfer backend.
    /// Returns false (and keeps the generic path) when the backend cannot
    /// map buffers. Only targets created afterwards are affected, so call it
    /// before the first `prepare`.
    pub fn try_enable_platform_optimizations(&mut self) -> bool {
        if self.is_prepared() {
            log::warn!("platform optimizations requested after prepare(); existing targets keep their transfer");
        }
        let supported = self.gpu.backend().supports_mapped_transfer();
        if supported {
            self.gpu.set_transfer_kind(TransferKind::Mapped);
            log::info!("using mapped transfer on the {} backend", self.gpu.backend().name());
        } else {
            log::warn!(
                "{} backend cannot map buffers, keeping generic transfer",
                self.gpu.backend().name()
            );
        }
        supported
    }

    pub fn init(&mut self) {
        assert!(self.gpu.backend().is_valid(), "GPU context is not valid");
        if self.state != State::Uninitialized {
            log::warn!("init() called twice");
            return;
        }
        self.gpu.backend().set_clear_color(self.clear_color);
        self.state = State::Initialized;
        log::debug!(
            "pipeline initialized on the {} backend with {} processors",
            self.gpu.backend().name(),
            self.processors.len()
        );
    }

    /// Negotiate frame sizes for a `width`x`height` input and allocate every
    /// output texture.
    pub fn prepare(&mut self, width: u32, height: u32, format: PixelFormat) {
        assert!(self.state != State::Uninitialized, "prepare() called before init()");
        assert!(!self.processors.is_empty(), "prepare() on an empty pipeline");
        assert!(
            width > 0 && height > 0,
            "input frame size must be positive, got {}x{}",
            width,
            height
        );
        let format_changed = match self.state {
            State::Prepared {
                width: w,
                height: h,
                format: f,
            } => {
                if (w, h, f) == (width, height, format) {
                    log::debug!("prepare({}x{}, {:?}): unchanged", width, height, format);
                    return;
                }
                f != format
            }
            _ => false,
        };
        if format == PixelFormat::Nv12 && self.external_texture.is_none() && self.processors[0].name() != "yuv2rgb" {
            log::warn!(
                "NV12 input feeds '{}', expected a yuv2rgb first stage",
                self.processors[0].name()
            );
        }

        self.gpu.finish();
        let prepare_upload = self.external_texture.is_none();
        self.processors[0].set_input_format(format);

        let (mut w, mut h) = (width, height);
        for (i, proc) in self.processors.iter_mut().enumerate() {
            let for_upload = i == 0 && prepare_upload;
            let passes = if !proc.is_initialized() || (i == 0 && format_changed) {
                proc.init(w, h, i, for_upload)
            } else {
                proc.reinit(w, h, for_upload)
            };
            log::debug!("{}: {} pass(es) for {}x{} input", proc.name(), passes, w, h);
            (w, h) = proc.out_frame_size();
        }

        // Output sizes are final only once textures exist: a mipmapped
        // output is rounded up to power-of-two dimensions.
        let count = self.processors.len();
        for i in 0..count {
            let gen_mipmap = self.use_mipmaps && i + 1 < count && self.processors[i + 1].will_downscale();
            self.processors[i].create_fbo_tex(gen_mipmap);
            if i + 1 < count {
                let out = self.processors[i].out_frame_size();
                if self.processors[i + 1].in_frame_size() != out {
                    log::debug!(
                        "{}: actual output {}x{}, resizing {}",
                        self.processors[i].name(),
                        out.0,
                        out.1,
                        self.processors[i + 1].name()
                    );
                    self.processors[i + 1].reinit(out.0, out.1, false);
                }
            }
        }

        let last_out = self.processors[count - 1].out_frame_size();
        if let Some(display) = self.display.as_mut() {
            if display.is_initialized() {
                display.reinit(last_out.0, last_out.1, false);
            } else {
                display.init(last_out.0, last_out.1, count, false);
            }
            display.create_fbo_tex(false);
        }

        self.input = self.processors[0].external_input();
        self.state = State::Prepared { width, height, format };
        log::info!(
            "pipeline prepared: {}x{} {:?} -> {}x{}",
            width,
            height,
            format,
            last_out.0,
            last_out.1
        );
        self.print_info();
    }

    /// Use a caller-owned texture as the input instead of host uploads.
    /// Passing an invalid id returns to host uploads on the next `prepare`.
    pub fn set_input_texture(&mut self, id: TextureId, target: TextureTarget) {
        self.external_texture = id
            .is_valid()
            .then(|| InputTexture::new(id, TextureUnit(0), target));
    }

    /// Upload one frame of host pixels in the prepared format.
    pub fn set_input_data(&mut self, pixels: &[u8]) {
        let State::Prepared { width, height, format } = self.state else {
            panic!("set_input_data() called before prepare()");
        };
        let expected = format.buffer_len(width, height);
        if pixels.len() < expected {
            log::error!(
                "input buffer holds {} bytes, {}x{} {:?} needs {}",
                pixels.len(),
                width,
                height,
                format,
                expected
            );
            return;
        }
        self.gpu.finish();
        self.processors[0].set_external_input_data(pixels);
    }

    /// Render every stage once. Returns whether every stage drew.
    pub fn process(&mut self) -> bool {
        assert!(self.is_prepared(), "process() called before prepare()");

        let first = &mut self.processors[0];
        let mut position = 0;
        match self.external_texture {
            Some(texture) => first.use_texture(texture, 0),
            None => {
                first.use_texture(InputTexture::texture_2d(self.input.primary, TextureUnit(0)), 0);
                if self.input.chroma.is_valid() {
                    first.use_texture(InputTexture::texture_2d(self.input.chroma, TextureUnit(1)), 1);
                    position = 1;
                }
            }
        }

        let mut all_drawn = true;
        let count = self.processors.len();
        for i in 0..count {
            let drawn = self.processors[i].render(if i == 0 { position } else { 0 });
            if !drawn {
                log::warn!("{}: nothing drawn this frame", self.processors[i].name());
                all_drawn = false;
            }
            // Later stages sample this output.
            self.gpu.finish();
            if i + 1 < count {
                let producer = &self.processors[i];
                let texture = InputTexture::texture_2d(producer.output_texture(), producer.texture_unit());
                self.processors[i + 1].use_texture(texture, 0);
            }
        }

        if let Some(display) = self.display.as_mut() {
            let last = &self.processors[count - 1];
            display.use_texture(InputTexture::texture_2d(last.output_texture(), last.texture_unit()), 0);
            all_drawn &= display.render(0);
            self.gpu.finish();
        }
        all_drawn
    }

    /// Read the last stage's output (RGBA8) into `buf`.
    pub fn output_data(&mut self, buf: &mut [u8]) {
        assert!(self.is_prepared(), "output_data() called before prepare()");
        self.gpu.finish();
        if let Some(last) = self.processors.last_mut() {
            last.result_data(buf);
        }
    }

    /// Read the display surface (RGBA8) into `buf`. Returns false without a
    /// display.
    pub fn display_data(&mut self, buf: &mut [u8]) -> bool {
        match self.display.as_mut() {
            Some(display) => {
                display.result_data(buf);
                true
            }
            None => false,
        }
    }

    /// Fill the first stage's mapped input buffer in place; it is uploaded on
    /// return. `None` when the transfer backend cannot map buffers.
    pub fn with_input_buffer<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let transfer = self.processors.first_mut()?.input_transfer_mut()?;
        let result = match transfer.lock_buffer(BufferKind::Input) {
            Some(buf) => f(buf),
            None => {
                log::warn!("input buffer cannot be mapped, use set_input_data()");
                return None;
            }
        };
        transfer.unlock_buffer(BufferKind::Input);
        Some(result)
    }

    /// Inspect the last stage's mapped output buffer, refreshed from the GPU.
    pub fn with_output_buffer<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        self.gpu.finish();
        let transfer = self.processors.last_mut()?.output_transfer_mut()?;
        let result = match transfer.lock_buffer(BufferKind::Output) {
            Some(buf) => f(buf),
            None => {
                log::warn!("output buffer cannot be mapped, use output_data()");
                return None;
            }
        };
        transfer.unlock_buffer(BufferKind::Output);
        Some(result)
    }

    pub fn input_frame_size(&self) -> Option<(u32, u32)> {
        match self.state {
            State::Prepared { width, height, .. } => Some((width, height)),
            _ => None,
        }
    }

    /// Size of the last stage's output texture.
    pub fn output_frame_size(&self) -> (u32, u32) {
        self.processors
            .last()
            .map(|p| p.out_frame_size())
            .unwrap_or((0, 0))
    }

    pub fn output_texture(&self) -> TextureId {
        self.processors
            .last()
            .map(|p| p.output_texture())
            .unwrap_or(TextureId::INVALID)
    }

    /// Upload textures of the first stage (invalid with a caller-owned
    /// input texture).
    pub fn input_textures(&self) -> ExternalInput {
        self.input
    }

    pub fn print_info(&self) {
        for proc in &self.processors {
            proc.print_info();
        }
        if let Some(display) = &self.display {
            display.print_info();
        }
    }

    /// Release every GPU resource. The pipeline returns to the uninitialized
    /// state and may be initialized again.
    pub fn cleanup(&mut self) {
        self.gpu.finish();
        for proc in &mut self.processors {
            proc.cleanup();
        }
        if let Some(display) = self.display.as_mut() {
            display.cleanup();
        }
        self.input = ExternalInput::default();
        self.state = State::Uninitialized;
        log::debug!("pipeline cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::noop::noop;
    use crate::proc::OutputSize;

    fn rgba_pattern(w: u32, h: u32) -> Vec<u8> {
        (0..w * h)
            .flat_map(|i| [(i % 251) as u8, (i * 3 % 256) as u8, (i / 7 % 256) as u8, 255])
            .collect()
    }

    #[test]
    #[should_panic(expected = "before init")]
    fn test_prepare_before_init_panics() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.add_processor(noop(&gpu));
        pipeline.prepare(4, 4, PixelFormat::Rgba);
    }

    #[test]
    #[should_panic(expected = "after init")]
    fn test_add_after_init_panics() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.add_processor(noop(&gpu));
        pipeline.init();
        pipeline.add_processor(noop(&gpu));
    }

    #[test]
    #[should_panic(expected = "empty pipeline")]
    fn test_empty_pipeline_panics() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.init();
        pipeline.prepare(4, 4, PixelFormat::Rgba);
    }

    #[test]
    fn test_passthrough_round_trip() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.add_processor(noop(&gpu));
        pipeline.add_processor(noop(&gpu));
        pipeline.init();
        pipeline.prepare(5, 3, PixelFormat::Rgba);

        let pixels = rgba_pattern(5, 3);
        pipeline.set_input_data(&pixels);
        assert!(pipeline.process());
        let mut out = vec![0u8; pixels.len()];
        pipeline.output_data(&mut out);
        assert_eq!(out, pixels);
    }

    #[test]
    fn test_mipmaps_only_before_downscaler() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.add_processor(noop(&gpu));
        pipeline.add_processor(noop(&gpu).with_output_size(OutputSize::Scale(0.25)));
        pipeline.add_processor(noop(&gpu));
        pipeline.init();
        pipeline.prepare(100, 60, PixelFormat::Rgba);

        let first = pipeline.processor(0).expect("first");
        let desc = gpu.backend().texture_desc(first.output_texture()).expect("allocated");
        assert!(desc.mipmapped);
        assert_eq!((desc.width, desc.height), (128, 64));
        // The downscaler follows the rounded size.
        assert_eq!(pipeline.processor(1).expect("second").in_frame_size(), (128, 64));
        assert_eq!(pipeline.output_frame_size(), (32, 16));

        let second = pipeline.processor(1).expect("second");
        let desc = gpu.backend().texture_desc(second.output_texture()).expect("allocated");
        assert!(!desc.mipmapped);
    }

    #[test]
    fn test_mipmaps_disabled() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.set_use_mipmaps(false);
        pipeline.add_processor(noop(&gpu));
        pipeline.add_processor(noop(&gpu).with_output_size(OutputSize::Scale(0.5)));
        pipeline.init();
        pipeline.prepare(100, 60, PixelFormat::Rgba);
        assert_eq!(pipeline.output_frame_size(), (50, 30));
    }

    #[test]
    fn test_short_input_is_rejected() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.add_processor(noop(&gpu));
        pipeline.init();
        pipeline.prepare(4, 4, PixelFormat::Rgba);
        let draws = gpu.stats().draw_calls;
        pipeline.set_input_data(&[0u8; 10]);
        assert_eq!(gpu.stats().draw_calls, draws);
    }

    #[test]
    fn test_cleanup_releases_textures() {
        let gpu = GpuContext::software();
        let mut pipeline = Pipeline::new(&gpu);
        pipeline.add_processor(noop(&gpu));
        pipeline.add_processor(noop(&gpu));
        pipeline.init();
        pipeline.prepare(8, 8, PixelFormat::Rgba);
        assert!(gpu.stats().live_textures > 0);
        pipeline.cleanup();
        assert_eq!(gpu.stats().live_textures, 0);
        assert!(!pipeline.is_initialized());
    }
}

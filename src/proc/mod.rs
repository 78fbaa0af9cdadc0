//! Processors: the stages of a pipeline.
//!
//! Every stage implements [`Processor`]. Variants differ in input arity and
//! internal pass count but share one contract:
//!
//! 1. `init`/`reinit` negotiate frame sizes (reinit is a no-op when the input
//!    size did not change),
//! 2. `create_fbo_tex` allocates the output texture, possibly rounding it up
//!    to power-of-two dimensions,
//! 3. `use_texture` wires an input and `render` draws.
//!
//! Composite variants hold their sub-processors by value.

pub mod blend;
pub mod blur;
pub mod disp;
pub mod fifo;
pub mod filter;
pub mod grayscale;
pub mod iir;
pub mod multi_input;
pub mod multipass;
pub mod noop;
pub mod threshold;
pub mod yuv;

use serde::{Deserialize, Serialize};

use crate::gpu::context::GpuContext;
use crate::gpu::framebuffer::FramebufferTarget;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::transfer::MemTransfer;
use crate::gpu::types::{PixelFormat, TextureId, TextureTarget, TextureUnit};

pub use disp::DispRenderProc;
pub use fifo::FifoProc;
pub use filter::{FilterKernel, FilterProc, FrameGeometry};
pub use iir::{IirMode, IirProc};
pub use multi_input::MultiInputProc;
pub use multipass::MultiPassProc;

/// Non-owning reference to a texture produced elsewhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputTexture {
    pub id: TextureId,
    pub unit: TextureUnit,
    pub target: TextureTarget,
}

impl InputTexture {
    pub fn new(id: TextureId, unit: TextureUnit, target: TextureTarget) -> Self {
        Self { id, unit, target }
    }

    pub fn texture_2d(id: TextureId, unit: TextureUnit) -> Self {
        Self::new(id, unit, TextureTarget::Texture2D)
    }
}

/// Textures allocated for host uploads by the first processor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExternalInput {
    pub primary: TextureId,
    /// NV12 chroma plane, invalid for packed formats.
    pub chroma: TextureId,
}

/// How the output frame size derives from the input frame size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSize {
    Scale(f32),
    Absolute { width: u32, height: u32 },
}

impl Default for OutputSize {
    fn default() -> Self {
        OutputSize::Scale(1.0)
    }
}

impl OutputSize {
    pub fn resolve(self, in_w: u32, in_h: u32) -> (u32, u32) {
        match self {
            OutputSize::Scale(scale) => (
                ((in_w as f32 * scale).round() as u32).max(1),
                ((in_h as f32 * scale).round() as u32).max(1),
            ),
            OutputSize::Absolute { width, height } => (width.max(1), height.max(1)),
        }
    }
}

/// State shared by every processor variant.
pub struct ProcBase {
    gpu: GpuContext,
    name: String,
    order: usize,
    in_size: (u32, u32),
    out_size: (u32, u32),
    output_size: OutputSize,
    will_downscale: bool,
    input: InputTexture,
    input_format: PixelFormat,
    fbo: Option<FramebufferTarget>,
    orientation: RenderOrientation,
    initialized: bool,
}

impl ProcBase {
    pub fn new(gpu: &GpuContext, name: impl Into<String>) -> Self {
        Self {
            gpu: gpu.clone(),
            name: name.into(),
            order: 0,
            in_size: (0, 0),
            out_size: (0, 0),
            output_size: OutputSize::default(),
            will_downscale: false,
            input: InputTexture::default(),
            input_format: PixelFormat::default(),
            fbo: None,
            orientation: RenderOrientation::default(),
            initialized: false,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn set_order(&mut self, order: usize) {
        self.order = order;
    }

    pub fn in_frame_size(&self) -> (u32, u32) {
        self.in_size
    }

    pub fn out_frame_size(&self) -> (u32, u32) {
        self.out_size
    }

    pub fn will_downscale(&self) -> bool {
        self.will_downscale
    }

    pub fn output_size(&self) -> OutputSize {
        self.output_size
    }

    pub fn set_output_size(&mut self, size: OutputSize) {
        self.output_size = size;
    }

    pub fn orientation(&self) -> RenderOrientation {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: RenderOrientation) {
        self.orientation = orientation;
    }

    pub fn input(&self) -> InputTexture {
        self.input
    }

    pub fn set_input(&mut self, input: InputTexture) {
        self.input = input;
    }

    pub fn input_format(&self) -> PixelFormat {
        self.input_format
    }

    pub fn set_input_format(&mut self, format: PixelFormat) {
        self.input_format = format;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    /// Record a new input size and derive the output size from it.
    pub fn set_in_frame_size(&mut self, in_w: u32, in_h: u32) {
        assert!(
            in_w > 0 && in_h > 0,
            "{}: input frame size must be positive, got {}x{}",
            self.name,
            in_w,
            in_h
        );
        let out = self.output_size.resolve(in_w, in_h);
        self.set_frame_sizes((in_w, in_h), out);
    }

    /// Set both sizes directly (composites mirror their sub-processors).
    pub fn set_frame_sizes(&mut self, input: (u32, u32), output: (u32, u32)) {
        self.in_size = input;
        self.out_size = output;
        self.will_downscale = output.0 < input.0 || output.1 < input.1;
    }

    pub fn fbo(&self) -> Option<&FramebufferTarget> {
        self.fbo.as_ref()
    }

    pub fn fbo_mut(&mut self) -> Option<&mut FramebufferTarget> {
        self.fbo.as_mut()
    }

    pub fn ensure_fbo(&mut self) -> &mut FramebufferTarget {
        let (gpu, name) = (&self.gpu, &self.name);
        self.fbo.get_or_insert_with(|| FramebufferTarget::new(gpu, name))
    }

    /// Allocate the host upload texture(s) for the current input size.
    pub fn prepare_external_input(&mut self) -> TextureId {
        let (w, h) = self.in_size;
        let format = self.input_format;
        let id = self.ensure_fbo().transfer_mut().prepare_input(w, h, format, None);
        log::debug!("{}: prepared {}x{} {:?} input texture {}", self.name, w, h, format, id.0);
        id
    }

    /// (Re)create the output texture for the current output size. With
    /// `transposed` the texture is allocated with swapped dimensions while the
    /// recorded output size keeps the logical orientation.
    pub fn create_fbo_tex(&mut self, gen_mipmap: bool, transposed: bool) {
        let (w, h) = self.out_size;
        let request = if transposed { (h, w) } else { (w, h) };
        let (aw, ah) = self.ensure_fbo().create_attached_tex(request.0, request.1, gen_mipmap);
        self.out_size = if transposed { (ah, aw) } else { (aw, ah) };
        log::debug!(
            "{}: output texture {}x{}{}{}",
            self.name,
            aw,
            ah,
            if gen_mipmap { " (mipmapped)" } else { "" },
            if transposed { " (transposed)" } else { "" }
        );
    }

    pub fn destroy_fbo_tex(&mut self) {
        if let Some(fbo) = self.fbo.as_mut() {
            fbo.destroy_attached_tex();
        }
    }

    pub fn output_texture(&self) -> TextureId {
        self.fbo
            .as_ref()
            .map(|f| f.attached_texture_id())
            .unwrap_or(TextureId::INVALID)
    }

    pub fn external_input(&self) -> ExternalInput {
        self.fbo
            .as_ref()
            .map(|f| ExternalInput {
                primary: f.transfer().input_texture_id(),
                chroma: f.transfer().chroma_texture_id(),
            })
            .unwrap_or_default()
    }

    pub fn upload(&mut self, data: &[u8]) {
        match self.fbo.as_mut() {
            Some(fbo) if fbo.transfer().input_texture_id().is_valid() => fbo.transfer_mut().to_gpu(data),
            _ => log::error!("{}: no input texture prepared for host upload", self.name),
        }
    }

    pub fn read_output(&mut self, buf: &mut [u8]) {
        match self.fbo.as_mut() {
            Some(fbo) => fbo.read_buffer(buf),
            None => log::error!("{}: result requested before an output texture exists", self.name),
        }
    }

    /// Release GPU resources; the processor must be initialized again.
    pub fn cleanup(&mut self) {
        self.fbo = None;
        self.initialized = false;
    }
}

/// The pipeline stage contract.
pub trait Processor {
    fn base(&self) -> &ProcBase;
    fn base_mut(&mut self) -> &mut ProcBase;

    /// Allocate resources for a `in_w`x`in_h` input. Returns the number of
    /// render passes this processor consumes.
    fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) -> usize;

    /// Like `init`, reusing compiled shaders. No-op when the size is unchanged.
    fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> usize;

    /// (Re)create the output texture(s); afterwards `out_frame_size` reports
    /// the allocated size.
    fn create_fbo_tex(&mut self, gen_mipmap: bool);

    /// Wire input slot `position` (0 for single-input processors).
    fn use_texture(&mut self, texture: InputTexture, position: usize);

    /// Draw. `position` names the input that was just supplied. Returns
    /// whether anything was drawn.
    fn render(&mut self, position: usize) -> bool;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn order(&self) -> usize {
        self.base().order()
    }

    fn is_initialized(&self) -> bool {
        self.base().is_initialized()
    }

    fn in_frame_size(&self) -> (u32, u32) {
        self.base().in_frame_size()
    }

    fn out_frame_size(&self) -> (u32, u32) {
        self.base().out_frame_size()
    }

    fn out_frame_w(&self) -> u32 {
        self.out_frame_size().0
    }

    fn out_frame_h(&self) -> u32 {
        self.out_frame_size().1
    }

    fn will_downscale(&self) -> bool {
        self.base().will_downscale()
    }

    fn output_texture(&self) -> TextureId {
        self.base().output_texture()
    }

    fn input_texture(&self) -> TextureId {
        self.base().input().id
    }

    fn texture_unit(&self) -> TextureUnit {
        self.base().input().unit
    }

    fn set_output_size(&mut self, size: OutputSize) {
        self.base_mut().set_output_size(size);
    }

    fn set_render_orientation(&mut self, orientation: RenderOrientation) {
        self.base_mut().set_orientation(orientation);
    }

    /// Host pixel layout used when preparing for external input.
    fn set_input_format(&mut self, format: PixelFormat) {
        self.base_mut().set_input_format(format);
    }

    fn external_input(&self) -> ExternalInput {
        self.base().external_input()
    }

    /// Upload host pixels into the prepared input texture(s).
    fn set_external_input_data(&mut self, data: &[u8]) {
        self.base_mut().upload(data);
    }

    /// Block until rendering completes and copy the output to `buf` (RGBA8).
    fn result_data(&mut self, buf: &mut [u8]) {
        self.base_mut().read_output(buf);
    }

    fn input_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.base_mut().fbo_mut().map(|f| f.transfer_mut())
    }

    fn output_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.base_mut().fbo_mut().map(|f| f.transfer_mut())
    }

    fn cleanup(&mut self) {
        self.base_mut().cleanup();
    }

    fn print_info(&self) {
        let (in_w, in_h) = self.in_frame_size();
        let (out_w, out_h) = self.out_frame_size();
        log::info!(
            "[{}] {}: {}x{} -> {}x{} (input tex {}, output tex {}{})",
            self.order(),
            self.name(),
            in_w,
            in_h,
            out_w,
            out_h,
            self.input_texture().0,
            self.output_texture().0,
            if self.will_downscale() { ", downscaling" } else { "" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_size_resolve() {
        assert_eq!(OutputSize::Scale(0.5).resolve(100, 60), (50, 30));
        assert_eq!(OutputSize::Scale(2.0).resolve(50, 50), (100, 100));
        assert_eq!(OutputSize::Scale(0.001).resolve(10, 10), (1, 1));
        assert_eq!(OutputSize::Absolute { width: 32, height: 8 }.resolve(100, 100), (32, 8));
    }

    #[test]
    fn test_will_downscale_tracks_sizes() {
        let gpu = GpuContext::software();
        let mut base = ProcBase::new(&gpu, "test");
        base.set_output_size(OutputSize::Scale(0.5));
        base.set_in_frame_size(100, 100);
        assert_eq!(base.out_frame_size(), (50, 50));
        assert!(base.will_downscale());

        base.set_output_size(OutputSize::Scale(1.0));
        base.set_in_frame_size(100, 100);
        assert!(!base.will_downscale());
    }

    #[test]
    fn test_transposed_texture_keeps_logical_size() {
        let gpu = GpuContext::software();
        let mut base = ProcBase::new(&gpu, "test");
        base.set_in_frame_size(40, 10);
        base.create_fbo_tex(false, true);
        assert_eq!(base.out_frame_size(), (40, 10));
        let desc = gpu.backend().texture_desc(base.output_texture()).expect("allocated");
        assert_eq!((desc.width, desc.height), (10, 40));
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn test_zero_input_size_panics() {
        let gpu = GpuContext::software();
        ProcBase::new(&gpu, "test").set_in_frame_size(0, 10);
    }
}

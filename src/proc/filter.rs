//! Single-shader processors.
//!
//! A [`FilterKernel`] names a fragment program and the uniforms it needs for
//! the current frame geometry. [`FilterBase`] turns a kernel into draws: it
//! owns the compiled program, recompiles it when an input switches between
//! 2D and external sampling, and runs the fixed draw sequence.

use crate::gpu::context::GpuContext;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::shader::{FragmentShader, Shader};
use crate::gpu::types::{DrawCall, RenderTarget, TextureTarget, UniformValue};
use crate::proc::{InputTexture, OutputSize, ProcBase, Processor};

/// Sizes a kernel may derive uniforms from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub in_size: (u32, u32),
    pub out_size: (u32, u32),
}

impl FrameGeometry {
    /// One texel step along the input x axis, in texture coordinates.
    pub fn texel_step_x(&self) -> f32 {
        1.0 / self.in_size.0.max(1) as f32
    }

    pub fn texel_step_y(&self) -> f32 {
        1.0 / self.in_size.1.max(1) as f32
    }
}

/// The per-variant part of a single-shader processor.
pub trait FilterKernel {
    fn shader(&self) -> &'static FragmentShader;

    /// Number of input textures the shader samples.
    fn inputs(&self) -> usize {
        1
    }

    /// Push `(uniform name, value)` pairs for the next draw.
    fn uniforms(&self, _geometry: &FrameGeometry, _out: &mut Vec<(&'static str, UniformValue)>) {}

    /// Update a named parameter. Returns false when the kernel has no such
    /// parameter.
    fn set_param(&mut self, _name: &str, _value: f32) -> bool {
        false
    }
}

pub struct FilterBase {
    pub(crate) base: ProcBase,
    kernel: Box<dyn FilterKernel>,
    shader: Option<Shader>,
    targets: Vec<TextureTarget>,
    transposed_output: bool,
}

impl FilterBase {
    pub fn new(gpu: &GpuContext, kernel: Box<dyn FilterKernel>) -> Self {
        let name = kernel.shader().label;
        let inputs = kernel.inputs();
        Self {
            base: ProcBase::new(gpu, name),
            kernel,
            shader: None,
            targets: vec![TextureTarget::Texture2D; inputs],
            transposed_output: false,
        }
    }

    pub fn kernel(&self) -> &dyn FilterKernel {
        self.kernel.as_ref()
    }

    pub fn set_param(&mut self, name: &str, value: f32) -> bool {
        let known = self.kernel.set_param(name, value);
        if !known {
            log::warn!("{}: unknown parameter '{}'", self.base.name(), name);
        }
        known
    }

    pub fn set_transposed_output(&mut self, transposed: bool) {
        self.transposed_output = transposed;
    }

    pub fn has_shader(&self) -> bool {
        self.shader.is_some()
    }

    pub(crate) fn build_shader(&mut self) {
        // Free the old program before compiling its replacement.
        self.shader = None;
        self.shader = Shader::build(self.base.gpu(), self.kernel.shader(), &self.targets);
    }

    /// Switch input `slot` between 2D and external sampling, recompiling the
    /// program when the variant changes.
    pub fn set_input_target(&mut self, slot: usize, target: TextureTarget) {
        let Some(current) = self.targets.get_mut(slot) else {
            log::warn!("{}: no input slot {}", self.base.name(), slot);
            return;
        };
        if *current == target {
            return;
        }
        *current = target;
        if self.shader.is_some() {
            log::debug!("{}: recompiling for {:?} input on slot {}", self.base.name(), target, slot);
            self.build_shader();
        }
    }

    pub fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) {
        self.base.set_order(order);
        self.base.set_in_frame_size(in_w, in_h);
        self.base.ensure_fbo();
        if prepare_for_external_input {
            self.base.prepare_external_input();
        }
        if self.shader.is_none() {
            self.build_shader();
        }
        self.base.mark_initialized();
    }

    /// Returns whether anything changed.
    pub fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> bool {
        assert!(self.base.is_initialized(), "{}: reinit() before init()", self.base.name());
        if self.base.in_frame_size() == (in_w, in_h) {
            return false;
        }
        log::debug!(
            "{}: reinit {:?} -> {}x{}",
            self.base.name(),
            self.base.in_frame_size(),
            in_w,
            in_h
        );
        self.base.destroy_fbo_tex();
        self.base.set_in_frame_size(in_w, in_h);
        if prepare_for_external_input {
            self.base.prepare_external_input();
        }
        true
    }

    pub fn create_fbo_tex(&mut self, gen_mipmap: bool) {
        self.base.create_fbo_tex(gen_mipmap, self.transposed_output);
    }

    /// Draw into this processor's framebuffer, then refresh its mip chain.
    pub fn draw(&mut self, inputs: &[InputTexture]) -> bool {
        let Some(fbo) = self.base.fbo() else {
            log::error!("{}: render() before init()", self.base.name());
            return false;
        };
        if !fbo.attached_texture_id().is_valid() {
            log::error!("{}: render() before create_fbo_tex()", self.base.name());
            return false;
        }
        let target = RenderTarget::Framebuffer(fbo.id());
        let viewport = (fbo.width(), fbo.height());
        let drawn = self.draw_to(inputs, target, viewport);
        if drawn {
            if let Some(fbo) = self.base.fbo() {
                fbo.generate_mipmaps();
            }
        }
        drawn
    }

    /// The fixed draw sequence: program, viewport and clear, textures,
    /// uniforms, geometry, draw.
    pub fn draw_to(&mut self, inputs: &[InputTexture], target: RenderTarget, viewport: (u32, u32)) -> bool {
        let Some(shader) = self.shader.as_ref() else {
            log::error!("{}: no valid shader program", self.base.name());
            return false;
        };
        let geometry = FrameGeometry {
            in_size: self.base.in_frame_size(),
            out_size: self.base.out_frame_size(),
        };
        let mut values = Vec::new();
        self.kernel.uniforms(&geometry, &mut values);

        let mut call = DrawCall::new(shader.program());
        call.viewport(viewport.0, viewport.1).clear();
        for (slot, input) in inputs.iter().enumerate() {
            call.bind_texture(slot, input.unit, input.id);
        }
        for (name, value) in values {
            match shader.uniform_location(name) {
                Some(location) => {
                    call.uniform(location, value);
                }
                None => log::trace!("{}: shader has no uniform '{}'", self.base.name(), name),
            }
        }
        call.geometry(self.base.orientation()).target(target);

        let drawn = self.base.gpu().backend().draw(&call);
        if !drawn {
            log::error!("{}: draw failed", self.base.name());
        }
        drawn
    }
}

/// A processor with one input and one shader pass.
pub struct FilterProc {
    pub(crate) filter: FilterBase,
}

impl FilterProc {
    pub fn new(gpu: &GpuContext, kernel: impl FilterKernel + 'static) -> Self {
        assert_eq!(
            kernel.inputs(),
            1,
            "{}: single-input processor needs a single-input kernel",
            kernel.shader().label
        );
        Self {
            filter: FilterBase::new(gpu, Box::new(kernel)),
        }
    }

    pub fn with_output_size(mut self, size: OutputSize) -> Self {
        self.set_output_size(size);
        self
    }

    pub fn with_orientation(mut self, orientation: RenderOrientation) -> Self {
        self.set_render_orientation(orientation);
        self
    }

    /// Allocate the output texture with swapped dimensions (for passes drawn
    /// with [`RenderOrientation::Diagonal`]).
    pub fn with_transposed_output(mut self) -> Self {
        self.filter.set_transposed_output(true);
        self
    }

    pub fn set_param(&mut self, name: &str, value: f32) -> bool {
        self.filter.set_param(name, value)
    }

    pub fn kernel(&self) -> &dyn FilterKernel {
        self.filter.kernel()
    }
}

impl Processor for FilterProc {
    fn base(&self) -> &ProcBase {
        &self.filter.base
    }

    fn base_mut(&mut self) -> &mut ProcBase {
        &mut self.filter.base
    }

    fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) -> usize {
        self.filter.init(in_w, in_h, order, prepare_for_external_input);
        1
    }

    fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> usize {
        self.filter.reinit(in_w, in_h, prepare_for_external_input);
        1
    }

    fn create_fbo_tex(&mut self, gen_mipmap: bool) {
        self.filter.create_fbo_tex(gen_mipmap);
    }

    fn use_texture(&mut self, texture: InputTexture, position: usize) {
        if position != 0 {
            log::warn!("{}: single-input processor got input at position {}", self.name(), position);
        }
        self.filter.set_input_target(0, texture.target);
        self.filter.base.set_input(texture);
    }

    fn render(&mut self, _position: usize) -> bool {
        let input = self.filter.base.input();
        self.filter.draw(&[input])
    }
}

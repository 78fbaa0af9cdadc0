//! Separable 9-tap blurs (Gaussian and box).
//!
//! Both passes run the same fragment program. The first pass draws with the
//! diagonal orientation into a transposed texture, so the second pass (also
//! diagonal) sweeps the other axis while still stepping along its input rows.

use glam::{Vec2, Vec4};

use crate::gpu::context::GpuContext;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::shader::{Fragment, FragmentShader};
use crate::gpu::types::UniformValue;
use crate::proc::filter::{FilterKernel, FilterProc, FrameGeometry};
use crate::proc::multipass::MultiPassProc;
use crate::proc::OutputSize;

/// Center and one-sided weights of a normalized 9-tap Gaussian.
pub const GAUSS_WEIGHTS: [f32; 5] = [0.227_027_03, 0.194_594_6, 0.121_621_62, 0.054_054_055, 0.016_216_217];

pub const BOX_WEIGHTS: [f32; 5] = [1.0 / 9.0; 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurAxis {
    /// Step along the frame's x axis (first pass).
    Horizontal,
    /// Step along the frame's y axis (second pass, transposed input).
    Vertical,
}

fn eval(f: &Fragment<'_>) -> Vec4 {
    let step = f.uniform("texel_step").x;
    let weights = f.uniform("weights");
    let tail = f.uniform("weights_tail").x;
    let mut color = f.input(0) * weights.x;
    for (i, w) in [weights.y, weights.z, weights.w, tail].into_iter().enumerate() {
        let offset = Vec2::new((i + 1) as f32 * step, 0.0);
        color += (f.sample(0, f.uv() + offset) + f.sample(0, f.uv() - offset)) * w;
    }
    color
}

pub static BLUR_PASS_SHADER: FragmentShader = FragmentShader {
    label: "blur_pass",
    wgsl: include_str!("shader_blur_pass.wgsl"),
    eval,
};

#[derive(Debug, Clone, Copy)]
pub struct BlurPassKernel {
    axis: BlurAxis,
    weights: [f32; 5],
}

impl BlurPassKernel {
    pub fn new(axis: BlurAxis, weights: [f32; 5]) -> Self {
        Self { axis, weights }
    }
}

impl FilterKernel for BlurPassKernel {
    fn shader(&self) -> &'static FragmentShader {
        &BLUR_PASS_SHADER
    }

    fn uniforms(&self, geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        let step = match self.axis {
            BlurAxis::Horizontal => geometry.texel_step_x(),
            BlurAxis::Vertical => geometry.texel_step_y(),
        };
        let w = self.weights;
        out.push(("texel_step", UniformValue::Float(step)));
        out.push(("weights", UniformValue::Vec4([w[0], w[1], w[2], w[3]])));
        out.push(("weights_tail", UniformValue::Float(w[4])));
    }
}

fn separable(gpu: &GpuContext, name: &str, weights: [f32; 5], output: OutputSize) -> MultiPassProc {
    let first = FilterProc::new(gpu, BlurPassKernel::new(BlurAxis::Horizontal, weights))
        .with_orientation(RenderOrientation::Diagonal)
        .with_transposed_output()
        .with_output_size(output);
    let second = FilterProc::new(gpu, BlurPassKernel::new(BlurAxis::Vertical, weights))
        .with_orientation(RenderOrientation::Diagonal);
    MultiPassProc::new(gpu, name, vec![first, second])
}

pub fn gauss_blur(gpu: &GpuContext) -> MultiPassProc {
    separable(gpu, "gauss_blur", GAUSS_WEIGHTS, OutputSize::default())
}

pub fn box_blur(gpu: &GpuContext) -> MultiPassProc {
    separable(gpu, "box_blur", BOX_WEIGHTS, OutputSize::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::types::{TextureDesc, TextureUnit};
    use crate::proc::{InputTexture, Processor};

    #[test]
    fn test_gauss_weights_normalized() {
        let total = GAUSS_WEIGHTS[0] + 2.0 * GAUSS_WEIGHTS[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_blur_spreads_impulse_both_axes() {
        let gpu = GpuContext::software();
        let (w, h) = (9u32, 9u32);
        let mut pixels = vec![0u8; (w * h * 4) as usize];
        let center = ((4 * w + 4) * 4) as usize;
        pixels[center..center + 4].copy_from_slice(&[255, 255, 255, 255]);
        let input = {
            let mut backend = gpu.backend();
            let id = backend.create_texture(&TextureDesc::rgba(w, h));
            backend.write_texture(id, &pixels);
            id
        };

        let mut proc = box_blur(&gpu);
        proc.init(w, h, 0, false);
        proc.create_fbo_tex(false);
        proc.use_texture(InputTexture::texture_2d(input, TextureUnit(0)), 0);
        assert!(proc.render(0));
        assert_eq!(gpu.stats().draw_calls, 2);

        let mut out = vec![0u8; pixels.len()];
        proc.result_data(&mut out);
        let at = |x: u32, y: u32| out[((y * w + x) * 4) as usize];
        // 255 / 81 per tap after two box passes.
        assert_eq!(at(4, 4), 3);
        assert_eq!(at(0, 4), 3);
        assert_eq!(at(4, 8), 3);
        assert_eq!(at(0, 0), 3);
    }

    #[test]
    fn test_downscaled_blur_reports_downscale() {
        let gpu = GpuContext::software();
        let mut proc = separable(&gpu, "gauss_blur", GAUSS_WEIGHTS, OutputSize::Scale(0.5));
        proc.init(64, 32, 0, false);
        assert!(proc.will_downscale());
        assert_eq!(proc.out_frame_size(), (32, 16));
    }
}

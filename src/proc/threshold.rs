//! Binarization: a global threshold and a two-pass adaptive (local mean)
//! threshold.

use glam::{Vec2, Vec4};

use crate::gpu::context::GpuContext;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::shader::{Fragment, FragmentShader};
use crate::gpu::types::UniformValue;
use crate::proc::filter::{FilterKernel, FilterProc, FrameGeometry};
use crate::proc::grayscale::DEFAULT_WEIGHTS;
use crate::proc::multipass::MultiPassProc;

pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Subtracted from the local mean before comparing.
pub const DEFAULT_ADAPTIVE_OFFSET: f32 = 0.02;

/// Output of the adaptive threshold over a uniform field. The center equals
/// the local mean there, and `step(mean - offset, center)` is 1 for any
/// non-negative offset.
pub const UNIFORM_FIELD_BINARY_VALUE: u8 = 255;

/// Taps on each side of the center in an adaptive-threshold pass.
const RADIUS: i32 = 5;

fn threshold_eval(f: &Fragment<'_>) -> Vec4 {
    let gray = f.input(0).truncate().dot(f.uniform("weights").truncate());
    let bin = if gray < f.uniform("params").x { 0.0 } else { 1.0 };
    Vec4::new(bin, bin, bin, 1.0)
}

pub static THRESHOLD_SHADER: FragmentShader = FragmentShader {
    label: "threshold",
    wgsl: include_str!("shader_threshold.wgsl"),
    eval: threshold_eval,
};

/// Global threshold on weighted luminance.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdKernel {
    pub threshold: f32,
}

impl Default for ThresholdKernel {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl FilterKernel for ThresholdKernel {
    fn shader(&self) -> &'static FragmentShader {
        &THRESHOLD_SHADER
    }

    fn uniforms(&self, _geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        out.push(("weights", UniformValue::Vec3(DEFAULT_WEIGHTS)));
        out.push(("params", UniformValue::Float(self.threshold)));
    }

    fn set_param(&mut self, name: &str, value: f32) -> bool {
        if name != "threshold" {
            return false;
        }
        self.threshold = value;
        true
    }
}

fn box_mean(f: &Fragment<'_>, channel: usize, step: f32) -> f32 {
    let sum: f32 = (-RADIUS..=RADIUS)
        .map(|i| f.sample(0, f.uv() + Vec2::new(i as f32 * step, 0.0))[channel])
        .sum();
    sum / (2 * RADIUS + 1) as f32
}

fn mean_pass_eval(f: &Fragment<'_>) -> Vec4 {
    let center = f.input(0).x;
    let mean = box_mean(f, 0, f.uniform("texel_step").x);
    Vec4::new(center, mean, 0.0, 1.0)
}

fn compare_pass_eval(f: &Fragment<'_>) -> Vec4 {
    let center = f.input(0).x;
    let mean = box_mean(f, 1, f.uniform("texel_step").x);
    let bin = if center < mean - f.uniform("params").x { 0.0 } else { 1.0 };
    Vec4::new(bin, bin, bin, 1.0)
}

pub static ADAPT_THRESH_PASS1_SHADER: FragmentShader = FragmentShader {
    label: "adapt_thresh_pass1",
    wgsl: include_str!("shader_adapt_thresh_pass1.wgsl"),
    eval: mean_pass_eval,
};

pub static ADAPT_THRESH_PASS2_SHADER: FragmentShader = FragmentShader {
    label: "adapt_thresh_pass2",
    wgsl: include_str!("shader_adapt_thresh_pass2.wgsl"),
    eval: compare_pass_eval,
};

/// First sweep: stores the center sample and the mean along input rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptMeanPass;

impl FilterKernel for AdaptMeanPass {
    fn shader(&self) -> &'static FragmentShader {
        &ADAPT_THRESH_PASS1_SHADER
    }

    fn uniforms(&self, geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        out.push(("texel_step", UniformValue::Float(geometry.texel_step_x())));
    }
}

/// Second sweep over the transposed first-pass output: averages the row
/// means down the columns and binarizes the center against them.
#[derive(Debug, Clone, Copy)]
pub struct AdaptComparePass {
    pub offset: f32,
}

impl Default for AdaptComparePass {
    fn default() -> Self {
        Self {
            offset: DEFAULT_ADAPTIVE_OFFSET,
        }
    }
}

impl FilterKernel for AdaptComparePass {
    fn shader(&self) -> &'static FragmentShader {
        &ADAPT_THRESH_PASS2_SHADER
    }

    fn uniforms(&self, geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        // The input texture is stored transposed; its x axis is the frame's y.
        out.push(("texel_step", UniformValue::Float(geometry.texel_step_y())));
        out.push(("params", UniformValue::Float(self.offset)));
    }

    fn set_param(&mut self, name: &str, value: f32) -> bool {
        if name != "offset" {
            return false;
        }
        self.offset = value;
        true
    }
}

pub fn threshold(gpu: &GpuContext, value: f32) -> FilterProc {
    FilterProc::new(gpu, ThresholdKernel { threshold: value })
}

/// Adaptive threshold over an 11x11 box neighbourhood. Both passes draw with
/// the diagonal orientation so each one sweeps along its input rows.
pub fn adaptive_threshold(gpu: &GpuContext, offset: f32) -> MultiPassProc {
    let mean = FilterProc::new(gpu, AdaptMeanPass)
        .with_orientation(RenderOrientation::Diagonal)
        .with_transposed_output();
    let compare =
        FilterProc::new(gpu, AdaptComparePass { offset }).with_orientation(RenderOrientation::Diagonal);
    MultiPassProc::new(gpu, "adaptive_threshold", vec![mean, compare])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::types::{TextureDesc, TextureId, TextureUnit};
    use crate::proc::{InputTexture, Processor};

    fn gray_texture(gpu: &GpuContext, w: u32, h: u32, value: impl Fn(u32, u32) -> u8) -> TextureId {
        let mut pixels = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                let v = value(x, y);
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let mut backend = gpu.backend();
        let id = backend.create_texture(&TextureDesc::rgba(w, h));
        backend.write_texture(id, &pixels);
        id
    }

    fn run(gpu: &GpuContext, proc: &mut dyn Processor, input: TextureId, w: u32, h: u32) -> Vec<u8> {
        proc.init(w, h, 0, false);
        proc.create_fbo_tex(false);
        proc.use_texture(InputTexture::texture_2d(input, TextureUnit(0)), 0);
        assert!(proc.render(0));
        let (ow, oh) = proc.out_frame_size();
        let mut out = vec![0u8; (ow * oh * 4) as usize];
        proc.result_data(&mut out);
        gpu.finish();
        out
    }

    #[test]
    fn test_global_threshold() {
        let gpu = GpuContext::software();
        let input = gray_texture(&gpu, 4, 1, |x, _| [10, 100, 160, 250][x as usize]);
        let mut proc = threshold(&gpu, 0.5);
        let out = run(&gpu, &mut proc, input, 4, 1);
        let reds: Vec<u8> = out.chunks_exact(4).map(|p| p[0]).collect();
        assert_eq!(reds, vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_adaptive_uniform_field() {
        let gpu = GpuContext::software();
        let input = gray_texture(&gpu, 16, 12, |_, _| 128);
        let mut proc = adaptive_threshold(&gpu, DEFAULT_ADAPTIVE_OFFSET);
        let out = run(&gpu, &mut proc, input, 16, 12);
        assert_eq!(proc.out_frame_size(), (16, 12));
        assert!(out.chunks_exact(4).all(|p| p[0] == UNIFORM_FIELD_BINARY_VALUE));
    }

    #[test]
    fn test_adaptive_first_pass_is_transposed() {
        let gpu = GpuContext::software();
        let mut proc = adaptive_threshold(&gpu, DEFAULT_ADAPTIVE_OFFSET);
        proc.init(40, 10, 0, false);
        proc.create_fbo_tex(false);
        let first = &proc.passes()[0];
        assert_eq!(first.out_frame_size(), (40, 10));
        let desc = gpu.backend().texture_desc(first.output_texture()).expect("allocated");
        assert_eq!((desc.width, desc.height), (10, 40));
    }

    #[test]
    fn test_adaptive_dark_spot_on_bright_field() {
        let gpu = GpuContext::software();
        let input = gray_texture(&gpu, 15, 15, |x, y| if x == 7 && y == 7 { 20 } else { 200 });
        let mut proc = adaptive_threshold(&gpu, DEFAULT_ADAPTIVE_OFFSET);
        let out = run(&gpu, &mut proc, input, 15, 15);
        let at = |x: usize, y: usize| out[(y * 15 + x) * 4];
        assert_eq!(at(7, 7), 0);
        assert_eq!(at(0, 0), 255);
        assert_eq!(at(14, 3), 255);
    }
}

//! Multi-input combiners: alpha blend, absolute difference and a 3-tap FIR.

use glam::Vec4;

use crate::gpu::context::GpuContext;
use crate::gpu::shader::{Fragment, FragmentShader};
use crate::gpu::types::UniformValue;
use crate::proc::filter::{FilterKernel, FrameGeometry};
use crate::proc::multi_input::MultiInputProc;

fn blend_eval(f: &Fragment<'_>) -> Vec4 {
    let alpha = f.uniform("params").x;
    f.input(1).lerp(f.input(0), alpha)
}

fn diff_eval(f: &Fragment<'_>) -> Vec4 {
    let strength = f.uniform("params").x;
    let d = (f.input(0).truncate() - f.input(1).truncate()).abs() * strength;
    d.extend(1.0)
}

fn fir3_eval(f: &Fragment<'_>) -> Vec4 {
    let w = f.uniform("weights");
    let sum = f.input(0).truncate() * w.x + f.input(1).truncate() * w.y + f.input(2).truncate() * w.z;
    sum.extend(1.0)
}

pub static BLEND_SHADER: FragmentShader = FragmentShader {
    label: "blend",
    wgsl: include_str!("shader_blend.wgsl"),
    eval: blend_eval,
};

pub static DIFF_SHADER: FragmentShader = FragmentShader {
    label: "diff",
    wgsl: include_str!("shader_diff.wgsl"),
    eval: diff_eval,
};

pub static FIR3_SHADER: FragmentShader = FragmentShader {
    label: "fir3",
    wgsl: include_str!("shader_fir3.wgsl"),
    eval: fir3_eval,
};

/// `mix(delayed, current, alpha)`: slot 0 is the current frame, slot 1 the
/// delayed one.
#[derive(Debug, Clone, Copy)]
pub struct BlendKernel {
    pub alpha: f32,
}

impl FilterKernel for BlendKernel {
    fn shader(&self) -> &'static FragmentShader {
        &BLEND_SHADER
    }

    fn inputs(&self) -> usize {
        2
    }

    fn uniforms(&self, _geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        out.push(("params", UniformValue::Float(self.alpha)));
    }

    fn set_param(&mut self, name: &str, value: f32) -> bool {
        if name != "alpha" {
            return false;
        }
        self.alpha = value.clamp(0.0, 1.0);
        true
    }
}

/// `|a - b| * strength`, opaque.
#[derive(Debug, Clone, Copy)]
pub struct DiffKernel {
    pub strength: f32,
}

impl Default for DiffKernel {
    fn default() -> Self {
        Self { strength: 1.0 }
    }
}

impl FilterKernel for DiffKernel {
    fn shader(&self) -> &'static FragmentShader {
        &DIFF_SHADER
    }

    fn inputs(&self) -> usize {
        2
    }

    fn uniforms(&self, _geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        out.push(("params", UniformValue::Float(self.strength)));
    }

    fn set_param(&mut self, name: &str, value: f32) -> bool {
        if name != "strength" {
            return false;
        }
        self.strength = value;
        true
    }
}

/// Weighted sum of three frames.
#[derive(Debug, Clone, Copy)]
pub struct Fir3Kernel {
    pub weights: [f32; 3],
}

impl Default for Fir3Kernel {
    fn default() -> Self {
        Self {
            weights: [1.0 / 3.0; 3],
        }
    }
}

impl FilterKernel for Fir3Kernel {
    fn shader(&self) -> &'static FragmentShader {
        &FIR3_SHADER
    }

    fn inputs(&self) -> usize {
        3
    }

    fn uniforms(&self, _geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        out.push(("weights", UniformValue::Vec3(self.weights)));
    }

    fn set_param(&mut self, name: &str, value: f32) -> bool {
        let index = match name {
            "w0" => 0,
            "w1" => 1,
            "w2" => 2,
            _ => return false,
        };
        self.weights[index] = value;
        true
    }
}

pub fn blend(gpu: &GpuContext, alpha: f32) -> MultiInputProc {
    MultiInputProc::new(gpu, BlendKernel { alpha })
}

pub fn diff(gpu: &GpuContext, strength: f32) -> MultiInputProc {
    MultiInputProc::new(gpu, DiffKernel { strength })
}

pub fn fir3(gpu: &GpuContext, weights: [f32; 3]) -> MultiInputProc {
    MultiInputProc::new(gpu, Fir3Kernel { weights })
}

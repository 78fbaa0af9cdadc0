//! Pass-through copy.

use glam::Vec4;

use crate::gpu::context::GpuContext;
use crate::gpu::shader::{Fragment, FragmentShader};
use crate::proc::filter::{FilterKernel, FilterProc};

fn eval(f: &Fragment<'_>) -> Vec4 {
    f.input(0)
}

pub static NOOP_SHADER: FragmentShader = FragmentShader {
    label: "noop",
    wgsl: include_str!("shader_noop.wgsl"),
    eval,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKernel;

impl FilterKernel for NoopKernel {
    fn shader(&self) -> &'static FragmentShader {
        &NOOP_SHADER
    }
}

pub fn noop(gpu: &GpuContext) -> FilterProc {
    FilterProc::new(gpu, NoopKernel)
}

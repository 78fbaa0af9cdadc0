//! NV12 to RGB conversion for camera-style input.

use glam::{Vec3, Vec4};

use crate::gpu::context::GpuContext;
use crate::gpu::shader::{Fragment, FragmentShader};
use crate::proc::filter::FilterKernel;
use crate::proc::multi_input::MultiInputProc;

fn eval(f: &Fragment<'_>) -> Vec4 {
    let y = f.input(0).x;
    let c = f.input(1);
    let (cb, cr) = (c.x - 0.5, c.y - 0.5);
    let rgb = Vec3::new(
        y + 1.402 * cr,
        y - 0.344_136 * cb - 0.714_136 * cr,
        y + 1.772 * cb,
    );
    rgb.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0)
}

pub static YUV2RGB_SHADER: FragmentShader = FragmentShader {
    label: "yuv2rgb",
    wgsl: include_str!("shader_yuv2rgb.wgsl"),
    eval,
};

/// Slot 0 samples the luma plane, slot 1 the interleaved chroma plane.
#[derive(Debug, Clone, Copy, Default)]
pub struct Yuv2RgbKernel;

impl FilterKernel for Yuv2RgbKernel {
    fn shader(&self) -> &'static FragmentShader {
        &YUV2RGB_SHADER
    }

    fn inputs(&self) -> usize {
        2
    }
}

pub fn yuv2rgb(gpu: &GpuContext) -> MultiInputProc {
    MultiInputProc::new(gpu, Yuv2RgbKernel)
}

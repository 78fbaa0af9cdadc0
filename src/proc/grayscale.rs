//! Weighted RGB to luminance.

use glam::{Vec3, Vec4};

use crate::gpu::context::GpuContext;
use crate::gpu::shader::{Fragment, FragmentShader};
use crate::gpu::types::UniformValue;
use crate::proc::filter::{FilterKernel, FilterProc, FrameGeometry};

/// Rec. 601 luma weights.
pub const DEFAULT_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

fn eval(f: &Fragment<'_>) -> Vec4 {
    let gray = f.input(0).truncate().dot(f.uniform("weights").truncate());
    Vec4::new(gray, gray, gray, 1.0)
}

pub static GRAYSCALE_SHADER: FragmentShader = FragmentShader {
    label: "grayscale",
    wgsl: include_str!("shader_grayscale.wgsl"),
    eval,
};

#[derive(Debug, Clone, Copy)]
pub struct GrayscaleKernel {
    weights: Vec3,
}

impl Default for GrayscaleKernel {
    fn default() -> Self {
        Self {
            weights: Vec3::from_array(DEFAULT_WEIGHTS),
        }
    }
}

impl GrayscaleKernel {
    pub fn with_weights(weights: [f32; 3]) -> Self {
        Self {
            weights: Vec3::from_array(weights),
        }
    }
}

impl FilterKernel for GrayscaleKernel {
    fn shader(&self) -> &'static FragmentShader {
        &GRAYSCALE_SHADER
    }

    fn uniforms(&self, _geometry: &FrameGeometry, out: &mut Vec<(&'static str, UniformValue)>) {
        out.push(("weights", UniformValue::Vec3(self.weights.to_array())));
    }

    fn set_param(&mut self, name: &str, value: f32) -> bool {
        match name {
            "r" | "weight_r" => self.weights.x = value,
            "g" | "weight_g" => self.weights.y = value,
            "b" | "weight_b" => self.weights.z = value,
            _ => return false,
        }
        true
    }
}

pub fn grayscale(gpu: &GpuContext) -> FilterProc {
    FilterProc::new(gpu, GrayscaleKernel::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::types::{TextureDesc, TextureUnit};
    use crate::proc::{InputTexture, Processor};

    #[test]
    fn test_gray_input_stays_gray() {
        let gpu = GpuContext::software();
        let input = {
            let mut backend = gpu.backend();
            let id = backend.create_texture(&TextureDesc::rgba(2, 2));
            backend.write_texture(id, &[128u8; 16]);
            id
        };
        let mut proc = grayscale(&gpu);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        proc.use_texture(InputTexture::texture_2d(input, TextureUnit(0)), 0);
        assert!(proc.render(0));

        let mut out = vec![0u8; 16];
        proc.result_data(&mut out);
        for px in out.chunks_exact(4) {
            assert_eq!(px, &[128, 128, 128, 255]);
        }
    }

    #[test]
    fn test_pure_channels_use_weights() {
        let gpu = GpuContext::software();
        let input = {
            let mut backend = gpu.backend();
            let id = backend.create_texture(&TextureDesc::rgba(1, 1));
            backend.write_texture(id, &[255, 0, 0, 255]);
            id
        };
        let mut proc = grayscale(&gpu);
        proc.init(1, 1, 0, false);
        proc.create_fbo_tex(false);
        proc.use_texture(InputTexture::texture_2d(input, TextureUnit(0)), 0);
        proc.render(0);

        let mut out = vec![0u8; 4];
        proc.result_data(&mut out);
        assert_eq!(out[0], (0.299f32 * 255.0).round() as u8);
    }

    #[test]
    fn test_set_weight_param() {
        let mut kernel = GrayscaleKernel::default();
        assert!(kernel.set_param("g", 1.0));
        assert!(!kernel.set_param("alpha", 1.0));
    }
}

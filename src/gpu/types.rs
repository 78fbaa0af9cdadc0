//! Handles and plain data shared by every GPU backend.
//!
//! Ids are small integers handed out by the backend. Zero is never allocated
//! and is used as the "invalid" sentinel throughout the crate.

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::gpu::quad::RenderOrientation;

/// Maximum number of `vec4<f32>` uniform slots a program may declare.
pub const MAX_UNIFORM_SLOTS: usize = 16;

/// Maximum number of sampled inputs a program may declare.
pub const MAX_INPUT_SLOTS: usize = 3;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: $name = $name(0);

            pub fn is_valid(self) -> bool {
                self.0 != 0
            }
        }
    };
}

gpu_handle!(
    /// A texture owned by the backend.
    TextureId
);
gpu_handle!(
    /// An offscreen render target with (at most) one attached color texture.
    FramebufferId
);
gpu_handle!(
    /// A compiled vertex + fragment program.
    ProgramId
);

/// A texture unit. Samplers are pointed at units, units are bound to textures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureUnit(pub u32);

impl TextureUnit {
    pub fn offset(self, n: u32) -> Self {
        TextureUnit(self.0 + n)
    }
}

/// How a texture is sampled by a fragment program.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureTarget {
    #[default]
    Texture2D,
    /// Platform external image (camera frames sampled without conversion).
    External,
}

/// Storage format of a backend texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    #[default]
    Rgba8,
    Bgra8,
    R8,
    Rg8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 | TextureFormat::Bgra8 => 4,
            TextureFormat::R8 => 1,
            TextureFormat::Rg8 => 2,
        }
    }
}

/// Host pixel layouts accepted at the pipeline input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgba,
    Bgra,
    /// Full-size 8-bit luma plane followed by a half-size interleaved UV plane.
    Nv12,
}

impl PixelFormat {
    /// Number of bytes a host buffer of this format occupies.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => w * h * 4,
            PixelFormat::Nv12 => {
                let (cw, ch) = chroma_size(width, height);
                w * h + (cw as usize) * (ch as usize) * 2
            }
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rgba" => Some(PixelFormat::Rgba),
            "bgra" => Some(PixelFormat::Bgra),
            "nv12" | "yuv" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }
}

/// Size of the subsampled chroma plane for a `width`x`height` NV12 frame.
pub fn chroma_size(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mipmapped: bool,
}

impl TextureDesc {
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8,
            mipmapped: false,
        }
    }

    /// Number of mip levels down to 1x1 (1 when not mipmapped).
    pub fn mip_level_count(&self) -> u32 {
        if self.mipmapped {
            32 - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    MissingAttachment,
    InvalidFramebuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderTarget {
    Framebuffer(FramebufferId),
    /// The visible framebuffer (the headless surface for offscreen backends).
    Display,
}

/// Uniform value set by a processor before drawing. Every value occupies one
/// `vec4<f32>` slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl Default for UniformValue {
    fn default() -> Self {
        UniformValue::Float(0.0)
    }
}

impl UniformValue {
    /// Get as vec4, padding smaller types.
    pub fn as_vec4(&self) -> [f32; 4] {
        match self {
            UniformValue::Float(v) => [*v, 0.0, 0.0, 0.0],
            UniformValue::Vec2(v) => [v[0], v[1], 0.0, 0.0],
            UniformValue::Vec3(v) => [v[0], v[1], v[2], 0.0],
            UniformValue::Vec4(v) => *v,
        }
    }
}

/// One fullscreen-quad draw, filled in the order the state would be set on
/// a GL-style device: program, viewport/clear, textures and samplers,
/// uniforms, geometry, target.
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub program: ProgramId,
    pub viewport: (u32, u32),
    pub clear: bool,
    /// Unit bindings (unit -> texture).
    pub units: Vec<(TextureUnit, TextureId)>,
    /// Sampler uniforms, indexed by input slot, each pointing at a unit.
    pub samplers: Vec<TextureUnit>,
    pub uniforms: [[f32; 4]; MAX_UNIFORM_SLOTS],
    pub orientation: RenderOrientation,
    pub target: RenderTarget,
}

impl DrawCall {
    pub fn new(program: ProgramId) -> Self {
        Self {
            program,
            viewport: (0, 0),
            clear: false,
            units: Vec::new(),
            samplers: Vec::new(),
            uniforms: [[0.0; 4]; MAX_UNIFORM_SLOTS],
            orientation: RenderOrientation::Standard,
            target: RenderTarget::Display,
        }
    }

    pub fn viewport(&mut self, width: u32, height: u32) -> &mut Self {
        self.viewport = (width, height);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.clear = true;
        self
    }

    /// Bind `texture` to `unit` and point sampler `slot` at that unit.
    pub fn bind_texture(&mut self, slot: usize, unit: TextureUnit, texture: TextureId) -> &mut Self {
        self.units.retain(|(u, _)| *u != unit);
        self.units.push((unit, texture));
        if self.samplers.len() <= slot {
            self.samplers.resize(slot + 1, TextureUnit::default());
        }
        self.samplers[slot] = unit;
        self
    }

    pub fn uniform(&mut self, location: usize, value: UniformValue) -> &mut Self {
        if location < MAX_UNIFORM_SLOTS {
            self.uniforms[location] = value.as_vec4();
        } else {
            log::warn!("uniform location {} out of range", location);
        }
        self
    }

    pub fn geometry(&mut self, orientation: RenderOrientation) -> &mut Self {
        self.orientation = orientation;
        self
    }

    pub fn target(&mut self, target: RenderTarget) -> &mut Self {
        self.target = target;
        self
    }

    /// Texture sampled by input `slot`, resolved through its unit.
    pub fn texture_for_slot(&self, slot: usize) -> TextureId {
        self.samplers
            .get(slot)
            .and_then(|unit| self.units.iter().find(|(u, _)| u == unit))
            .map(|(_, t)| *t)
            .unwrap_or(TextureId::INVALID)
    }

    pub fn uniform_vec4(&self, location: usize) -> Vec4 {
        Vec4::from_array(self.uniforms[location])
    }
}

/// Counters kept by every backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub draw_calls: u64,
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub live_textures: usize,
    pub programs_compiled: u64,
    pub mipmaps_generated: u64,
    pub drains: u64,
}

//! CPU reference backend.
//!
//! Rasterizes the fullscreen quad on the host and runs each program's CPU
//! fragment for every covered pixel. Sampling is bilinear with clamp-to-edge
//! addressing and nearest-mip selection, storage is RGBA8 regardless of the
//! upload format (single/dual channel formats expand to `(r, 0, 0, 1)` and
//! `(r, g, 0, 1)` like they do on the GPU).

use std::collections::HashMap;

use glam::{Vec2, Vec4};

use crate::gpu::backend::GpuBackend;
use crate::gpu::quad;
use crate::gpu::shader::{CpuFragment, Fragment, ProgramSource, TexelSource};
use crate::gpu::types::{
    DrawCall, FramebufferId, FramebufferStatus, GpuStats, ProgramId, RenderTarget, TextureDesc,
    TextureFormat, TextureId, MAX_INPUT_SLOTS,
};

struct SoftTexture {
    desc: TextureDesc,
    levels: Vec<Vec<[u8; 4]>>,
}

impl SoftTexture {
    fn new(desc: TextureDesc) -> Self {
        let levels = (0..desc.mip_level_count())
            .map(|level| {
                let (w, h) = level_size(&desc, level as usize);
                vec![[0u8; 4]; (w * h) as usize]
            })
            .collect();
        Self { desc, levels }
    }
}

fn level_size(desc: &TextureDesc, level: usize) -> (u32, u32) {
    ((desc.width >> level).max(1), (desc.height >> level).max(1))
}

fn to_texel(color: Vec4) -> [u8; 4] {
    let c = color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0 + Vec4::splat(0.5);
    [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
}

fn from_texel(p: [u8; 4]) -> Vec4 {
    Vec4::new(p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32) / 255.0
}

/// One mip level bound for sampling.
struct SampledLevel<'a> {
    texels: &'a [[u8; 4]],
    width: u32,
    height: u32,
}

impl SampledLevel<'_> {
    fn fetch(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        from_texel(self.texels[y * self.width as usize + x])
    }

    fn bilinear(&self, uv: Vec2) -> Vec4 {
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (ix, iy) = (x0 as i64, y0 as i64);
        let top = self.fetch(ix, iy).lerp(self.fetch(ix + 1, iy), fx);
        let bottom = self.fetch(ix, iy + 1).lerp(self.fetch(ix + 1, iy + 1), fx);
        top.lerp(bottom, fy)
    }
}

struct BoundInputs<'a> {
    slots: [Option<SampledLevel<'a>>; MAX_INPUT_SLOTS],
}

impl TexelSource for BoundInputs<'_> {
    fn sample(&self, slot: usize, uv: Vec2) -> Vec4 {
        match self.slots.get(slot) {
            Some(Some(level)) => level.bilinear(uv),
            _ => Vec4::ZERO,
        }
    }
}

/// Mip level whose texel density best matches the output pixel footprint.
fn select_level(desc: &TextureDesc, levels: usize, coords: &[[f32; 2]; 4], viewport: (u32, u32)) -> usize {
    if levels <= 1 {
        return 0;
    }
    let size = Vec2::new(desc.width as f32, desc.height as f32);
    let along_row = (Vec2::from(coords[1]) - Vec2::from(coords[0])) * size / viewport.0 as f32;
    let along_col = (Vec2::from(coords[2]) - Vec2::from(coords[0])) * size / viewport.1 as f32;
    let rho = along_row.length().max(along_col.length());
    if rho <= 1.0 {
        0
    } else {
        ((rho.log2() + 0.5).floor() as usize).min(levels - 1)
    }
}

struct SoftProgram {
    inputs: usize,
    uniforms: HashMap<String, usize>,
    eval: CpuFragment,
}

/// The CPU rasterizer backend.
pub struct SoftwareGpu {
    textures: HashMap<u32, SoftTexture>,
    framebuffers: HashMap<u32, Option<TextureId>>,
    programs: HashMap<u32, SoftProgram>,
    next_texture: u32,
    next_framebuffer: u32,
    next_program: u32,
    clear_color: [f32; 4],
    display: SoftTexture,
    stats: GpuStats,
}

impl Default for SoftwareGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareGpu {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            next_texture: 1,
            next_framebuffer: 1,
            next_program: 1,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            display: SoftTexture::new(TextureDesc::rgba(0, 0)),
            stats: GpuStats::default(),
        }
    }

    fn target_size(&self, target: RenderTarget) -> Option<(u32, u32)> {
        match target {
            RenderTarget::Framebuffer(fb) => match self.framebuffers.get(&fb.0) {
                Some(Some(tex)) => match self.textures.get(&tex.0) {
                    Some(t) => Some((t.desc.width, t.desc.height)),
                    None => {
                        log::error!("framebuffer {}: attached texture {} was deleted", fb.0, tex.0);
                        None
                    }
                },
                Some(None) => {
                    log::error!("framebuffer {} incomplete: no color attachment", fb.0);
                    None
                }
                None => {
                    log::error!("draw into unknown framebuffer {}", fb.0);
                    None
                }
            },
            RenderTarget::Display => {
                let desc = self.display.desc;
                if desc.width == 0 || desc.height == 0 {
                    log::error!("display target has no size");
                    None
                } else {
                    Some((desc.width, desc.height))
                }
            }
        }
    }

    fn target_texels(&mut self, target: RenderTarget) -> Option<&mut Vec<[u8; 4]>> {
        let texture = match target {
            RenderTarget::Framebuffer(fb) => {
                let tex = self.framebuffers.get(&fb.0).copied().flatten()?;
                self.textures.get_mut(&tex.0)?
            }
            RenderTarget::Display => &mut self.display,
        };
        texture.levels.first_mut()
    }

    fn rasterize(&self, call: &DrawCall, target_size: (u32, u32)) -> Option<Vec<[u8; 4]>> {
        let Some(program) = self.programs.get(&call.program.0) else {
            log::error!("draw with invalid program {}", call.program.0);
            return None;
        };
        let (target_w, target_h) = target_size;
        let viewport = (call.viewport.0.min(target_w), call.viewport.1.min(target_h));
        if viewport.0 == 0 || viewport.1 == 0 {
            log::error!("draw with empty viewport {:?}", call.viewport);
            return None;
        }

        let coords = call.orientation.tex_coords();
        let inputs = BoundInputs {
            slots: std::array::from_fn(|slot| {
                if slot >= program.inputs {
                    return None;
                }
                let id = call.texture_for_slot(slot);
                let texture = self.textures.get(&id.0)?;
                let level = select_level(&texture.desc, texture.levels.len(), &coords, viewport);
                let (width, height) = level_size(&texture.desc, level);
                Some(SampledLevel {
                    texels: &texture.levels[level],
                    width,
                    height,
                })
            }),
        };

        let mut pixels = if call.clear {
            vec![to_texel(Vec4::from_array(self.clear_color)); (target_w * target_h) as usize]
        } else {
            match call.target {
                RenderTarget::Framebuffer(fb) => self
                    .framebuffers
                    .get(&fb.0)
                    .copied()
                    .flatten()
                    .and_then(|tex| self.textures.get(&tex.0))
                    .map(|t| t.levels[0].clone())?,
                RenderTarget::Display => self.display.levels[0].clone(),
            }
        };

        let (vw, vh) = viewport;
        for y in 0..vh {
            let t = (y as f32 + 0.5) / vh as f32;
            for x in 0..vw {
                let s = (x as f32 + 0.5) / vw as f32;
                let uv = Vec2::from(quad::interpolate(&coords, s, t));
                let fragment = Fragment::new(uv, &inputs, &call.uniforms, &program.uniforms);
                let color = (program.eval)(&fragment);
                pixels[(y * target_w + x) as usize] = to_texel(color);
            }
        }
        Some(pixels)
    }
}

impl GpuBackend for SoftwareGpu {
    fn name(&self) -> &'static str {
        "software"
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        if desc.width == 0 || desc.height == 0 {
            log::error!("cannot create {}x{} texture", desc.width, desc.height);
            return TextureId::INVALID;
        }
        let id = self.next_texture;
        self.next_texture += 1;
        self.textures.insert(id, SoftTexture::new(*desc));
        self.stats.textures_created += 1;
        TextureId(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        if self.textures.remove(&id.0).is_some() {
            self.stats.textures_deleted += 1;
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id.0).map(|t| t.desc)
    }

    fn write_texture(&mut self, id: TextureId, data: &[u8]) -> bool {
        let Some(texture) = self.textures.get_mut(&id.0) else {
            log::error!("write to unknown texture {}", id.0);
            return false;
        };
        let bpp = texture.desc.format.bytes_per_pixel();
        let expected = (texture.desc.width * texture.desc.height) as usize * bpp;
        if data.len() < expected {
            log::error!("texture {}: upload of {} bytes, expected {}", id.0, data.len(), expected);
            return false;
        }
        let format = texture.desc.format;
        for (dst, src) in texture.levels[0].iter_mut().zip(data.chunks_exact(bpp)) {
            *dst = match format {
                TextureFormat::Rgba8 => [src[0], src[1], src[2], src[3]],
                TextureFormat::Bgra8 => [src[2], src[1], src[0], src[3]],
                TextureFormat::R8 => [src[0], 0, 0, 255],
                TextureFormat::Rg8 => [src[0], src[1], 0, 255],
            };
        }
        true
    }

    fn read_texture(&mut self, id: TextureId, out: &mut [u8]) -> bool {
        let Some(texture) = self.textures.get(&id.0) else {
            log::error!("read from unknown texture {}", id.0);
            return false;
        };
        let expected = texture.levels[0].len() * 4;
        if out.len() < expected {
            log::error!("texture {}: readback buffer holds {} bytes, need {}", id.0, out.len(), expected);
            return false;
        }
        for (dst, src) in out.chunks_exact_mut(4).zip(&texture.levels[0]) {
            dst.copy_from_slice(src);
        }
        true
    }

    fn generate_mipmaps(&mut self, id: TextureId) {
        let Some(texture) = self.textures.get_mut(&id.0) else {
            log::error!("mipmap generation for unknown texture {}", id.0);
            return;
        };
        for level in 1..texture.levels.len() {
            let (pw, ph) = level_size(&texture.desc, level - 1);
            let (w, h) = level_size(&texture.desc, level);
            let (prev, rest) = texture.levels.split_at_mut(level);
            let src = &prev[level - 1];
            let dst = &mut rest[0];
            for y in 0..h {
                for x in 0..w {
                    let mut sum = Vec4::ZERO;
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let sx = (x * 2 + dx).min(pw - 1);
                        let sy = (y * 2 + dy).min(ph - 1);
                        sum += from_texel(src[(sy * pw + sx) as usize]);
                    }
                    dst[(y * w + x) as usize] = to_texel(sum / 4.0);
                }
            }
        }
        self.stats.mipmaps_generated += 1;
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = self.next_framebuffer;
        self.next_framebuffer += 1;
        self.framebuffers.insert(id, None);
        FramebufferId(id)
    }

    fn attach_texture(&mut self, fb: FramebufferId, texture: TextureId) -> FramebufferStatus {
        let renderable = self
            .textures
            .get(&texture.0)
            .map(|t| t.desc.format == TextureFormat::Rgba8)
            .unwrap_or(false);
        let Some(slot) = self.framebuffers.get_mut(&fb.0) else {
            return FramebufferStatus::InvalidFramebuffer;
        };
        if !renderable {
            *slot = None;
            return FramebufferStatus::MissingAttachment;
        }
        *slot = Some(texture);
        FramebufferStatus::Complete
    }

    fn delete_framebuffer(&mut self, fb: FramebufferId) {
        self.framebuffers.remove(&fb.0);
    }

    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, String> {
        for required in ["fn vs_main", "fn fs_main", "struct Uniforms"] {
            if !source.source.contains(required) {
                return Err(format!("{}: missing `{}`", source.label, required));
            }
        }
        let id = self.next_program;
        self.next_program += 1;
        self.programs.insert(
            id,
            SoftProgram {
                inputs: source.inputs.len(),
                uniforms: source.uniforms.clone(),
                eval: source.eval,
            },
        );
        self.stats.programs_compiled += 1;
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, id: ProgramId) {
        self.programs.remove(&id.0);
    }

    fn draw(&mut self, call: &DrawCall) -> bool {
        let Some(size) = self.target_size(call.target) else {
            return false;
        };
        let Some(pixels) = self.rasterize(call, size) else {
            return false;
        };
        match self.target_texels(call.target) {
            Some(texels) => *texels = pixels,
            None => return false,
        }
        self.stats.draw_calls += 1;
        true
    }

    fn set_display_size(&mut self, width: u32, height: u32) {
        let desc = self.display.desc;
        if desc.width != width || desc.height != height {
            self.display = SoftTexture::new(TextureDesc::rgba(width, height));
        }
    }

    fn display_size(&self) -> (u32, u32) {
        (self.display.desc.width, self.display.desc.height)
    }

    fn read_display(&mut self, out: &mut [u8]) -> bool {
        let expected = self.display.levels[0].len() * 4;
        if expected == 0 || out.len() < expected {
            log::error!("display readback buffer holds {} bytes, need {}", out.len(), expected);
            return false;
        }
        for (dst, src) in out.chunks_exact_mut(4).zip(&self.display.levels[0]) {
            dst.copy_from_slice(src);
        }
        true
    }

    fn finish(&mut self) {
        self.stats.drains += 1;
    }

    fn supports_mapped_transfer(&self) -> bool {
        true
    }

    fn stats(&self) -> GpuStats {
        GpuStats {
            live_textures: self.textures.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::quad::RenderOrientation;
    use crate::gpu::types::{TextureTarget, TextureUnit};

    fn passthrough(f: &Fragment<'_>) -> Vec4 {
        f.input(0)
    }

    fn program(gpu: &mut SoftwareGpu) -> ProgramId {
        let source = ProgramSource {
            label: "copy".into(),
            source: "fn vs_main fn fs_main struct Uniforms".into(),
            inputs: vec![TextureTarget::Texture2D],
            uniforms: HashMap::new(),
            eval: passthrough,
        };
        gpu.compile_program(&source).expect("compiles")
    }

    fn pattern(w: u32, h: u32) -> Vec<u8> {
        (0..w * h)
            .flat_map(|i| [(i as u8).wrapping_mul(7), i as u8, 255 - i as u8, 255])
            .collect()
    }

    fn copy(gpu: &mut SoftwareGpu, src: TextureId, w: u32, h: u32, o: RenderOrientation) -> TextureId {
        let program = program(gpu);
        let dst = gpu.create_texture(&TextureDesc::rgba(w, h));
        let fb = gpu.create_framebuffer();
        assert_eq!(gpu.attach_texture(fb, dst), FramebufferStatus::Complete);
        let mut call = DrawCall::new(program);
        call.viewport(w, h)
            .clear()
            .bind_texture(0, TextureUnit(0), src)
            .geometry(o)
            .target(RenderTarget::Framebuffer(fb));
        assert!(gpu.draw(&call));
        dst
    }

    #[test]
    fn test_passthrough_copy_is_exact() {
        let mut gpu = SoftwareGpu::new();
        let src = gpu.create_texture(&TextureDesc::rgba(5, 3));
        let data = pattern(5, 3);
        assert!(gpu.write_texture(src, &data));
        let dst = copy(&mut gpu, src, 5, 3, RenderOrientation::Standard);
        let mut out = vec![0; data.len()];
        assert!(gpu.read_texture(dst, &mut out));
        assert_eq!(out, data);
    }

    #[test]
    fn test_diagonal_transposes() {
        let mut gpu = SoftwareGpu::new();
        let src = gpu.create_texture(&TextureDesc::rgba(4, 2));
        let data = pattern(4, 2);
        gpu.write_texture(src, &data);
        let dst = copy(&mut gpu, src, 2, 4, RenderOrientation::Diagonal);
        let mut out = vec![0; data.len()];
        gpu.read_texture(dst, &mut out);
        for y in 0..4usize {
            for x in 0..2usize {
                let o = (y * 2 + x) * 4;
                let i = (x * 4 + y) * 4;
                assert_eq!(out[o..o + 4], data[i..i + 4]);
            }
        }
    }

    #[test]
    fn test_bgra_upload_is_swizzled() {
        let mut gpu = SoftwareGpu::new();
        let tex = gpu.create_texture(&TextureDesc {
            format: TextureFormat::Bgra8,
            ..TextureDesc::rgba(1, 1)
        });
        gpu.write_texture(tex, &[10, 20, 30, 40]);
        let mut out = [0u8; 4];
        gpu.read_texture(tex, &mut out);
        assert_eq!(out, [30, 20, 10, 40]);
    }

    #[test]
    fn test_mipmaps_average() {
        let mut gpu = SoftwareGpu::new();
        let tex = gpu.create_texture(&TextureDesc {
            mipmapped: true,
            ..TextureDesc::rgba(2, 2)
        });
        gpu.write_texture(tex, &[0, 0, 0, 255, 100, 0, 0, 255, 0, 0, 0, 255, 100, 0, 0, 255]);
        gpu.generate_mipmaps(tex);
        let level = &gpu.textures[&tex.0].levels[1];
        assert_eq!(level.len(), 1);
        assert_eq!(level[0], [50, 0, 0, 255]);
    }

    #[test]
    fn test_incomplete_framebuffer_rejects_draw() {
        let mut gpu = SoftwareGpu::new();
        let program = program(&mut gpu);
        let fb = gpu.create_framebuffer();
        let mut call = DrawCall::new(program);
        call.viewport(4, 4).target(RenderTarget::Framebuffer(fb));
        assert!(!gpu.draw(&call));
        assert_eq!(gpu.stats().draw_calls, 0);
    }

    #[test]
    fn test_texture_accounting() {
        let mut gpu = SoftwareGpu::new();
        let a = gpu.create_texture(&TextureDesc::rgba(2, 2));
        let _b = gpu.create_texture(&TextureDesc::rgba(2, 2));
        gpu.delete_texture(a);
        gpu.delete_texture(a);
        let stats = gpu.stats();
        assert_eq!(stats.textures_created, 2);
        assert_eq!(stats.textures_deleted, 1);
        assert_eq!(stats.live_textures, 1);
        assert_eq!(gpu.create_texture(&TextureDesc::rgba(0, 4)), TextureId::INVALID);
    }
}

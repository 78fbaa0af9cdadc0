//! Host <-> GPU pixel transfer.
//!
//! Every framebuffer target owns one transfer backend. The output side
//! allocates the texture the framebuffer renders into; the input side (only
//! used by the first processor of a pipeline) allocates the texture(s) host
//! pixels are uploaded to.

use crate::gpu::context::GpuContext;
use crate::gpu::types::{chroma_size, PixelFormat, TextureDesc, TextureFormat, TextureId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferKind {
    /// Plain upload and readback through the backend.
    #[default]
    Generic,
    /// Persistent host mirrors with lock/unlock access.
    Mapped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Input,
    Output,
}

pub trait MemTransfer {
    fn init(&mut self) -> bool;

    /// Allocate the upload texture(s) for a `width`x`height` frame. Uploads
    /// `data` right away when given. Returns the primary texture.
    fn prepare_input(&mut self, width: u32, height: u32, format: PixelFormat, data: Option<&[u8]>) -> TextureId;

    /// Allocate the render texture.
    fn prepare_output(&mut self, width: u32, height: u32, mipmapped: bool) -> TextureId;

    fn release_input(&mut self);
    fn release_output(&mut self);

    fn input_texture_id(&self) -> TextureId;

    /// Second plane of a planar input, invalid otherwise.
    fn chroma_texture_id(&self) -> TextureId {
        TextureId::INVALID
    }

    fn output_texture_id(&self) -> TextureId;

    /// Upload a host frame in the prepared input format.
    fn to_gpu(&mut self, buf: &[u8]);

    /// Read the output texture back as RGBA8.
    fn from_gpu(&mut self, buf: &mut [u8]);

    /// Direct access to a mapped buffer, if the backend has one.
    fn lock_buffer(&mut self, _kind: BufferKind) -> Option<&mut [u8]> {
        None
    }

    fn unlock_buffer(&mut self, _kind: BufferKind) {}
}

#[derive(Debug, Clone, Copy)]
struct InputPlanes {
    width: u32,
    height: u32,
    format: PixelFormat,
    primary: TextureId,
    chroma: TextureId,
}

pub struct GenericTransfer {
    gpu: GpuContext,
    input: Option<InputPlanes>,
    output: TextureId,
    output_size: (u32, u32),
}

impl GenericTransfer {
    pub fn new(gpu: &GpuContext) -> Self {
        Self {
            gpu: gpu.clone(),
            input: None,
            output: TextureId::INVALID,
            output_size: (0, 0),
        }
    }

    fn input_len(&self) -> usize {
        self.input
            .map(|p| p.format.buffer_len(p.width, p.height))
            .unwrap_or(0)
    }

    fn output_len(&self) -> usize {
        (self.output_size.0 * self.output_size.1) as usize * 4
    }
}

impl MemTransfer for GenericTransfer {
    fn init(&mut self) -> bool {
        self.gpu.backend().is_valid()
    }

    fn prepare_input(&mut self, width: u32, height: u32, format: PixelFormat, data: Option<&[u8]>) -> TextureId {
        self.release_input();
        let mut gpu = self.gpu.backend();
        let (primary, chroma) = match format {
            PixelFormat::Rgba => (gpu.create_texture(&TextureDesc::rgba(width, height)), TextureId::INVALID),
            PixelFormat::Bgra => (
                gpu.create_texture(&TextureDesc {
                    format: TextureFormat::Bgra8,
                    ..TextureDesc::rgba(width, height)
                }),
                TextureId::INVALID,
            ),
            PixelFormat::Nv12 => {
                let (cw, ch) = chroma_size(width, height);
                (
                    gpu.create_texture(&TextureDesc {
                        format: TextureFormat::R8,
                        ..TextureDesc::rgba(width, height)
                    }),
                    gpu.create_texture(&TextureDesc {
                        format: TextureFormat::Rg8,
                        ..TextureDesc::rgba(cw, ch)
                    }),
                )
            }
        };
        drop(gpu);
        if !primary.is_valid() {
            log::error!("transfer: could not allocate {}x{} {:?} input", width, height, format);
        }
        self.input = Some(InputPlanes {
            width,
            height,
            format,
            primary,
            chroma,
        });
        if let Some(data) = data {
            self.to_gpu(data);
        }
        primary
    }

    fn prepare_output(&mut self, width: u32, height: u32, mipmapped: bool) -> TextureId {
        self.release_output();
        let id = self.gpu.backend().create_texture(&TextureDesc {
            mipmapped,
            ..TextureDesc::rgba(width, height)
        });
        if id.is_valid() {
            self.output = id;
            self.output_size = (width, height);
        } else {
            log::error!("transfer: could not allocate {}x{} output", width, height);
        }
        id
    }

    fn release_input(&mut self) {
        if let Some(planes) = self.input.take() {
            let mut gpu = self.gpu.backend();
            gpu.delete_texture(planes.primary);
            if planes.chroma.is_valid() {
                gpu.delete_texture(planes.chroma);
            }
        }
    }

    fn release_output(&mut self) {
        if self.output.is_valid() {
            self.gpu.backend().delete_texture(self.output);
            self.output = TextureId::INVALID;
            self.output_size = (0, 0);
        }
    }

    fn input_texture_id(&self) -> TextureId {
        self.input.map(|p| p.primary).unwrap_or(TextureId::INVALID)
    }

    fn chroma_texture_id(&self) -> TextureId {
        self.input.map(|p| p.chroma).unwrap_or(TextureId::INVALID)
    }

    fn output_texture_id(&self) -> TextureId {
        self.output
    }

    fn to_gpu(&mut self, buf: &[u8]) {
        let Some(planes) = self.input else {
            log::error!("transfer: to_gpu without a prepared input");
            return;
        };
        let expected = self.input_len();
        if buf.len() < expected {
            log::error!("transfer: input buffer holds {} bytes, need {}", buf.len(), expected);
            return;
        }
        let mut gpu = self.gpu.backend();
        match planes.format {
            PixelFormat::Rgba | PixelFormat::Bgra => {
                gpu.write_texture(planes.primary, &buf[..expected]);
            }
            PixelFormat::Nv12 => {
                let luma = (planes.width * planes.height) as usize;
                gpu.write_texture(planes.primary, &buf[..luma]);
                gpu.write_texture(planes.chroma, &buf[luma..expected]);
            }
        }
    }

    fn from_gpu(&mut self, buf: &mut [u8]) {
        if !self.output.is_valid() {
            log::error!("transfer: from_gpu without an output texture");
            return;
        }
        let expected = self.output_len();
        if buf.len() < expected {
            log::error!("transfer: output buffer holds {} bytes, need {}", buf.len(), expected);
            return;
        }
        let mut gpu = self.gpu.backend();
        gpu.finish();
        gpu.read_texture(self.output, &mut buf[..expected]);
    }
}

/// Generic transfer plus persistent host mirrors exposed through
/// `lock_buffer`/`unlock_buffer`. Unlocking the input mirror uploads it;
/// locking the output mirror refreshes it from the GPU.
pub struct MappedTransfer {
    inner: GenericTransfer,
    input_mirror: Vec<u8>,
    output_mirror: Vec<u8>,
    locked: Option<BufferKind>,
}

impl MappedTransfer {
    pub fn new(gpu: &GpuContext) -> Self {
        Self {
            inner: GenericTransfer::new(gpu),
            input_mirror: Vec::new(),
            output_mirror: Vec::new(),
            locked: None,
        }
    }
}

impl MemTransfer for MappedTransfer {
    fn init(&mut self) -> bool {
        self.inner.init() && self.inner.gpu.backend().supports_mapped_transfer()
    }

    fn prepare_input(&mut self, width: u32, height: u32, format: PixelFormat, data: Option<&[u8]>) -> TextureId {
        let id = self.inner.prepare_input(width, height, format, data);
        self.input_mirror = vec![0; self.inner.input_len()];
        if let Some(data) = data {
            let n = self.input_mirror.len().min(data.len());
            self.input_mirror[..n].copy_from_slice(&data[..n]);
        }
        id
    }

    fn prepare_output(&mut self, width: u32, height: u32, mipmapped: bool) -> TextureId {
        let id = self.inner.prepare_output(width, height, mipmapped);
        self.output_mirror = vec![0; self.inner.output_len()];
        id
    }

    fn release_input(&mut self) {
        self.inner.release_input();
        self.input_mirror.clear();
    }

    fn release_output(&mut self) {
        self.inner.release_output();
        self.output_mirror.clear();
    }

    fn input_texture_id(&self) -> TextureId {
        self.inner.input_texture_id()
    }

    fn chroma_texture_id(&self) -> TextureId {
        self.inner.chroma_texture_id()
    }

    fn output_texture_id(&self) -> TextureId {
        self.inner.output_texture_id()
    }

    fn to_gpu(&mut self, buf: &[u8]) {
        let n = self.input_mirror.len().min(buf.len());
        self.input_mirror[..n].copy_from_slice(&buf[..n]);
        self.inner.to_gpu(buf);
    }

    fn from_gpu(&mut self, buf: &mut [u8]) {
        self.inner.from_gpu(buf);
    }

    fn lock_buffer(&mut self, kind: BufferKind) -> Option<&mut [u8]> {
        if let Some(current) = self.locked {
            log::error!("transfer: {:?} buffer locked while {:?} is still locked", kind, current);
            return None;
        }
        self.locked = Some(kind);
        match kind {
            BufferKind::Input => Some(self.input_mirror.as_mut_slice()),
            BufferKind::Output => {
                self.inner.from_gpu(&mut self.output_mirror);
                Some(self.output_mirror.as_mut_slice())
            }
        }
    }

    fn unlock_buffer(&mut self, kind: BufferKind) {
        if self.locked != Some(kind) {
            log::warn!("transfer: unlock of {:?} buffer that is not locked", kind);
            return;
        }
        self.locked = None;
        if kind == BufferKind::Input {
            self.inner.to_gpu(&self.input_mirror);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_texture_is_replaced() {
        let gpu = GpuContext::software();
        let mut transfer = GenericTransfer::new(&gpu);
        assert!(transfer.init());
        let first = transfer.prepare_output(4, 4, false);
        let second = transfer.prepare_output(8, 8, true);
        assert_ne!(first, second);
        assert_eq!(transfer.output_texture_id(), second);
        let stats = gpu.stats();
        assert_eq!(stats.textures_deleted, 1);
        assert_eq!(stats.live_textures, 1);
        let desc = gpu.backend().texture_desc(second).expect("live");
        assert!(desc.mipmapped);
    }

    #[test]
    fn test_nv12_upload_splits_planes() {
        let gpu = GpuContext::software();
        let mut transfer = GenericTransfer::new(&gpu);
        let mut frame = vec![0u8; PixelFormat::Nv12.buffer_len(2, 2)];
        frame[..4].copy_from_slice(&[10, 20, 30, 40]);
        frame[4..6].copy_from_slice(&[128, 64]);
        transfer.prepare_input(2, 2, PixelFormat::Nv12, Some(&frame));

        let luma = transfer.input_texture_id();
        let chroma = transfer.chroma_texture_id();
        assert!(luma.is_valid() && chroma.is_valid());

        let mut out = [0u8; 16];
        assert!(gpu.backend().read_texture(luma, &mut out));
        assert_eq!(&out[4..8], &[20, 0, 0, 255]);
        let mut out = [0u8; 4];
        assert!(gpu.backend().read_texture(chroma, &mut out));
        assert_eq!(out, [128, 64, 0, 255]);
    }

    #[test]
    fn test_mapped_lock_unlock_uploads() {
        let gpu = GpuContext::software();
        let mut transfer = MappedTransfer::new(&gpu);
        assert!(transfer.init());
        let input = transfer.prepare_input(1, 1, PixelFormat::Rgba, None);
        {
            let buf = transfer.lock_buffer(BufferKind::Input).expect("mapped");
            buf.copy_from_slice(&[1, 2, 3, 4]);
        }
        assert!(transfer.lock_buffer(BufferKind::Output).is_none());
        transfer.unlock_buffer(BufferKind::Input);

        let mut out = [0u8; 4];
        gpu.backend().read_texture(input, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_short_input_buffer_is_rejected() {
        let gpu = GpuContext::software();
        let mut transfer = GenericTransfer::new(&gpu);
        let input = transfer.prepare_input(2, 2, PixelFormat::Rgba, None);
        transfer.to_gpu(&[255; 8]);
        let mut out = [9u8; 16];
        gpu.backend().read_texture(input, &mut out);
        assert_eq!(out, [0u8; 16]);
    }
}

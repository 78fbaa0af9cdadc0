//! wgpu backend.
//!
//! Every draw is encoded and submitted on its own, so `finish` (a blocking
//! device poll) is enough to order dependent reads. Render targets are always
//! `Rgba8Unorm`; mipmap chains are rebuilt with a blit pass per level.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::gpu::backend::GpuBackend;
use crate::gpu::quad::{self, QuadPosition, QuadTexCoord, RenderOrientation};
use crate::gpu::shader::{self, ProgramSource};
use crate::gpu::types::{
    DrawCall, FramebufferId, FramebufferStatus, GpuStats, ProgramId, RenderTarget, TextureDesc,
    TextureFormat, TextureId, TextureTarget, MAX_UNIFORM_SLOTS,
};

const UNIFORM_BUFFER_SIZE: u64 = (MAX_UNIFORM_SLOTS * 16) as u64;

const POSITION_ATTRIBS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
const TEX_COORD_ATTRIBS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];

fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadPosition>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &POSITION_ATTRIBS,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadTexCoord>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &TEX_COORD_ATTRIBS,
        },
    ]
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    /// All mip levels, for sampling.
    sample_view: wgpu::TextureView,
    /// Level 0 only, for rendering.
    render_view: wgpu::TextureView,
    desc: TextureDesc,
}

impl GpuTexture {
    fn new(device: &wgpu::Device, desc: TextureDesc, label: &str) -> Self {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        if desc.format == TextureFormat::Rgba8 {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_level_count(),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(desc.format),
            usage,
            view_formats: &[],
        });
        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let render_view = texture.create_view(&wgpu::TextureViewDescriptor {
            base_mip_level: 0,
            mip_level_count: Some(1),
            ..Default::default()
        });
        Self {
            texture,
            sample_view,
            render_view,
            desc,
        }
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.desc.width,
            height: self.desc.height,
            depth_or_array_layers: 1,
        }
    }
}

struct GpuProgram {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    inputs: usize,
}

struct MipBlit {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

pub struct WgpuGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: HashMap<u32, GpuTexture>,
    framebuffers: HashMap<u32, Option<TextureId>>,
    programs: HashMap<u32, GpuProgram>,
    next_texture: u32,
    next_framebuffer: u32,
    next_program: u32,
    position_buffer: wgpu::Buffer,
    tex_coord_buffers: Vec<wgpu::Buffer>,
    sampler: wgpu::Sampler,
    /// Bound to sampler slots that have no texture.
    placeholder: GpuTexture,
    mip_blit: MipBlit,
    display: Option<GpuTexture>,
    clear_color: [f32; 4],
    stats: GpuStats,
}

impl WgpuGpu {
    /// Acquire a headless adapter and device.
    pub fn new_headless() -> anyhow::Result<Self> {
        let (device, queue) = pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| anyhow::anyhow!("No suitable GPU adapter found"))?;
            log::info!("wgpu adapter: {:?}", adapter.get_info().name);
            let device_queue = adapter
                .request_device(&wgpu::DeviceDescriptor::default(), None)
                .await?;
            Ok::<_, anyhow::Error>(device_queue)
        })?;
        Ok(Self::from_device(device, queue))
    }

    /// Wrap an already created device.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let position_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Position Buffer"),
            contents: bytemuck::cast_slice(&quad::QUAD_POSITIONS),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let tex_coord_buffers = RenderOrientation::ALL
            .iter()
            .map(|o| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Quad TexCoord Buffer"),
                    contents: bytemuck::cast_slice(&quad::quad_tex_coords(*o)),
                    usage: wgpu::BufferUsages::VERTEX,
                })
            })
            .collect();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Processor Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let placeholder = GpuTexture::new(&device, TextureDesc::rgba(1, 1), "Placeholder Texture");
        let mip_blit = Self::create_mip_blit(&device);

        Self {
            device,
            queue,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            next_texture: 1,
            next_framebuffer: 1,
            next_program: 1,
            position_buffer,
            tex_coord_buffers,
            sampler,
            placeholder,
            mip_blit,
            display: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            stats: GpuStats::default(),
        }
    }

    fn create_mip_blit(device: &wgpu::Device) -> MipBlit {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mip Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader_mip_blit.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mip Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mip Blit Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mip Blit Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        MipBlit { pipeline, layout }
    }

    fn render_target(&self, target: RenderTarget) -> Option<&GpuTexture> {
        match target {
            RenderTarget::Framebuffer(fb) => match self.framebuffers.get(&fb.0) {
                Some(Some(tex)) => {
                    let texture = self.textures.get(&tex.0);
                    if texture.is_none() {
                        log::error!("framebuffer {}: attached texture {} was deleted", fb.0, tex.0);
                    }
                    texture
                }
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
                if self.display.is_none() {
                    log::error!("display target has no size");
                }
                self.display.as_ref()
            }
        }
    }

    /// Copy mip 0 of `texture` into `out` as RGBA8.
    fn read_back(&self, texture: &GpuTexture, out: &mut [u8]) -> bool {
        let (width, height) = (texture.desc.width, texture.desc.height);
        let swizzle = match texture.desc.format {
            TextureFormat::Rgba8 => false,
            TextureFormat::Bgra8 => true,
            other => {
                log::error!("readback of {:?} textures is not supported", other);
                return false;
            }
        };
        let unpadded_bytes_per_row = width * 4;
        if out.len() < (unpadded_bytes_per_row * height) as usize {
            log::error!("readback buffer holds {} bytes, need {}", out.len(), unpadded_bytes_per_row * height);
            return false;
        }

        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &output_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            texture.extent(),
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("readback mapping failed: {}", e);
                return false;
            }
            Err(e) => {
                log::error!("readback mapping callback dropped: {}", e);
                return false;
            }
        }

        {
            let data = buffer_slice.get_mapped_range();
            for row in 0..height as usize {
                let src = row * padded_bytes_per_row as usize;
                let dst = row * unpadded_bytes_per_row as usize;
                let len = unpadded_bytes_per_row as usize;
                out[dst..dst + len].copy_from_slice(&data[src..src + len]);
            }
        }
        output_buffer.unmap();

        if swizzle {
            for px in out[..(unpadded_bytes_per_row * height) as usize].chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        true
    }
}

impl GpuBackend for WgpuGpu {
    fn name(&self) -> &'static str {
        "wgpu"
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
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > limit || desc.height > limit {
            log::error!("cannot create {}x{} texture (limit {})", desc.width, desc.height, limit);
            return TextureId::INVALID;
        }
        let id = self.next_texture;
        self.next_texture += 1;
        let texture = GpuTexture::new(&self.device, *desc, "Processor Texture");
        self.textures.insert(id, texture);
        self.stats.textures_created += 1;
        TextureId(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id.0) {
            texture.texture.destroy();
            self.stats.textures_deleted += 1;
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(&id.0).map(|t| t.desc)
    }

    fn write_texture(&mut self, id: TextureId, data: &[u8]) -> bool {
        let Some(texture) = self.textures.get(&id.0) else {
            log::error!("write to unknown texture {}", id.0);
            return false;
        };
        let bytes_per_row = texture.desc.width * texture.desc.format.bytes_per_pixel() as u32;
        let expected = (bytes_per_row * texture.desc.height) as usize;
        if data.len() < expected {
            log::error!("texture {}: upload of {} bytes, expected {}", id.0, data.len(), expected);
            return false;
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data[..expected],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(texture.desc.height),
            },
            texture.extent(),
        );
        true
    }

    fn read_texture(&mut self, id: TextureId, out: &mut [u8]) -> bool {
        let Some(texture) = self.textures.get(&id.0) else {
            log::error!("read from unknown texture {}", id.0);
            return false;
        };
        self.read_back(texture, out)
    }

    fn generate_mipmaps(&mut self, id: TextureId) {
        let Some(texture) = self.textures.get(&id.0) else {
            log::error!("mipmap generation for unknown texture {}", id.0);
            return;
        };
        let levels = texture.desc.mip_level_count();
        if levels <= 1 || texture.desc.format != TextureFormat::Rgba8 {
            return;
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mipmap Encoder"),
        });
        let level_view = |level: u32| {
            texture.texture.create_view(&wgpu::TextureViewDescriptor {
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            })
        };
        for level in 1..levels {
            let src = level_view(level - 1);
            let dst = level_view(level);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mip Blit Bind Group"),
                layout: &self.mip_blit.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mip Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.mip_blit.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
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
        if source.inputs.contains(&TextureTarget::External) {
            return Err(format!(
                "{}: external texture sampling is not available on this backend",
                source.label
            ));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(source.source.as_str().into()),
        });

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        for slot in 0..source.inputs.len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: shader::input_binding(slot),
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(source.label.as_str()),
            entries: &entries,
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(source.label.as_str()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(source.label.as_str()),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_main"),
                buffers: &vertex_layouts(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(error.to_string());
        }

        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Processor Uniform Buffer"),
            size: UNIFORM_BUFFER_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let id = self.next_program;
        self.next_program += 1;
        self.programs.insert(
            id,
            GpuProgram {
                pipeline,
                layout,
                uniform_buffer,
                inputs: source.inputs.len(),
            },
        );
        self.stats.programs_compiled += 1;
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, id: ProgramId) {
        self.programs.remove(&id.0);
    }

    fn draw(&mut self, call: &DrawCall) -> bool {
        let submitted = {
            let Some(program) = self.programs.get(&call.program.0) else {
                log::error!("draw with invalid program {}", call.program.0);
                return false;
            };
            let Some(target) = self.render_target(call.target) else {
                return false;
            };
            let viewport = (
                call.viewport.0.min(target.desc.width),
                call.viewport.1.min(target.desc.height),
            );
            if viewport.0 == 0 || viewport.1 == 0 {
                log::error!("draw with empty viewport {:?}", call.viewport);
                return false;
            }

            self.queue
                .write_buffer(&program.uniform_buffer, 0, bytemuck::cast_slice(&call.uniforms));

            let views: Vec<&wgpu::TextureView> = (0..program.inputs)
                .map(|slot| {
                    let id = call.texture_for_slot(slot);
                    match self.textures.get(&id.0) {
                        Some(texture) => &texture.sample_view,
                        None => {
                            log::debug!("input slot {} has no texture bound", slot);
                            &self.placeholder.sample_view
                        }
                    }
                })
                .collect();
            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: program.uniform_buffer.as_entire_binding(),
                },
            ];
            for (slot, view) in views.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: shader::input_binding(slot),
                    resource: wgpu::BindingResource::TextureView(*view),
                });
            }
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Processor Bind Group"),
                layout: &program.layout,
                entries: &entries,
            });

            let [r, g, b, a] = self.clear_color;
            let load = if call.clear {
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                })
            } else {
                wgpu::LoadOp::Load
            };

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Processor Encoder"),
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Processor Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.render_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_viewport(0.0, 0.0, viewport.0 as f32, viewport.1 as f32, 0.0, 1.0);
                pass.set_pipeline(&program.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_vertex_buffer(0, self.position_buffer.slice(..));
                pass.set_vertex_buffer(1, self.tex_coord_buffers[call.orientation.index()].slice(..));
                pass.draw(0..4, 0..1);
            }
            self.queue.submit(Some(encoder.finish()));
            true
        };
        if submitted {
            self.stats.draw_calls += 1;
        }
        submitted
    }

    fn set_display_size(&mut self, width: u32, height: u32) {
        if let Some(display) = &self.display {
            if (display.desc.width, display.desc.height) == (width, height) {
                return;
            }
        }
        self.display = if width > 0 && height > 0 {
            Some(GpuTexture::new(&self.device, TextureDesc::rgba(width, height), "Display Surface"))
        } else {
            None
        };
    }

    fn display_size(&self) -> (u32, u32) {
        self.display
            .as_ref()
            .map(|d| (d.desc.width, d.desc.height))
            .unwrap_or((0, 0))
    }

    fn read_display(&mut self, out: &mut [u8]) -> bool {
        match &self.display {
            Some(display) => self.read_back(display, out),
            None => {
                log::error!("display target has no size");
                false
            }
        }
    }

    fn finish(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
        self.stats.drains += 1;
    }

    fn stats(&self) -> GpuStats {
        GpuStats {
            live_textures: self.textures.len(),
            ..self.stats
        }
    }
}

//! End-to-end pipeline behaviour on the software backend.

use shaderchain::config::PipelineConfig;
use shaderchain::gpu::quad::RenderOrientation;
use shaderchain::gpu::types::{PixelFormat, TextureDesc, TextureId, TextureTarget, TextureUnit};
use shaderchain::gpu::GpuContext;
use shaderchain::proc::blend::{blend, diff};
use shaderchain::proc::grayscale::grayscale;
use shaderchain::proc::noop::noop;
use shaderchain::proc::threshold::{adaptive_threshold, DEFAULT_ADAPTIVE_OFFSET, UNIFORM_FIELD_BINARY_VALUE};
use shaderchain::proc::yuv::yuv2rgb;
use shaderchain::proc::{FifoProc, InputTexture, IirProc, OutputSize, Processor};
use shaderchain::{Pipeline, ProcGraph};

fn pattern(w: u32, h: u32) -> Vec<u8> {
    (0..w * h)
        .flat_map(|i| {
            let (x, y) = (i % w, i / w);
            [(x * 37 % 256) as u8, (y * 53 % 256) as u8, ((x + y) * 11 % 256) as u8, 255]
        })
        .collect()
}

fn solid(w: u32, h: u32, value: u8) -> Vec<u8> {
    [value, value, value, 255].repeat((w * h) as usize)
}

fn solid_texture(gpu: &GpuContext, w: u32, h: u32, value: u8) -> TextureId {
    let mut backend = gpu.backend();
    let id = backend.create_texture(&TextureDesc::rgba(w, h));
    backend.write_texture(id, &solid(w, h, value));
    id
}

fn output_ids(pipeline: &Pipeline) -> Vec<TextureId> {
    (0..pipeline.len())
        .map(|i| pipeline.processor(i).expect("in range").output_texture())
        .collect()
}

#[test]
fn test_prepare_twice_keeps_textures() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(noop(&gpu));
    pipeline.add_processor(grayscale(&gpu));
    pipeline.init();
    pipeline.prepare(64, 48, PixelFormat::Rgba);
    let ids = output_ids(&pipeline);
    let created = gpu.stats().textures_created;

    pipeline.prepare(64, 48, PixelFormat::Rgba);
    assert_eq!(output_ids(&pipeline), ids);
    assert_eq!(gpu.stats().textures_created, created);
}

#[test]
fn test_size_propagation_and_reallocation() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(noop(&gpu).with_output_size(OutputSize::Scale(0.5)));
    pipeline.add_processor(noop(&gpu).with_output_size(OutputSize::Scale(2.0)));
    pipeline.init();
    pipeline.prepare(100, 100, PixelFormat::Rgba);
    assert_eq!(pipeline.processor(0).expect("a").out_frame_size(), (50, 50));
    assert_eq!(pipeline.processor(1).expect("b").out_frame_size(), (100, 100));
    let old = output_ids(&pipeline);

    pipeline.prepare(200, 200, PixelFormat::Rgba);
    assert_eq!(pipeline.processor(0).expect("a").out_frame_size(), (100, 100));
    assert_eq!(pipeline.processor(1).expect("b").out_frame_size(), (200, 200));
    let new = output_ids(&pipeline);
    for id in &old {
        assert!(!new.contains(id));
        assert!(gpu.backend().texture_desc(*id).is_none(), "texture {} leaked", id.0);
    }
}

#[test]
fn test_double_flip_round_trip() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(noop(&gpu).with_orientation(RenderOrientation::Flipped));
    pipeline.add_processor(noop(&gpu).with_orientation(RenderOrientation::Flipped));
    pipeline.init();
    pipeline.prepare(7, 5, PixelFormat::Rgba);

    let pixels = pattern(7, 5);
    pipeline.set_input_data(&pixels);
    assert!(pipeline.process());
    let mut out = vec![0u8; pixels.len()];
    pipeline.output_data(&mut out);
    assert_eq!(out, pixels);
}

#[test]
fn test_single_flip_mirrors_rows() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(noop(&gpu).with_orientation(RenderOrientation::Flipped));
    pipeline.init();
    pipeline.prepare(3, 2, PixelFormat::Rgba);

    let pixels = pattern(3, 2);
    pipeline.set_input_data(&pixels);
    pipeline.process();
    let mut out = vec![0u8; pixels.len()];
    pipeline.output_data(&mut out);
    assert_eq!(&out[..12], &pixels[12..]);
    assert_eq!(&out[12..], &pixels[..12]);
}

#[test]
fn test_fifo_warm_up_sequence() {
    let gpu = GpuContext::software();
    let frames: Vec<TextureId> = (0..6).map(|i| solid_texture(&gpu, 2, 2, i * 10)).collect();
    let depth = 3;
    let mut fifo = FifoProc::new(&gpu, depth);
    fifo.init(2, 2, 0, false);
    fifo.create_fbo_tex(false);

    let mut seen = Vec::new();
    for frame in &frames {
        fifo.use_texture(InputTexture::texture_2d(*frame, TextureUnit(0)), 0);
        assert!(fifo.render(0));
        let mut buf = [0u8; 16];
        fifo.result_data(&mut buf);
        seen.push(buf[0] / 10);
    }
    assert_eq!(seen, vec![0, 0, 0, 1, 2, 3]);
}

#[test]
fn test_iir_cold_start_in_pipeline() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(IirProc::low_pass(&gpu, 1.0));
    pipeline.init();
    pipeline.prepare(4, 4, PixelFormat::Rgba);

    let frame = solid(4, 4, 77);
    pipeline.set_input_data(&frame);
    assert!(pipeline.process());
    let mut out = vec![0u8; frame.len()];
    pipeline.output_data(&mut out);
    assert_eq!(out, frame);
}

#[test]
fn test_two_input_draws_once() {
    let gpu = GpuContext::software();
    let (a, b) = (solid_texture(&gpu, 2, 2, 10), solid_texture(&gpu, 2, 2, 30));
    let mut proc = blend(&gpu, 0.5);
    proc.init(2, 2, 0, false);
    proc.create_fbo_tex(false);
    let before = gpu.stats().draw_calls;

    proc.use_texture(InputTexture::texture_2d(a, TextureUnit(0)), 0);
    proc.use_texture2(b, TextureTarget::Texture2D);
    proc.use_texture(InputTexture::texture_2d(a, TextureUnit(0)), 0);
    proc.use_texture2(b, TextureTarget::Texture2D);
    assert!(proc.render(1));
    assert!(!proc.render(1));
    assert_eq!(gpu.stats().draw_calls - before, 1);
}

#[test]
fn test_pot_rounding_reported_size() {
    let gpu = GpuContext::software();
    let mut proc = noop(&gpu);
    proc.init(100, 60, 0, false);
    proc.create_fbo_tex(true);
    assert_eq!(proc.out_frame_size(), (128, 64));
    let desc = gpu.backend().texture_desc(proc.output_texture()).expect("allocated");
    assert_eq!((desc.width, desc.height), (128, 64));
}

#[test]
fn test_grayscale_adaptive_threshold_uniform_field() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(grayscale(&gpu));
    pipeline.add_processor(adaptive_threshold(&gpu, DEFAULT_ADAPTIVE_OFFSET));
    pipeline.init();
    pipeline.prepare(64, 64, PixelFormat::Rgba);
    assert_eq!(pipeline.output_frame_size(), (64, 64));

    pipeline.set_input_data(&solid(64, 64, 128));
    assert!(pipeline.process());
    let mut out = vec![0u8; 64 * 64 * 4];
    pipeline.output_data(&mut out);
    for px in out.chunks_exact(4) {
        assert_eq!(&px[..3], &[UNIFORM_FIELD_BINARY_VALUE; 3]);
    }
}

#[test]
fn test_display_receives_last_stage() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(noop(&gpu));
    pipeline.create_display(8, 6);
    pipeline.init();
    pipeline.prepare(4, 4, PixelFormat::Rgba);

    pipeline.set_input_data(&solid(4, 4, 200));
    assert!(pipeline.process());
    assert_eq!(gpu.backend().display_size(), (8, 6));
    let mut screen = vec![0u8; 8 * 6 * 4];
    assert!(pipeline.display_data(&mut screen));
    assert_eq!(screen, solid(8, 6, 200));
}

#[test]
fn test_nv12_through_yuv2rgb() {
    let gpu = GpuContext::software();
    let mut pipeline = Pipeline::new(&gpu);
    pipeline.add_processor(yuv2rgb(&gpu));
    pipeline.init();
    pipeline.prepare(4, 4, PixelFormat::Nv12);
    assert!(pipeline.input_textures().chroma.is_valid());

    // Mid luma with neutral chroma is mid gray.
    let nv12 = vec![128u8; PixelFormat::Nv12.buffer_len(4, 4)];
    pipeline.set_input_data(&nv12);
    assert!(pipeline.process());
    let mut out = vec![0u8; 4 * 4 * 4];
    pipeline.output_data(&mut out);
    for px in out.chunks_exact(4) {
        for &c in &px[..3] {
            assert!((127..=129).contains(&c), "channel {}", c);
        }
        assert_eq!(px[3], 255);
    }
}

#[test]
fn test_graph_diamond_draws_each_node_once() {
    let gpu = GpuContext::software();
    let mut graph = ProcGraph::new(&gpu);
    let root = graph.add_node(noop(&gpu));
    let gray = graph.add_node(grayscale(&gpu));
    let delta = graph.add_node(diff(&gpu, 1.0));
    graph.subscribe(root, gray, 0);
    graph.subscribe(gray, delta, 1);
    graph.subscribe(root, delta, 0);
    graph.prepare(4, 4, PixelFormat::Rgba);

    graph.set_input_data(&solid(4, 4, 100));
    let before = gpu.stats().draw_calls;
    graph.process();
    assert_eq!(gpu.stats().draw_calls - before, 3);

    let mut out = vec![0u8; 4 * 4 * 4];
    graph.output_data(&mut out);
    for px in out.chunks_exact(4) {
        assert!(px[..3].iter().all(|&c| c <= 1));
    }

    let mut gray_out = vec![0u8; 4 * 4 * 4];
    graph.node_data(gray, &mut gray_out);
    assert!((99..=100).contains(&gray_out[0]));
}

#[test]
fn test_config_pipeline_end_to_end() {
    let gpu = GpuContext::software();
    let config = PipelineConfig::from_json(
        r#"{
            "mipmaps": false,
            "stages": [
                { "type": "grayscale" },
                { "type": "noop", "scale": 0.5 },
                { "type": "threshold", "value": 0.5 }
            ]
        }"#,
    )
    .expect("valid config");
    let mut pipeline = config.build(&gpu).expect("builds");
    pipeline.init();
    pipeline.prepare(8, 8, PixelFormat::Rgba);
    assert_eq!(pipeline.output_frame_size(), (4, 4));

    pipeline.set_input_data(&solid(8, 8, 220));
    assert!(pipeline.process());
    let mut out = vec![0u8; 4 * 4 * 4];
    pipeline.output_data(&mut out);
    assert!(out.chunks_exact(4).all(|px| px[0] == 255));
}

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{PipelineConfig, STAGE_TYPES};
use crate::gpu::context::GpuContext;
use crate::gpu::types::{chroma_size, PixelFormat};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// CPU reference rasterizer
    Software,
    /// Headless wgpu device
    Wgpu,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an image through a configured pipeline
    Run {
        /// Pipeline description (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Input image
        #[arg(long)]
        input: PathBuf,

        /// Output PNG
        #[arg(long)]
        output: PathBuf,

        /// Number of frames to process (temporal stages see every one)
        #[arg(long, default_value_t = 1)]
        frames: u32,

        #[arg(long, value_enum, default_value_t = Backend::Software)]
        backend: Backend,
    },
    /// List the stage types a config may use
    Stages,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            frames,
            backend,
        } => run_pipeline(config, input, output, frames, backend),
        Commands::Stages => {
            for (name, about) in STAGE_TYPES {
                println!("{:<20} {}", name, about);
            }
            Ok(())
        }
    }
}

fn run_pipeline(config_path: PathBuf, input: PathBuf, output: PathBuf, frames: u32, backend: Backend) -> Result<()> {
    if frames == 0 {
        return Err(anyhow!("--frames must be at least 1"));
    }
    let config = PipelineConfig::load(&config_path)?;
    let image = image::open(&input)
        .with_context(|| format!("failed to load {}", input.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();

    let gpu = match backend {
        Backend::Software => GpuContext::software(),
        Backend::Wgpu => GpuContext::wgpu()?,
    };
    let format = config.input_format.unwrap_or_default();
    let pixels = match format {
        PixelFormat::Rgba => image.into_raw(),
        PixelFormat::Bgra => {
            let mut raw = image.into_raw();
            for px in raw.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            raw
        }
        PixelFormat::Nv12 => rgba_to_nv12(image.as_raw(), width, height),
    };

    let mut pipeline = config.build(&gpu)?;
    pipeline.init();
    pipeline.prepare(width, height, format);
    log::info!(
        "running {} frame(s) of {}x{} through {} stage(s)",
        frames,
        width,
        height,
        pipeline.len()
    );
    for frame in 0..frames {
        pipeline.set_input_data(&pixels);
        if !pipeline.process() {
            log::warn!("frame {}: not every stage drew", frame);
        }
    }

    let (out_w, out_h) = pipeline.output_frame_size();
    let mut buf = vec![0u8; out_w as usize * out_h as usize * 4];
    pipeline.output_data(&mut buf);
    pipeline.cleanup();

    let result = image::RgbaImage::from_raw(out_w, out_h, buf)
        .ok_or_else(|| anyhow!("output buffer does not match {}x{}", out_w, out_h))?;
    result
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {}x{} image to {}", out_w, out_h, output.display());
    Ok(())
}

/// BT.601 full-range RGBA to NV12 (luma plane, then interleaved CbCr at
/// half resolution).
fn rgba_to_nv12(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = chroma_size(width, height);
    let mut out = Vec::with_capacity(PixelFormat::Nv12.buffer_len(width, height));
    let rgb = |x: usize, y: usize| {
        let i = (y * w + x) * 4;
        (rgba[i] as f32, rgba[i + 1] as f32, rgba[i + 2] as f32)
    };
    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = rgb(x, y);
            out.push((0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8);
        }
    }
    for cy in 0..ch as usize {
        for cx in 0..cw as usize {
            let (r, g, b) = rgb((cx * 2).min(w - 1), (cy * 2).min(h - 1));
            let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
            let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
            out.push(cb.round().clamp(0.0, 255.0) as u8);
            out.push(cr.round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_layout() {
        let rgba = [255u8, 255, 255, 255].repeat(4 * 2);
        let nv12 = rgba_to_nv12(&rgba, 4, 2);
        assert_eq!(nv12.len(), PixelFormat::Nv12.buffer_len(4, 2));
        assert!(nv12[..8].iter().all(|&y| y == 255));
        assert!(nv12[8..].iter().all(|&c| c == 128));
    }
}

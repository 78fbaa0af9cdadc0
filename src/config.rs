//! JSON pipeline descriptions.
//!
//! ```json
//! {
//!   "mipmaps": true,
//!   "stages": [
//!     { "type": "grayscale", "scale": 0.5, "orientation": "flipped" },
//!     { "type": "adaptive_threshold", "offset": 0.02 }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::gpu::context::GpuContext;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::types::PixelFormat;
use crate::pipeline::Pipeline;
use crate::proc::blur::{box_blur, gauss_blur};
use crate::proc::grayscale::{GrayscaleKernel, DEFAULT_WEIGHTS};
use crate::proc::iir::DEFAULT_FIFO_DEPTH;
use crate::proc::noop::noop;
use crate::proc::threshold::{adaptive_threshold, threshold, DEFAULT_ADAPTIVE_OFFSET, DEFAULT_THRESHOLD};
use crate::proc::yuv::yuv2rgb;
use crate::proc::{FifoProc, FilterProc, IirMode, IirProc, OutputSize, Processor};

fn default_true() -> bool {
    true
}

fn default_weights() -> [f32; 3] {
    DEFAULT_WEIGHTS
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_offset() -> f32 {
    DEFAULT_ADAPTIVE_OFFSET
}

fn default_alpha() -> f32 {
    0.5
}

fn default_strength() -> f32 {
    1.0
}

fn default_depth() -> usize {
    DEFAULT_FIFO_DEPTH
}

/// Names accepted in a stage's `type` field.
pub const STAGE_TYPES: [(&str, &str); 10] = [
    ("noop", "passthrough, or a downscaler with `scale`/`size`"),
    ("grayscale", "weighted luminance, `weights` = [r, g, b]"),
    ("threshold", "binarize against `value`"),
    ("adaptive_threshold", "binarize against the local mean minus `offset` (2 passes)"),
    ("gauss_blur", "separable 9-tap gaussian (2 passes)"),
    ("box_blur", "separable 9-tap box filter (2 passes)"),
    ("low_pass", "temporal IIR low pass, `alpha`, `depth`"),
    ("high_pass", "temporal IIR high pass, `alpha`, `depth`, `strength`"),
    ("fifo", "delay line of `depth` frames"),
    ("yuv2rgb", "NV12 luma + chroma planes to RGB; must come first"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageKind {
    Noop,
    Grayscale {
        #[serde(default = "default_weights")]
        weights: [f32; 3],
    },
    Threshold {
        #[serde(default = "default_threshold")]
        value: f32,
    },
    AdaptiveThreshold {
        #[serde(default = "default_offset")]
        offset: f32,
    },
    GaussBlur,
    BoxBlur,
    LowPass {
        #[serde(default = "default_alpha")]
        alpha: f32,
        #[serde(default = "default_depth")]
        depth: usize,
    },
    HighPass {
        #[serde(default = "default_alpha")]
        alpha: f32,
        #[serde(default = "default_depth")]
        depth: usize,
        #[serde(default = "default_strength")]
        strength: f32,
    },
    Fifo {
        #[serde(default = "default_depth")]
        depth: usize,
    },
    Yuv2rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(flatten)]
    pub kind: StageKind,
    /// Output size relative to the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
    /// Absolute output size `[width, height]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<RenderOrientation>,
}

impl StageConfig {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            scale: None,
            size: None,
            orientation: None,
        }
    }

    fn output_size(&self) -> Option<OutputSize> {
        match (self.scale, self.size) {
            (Some(scale), _) => Some(OutputSize::Scale(scale)),
            (None, Some([width, height])) => Some(OutputSize::Absolute { width, height }),
            (None, None) => None,
        }
    }

    fn validate(&self, index: usize) -> Result<(), String> {
        if self.scale.is_some() && self.size.is_some() {
            return Err(format!("stage {}: `scale` and `size` are mutually exclusive", index));
        }
        if let Some(scale) = self.scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(format!("stage {}: scale must be positive, got {}", index, scale));
            }
        }
        if let Some([w, h]) = self.size {
            if w == 0 || h == 0 {
                return Err(format!("stage {}: size must be positive, got {}x{}", index, w, h));
            }
        }
        if self.orientation.is_some() {
            let fixed = match self.kind {
                StageKind::AdaptiveThreshold { .. } | StageKind::GaussBlur | StageKind::BoxBlur => {
                    Some("its passes render transposed")
                }
                StageKind::LowPass { .. } | StageKind::HighPass { .. } => Some("it feeds its output back"),
                _ => None,
            };
            if let Some(reason) = fixed {
                return Err(format!("stage {}: orientation is not supported because {}", index, reason));
            }
        }
        match self.kind {
            StageKind::Threshold { value } if !(0.0..=1.0).contains(&value) => {
                Err(format!("stage {}: threshold {} outside [0, 1]", index, value))
            }
            StageKind::AdaptiveThreshold { offset } if !(offset.is_finite() && offset >= 0.0) => {
                Err(format!("stage {}: adaptive offset must be non-negative, got {}", index, offset))
            }
            StageKind::LowPass { alpha, .. } | StageKind::HighPass { alpha, .. } if !(0.0..=1.0).contains(&alpha) => {
                Err(format!("stage {}: alpha {} outside [0, 1]", index, alpha))
            }
            StageKind::LowPass { depth, .. } | StageKind::HighPass { depth, .. } | StageKind::Fifo { depth }
                if depth < 2 =>
            {
                Err(format!("stage {}: FIFO depth must be at least 2, got {}", index, depth))
            }
            StageKind::Yuv2rgb if index != 0 => Err(format!("stage {}: yuv2rgb must be the first stage", index)),
            _ => Ok(()),
        }
    }

    /// Instantiate the processor this stage describes.
    pub fn build(&self, gpu: &GpuContext) -> Box<dyn Processor> {
        let mut proc: Box<dyn Processor> = match self.kind {
            StageKind::Noop => Box::new(noop(gpu)),
            StageKind::Grayscale { weights } => Box::new(FilterProc::new(gpu, GrayscaleKernel::with_weights(weights))),
            StageKind::Threshold { value } => Box::new(threshold(gpu, value)),
            StageKind::AdaptiveThreshold { offset } => Box::new(adaptive_threshold(gpu, offset)),
            StageKind::GaussBlur => Box::new(gauss_blur(gpu)),
            StageKind::BoxBlur => Box::new(box_blur(gpu)),
            StageKind::LowPass { alpha, depth } => Box::new(IirProc::new(gpu, IirMode::LowPass, alpha, depth)),
            StageKind::HighPass { alpha, depth, strength } => {
                let mut iir = IirProc::new(gpu, IirMode::HighPass, alpha, depth);
                iir.set_strength(strength);
                Box::new(iir)
            }
            StageKind::Fifo { depth } => Box::new(FifoProc::new(gpu, depth)),
            StageKind::Yuv2rgb => Box::new(yuv2rgb(gpu)),
        };
        if let Some(size) = self.output_size() {
            proc.set_output_size(size);
        }
        if let Some(orientation) = self.orientation {
            proc.set_render_orientation(orientation);
        }
        proc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub mipmaps: bool,
    #[serde(default)]
    pub platform_optimizations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayConfig>,
    /// Host format the pipeline will be prepared with, when known up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_format: Option<PixelFormat>,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json).context("invalid pipeline config")?;
        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("a pipeline needs at least one stage".to_string());
        }
        for (i, stage) in self.stages.iter().enumerate() {
            stage.validate(i)?;
        }
        if let Some(display) = self.display {
            if display.width == 0 || display.height == 0 {
                return Err(format!("display size must be positive, got {}x{}", display.width, display.height));
            }
        }
        if self.input_format == Some(PixelFormat::Nv12) && self.stages[0].kind != StageKind::Yuv2rgb {
            return Err("NV12 input requires yuv2rgb as the first stage".to_string());
        }
        Ok(())
    }

    /// Build an uninitialized pipeline with every stage added.
    pub fn build(&self, gpu: &GpuContext) -> Result<Pipeline> {
        self.validate().map_err(|e| anyhow!(e))?;
        let mut pipeline = Pipeline::new(gpu);
        pipeline.set_use_mipmaps(self.mipmaps);
        if self.platform_optimizations {
            pipeline.try_enable_platform_optimizations();
        }
        for stage in &self.stages {
            pipeline.add_boxed(stage.build(gpu));
        }
        if let Some(display) = self.display {
            pipeline.create_display(display.width, display.height);
        }
        log::debug!("built pipeline with {} stages", self.stages.len());
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "stages": [
                { "type": "grayscale", "scale": 0.5, "orientation": "flipped" },
                { "type": "low_pass" }
            ] }"#,
        )
        .expect("valid");
        assert!(config.mipmaps);
        assert!(!config.platform_optimizations);
        assert_eq!(
            config.stages[0].kind,
            StageKind::Grayscale {
                weights: DEFAULT_WEIGHTS
            }
        );
        assert_eq!(config.stages[0].scale, Some(0.5));
        assert_eq!(config.stages[0].orientation, Some(RenderOrientation::Flipped));
        assert_eq!(
            config.stages[1].kind,
            StageKind::LowPass {
                alpha: 0.5,
                depth: DEFAULT_FIFO_DEPTH
            }
        );
    }

    #[test]
    fn test_unknown_stage_type_fails() {
        assert!(PipelineConfig::from_json(r#"{ "stages": [{ "type": "sharpen" }] }"#).is_err());
    }

    #[test]
    fn test_validation_reasons() {
        let mut config = PipelineConfig {
            mipmaps: true,
            platform_optimizations: false,
            display: None,
            input_format: None,
            stages: vec![StageConfig::new(StageKind::Fifo { depth: 1 })],
        };
        assert!(config.validate().unwrap_err().contains("at least 2"));

        config.stages = vec![StageConfig::new(StageKind::LowPass { alpha: 1.5, depth: 2 })];
        assert!(config.validate().unwrap_err().contains("alpha"));

        let mut scaled = StageConfig::new(StageKind::Noop);
        scaled.scale = Some(0.0);
        config.stages = vec![scaled];
        assert!(config.validate().unwrap_err().contains("scale must be positive"));

        config.stages = vec![StageConfig::new(StageKind::Noop)];
        config.input_format = Some(PixelFormat::Nv12);
        assert!(config.validate().unwrap_err().contains("yuv2rgb"));

        config.stages = vec![StageConfig::new(StageKind::Yuv2rgb), StageConfig::new(StageKind::Noop)];
        assert_eq!(config.validate(), Ok(()));

        config.stages.swap(0, 1);
        config.input_format = None;
        assert!(config.validate().unwrap_err().contains("first stage"));
    }

    #[test]
    fn test_orientation_rejected_on_composite_stages() {
        for kind in ["gauss_blur", "box_blur", "adaptive_threshold", "low_pass", "high_pass"] {
            let json = format!(r#"{{ "stages": [{{ "type": "{}", "orientation": "flipped" }}] }}"#, kind);
            let err = PipelineConfig::from_json(&json).expect_err(kind);
            assert!(format!("{:#}", err).contains("orientation"), "{}", kind);
        }
        let ok = r#"{ "stages": [{ "type": "fifo", "orientation": "mirrored" }] }"#;
        assert!(PipelineConfig::from_json(ok).is_ok());
    }

    #[test]
    fn test_output_size_on_temporal_stages() {
        for kind in ["low_pass", "high_pass", "fifo", "gauss_blur"] {
            let gpu = GpuContext::software();
            let json = format!(r#"{{ "mipmaps": false, "stages": [{{ "type": "{}", "scale": 0.5 }}] }}"#, kind);
            let mut pipeline = PipelineConfig::from_json(&json).expect("valid").build(&gpu).expect("builds");
            pipeline.init();
            pipeline.prepare(8, 8, PixelFormat::Rgba);
            assert_eq!(pipeline.output_frame_size(), (4, 4), "{}", kind);
        }
    }

    #[test]
    fn test_build_applies_output_size() {
        let gpu = GpuContext::software();
        let config =
            PipelineConfig::from_json(r#"{ "mipmaps": false, "stages": [{ "type": "noop", "size": [10, 6] }] }"#)
                .expect("valid");
        let mut pipeline = config.build(&gpu).expect("builds");
        pipeline.init();
        pipeline.prepare(40, 40, PixelFormat::Rgba);
        assert_eq!(pipeline.output_frame_size(), (10, 6));
    }
}

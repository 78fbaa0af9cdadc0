//! Shader programs.
//!
//! A processor supplies a [`FragmentShader`]: a WGSL fragment body plus a CPU
//! twin used by the software backend. [`Shader::build`] assembles the full
//! module (shared quad vertex stage, generated input bindings, body), compiles
//! it on the current backend and reflects attribute and uniform locations by
//! name.
//!
//! Input slots whose target is [`TextureTarget::External`] get a separate
//! source variant: the binding becomes `texture_external` and sampling goes
//! through `textureSampleBaseClampToEdge`.

use std::collections::HashMap;
use std::sync::OnceLock;

use glam::{Vec2, Vec4};
use regex::Regex;

use crate::gpu::context::GpuContext;
use crate::gpu::types::{ProgramId, TextureTarget, MAX_INPUT_SLOTS, MAX_UNIFORM_SLOTS};

pub const QUAD_VERTEX_WGSL: &str = include_str!("shader_quad_vertex.wgsl");

/// CPU evaluation of a fragment program.
pub type CpuFragment = fn(&Fragment<'_>) -> Vec4;

/// A leaf shader body.
#[derive(Clone, Copy)]
pub struct FragmentShader {
    pub label: &'static str,
    /// Declares `struct Uniforms` and `fs_main`. May call `sample_input`,
    /// `sample_input2` and `sample_input3` and read `u.<field>`.
    pub wgsl: &'static str,
    pub eval: CpuFragment,
}

impl std::fmt::Debug for FragmentShader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentShader").field("label", &self.label).finish()
    }
}

/// Anything a CPU fragment can sample from.
pub trait TexelSource {
    fn sample(&self, slot: usize, uv: Vec2) -> Vec4;
}

/// Per-pixel inputs handed to a [`CpuFragment`].
pub struct Fragment<'a> {
    uv: Vec2,
    texels: &'a dyn TexelSource,
    uniforms: &'a [[f32; 4]; MAX_UNIFORM_SLOTS],
    locations: &'a HashMap<String, usize>,
}

impl<'a> Fragment<'a> {
    pub fn new(
        uv: Vec2,
        texels: &'a dyn TexelSource,
        uniforms: &'a [[f32; 4]; MAX_UNIFORM_SLOTS],
        locations: &'a HashMap<String, usize>,
    ) -> Self {
        Self {
            uv,
            texels,
            uniforms,
            locations,
        }
    }

    /// Interpolated texture coordinate.
    pub fn uv(&self) -> Vec2 {
        self.uv
    }

    pub fn sample(&self, slot: usize, uv: Vec2) -> Vec4 {
        self.texels.sample(slot, uv)
    }

    /// Input `slot` at this fragment's own coordinate.
    pub fn input(&self, slot: usize) -> Vec4 {
        self.texels.sample(slot, self.uv)
    }

    /// Uniform field by name; zero when the program does not declare it.
    pub fn uniform(&self, name: &str) -> Vec4 {
        self.locations
            .get(name)
            .map(|&loc| Vec4::from_array(self.uniforms[loc]))
            .unwrap_or(Vec4::ZERO)
    }
}

/// Everything a backend needs to compile a program.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub label: String,
    pub source: String,
    pub inputs: Vec<TextureTarget>,
    pub uniforms: HashMap<String, usize>,
    pub eval: CpuFragment,
}

fn uniform_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"struct\s+Uniforms\s*\{([^}]*)\}").expect("valid regex"))
}

fn vertex_input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"struct\s+VertexInput\s*\{([^}]*)\}").expect("valid regex"))
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+)\s*:\s*vec4<f32>").expect("valid regex"))
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@location\((\d+)\)\s*(\w+)\s*:").expect("valid regex"))
}

/// Uniform locations: the n-th `vec4<f32>` field of `struct Uniforms` is
/// location n.
pub fn reflect_uniforms(source: &str) -> HashMap<String, usize> {
    let mut locations = HashMap::new();
    if let Some(block) = uniform_block_regex().captures(source) {
        for (index, field) in field_regex().captures_iter(&block[1]).enumerate() {
            locations.insert(field[1].to_string(), index);
        }
    }
    locations
}

/// Vertex attribute locations declared in `struct VertexInput`.
pub fn reflect_attributes(source: &str) -> HashMap<String, u32> {
    let mut locations = HashMap::new();
    if let Some(block) = vertex_input_regex().captures(source) {
        for attr in attribute_regex().captures_iter(&block[1]) {
            if let Ok(loc) = attr[1].parse::<u32>() {
                locations.insert(attr[2].to_string(), loc);
            }
        }
    }
    locations
}

fn input_names(slot: usize) -> (String, String) {
    if slot == 0 {
        ("input_tex".to_string(), "sample_input".to_string())
    } else {
        (format!("input_tex{}", slot + 1), format!("sample_input{}", slot + 1))
    }
}

/// Binding slot of input texture `slot` (sampler is 0, uniforms 1).
pub fn input_binding(slot: usize) -> u32 {
    2 + slot as u32
}

/// Full WGSL module for `fragment` with one binding per entry in `inputs`.
pub fn assemble_source(fragment: &FragmentShader, inputs: &[TextureTarget]) -> String {
    let mut src = String::with_capacity(QUAD_VERTEX_WGSL.len() + fragment.wgsl.len() + 1024);
    src.push_str(QUAD_VERTEX_WGSL);
    src.push_str("\n@group(0) @binding(0) var input_sampler: sampler;\n");
    src.push_str("@group(0) @binding(1) var<uniform> u: Uniforms;\n");
    for (slot, target) in inputs.iter().enumerate() {
        let (tex, func) = input_names(slot);
        let binding = input_binding(slot);
        match target {
            TextureTarget::Texture2D => {
                src.push_str(&format!(
                    "@group(0) @binding({binding}) var {tex}: texture_2d<f32>;\n\
                     fn {func}(uv: vec2<f32>) -> vec4<f32> {{ return textureSample({tex}, input_sampler, uv); }}\n"
                ));
            }
            TextureTarget::External => {
                src.push_str(&format!(
                    "@group(0) @binding({binding}) var {tex}: texture_external;\n\
                     fn {func}(uv: vec2<f32>) -> vec4<f32> {{ return textureSampleBaseClampToEdge({tex}, input_sampler, uv); }}\n"
                ));
            }
        }
    }
    src.push('\n');
    src.push_str(fragment.wgsl);
    src
}

/// A compiled program plus its reflected locations.
pub struct Shader {
    gpu: GpuContext,
    program: ProgramId,
    label: &'static str,
    inputs: Vec<TextureTarget>,
    attributes: HashMap<String, u32>,
    uniforms: HashMap<String, usize>,
}

impl Shader {
    /// Compile `fragment` for the given input targets. Returns `None` (after
    /// logging the compile log) on failure.
    pub fn build(gpu: &GpuContext, fragment: &FragmentShader, inputs: &[TextureTarget]) -> Option<Shader> {
        assert!(
            !inputs.is_empty() && inputs.len() <= MAX_INPUT_SLOTS,
            "shader '{}' must have 1..={} inputs",
            fragment.label,
            MAX_INPUT_SLOTS
        );
        let source = assemble_source(fragment, inputs);
        let uniforms = reflect_uniforms(&source);
        let attributes = reflect_attributes(&source);
        if uniforms.len() > MAX_UNIFORM_SLOTS {
            log::error!(
                "shader '{}' declares {} uniforms (max {})",
                fragment.label,
                uniforms.len(),
                MAX_UNIFORM_SLOTS
            );
            return None;
        }

        let program_source = ProgramSource {
            label: fragment.label.to_string(),
            source,
            inputs: inputs.to_vec(),
            uniforms: uniforms.clone(),
            eval: fragment.eval,
        };
        let result = gpu.backend().compile_program(&program_source);
        match result {
            Ok(program) => {
                log::debug!(
                    "compiled shader '{}' ({:?}) -> program {}",
                    fragment.label,
                    inputs,
                    program.0
                );
                Some(Shader {
                    gpu: gpu.clone(),
                    program,
                    label: fragment.label,
                    inputs: inputs.to_vec(),
                    attributes,
                    uniforms,
                })
            }
            Err(log) => {
                log::error!("shader '{}' failed to compile: {}", fragment.label, log);
                None
            }
        }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn inputs(&self) -> &[TextureTarget] {
        &self.inputs
    }

    pub fn attribute_location(&self, name: &str) -> Option<u32> {
        self.attributes.get(name).copied()
    }

    pub fn uniform_location(&self, name: &str) -> Option<usize> {
        self.uniforms.get(name).copied()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.gpu.backend().delete_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "
struct Uniforms {
    weights: vec4<f32>,
    params: vec4<f32>,
};

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return sample_input(in.tex_coord) * u.weights + sample_input2(in.tex_coord) * u.params.x;
}
";

    fn mix_eval(f: &Fragment<'_>) -> Vec4 {
        f.input(0) * f.uniform("weights") + f.input(1) * f.uniform("params").x
    }

    const MIX: FragmentShader = FragmentShader {
        label: "mix",
        wgsl: BODY,
        eval: mix_eval,
    };

    #[test]
    fn test_reflects_uniforms_in_declaration_order() {
        let src = assemble_source(&MIX, &[TextureTarget::Texture2D, TextureTarget::Texture2D]);
        let uniforms = reflect_uniforms(&src);
        assert_eq!(uniforms.get("weights"), Some(&0));
        assert_eq!(uniforms.get("params"), Some(&1));
        assert_eq!(uniforms.len(), 2);
    }

    #[test]
    fn test_reflects_vertex_attributes() {
        let attrs = reflect_attributes(QUAD_VERTEX_WGSL);
        assert_eq!(attrs.get("position"), Some(&0));
        assert_eq!(attrs.get("tex_coord"), Some(&1));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_external_variant_substitutes_sampler_type() {
        let plain = assemble_source(&MIX, &[TextureTarget::Texture2D, TextureTarget::Texture2D]);
        assert!(!plain.contains("texture_external"));

        let ext = assemble_source(&MIX, &[TextureTarget::External, TextureTarget::Texture2D]);
        assert!(ext.contains("var input_tex: texture_external;"));
        assert!(ext.contains("textureSampleBaseClampToEdge(input_tex,"));
        assert!(ext.contains("var input_tex2: texture_2d<f32>;"));
    }

    #[test]
    fn test_build_on_software_backend() {
        let gpu = GpuContext::software();
        let shader = Shader::build(&gpu, &MIX, &[TextureTarget::Texture2D, TextureTarget::Texture2D])
            .expect("compiles");
        assert!(shader.program().is_valid());
        assert_eq!(shader.uniform_location("params"), Some(1));
        assert_eq!(shader.uniform_location("missing"), None);
        assert_eq!(shader.attribute_location("tex_coord"), Some(1));
        assert_eq!(gpu.stats().programs_compiled, 1);
    }

    #[test]
    fn test_missing_entry_point_is_logged_failure() {
        const BROKEN: FragmentShader = FragmentShader {
            label: "broken",
            wgsl: "struct Uniforms { params: vec4<f32>, };",
            eval: mix_eval,
        };
        let gpu = GpuContext::software();
        assert!(Shader::build(&gpu, &BROKEN, &[TextureTarget::Texture2D]).is_none());
    }
}

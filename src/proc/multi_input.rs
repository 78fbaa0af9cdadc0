//! Processors sampling two or three textures.
//!
//! Each slot is supplied independently (by the pipeline, a subscriber graph
//! or a composite). The draw is gated on every slot that is being waited for
//! having been supplied since the last draw. Slot `i` samples from the unit
//! `i` steps after slot 0's unit.

use crate::gpu::context::GpuContext;
use crate::gpu::types::{TextureId, TextureTarget, TextureUnit};
use crate::proc::filter::{FilterBase, FilterKernel};
use crate::proc::{InputTexture, ProcBase, Processor};

#[derive(Clone, Copy, Debug)]
struct InputSlot {
    texture: InputTexture,
    wait: bool,
    supplied: bool,
}

impl Default for InputSlot {
    fn default() -> Self {
        Self {
            texture: InputTexture::default(),
            wait: true,
            supplied: false,
        }
    }
}

pub struct MultiInputProc {
    filter: FilterBase,
    slots: Vec<InputSlot>,
}

impl MultiInputProc {
    pub fn new(gpu: &GpuContext, kernel: impl FilterKernel + 'static) -> Self {
        let arity = kernel.inputs();
        assert!(
            (2..=3).contains(&arity),
            "{}: multi-input processor needs 2 or 3 inputs, kernel has {}",
            kernel.shader().label,
            arity
        );
        Self {
            filter: FilterBase::new(gpu, Box::new(kernel)),
            slots: vec![InputSlot::default(); arity],
        }
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn set_param(&mut self, name: &str, value: f32) -> bool {
        self.filter.set_param(name, value)
    }

    /// Whether the draw should wait for slot `slot` to be supplied.
    pub fn set_wait_for_texture(&mut self, slot: usize, wait: bool) {
        match self.slots.get_mut(slot) {
            Some(s) => s.wait = wait,
            None => log::warn!("{}: no input slot {}", self.filter.base.name(), slot),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slots.iter().all(|s| s.supplied || !s.wait)
    }

    pub fn slot_unit(&self, slot: usize) -> TextureUnit {
        self.slots[0].texture.unit.offset(slot as u32)
    }

    pub fn use_texture2(&mut self, id: TextureId, target: TextureTarget) {
        let unit = self.slot_unit(1);
        self.supply(1, InputTexture::new(id, unit, target));
    }

    pub fn use_texture3(&mut self, id: TextureId, target: TextureTarget) {
        let unit = self.slot_unit(2);
        self.supply(2, InputTexture::new(id, unit, target));
    }

    fn supply(&mut self, slot: usize, texture: InputTexture) {
        assert!(
            slot < self.slots.len(),
            "{}: input position {} out of range ({} inputs)",
            self.filter.base.name(),
            slot,
            self.slots.len()
        );
        self.filter.set_input_target(slot, texture.target);
        let entry = &mut self.slots[slot];
        entry.texture = texture;
        entry.supplied = true;
        if slot == 0 {
            self.filter.base.set_input(texture);
        }
    }
}

impl Processor for MultiInputProc {
    fn base(&self) -> &ProcBase {
        &self.filter.base
    }

    fn base_mut(&mut self) -> &mut ProcBase {
        &mut self.filter.base
    }

    fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) -> usize {
        self.filter.init(in_w, in_h, order, prepare_for_external_input);
        1
    }

    fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> usize {
        self.filter.reinit(in_w, in_h, prepare_for_external_input);
        1
    }

    fn create_fbo_tex(&mut self, gen_mipmap: bool) {
        self.filter.create_fbo_tex(gen_mipmap);
    }

    fn use_texture(&mut self, texture: InputTexture, position: usize) {
        self.supply(position, texture);
    }

    fn render(&mut self, position: usize) -> bool {
        if !self.is_ready() {
            log::trace!(
                "{}: input {} supplied, still waiting for others",
                self.filter.base.name(),
                position
            );
            return false;
        }
        let inputs: Vec<InputTexture> = self
            .slots
            .iter()
            .enumerate()
            .map(|(i, s)| InputTexture {
                unit: self.slot_unit(i),
                ..s.texture
            })
            .collect();
        let drawn = self.filter.draw(&inputs);
        if drawn {
            for slot in &mut self.slots {
                slot.supplied = false;
            }
        }
        drawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::types::TextureDesc;
    use crate::proc::blend::{blend, fir3};

    fn solid(gpu: &GpuContext, value: u8) -> TextureId {
        let mut backend = gpu.backend();
        let id = backend.create_texture(&TextureDesc::rgba(2, 2));
        backend.write_texture(id, &[value; 16]);
        id
    }

    #[test]
    fn test_waits_for_all_inputs() {
        let gpu = GpuContext::software();
        let (a, b) = (solid(&gpu, 200), solid(&gpu, 100));
        let mut proc = blend(&gpu, 0.5);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);

        proc.use_texture(InputTexture::texture_2d(a, TextureUnit(0)), 0);
        assert!(!proc.render(0));
        assert_eq!(gpu.stats().draw_calls, 0);

        proc.use_texture2(b, TextureTarget::Texture2D);
        assert!(proc.render(1));
        assert_eq!(gpu.stats().draw_calls, 1);

        // Supplied flags reset after drawing.
        assert!(!proc.render(1));
        assert_eq!(gpu.stats().draw_calls, 1);

        let mut out = vec![0u8; 16];
        proc.result_data(&mut out);
        assert_eq!(out[0], 150);
    }

    #[test]
    fn test_unwaited_slot_does_not_gate() {
        let gpu = GpuContext::software();
        let a = solid(&gpu, 90);
        let mut proc = blend(&gpu, 1.0);
        proc.init(2, 2, 0, false);
        proc.create_fbo_tex(false);
        proc.set_wait_for_texture(1, false);
        proc.use_texture(InputTexture::texture_2d(a, TextureUnit(0)), 0);
        assert!(proc.render(0));
    }

    #[test]
    fn test_slot_units_follow_first() {
        let gpu = GpuContext::software();
        let mut proc = fir3(&gpu, [1.0, 0.0, 0.0]);
        proc.use_texture(InputTexture::texture_2d(TextureId(1), TextureUnit(4)), 0);
        assert_eq!(proc.slot_unit(1), TextureUnit(5));
        assert_eq!(proc.slot_unit(2), TextureUnit(6));
        assert_eq!(proc.arity(), 3);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_position_beyond_arity_panics() {
        let gpu = GpuContext::software();
        let mut proc = blend(&gpu, 0.5);
        proc.use_texture(InputTexture::default(), 2);
    }
}

//! Ring buffer of past frames.
//!
//! Every render copies the input into the next slot. The exposed output is
//! the oldest retained frame: until the ring has filled it stays on the
//! first frame written, afterwards it advances one slot per render.

use crate::gpu::context::GpuContext;
use crate::gpu::quad::RenderOrientation;
use crate::gpu::transfer::MemTransfer;
use crate::gpu::types::TextureId;
use crate::proc::filter::FilterProc;
use crate::proc::noop::noop;
use crate::proc::{ExternalInput, InputTexture, OutputSize, ProcBase, Processor};

pub struct FifoProc {
    base: ProcBase,
    slots: Vec<FilterProc>,
    insert: usize,
    extract: usize,
    count: usize,
    output_slot: usize,
}

impl FifoProc {
    pub fn new(gpu: &GpuContext, size: usize) -> Self {
        assert!(size >= 2, "FIFO depth must be at least 2, got {}", size);
        Self {
            base: ProcBase::new(gpu, "fifo"),
            slots: (0..size).map(|_| noop(gpu)).collect(),
            insert: 0,
            extract: 0,
            count: 0,
            output_slot: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Frames currently retained.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Forget all retained frames.
    pub fn clear(&mut self) {
        self.insert = 0;
        self.extract = 0;
        self.count = 0;
        self.output_slot = 0;
    }

    /// The most recently written frame, or the invalid id while empty.
    pub fn newest_texture(&self) -> TextureId {
        if self.count == 0 {
            return TextureId::INVALID;
        }
        let size = self.slots.len();
        self.slots[(self.insert + size - 1) % size].output_texture()
    }

    fn sync_sizes(&mut self) {
        let input = self.slots[0].in_frame_size();
        let output = self.slots[0].out_frame_size();
        self.base.set_frame_sizes(input, output);
    }
}

impl Processor for FifoProc {
    fn base(&self) -> &ProcBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ProcBase {
        &mut self.base
    }

    fn init(&mut self, in_w: u32, in_h: u32, order: usize, prepare_for_external_input: bool) -> usize {
        self.base.set_order(order);
        let format = self.base.input_format();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.set_input_format(format);
            slot.init(in_w, in_h, order, i == 0 && prepare_for_external_input);
        }
        self.sync_sizes();
        self.clear();
        self.base.mark_initialized();
        1
    }

    fn reinit(&mut self, in_w: u32, in_h: u32, prepare_for_external_input: bool) -> usize {
        if self.base.in_frame_size() == (in_w, in_h) {
            return 1;
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.reinit(in_w, in_h, i == 0 && prepare_for_external_input);
        }
        self.sync_sizes();
        self.clear();
        1
    }

    fn create_fbo_tex(&mut self, gen_mipmap: bool) {
        for slot in &mut self.slots {
            slot.create_fbo_tex(gen_mipmap);
        }
        self.sync_sizes();
        self.clear();
    }

    fn use_texture(&mut self, texture: InputTexture, _position: usize) {
        self.base.set_input(texture);
    }

    fn render(&mut self, _position: usize) -> bool {
        let input = self.base.input();
        let slot = &mut self.slots[self.insert];
        slot.use_texture(input, 0);
        if !slot.render(0) {
            return false;
        }
        let size = self.slots.len();
        self.insert = (self.insert + 1) % size;
        self.count = (self.count + 1).min(size);
        self.output_slot = self.extract;
        if self.is_full() {
            self.extract = (self.extract + 1) % size;
        }
        log::trace!(
            "fifo: {}/{} frames, output slot {}",
            self.count,
            size,
            self.output_slot
        );
        true
    }

    fn output_texture(&self) -> TextureId {
        self.slots[self.output_slot].output_texture()
    }

    fn external_input(&self) -> ExternalInput {
        self.slots[0].external_input()
    }

    fn set_external_input_data(&mut self, data: &[u8]) {
        self.slots[0].set_external_input_data(data);
    }

    fn result_data(&mut self, buf: &mut [u8]) {
        let slot = self.output_slot;
        self.slots[slot].result_data(buf);
    }

    fn set_output_size(&mut self, size: OutputSize) {
        self.base.set_output_size(size);
        for slot in &mut self.slots {
            slot.set_output_size(size);
        }
    }

    fn set_render_orientation(&mut self, orientation: RenderOrientation) {
        self.base.set_orientation(orientation);
        for slot in &mut self.slots {
            slot.set_render_orientation(orientation);
        }
    }

    fn input_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        self.slots[0].input_transfer_mut()
    }

    fn output_transfer_mut(&mut self) -> Option<&mut dyn MemTransfer> {
        let slot = self.output_slot;
        self.slots[slot].output_transfer_mut()
    }

    fn cleanup(&mut self) {
        for slot in &mut self.slots {
            slot.cleanup();
        }
        self.clear();
        self.base.cleanup();
    }
}

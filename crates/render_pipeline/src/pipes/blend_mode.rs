//! Blend state tracking for unbatched draws

use super::{ExecuteContext, PipeId, RenderPipe};
use crate::batcher::BatchPipe;
use crate::device::BlendMode;
use crate::instructions::{Instruction, InstructionPayload, InstructionSet};
use crate::{RenderError, RenderResult};

/// Core pipe that emits blend state changes
///
/// Batches set their own blend mode when drawn. Pipes that draw outside a
/// batch call [`BlendModePipe::set_blend_mode`] first; an instruction is
/// only emitted when the mode differs from what the device will have at
/// that point of the set, which includes the mode of the last batch.
#[derive(Debug, Default)]
pub struct BlendModePipe {
    active: Option<BlendMode>,
    changes: u64,
}

impl BlendModePipe {
    /// Pipe name
    pub const NAME: &'static str = "blendMode";

    /// Create the pipe
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend state instructions emitted over the pipe's lifetime
    pub const fn changes(&self) -> u64 {
        self.changes
    }

    /// Forget the tracked state; the next request always emits
    pub(crate) fn build_start(&mut self, _set: &InstructionSet) {
        self.active = None;
    }

    /// Make sure the device uses `blend_mode` for the next unbatched draw
    pub fn set_blend_mode(&mut self, blend_mode: BlendMode, set: &mut InstructionSet, batch: &mut BatchPipe) {
        batch.break_batch(set);
        if let Some(flushed) = batch.take_flushed_blend(set.id()) {
            self.active = Some(flushed);
        }
        if self.active == Some(blend_mode) {
            return;
        }
        self.active = Some(blend_mode);
        self.changes += 1;
        set.add(Instruction::new(PipeId::BLEND_MODE, InstructionPayload::BlendMode(blend_mode)));
    }
}

impl RenderPipe for BlendModePipe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        match instruction.payload {
            InstructionPayload::BlendMode(blend_mode) => {
                ctx.device.set_blend_mode(blend_mode);
                Ok(())
            }
            other => Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("unexpected payload {:?}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatchableElement, DeviceBatcherAdaptor};
    use crate::config::RendererConfig;
    use crate::device::ReleaseQueue;
    use crate::foundation::pool::Pools;
    use crate::texture::TextureId;

    fn batch_pipe() -> BatchPipe {
        BatchPipe::new(
            &RendererConfig::default(),
            Box::new(DeviceBatcherAdaptor::new()),
            ReleaseQueue::new(),
        )
    }

    fn blend_payloads(set: &InstructionSet) -> Vec<BlendMode> {
        set.iter()
            .filter_map(|i| match i.payload {
                InstructionPayload::BlendMode(mode) => Some(mode),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_repeated_mode_emitted_once() {
        let mut pipe = BlendModePipe::new();
        let mut batch = batch_pipe();
        let mut set = InstructionSet::new();
        pipe.build_start(&set);

        pipe.set_blend_mode(BlendMode::Add, &mut set, &mut batch);
        pipe.set_blend_mode(BlendMode::Add, &mut set, &mut batch);
        pipe.set_blend_mode(BlendMode::Normal, &mut set, &mut batch);
        assert_eq!(blend_payloads(&set), vec![BlendMode::Add, BlendMode::Normal]);
        assert_eq!(pipe.changes(), 2);
    }

    #[test]
    fn test_batch_blend_is_tracked() {
        let mut pipe = BlendModePipe::new();
        let mut batch = batch_pipe();
        let mut pools = Pools::new();
        let mut set = InstructionSet::new();
        pipe.build_start(&set);
        batch.build_start(&set, &mut pools);

        pipe.set_blend_mode(BlendMode::Add, &mut set, &mut batch);
        let mut element = BatchableElement {
            texture: TextureId(1),
            blend_mode: BlendMode::Multiply,
            ..BatchableElement::default()
        };
        batch.add_to_batch(&mut element, &mut set, &mut pools).unwrap();

        pipe.set_blend_mode(BlendMode::Multiply, &mut set, &mut batch);
        pipe.set_blend_mode(BlendMode::Add, &mut set, &mut batch);
        assert_eq!(blend_payloads(&set), vec![BlendMode::Add, BlendMode::Add]);
    }

    #[test]
    fn test_build_start_forgets_state() {
        let mut pipe = BlendModePipe::new();
        let mut batch = batch_pipe();
        let mut set = InstructionSet::new();
        pipe.set_blend_mode(BlendMode::Screen, &mut set, &mut batch);
        set.reset();
        pipe.build_start(&set);
        pipe.set_blend_mode(BlendMode::Screen, &mut set, &mut batch);
        assert_eq!(set.len(), 1);
    }
}

//! Colour write mask effect pipe

use super::{EffectPipe, ExecuteContext, PipeContext, PipeId, PipeInit, RenderPipe, StatefulPipe};
use crate::device::ColorMask;
use crate::instructions::{Instruction, InstructionPayload, InstructionSet};
use crate::scene::Effect;
use crate::{RenderError, RenderResult};

/// Restricts colour writes for a subtree
///
/// Masks nest; an instruction is only emitted when the effective mask
/// actually changes.
#[derive(Debug)]
pub struct ColorMaskPipe {
    id: PipeId,
    stack: Vec<ColorMask>,
}

impl Default for ColorMaskPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorMaskPipe {
    /// Pipe name
    pub const NAME: &'static str = "colorMask";

    /// Create the pipe
    pub fn new() -> Self {
        Self {
            id: PipeId::FIRST_USER,
            stack: vec![ColorMask::all()],
        }
    }

    fn current(&self) -> ColorMask {
        self.stack.last().copied().unwrap_or_default()
    }
}

impl RenderPipe for ColorMaskPipe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(&mut self, init: PipeInit<'_>) -> RenderResult<()> {
        self.id = init.id;
        Ok(())
    }

    fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        match instruction.payload {
            InstructionPayload::ColorMask(mask) => {
                ctx.device.set_color_mask(mask);
                Ok(())
            }
            other => Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("unexpected payload {:?}", other),
            }),
        }
    }

    fn as_stateful(&mut self) -> Option<&mut dyn StatefulPipe> {
        Some(self)
    }

    fn as_effect(&mut self) -> Option<&mut dyn EffectPipe> {
        Some(self)
    }
}

impl StatefulPipe for ColorMaskPipe {
    fn build_start(&mut self, _set: &InstructionSet, _ctx: &mut PipeContext<'_>) {
        self.stack.clear();
        self.stack.push(ColorMask::all());
    }

    fn build_end(&mut self, _set: &mut InstructionSet, _ctx: &mut PipeContext<'_>) {
        if self.stack.len() > 1 {
            log::warn!("{} colour masks left unbalanced", self.stack.len() - 1);
        }
    }
}

impl EffectPipe for ColorMaskPipe {
    fn push(&mut self, effect: &Effect, set: &mut InstructionSet, ctx: &mut PipeContext<'_>) -> RenderResult<()> {
        let Effect::ColorMask(mask) = *effect else {
            return Err(RenderError::MissingCapability {
                pipe: Self::NAME.to_string(),
                capability: "non-mask effects",
            });
        };
        ctx.batch.break_batch(set);
        if mask != self.current() {
            set.add(Instruction::new(self.id, InstructionPayload::ColorMask(mask)));
        }
        self.stack.push(mask);
        Ok(())
    }

    fn pop(&mut self, _effect: &Effect, set: &mut InstructionSet, ctx: &mut PipeContext<'_>) -> RenderResult<()> {
        if self.stack.len() <= 1 {
            log::warn!("Colour mask pop without a matching push");
            return Ok(());
        }
        ctx.batch.break_batch(set);
        let popped = self.stack.pop().unwrap_or_default();
        let restored = self.current();
        if popped != restored {
            set.add(Instruction::new(self.id, InstructionPayload::ColorMask(restored)));
        }
        Ok(())
    }
}

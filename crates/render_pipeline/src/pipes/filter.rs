//! Filter effect pipe

use super::{EffectPipe, ExecuteContext, PipeContext, PipeId, PipeInit, RenderPipe, StatefulPipe};
use crate::instructions::{Instruction, InstructionPayload, InstructionSet};
use crate::scene::Effect;
use crate::{RenderError, RenderResult};

/// Wraps a subtree in push/pop filter instructions
///
/// The filter itself is owned by the host device; the pipe only brackets
/// the subtree so everything inside renders into the filter's input.
#[derive(Debug)]
pub struct FilterPipe {
    id: PipeId,
    depth: usize,
}

impl Default for FilterPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterPipe {
    /// Pipe name
    pub const NAME: &'static str = "filter";

    /// Create the pipe
    pub const fn new() -> Self {
        Self {
            id: PipeId::FIRST_USER,
            depth: 0,
        }
    }
}

impl RenderPipe for FilterPipe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(&mut self, init: PipeInit<'_>) -> RenderResult<()> {
        self.id = init.id;
        Ok(())
    }

    fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        match instruction.payload {
            InstructionPayload::PushFilter(filter) => ctx.device.push_filter(filter),
            InstructionPayload::PopFilter => ctx.device.pop_filter(),
            other => {
                return Err(RenderError::Execute {
                    pipe: Self::NAME,
                    reason: format!("unexpected payload {:?}", other),
                })
            }
        }
        Ok(())
    }

    fn as_stateful(&mut self) -> Option<&mut dyn StatefulPipe> {
        Some(self)
    }

    fn as_effect(&mut self) -> Option<&mut dyn EffectPipe> {
        Some(self)
    }
}

impl StatefulPipe for FilterPipe {
    fn build_start(&mut self, _set: &InstructionSet, _ctx: &mut PipeContext<'_>) {
        self.depth = 0;
    }

    fn build_end(&mut self, _set: &mut InstructionSet, _ctx: &mut PipeContext<'_>) {
        if self.depth > 0 {
            log::warn!("{} filters left unbalanced", self.depth);
        }
    }
}

impl EffectPipe for FilterPipe {
    fn push(&mut self, effect: &Effect, set: &mut InstructionSet, ctx: &mut PipeContext<'_>) -> RenderResult<()> {
        let Effect::Filter(filter) = *effect else {
            return Err(RenderError::MissingCapability {
                pipe: Self::NAME.to_string(),
                capability: "non-filter effects",
            });
        };
        ctx.batch.break_batch(set);
        self.depth += 1;
        set.add(Instruction::new(self.id, InstructionPayload::PushFilter(filter)));
        Ok(())
    }

    fn pop(&mut self, _effect: &Effect, set: &mut InstructionSet, ctx: &mut PipeContext<'_>) -> RenderResult<()> {
        if self.depth == 0 {
            log::warn!("Filter pop without a matching push");
            return Ok(());
        }
        ctx.batch.break_batch(set);
        self.depth -= 1;
        set.add(Instruction::new(self.id, InstructionPayload::PopFilter));
        Ok(())
    }
}

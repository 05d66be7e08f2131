//! # Instructions
//!
//! An [`InstructionSet`] is the flattened, executable form of one render
//! group: an ordered list of small [`Instruction`] records, each naming the
//! pipe that executes it.
//!
//! ## Storage
//!
//! ```text
//! instructions: [ i0 | i1 | i2 | stale | stale ]
//!                 └──── size = 3 ────┘
//! ```
//!
//! Rebuilding resets `size` to zero and overwrites slots in place. The
//! backing vector never shrinks, so a scene of stable size stops allocating
//! after its first build. Slots at or past `size` are never visited.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{BlendMode, ColorMask, FilterId};
use crate::pipes::PipeId;
use crate::scene::RenderableId;

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionSetId(u64);

impl InstructionSetId {
    fn next() -> Self {
        Self(NEXT_SET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Data carried by an instruction, interpreted by its pipe
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstructionPayload {
    /// Draw a finished batch
    Batch {
        /// Batcher index within the owning set
        batcher: u16,
        /// Batch index within the batcher
        batch: u32,
    },
    /// Draw one drawable directly
    Renderable(RenderableId),
    /// Change the blend state
    BlendMode(BlendMode),
    /// Begin rendering into a filter
    PushFilter(FilterId),
    /// Apply the innermost filter
    PopFilter,
    /// Change the colour write mask
    ColorMask(ColorMask),
    /// Pipe-defined data for user pipes
    Custom(u64),
}

/// One step of an instruction set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    /// Pipe that executes this instruction
    pub pipe: PipeId,
    /// Pipe-specific data
    pub payload: InstructionPayload,
}

impl Instruction {
    /// Create an instruction for `pipe`
    pub const fn new(pipe: PipeId, payload: InstructionPayload) -> Self {
        Self { pipe, payload }
    }
}

/// Shared record of the last renderer tick at which a set was executed
///
/// Cloned into GC resources whose usage is inferred from traversal.
/// Zero means the set has never been executed.
#[derive(Debug, Clone, Default)]
pub struct TickHandle(Rc<Cell<u64>>);

impl TickHandle {
    /// Last traversal tick
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    fn set(&self, tick: u64) {
        self.0.set(tick);
    }
}

/// Ordered, reusable list of instructions for one render group
#[derive(Debug)]
pub struct InstructionSet {
    id: InstructionSetId,
    instructions: Vec<Instruction>,
    size: usize,
    generation: u64,
    traversed: TickHandle,
}

impl Default for InstructionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionSet {
    /// Create an empty set with a fresh id
    pub fn new() -> Self {
        Self {
            id: InstructionSetId::next(),
            instructions: Vec::new(),
            size: 0,
            generation: 0,
            traversed: TickHandle::default(),
        }
    }

    /// Set identifier
    pub const fn id(&self) -> InstructionSetId {
        self.id
    }

    /// Append an instruction, reusing a stale slot when one exists
    pub fn add(&mut self, instruction: Instruction) {
        if self.size < self.instructions.len() {
            self.instructions[self.size] = instruction;
        } else {
            self.instructions.push(instruction);
        }
        self.size += 1;
    }

    /// Logically empty the set without releasing storage
    pub fn reset(&mut self) {
        self.size = 0;
        self.generation += 1;
    }

    /// Number of live instructions
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Whether the set has no live instructions
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Backing storage length, including stale slots
    pub fn capacity_used(&self) -> usize {
        self.instructions.len()
    }

    /// Live instruction at `index`
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.as_slice().get(index)
    }

    /// Most recently added live instruction
    pub fn last(&self) -> Option<&Instruction> {
        self.as_slice().last()
    }

    /// Live instructions in order
    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions[..self.size]
    }

    /// Iterate live instructions in order
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.as_slice().iter()
    }

    /// Number of times the set has been reset for a rebuild
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Last renderer tick at which the set was executed; zero if never
    pub fn last_traversed_tick(&self) -> u64 {
        self.traversed.get()
    }

    /// Shared handle to the traversal tick
    pub fn tick_handle(&self) -> TickHandle {
        self.traversed.clone()
    }

    /// Record that the set was executed on `tick`
    pub fn mark_traversed(&self, tick: u64) {
        self.traversed.set(tick);
    }
}

impl<'a> IntoIterator for &'a InstructionSet {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(value: u64) -> Instruction {
        Instruction::new(PipeId::BATCH, InstructionPayload::Custom(value))
    }

    #[test]
    fn test_add_and_iterate_in_order() {
        let mut set = InstructionSet::new();
        for value in 0..3 {
            set.add(custom(value));
        }
        let values: Vec<_> = set
            .iter()
            .map(|i| match i.payload {
                InstructionPayload::Custom(v) => v,
                _ => u64::MAX,
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(set.last(), Some(&custom(2)));
    }

    #[test]
    fn test_reset_keeps_storage_and_hides_stale_slots() {
        let mut set = InstructionSet::new();
        for value in 0..5 {
            set.add(custom(value));
        }
        set.reset();
        assert!(set.is_empty());
        assert_eq!(set.capacity_used(), 5);
        assert!(set.get(0).is_none());

        set.add(custom(10));
        set.add(custom(11));
        assert_eq!(set.len(), 2);
        assert_eq!(set.capacity_used(), 5);
        assert_eq!(set.iter().count(), 2);
        assert_eq!(set.get(1), Some(&custom(11)));
        assert!(set.get(2).is_none());
        assert_eq!(set.generation(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = InstructionSet::new();
        let b = InstructionSet::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_tick_handle_shared() {
        let set = InstructionSet::new();
        let handle = set.tick_handle();
        assert_eq!(handle.get(), 0);
        set.mark_traversed(42);
        assert_eq!(handle.get(), 42);
        assert_eq!(set.last_traversed_tick(), 42);
    }
}

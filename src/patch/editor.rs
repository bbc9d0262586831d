//! Windowed edits of method bodies.
//!
//! Both edits are atomic: on failure the instruction sequence is left exactly as it was.
//! Neither checks that the result is stack balanced or that no branch points into the
//! removed range; the image writer refuses to encode dangling branch targets, everything
//! else is up to whoever wrote the plan.

use crate::{assembly::Instruction, metadata::MethodBody, patch::FailureReason};

/// Remove `count` consecutive instructions starting at index `start`.
///
/// Returns the removed instructions in order.
///
/// # Errors
/// Returns [`FailureReason::OutOfRange`] if the window extends past the end of the body.
pub fn remove_window(
    body: &mut MethodBody,
    start: usize,
    count: usize,
) -> Result<Vec<Instruction>, FailureReason> {
    let instructions = body.instructions_mut();
    let len = instructions.len();

    match start.checked_add(count) {
        Some(end) if end <= len => Ok(instructions.drain(start..end).collect()),
        _ => Err(FailureReason::OutOfRange {
            start: isize::try_from(start).unwrap_or(isize::MAX),
            count,
            len,
        }),
    }
}

/// Replace every instruction of `body` with `instructions`.
///
/// Branch targets in `instructions` are IL offsets within the replacement, counted from its
/// first instruction. Exception handlers only describe regions of the discarded code and
/// are dropped with it. Returns the number of instructions that were discarded.
pub fn replace_body(body: &mut MethodBody, instructions: Vec<Instruction>) -> usize {
    body.handlers.clear();
    body.replace_instructions(instructions).len()
}

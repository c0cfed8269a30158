//! Strictly sequential step completion: no skipping, repeating, or going back.

use crate::error::SequenceError;

/// True iff `attempted_step_number` is exactly the step after `current_step_number`.
///
/// `current_step_number` is the last completed step (0 before any step is done).
pub fn validate_step_sequence(current_step_number: u32, attempted_step_number: u32) -> bool {
    current_step_number
        .checked_add(1)
        .is_some_and(|next| attempted_step_number == next)
}

/// Typed variant of [`validate_step_sequence`]; returns the accepted step number.
pub fn check_step_sequence(
    current_step_number: u32,
    attempted_step_number: u32,
) -> Result<u32, SequenceError> {
    if validate_step_sequence(current_step_number, attempted_step_number) {
        Ok(attempted_step_number)
    } else {
        Err(SequenceError::OutOfSequence {
            expected: current_step_number.saturating_add(1),
            attempted: attempted_step_number,
        })
    }
}

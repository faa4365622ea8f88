//! State machine trait.

use crate::{Action, Event};
use std::time::Duration;

/// The node state machine contract.
///
/// Implementations mutate themselves and return actions, but perform no
/// I/O. The runner sets the clock before each `handle` call.
pub trait StateMachine {
    /// Process one event to completion.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Update the machine's view of the current time (duration since the
    /// Unix epoch, supplied by the runner).
    fn set_now(&mut self, now: Duration);
}

//! The per-round state driver.
//!
//! Holds the single active `(basis, state)` pair and arms the phase
//! timeouts: entering INIT arms the SIGN timeout, entering SIGN swaps it
//! for the ACCEPT timeout, and ALLCONFIRM clears both. Transition
//! requests that are stale relative to the current pair are ignored, so
//! replayed or out-of-order ballots can never move the round backwards.

use isaac_core::{Action, TimerId};
use isaac_types::{BallotState, VotingBasis};
use std::time::Duration;
use tracing::{debug, trace};

/// The active round position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundState {
    pub basis: VotingBasis,
    pub state: BallotState,
}

/// Drives INIT → SIGN → ACCEPT → ALLCONFIRM with timeouts.
#[derive(Debug)]
pub struct StateManager {
    current: Option<RoundState>,
    sign_timeout: Duration,
    accept_timeout: Duration,
}

impl StateManager {
    pub fn new(sign_timeout: Duration, accept_timeout: Duration) -> Self {
        StateManager {
            current: None,
            sign_timeout,
            accept_timeout,
        }
    }

    pub fn current(&self) -> Option<&RoundState> {
        self.current.as_ref()
    }

    /// Enter INIT for a fresh basis, arming the SIGN timeout. A basis
    /// older than the current round position is ignored.
    pub fn enter_init(&mut self, basis: VotingBasis) -> Option<Vec<Action>> {
        if self.is_stale(&basis, BallotState::Init) {
            trace!(%basis, "stale INIT entry ignored");
            return None;
        }
        self.current = Some(RoundState {
            basis,
            state: BallotState::Init,
        });
        Some(vec![
            Action::CancelTimer {
                id: TimerId::Accept,
            },
            Action::SetTimer {
                id: TimerId::Sign,
                duration: self.sign_timeout,
            },
        ])
    }

    /// Whether `(basis, state)` is stale relative to the current pair.
    ///
    /// A request is stale when its basis is older than the current one, or
    /// when it targets the same basis without advancing the state.
    fn is_stale(&self, basis: &VotingBasis, state: BallotState) -> bool {
        let Some(current) = &self.current else {
            return false;
        };
        if basis.height != current.basis.height {
            return basis.height < current.basis.height;
        }
        if basis.round != current.basis.round {
            return basis.round < current.basis.round;
        }
        state <= current.state
    }

    /// Apply an externally requested transition; stale requests are
    /// ignored. Returns the timer actions of the transition, or `None`
    /// when ignored.
    pub fn transit(&mut self, basis: VotingBasis, state: BallotState) -> Option<Vec<Action>> {
        if self.is_stale(&basis, state) {
            trace!(%basis, %state, "stale transition ignored");
            return None;
        }
        debug!(%basis, %state, "state transition");
        self.current = Some(RoundState { basis, state });
        let actions = match state {
            BallotState::Init => vec![
                Action::CancelTimer {
                    id: TimerId::Accept,
                },
                Action::SetTimer {
                    id: TimerId::Sign,
                    duration: self.sign_timeout,
                },
            ],
            BallotState::Sign => vec![
                Action::CancelTimer { id: TimerId::Sign },
                Action::SetTimer {
                    id: TimerId::Accept,
                    duration: self.accept_timeout,
                },
            ],
            BallotState::Accept => Vec::new(),
            BallotState::AllConfirm => vec![
                Action::CancelTimer { id: TimerId::Sign },
                Action::CancelTimer {
                    id: TimerId::Accept,
                },
            ],
        };
        Some(actions)
    }
}

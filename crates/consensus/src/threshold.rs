//! The voting threshold policy.

use isaac_types::{Address, BallotState, VotingHole};
use std::collections::HashMap;

/// Decides whether a phase's tallies amount to a decision.
///
/// A phase is `finished` once the number of recorded votes reaches
/// `ceil(N * pct / 100)`. The result is YES or NO when that side alone
/// reaches the threshold count, and EXP (expired) when the phase finished
/// without either side able to win.
#[derive(Debug, Clone)]
pub struct VotingThresholdPolicy {
    validators: usize,
    sign_pct: u32,
    accept_pct: u32,
}

impl VotingThresholdPolicy {
    pub fn new(validators: usize, sign_pct: u32, accept_pct: u32) -> Self {
        VotingThresholdPolicy {
            validators,
            sign_pct,
            accept_pct,
        }
    }

    pub fn validators(&self) -> usize {
        self.validators
    }

    /// Vote count required for the given phase.
    pub fn threshold(&self, state: BallotState) -> usize {
        let pct = match state {
            BallotState::Accept | BallotState::AllConfirm => self.accept_pct,
            _ => self.sign_pct,
        };
        (self.validators * pct as usize).div_ceil(100)
    }

    /// Evaluate one phase's tallies: `(result, finished)`.
    pub fn evaluate(
        &self,
        votes: &HashMap<Address, VotingHole>,
        state: BallotState,
    ) -> (VotingHole, bool) {
        let threshold = self.threshold(state);
        let yes = votes.values().filter(|v| **v == VotingHole::Yes).count();
        let no = votes.values().filter(|v| **v == VotingHole::No).count();

        let finished = votes.len() >= threshold;
        let result = if yes >= threshold {
            VotingHole::Yes
        } else if no >= threshold {
            VotingHole::No
        } else {
            VotingHole::Exp
        };
        (result, finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isaac_types::test_utils::test_keypair;

    fn votes(entries: &[(u8, VotingHole)]) -> HashMap<Address, VotingHole> {
        entries
            .iter()
            .map(|(seed, hole)| (test_keypair(*seed).address(), *hole))
            .collect()
    }

    #[test]
    fn threshold_is_ceiling() {
        let policy = VotingThresholdPolicy::new(4, 66, 66);
        assert_eq!(policy.threshold(BallotState::Sign), 3);
        assert_eq!(policy.threshold(BallotState::Accept), 3);
        let policy = VotingThresholdPolicy::new(7, 66, 66);
        assert_eq!(policy.threshold(BallotState::Sign), 5);
    }

    #[test]
    fn two_yes_votes_do_not_finish() {
        let policy = VotingThresholdPolicy::new(4, 66, 66);
        let (result, finished) = policy.evaluate(
            &votes(&[(1, VotingHole::Yes), (2, VotingHole::Yes)]),
            BallotState::Sign,
        );
        assert!(!finished);
        assert_eq!(result, VotingHole::Exp);
    }

    #[test]
    fn third_yes_vote_finishes_yes() {
        let policy = VotingThresholdPolicy::new(4, 66, 66);
        let (result, finished) = policy.evaluate(
            &votes(&[
                (1, VotingHole::Yes),
                (2, VotingHole::Yes),
                (3, VotingHole::Yes),
            ]),
            BallotState::Sign,
        );
        assert!(finished);
        assert_eq!(result, VotingHole::Yes);
    }

    #[test]
    fn mixed_votes_finish_expired() {
        // 2 YES + 1 NO reaches the participation threshold, but the NO
        // side can no longer reach 3, so the round expires.
        let policy = VotingThresholdPolicy::new(4, 66, 66);
        let (result, finished) = policy.evaluate(
            &votes(&[
                (1, VotingHole::Yes),
                (2, VotingHole::Yes),
                (3, VotingHole::No),
            ]),
            BallotState::Sign,
        );
        assert!(finished);
        assert_eq!(result, VotingHole::Exp);
    }

    #[test]
    fn no_majority_finishes_no() {
        let policy = VotingThresholdPolicy::new(4, 66, 66);
        let (result, finished) = policy.evaluate(
            &votes(&[
                (1, VotingHole::No),
                (2, VotingHole::No),
                (3, VotingHole::No),
            ]),
            BallotState::Sign,
        );
        assert!(finished);
        assert_eq!(result, VotingHole::No);
    }
}

//! Per-basis vote tallies.

use crate::threshold::VotingThresholdPolicy;
use isaac_types::{Address, Ballot, BallotState, Hash, ProposerTransaction, VotingBasis, VotingHole};
use std::collections::HashMap;

/// Snapshot of one phase's tallies, keyed by voter.
pub type RoundVoteResult = HashMap<Address, VotingHole>;

/// SIGN and ACCEPT tallies for one `(basis, proposer)` pair.
///
/// Each source appears at most once per phase; a source that voted NO in
/// SIGN may still vote in ACCEPT.
#[derive(Debug, Default)]
pub struct RoundVote {
    sign: HashMap<Address, VotingHole>,
    accept: HashMap<Address, VotingHole>,
}

impl RoundVote {
    fn phase(&self, state: BallotState) -> Option<&HashMap<Address, VotingHole>> {
        match state {
            BallotState::Sign => Some(&self.sign),
            BallotState::Accept => Some(&self.accept),
            _ => None,
        }
    }

    /// Record a SIGN/ACCEPT ballot's vote. Returns whether this
    /// `(source, phase)` was previously unseen; a repeat does not change
    /// the recorded vote.
    pub fn vote(&mut self, ballot: &Ballot) -> bool {
        let map = match ballot.state() {
            BallotState::Sign => &mut self.sign,
            BallotState::Accept => &mut self.accept,
            _ => return false,
        };
        if map.contains_key(&ballot.source()) {
            return false;
        }
        map.insert(ballot.source(), ballot.vote());
        true
    }

    /// Whether this ballot's source already voted in its phase.
    pub fn is_voted(&self, ballot: &Ballot) -> bool {
        self.is_voted_by_node(ballot.state(), &ballot.source())
    }

    /// Whether `address` voted in `state`'s phase.
    pub fn is_voted_by_node(&self, state: BallotState, address: &Address) -> bool {
        self.phase(state)
            .is_some_and(|map| map.contains_key(address))
    }

    /// Tally one phase: `(snapshot, result, finished)`.
    pub fn can_get_voting_result(
        &self,
        policy: &VotingThresholdPolicy,
        state: BallotState,
    ) -> (RoundVoteResult, VotingHole, bool) {
        let Some(map) = self.phase(state) else {
            return (RoundVoteResult::new(), VotingHole::NotYet, false);
        };
        let (result, finished) = policy.evaluate(map, state);
        (map.clone(), result, finished)
    }
}

/// All consensus activity for one basis.
///
/// Tallies are kept per claimed proposer so conflicting proposals from a
/// Byzantine node at the same basis stay separate; the `elected_proposer`
/// (decided locally at creation) is the only one the node votes YES for.
#[derive(Debug)]
pub struct RunningRound {
    basis: VotingBasis,
    elected_proposer: Address,
    votes: HashMap<Address, RoundVote>,
    /// Proposal transaction lists per claimed proposer.
    transactions: HashMap<Address, Vec<Hash>>,
    /// Full proposer transactions cached from INIT ballots.
    proposer_transactions: HashMap<Address, ProposerTransaction>,
}

impl RunningRound {
    pub fn new(basis: VotingBasis, elected_proposer: Address) -> Self {
        RunningRound {
            basis,
            elected_proposer,
            votes: HashMap::new(),
            transactions: HashMap::new(),
            proposer_transactions: HashMap::new(),
        }
    }

    pub fn basis(&self) -> VotingBasis {
        self.basis
    }

    pub fn elected_proposer(&self) -> Address {
        self.elected_proposer
    }

    /// Record a ballot. INIT ballots register the proposal payload; SIGN
    /// and ACCEPT ballots are tallied. Returns whether anything new was
    /// recorded.
    pub fn vote(&mut self, ballot: &Ballot) -> bool {
        match ballot.state() {
            BallotState::Init => {
                let proposer = ballot.proposer();
                if self.transactions.contains_key(&proposer) {
                    return false;
                }
                self.transactions
                    .insert(proposer, ballot.transactions().to_vec());
                if let Some(ptx) = ballot.proposer_transaction() {
                    self.proposer_transactions.insert(proposer, ptx.clone());
                }
                true
            }
            _ => self
                .votes
                .entry(ballot.proposer())
                .or_default()
                .vote(ballot),
        }
    }

    pub fn is_voted(&self, ballot: &Ballot) -> bool {
        match ballot.state() {
            BallotState::Init => self.transactions.contains_key(&ballot.proposer()),
            _ => self
                .votes
                .get(&ballot.proposer())
                .is_some_and(|rv| rv.is_voted(ballot)),
        }
    }

    pub fn is_voted_by_node(
        &self,
        proposer: &Address,
        state: BallotState,
        address: &Address,
    ) -> bool {
        self.votes
            .get(proposer)
            .is_some_and(|rv| rv.is_voted_by_node(state, address))
    }

    pub fn round_vote(&self, proposer: &Address) -> Option<&RoundVote> {
        self.votes.get(proposer)
    }

    /// Whether this ballot names the locally elected proposer.
    pub fn has_same_proposer(&self, ballot: &Ballot) -> bool {
        ballot.proposer() == self.elected_proposer
    }

    /// Transaction list proposed by `proposer`, if seen.
    pub fn transactions_for(&self, proposer: &Address) -> Option<&[Hash]> {
        self.transactions.get(proposer).map(Vec::as_slice)
    }

    /// Proposer transaction cached from `proposer`'s INIT ballot.
    pub fn proposer_transaction_for(&self, proposer: &Address) -> Option<&ProposerTransaction> {
        self.proposer_transactions.get(proposer)
    }

    /// Tally the ballot's phase for its claimed proposer.
    pub fn can_get_voting_result(
        &self,
        policy: &VotingThresholdPolicy,
        ballot: &Ballot,
    ) -> (RoundVoteResult, VotingHole, bool) {
        match self.votes.get(&ballot.proposer()) {
            Some(rv) => rv.can_get_voting_result(policy, ballot.state()),
            None => (RoundVoteResult::new(), VotingHole::NotYet, false),
        }
    }
}

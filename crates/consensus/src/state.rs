//! The aggregate ISAAC state.

use crate::round_vote::{RoundVoteResult, RunningRound};
use crate::threshold::VotingThresholdPolicy;
use isaac_types::{
    Address, Ballot, BallotState, Block, Hash, ProposerTransaction, ValidatorSet, VotingBasis,
    VotingHole,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Everything the node knows about consensus progress: the latest block,
/// all running rounds, finished-round markers, the latest qualifying
/// ballot, and per-peer height reports for catch-up.
#[derive(Debug)]
pub struct IsaacState {
    address: Address,
    validators: ValidatorSet,
    policy: VotingThresholdPolicy,
    latest_block: Block,
    running_rounds: HashMap<VotingBasis, RunningRound>,
    /// Finished bases, kept to reject late ballots for decided rounds.
    latest_rounds: HashSet<VotingBasis>,
    latest_voting_basis: Option<VotingBasis>,
    /// Latest valid ACCEPT/YES ballot seen, used by the off-by-one
    /// finalize fast path.
    latest_ballot: Option<Ballot>,
    /// Highest height reported by each peer via ACCEPT/YES ballots.
    node_heights: HashMap<Address, u64>,
}

impl IsaacState {
    pub fn new(
        address: Address,
        validators: ValidatorSet,
        policy: VotingThresholdPolicy,
        latest_block: Block,
    ) -> Self {
        IsaacState {
            address,
            validators,
            policy,
            latest_block,
            running_rounds: HashMap::new(),
            latest_rounds: HashSet::new(),
            latest_voting_basis: None,
            latest_ballot: None,
            node_heights: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn policy(&self) -> &VotingThresholdPolicy {
        &self.policy
    }

    pub fn latest_block(&self) -> &Block {
        &self.latest_block
    }

    pub fn set_latest_block(&mut self, block: Block) {
        self.latest_block = block;
        // Height reports at or below the new tip are no longer interesting.
        let height = self.latest_block.height;
        self.node_heights.retain(|_, h| *h > height);
    }

    pub fn latest_voting_basis(&self) -> Option<VotingBasis> {
        self.latest_voting_basis
    }

    pub fn latest_ballot(&self) -> Option<&Ballot> {
        self.latest_ballot.as_ref()
    }

    pub fn set_latest_ballot(&mut self, ballot: Ballot) {
        self.latest_ballot = Some(ballot);
    }

    /// Deterministic proposer election: every node with the same sorted
    /// validator list, height and round elects the same address, and for a
    /// fixed height incrementing the round cycles through the whole set
    /// before repeating.
    pub fn select_proposer(&self, height: u64, round: u64) -> Address {
        let addresses = self.validators.addresses();
        let n = addresses.len() as u128;
        let digest = Hash::digest(&height.to_le_bytes());
        let base = u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("8 bytes"));
        let index = ((base as u128 + round as u128) % n) as usize;
        addresses[index]
    }

    /// Whether a basis can still be decided: it must build on the latest
    /// block and not already be finished. Bases at or below the committed
    /// height are always stale.
    pub fn is_available_round(&self, basis: &VotingBasis) -> bool {
        basis.height == self.latest_block.height + 1
            && basis.block_hash == self.latest_block.hash
            && !self.latest_rounds.contains(basis)
    }

    pub fn has_running_round(&self, basis: &VotingBasis) -> bool {
        self.running_rounds.contains_key(basis)
    }

    pub fn running_round(&self, basis: &VotingBasis) -> Option<&RunningRound> {
        self.running_rounds.get(basis)
    }

    /// Record a ballot, creating the running round lazily with the
    /// locally elected proposer. Returns whether anything new was
    /// recorded.
    pub fn vote(&mut self, ballot: &Ballot) -> bool {
        let basis = ballot.basis();
        let elected = self.select_proposer(basis.height, basis.round);
        self.running_rounds
            .entry(basis)
            .or_insert_with(|| {
                debug!(%basis, elected = ?elected, "running round created");
                RunningRound::new(basis, elected)
            })
            .vote(ballot)
    }

    pub fn is_voted(&self, ballot: &Ballot) -> bool {
        self.running_rounds
            .get(&ballot.basis())
            .is_some_and(|rr| rr.is_voted(ballot))
    }

    /// Whether `address` already voted in `state` for this ballot's
    /// proposer at this basis.
    pub fn is_voted_by_node(&self, ballot: &Ballot, state: BallotState, address: &Address) -> bool {
        self.running_rounds
            .get(&ballot.basis())
            .is_some_and(|rr| rr.is_voted_by_node(&ballot.proposer(), state, address))
    }

    pub fn has_same_proposer(&self, ballot: &Ballot) -> bool {
        self.running_rounds
            .get(&ballot.basis())
            .is_some_and(|rr| rr.has_same_proposer(ballot))
    }

    /// Tally the ballot's phase: `(snapshot, result, finished)`.
    pub fn can_get_voting_result(&self, ballot: &Ballot) -> (RoundVoteResult, VotingHole, bool) {
        match self.running_rounds.get(&ballot.basis()) {
            Some(rr) => rr.can_get_voting_result(&self.policy, ballot),
            None => (RoundVoteResult::new(), VotingHole::NotYet, false),
        }
    }

    /// Proposer transaction cached from the INIT ballot at `basis`.
    pub fn proposer_transaction_for(
        &self,
        basis: &VotingBasis,
        proposer: &Address,
    ) -> Option<ProposerTransaction> {
        self.running_rounds
            .get(basis)
            .and_then(|rr| rr.proposer_transaction_for(proposer))
            .cloned()
    }

    /// Mark a basis finished so late ballots for it are rejected.
    pub fn set_latest_voting_basis(&mut self, basis: VotingBasis) {
        self.latest_voting_basis = Some(basis);
        self.latest_rounds.insert(basis);
    }

    /// Drop every running round deciding `height`; called after a commit
    /// or an abandoned decision at that height.
    pub fn remove_running_rounds_with_same_height(&mut self, height: u64) {
        self.running_rounds.retain(|basis, _| basis.height != height);
    }

    /// Whether the basis was already decided.
    pub fn is_finished_round(&self, basis: &VotingBasis) -> bool {
        self.latest_rounds.contains(basis)
    }

    /// Record a peer's reported height (monotonic per peer).
    pub fn save_node_height(&mut self, source: Address, height: u64) {
        let entry = self.node_heights.entry(source).or_insert(height);
        if *entry < height {
            *entry = height;
        }
    }

    /// The sync target: the highest height H such that at least `f + 1`
    /// distinct validators reported `height >= H`, together with the
    /// validators that reported it. `None` until enough peers have
    /// reported above the local tip.
    pub fn get_sync_info(&self) -> Option<(u64, Vec<Address>)> {
        let required = self.validators.max_faulty() + 1;
        if self.node_heights.len() < required {
            return None;
        }
        let mut heights: Vec<u64> = self.node_heights.values().copied().collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        let target = heights[required - 1];
        if target <= self.latest_block.height {
            return None;
        }
        let validators = self
            .node_heights
            .iter()
            .filter(|(_, h)| **h >= target)
            .map(|(addr, _)| *addr)
            .collect();
        Some((target, validators))
    }
}

//! The ISAAC consensus state machine.
//!
//! This crate implements the federated Byzantine agreement core: proposer
//! election, the ballot lifecycle, the round state machine with timeouts,
//! vote tallying against the threshold policy, and catch-up detection.
//!
//! # Flow
//!
//! 1. The state manager enters INIT for `(height, round)`; the elected
//!    proposer builds a proposal from the pool and broadcasts an INIT
//!    ballot.
//! 2. Every inbound ballot runs through the ordered checker pipeline
//!    ([`checker`]), which records votes, tallies phases, broadcasts the
//!    node's own SIGN/ACCEPT ballots, and on an ACCEPT conclusion hands
//!    the confirmed ballot to the block finalizer.
//! 3. Timeouts abandon the round and re-enter INIT at `round + 1`; the
//!    latest block is untouched.
//! 4. Ballots from heights the node cannot participate in drive the sync
//!    path ([`sync`]).
//!
//! The whole crate is synchronous and I/O-free: inputs arrive as method
//! calls from the node state machine, outputs are
//! [`Action`](isaac_core::Action)s executed by the runner.

pub mod checker;
mod round_vote;
mod state;
mod state_manager;
mod sync;
mod threshold;

pub use checker::{BallotContext, CheckError};
pub use round_vote::{RoundVote, RoundVoteResult, RunningRound};
pub use state::IsaacState;
pub use state_manager::{RoundState, StateManager};
pub use sync::SyncState;
pub use threshold::VotingThresholdPolicy;

use isaac_core::Action;
use isaac_mempool::TransactionPool;
use isaac_types::{
    calculate_inflation, Address, Amount, Ballot, Block, ConsensusConfig, KeyPair,
    ProposerTransaction, ValidatorSet, VotingBasis,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The consensus engine: ISAAC state, round driver and ballot pipeline.
pub struct ConsensusState {
    keypair: KeyPair,
    config: ConsensusConfig,
    isaac: IsaacState,
    manager: StateManager,
    sync: SyncState,
    /// INIT proposals parked while the runner fetches and validates their
    /// transactions (the pipeline's only suspension point).
    parked: HashMap<VotingBasis, BallotContext>,
    /// A ballot held back by the off-by-one fast path, re-processed once
    /// the preceding block commits. Keyed by the height it waits for.
    deferred: Option<(u64, Ballot)>,
    now: Duration,
}

impl ConsensusState {
    pub fn new(
        keypair: KeyPair,
        validators: ValidatorSet,
        config: ConsensusConfig,
        latest_block: Block,
    ) -> Self {
        let policy = VotingThresholdPolicy::new(
            validators.len(),
            config.sign_threshold_pct,
            config.accept_threshold_pct,
        );
        let address = keypair.address();
        ConsensusState {
            keypair,
            manager: StateManager::new(config.sign_timeout, config.accept_timeout),
            sync: SyncState::new(),
            isaac: IsaacState::new(address, validators, policy, latest_block),
            config,
            parked: HashMap::new(),
            deferred: None,
            now: Duration::ZERO,
        }
    }

    pub fn set_now(&mut self, now: Duration) {
        self.now = now;
    }

    pub fn isaac(&self) -> &IsaacState {
        &self.isaac
    }

    pub fn round_state(&self) -> Option<&RoundState> {
        self.manager.current()
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_syncing()
    }

    pub fn local_address(&self) -> Address {
        self.keypair.address()
    }

    /// Start consensus from the current latest block.
    pub fn start(&mut self, pool: &TransactionPool) -> Vec<Action> {
        let height = self.isaac.latest_block().height + 1;
        self.begin_round(height, 0, pool)
    }

    /// Process one inbound ballot frame to completion.
    pub fn handle_ballot(&mut self, data: Vec<u8>, pool: &TransactionPool) -> Vec<Action> {
        let ctx = BallotContext::from_wire(data);
        checker::run(self, ctx, pool, 0)
    }

    /// SIGN-phase timeout: abandon the round.
    pub fn on_sign_timer(&mut self, pool: &TransactionPool) -> Vec<Action> {
        match self.manager.current() {
            Some(current) if current.state == isaac_types::BallotState::Init => {
                self.abandon_round(pool)
            }
            _ => Vec::new(),
        }
    }

    /// ACCEPT-phase timeout: abandon the round.
    pub fn on_accept_timer(&mut self, pool: &TransactionPool) -> Vec<Action> {
        match self.manager.current() {
            Some(current) if current.state == isaac_types::BallotState::Sign => {
                self.abandon_round(pool)
            }
            _ => Vec::new(),
        }
    }

    /// Resume a parked INIT proposal once the runner has resolved it.
    pub fn on_proposal_resolved(
        &mut self,
        basis: VotingBasis,
        proposer: Address,
        valid: bool,
        reason: Option<String>,
        pool: &TransactionPool,
    ) -> Vec<Action> {
        let Some(mut ctx) = self.parked.remove(&basis) else {
            debug!(%basis, "no parked proposal for resolution");
            return Vec::new();
        };
        if ctx.ballot().map(|b| b.proposer()) != Some(proposer) {
            debug!(%basis, "parked proposal proposer mismatch");
            return Vec::new();
        }
        if !self.isaac.is_available_round(&basis) {
            debug!(%basis, "round no longer available, dropping parked proposal");
            return Vec::new();
        }

        if valid {
            ctx.voting_hole = isaac_types::VotingHole::Yes;
        } else {
            debug!(%basis, reason = reason.as_deref().unwrap_or(""), "proposal validation failed");
            ctx.voting_hole = isaac_types::VotingHole::No;
        }
        checker::run(self, ctx, pool, checker::RESUME_AFTER_VALIDATE)
    }

    /// A block was applied by the finalizer (consensus or fast path).
    pub fn on_block_applied(&mut self, block: Block, pool: &TransactionPool) -> Vec<Action> {
        if block.height <= self.isaac.latest_block().height {
            debug!(height = block.height, "stale block application ignored");
            return Vec::new();
        }

        info!(height = block.height, hash = ?block.hash, "latest block advanced");
        let height = block.height;
        self.isaac.set_latest_block(block);
        self.isaac.remove_running_rounds_with_same_height(height);
        self.parked.retain(|basis, _| basis.height > height);

        let mut actions = self.begin_round(height + 1, 0, pool);
        if let Some((waiting_for, ballot)) = self.deferred.take() {
            if waiting_for == height {
                debug!(height, "re-processing deferred ballot");
                let ctx = BallotContext::from_ballot(ballot);
                actions.extend(checker::run(self, ctx, pool, checker::AFTER_UNMARSHAL));
            } else if waiting_for > height {
                self.deferred = Some((waiting_for, ballot));
            }
        }
        actions
    }

    /// The finalizer failed; retry the height on a fresh round.
    pub fn on_block_apply_failed(
        &mut self,
        basis: VotingBasis,
        reason: &str,
        pool: &TransactionPool,
    ) -> Vec<Action> {
        warn!(%basis, reason, "block application failed");
        if basis.height != self.isaac.latest_block().height + 1 {
            return Vec::new();
        }
        self.deferred = None;
        self.abandon_round(pool)
    }

    /// One fetched block was applied during catch-up.
    pub fn on_sync_block_applied(&mut self, block: Block) -> Vec<Action> {
        if block.height > self.isaac.latest_block().height {
            let height = block.height;
            self.isaac.set_latest_block(block);
            self.isaac.remove_running_rounds_with_same_height(height);
        }
        Vec::new()
    }

    /// Catch-up finished; resume consensus at the new tip.
    pub fn on_sync_completed(&mut self, target: u64, pool: &TransactionPool) -> Vec<Action> {
        info!(target, latest = self.isaac.latest_block().height, "sync completed");
        self.sync.complete();
        let height = self.isaac.latest_block().height + 1;
        self.begin_round(height, 0, pool)
    }

    /// Catch-up failed; resume consensus and let the next lagging ballot
    /// re-trigger sync.
    pub fn on_sync_failed(&mut self, target: u64, reason: &str, pool: &TransactionPool) -> Vec<Action> {
        warn!(target, reason, "sync failed");
        self.sync.complete();
        let height = self.isaac.latest_block().height + 1;
        self.begin_round(height, 0, pool)
    }

    /// Abandon the current round: increment `round`, keep the height and
    /// the latest block, re-enter INIT.
    fn abandon_round(&mut self, pool: &TransactionPool) -> Vec<Action> {
        let (height, round) = match self.manager.current() {
            Some(current) => (current.basis.height, current.basis.round + 1),
            None => (self.isaac.latest_block().height + 1, 0),
        };
        debug!(height, round, "round abandoned");
        self.begin_round(height, round, pool)
    }

    /// Enter INIT for `(height, round)`; the elected proposer builds and
    /// broadcasts the proposal and immediately processes its own ballot.
    pub(crate) fn begin_round(
        &mut self,
        height: u64,
        round: u64,
        pool: &TransactionPool,
    ) -> Vec<Action> {
        let basis = VotingBasis {
            height,
            round,
            block_hash: self.isaac.latest_block().hash,
        };
        let Some(mut actions) = self.manager.enter_init(basis) else {
            return Vec::new();
        };

        let proposer = self.isaac.select_proposer(height, round);
        debug!(%basis, proposer = ?proposer, local = ?self.local_address(), "entered INIT");
        if proposer != self.local_address() {
            return actions;
        }

        let ballot = self.build_proposal(basis, pool);
        actions.push(Action::Broadcast {
            message: isaac_core::OutboundMessage::Ballot(Box::new(
                isaac_messages::BallotGossip::new(ballot.clone()),
            )),
            exclude: None,
        });
        info!(%basis, transactions = ballot.transactions().len(), "proposed INIT ballot");

        // Run our own proposal through the same pipeline so our SIGN vote
        // is recorded and broadcast exactly like everyone else's.
        let ctx = BallotContext::from_ballot(ballot);
        actions.extend(checker::run(self, ctx, pool, checker::AFTER_UNMARSHAL));
        actions
    }

    /// Assemble the INIT ballot: up to `block_max_transactions` of the
    /// oldest pooled transactions plus a fresh proposer transaction.
    fn build_proposal(&self, basis: VotingBasis, pool: &TransactionPool) -> Ballot {
        let tx_hashes = pool.available_for_proposal(self.config.block_max_transactions);
        let bodies = pool.bodies(&tx_hashes);
        let fee_total = bodies
            .iter()
            .map(|tx| tx.fee())
            .try_fold(Amount::ZERO, Amount::checked_add)
            .unwrap_or(Amount::ZERO);

        let inflation = if basis.height <= self.config.end_of_inflation {
            calculate_inflation(self.config.initial_balance, &self.config.inflation_ratio)
                .unwrap_or(Amount::ZERO)
        } else {
            Amount::ZERO
        };

        let proposer_transaction = ProposerTransaction::new(
            &self.keypair,
            &self.config.network_id,
            basis.height,
            fee_total,
            bodies.len() as u64,
            inflation,
            self.config.common_account,
            self.config.initial_balance,
            &self.config.inflation_ratio,
        );

        Ballot::new_init(
            basis,
            &self.keypair,
            &self.config.network_id,
            tx_hashes,
            proposer_transaction,
            self.confirmed_timestamp(),
        )
    }

    /// RFC 3339 timestamp from the runner-supplied clock.
    fn confirmed_timestamp(&self) -> String {
        chrono::DateTime::<chrono::Utc>::from_timestamp(
            self.now.as_secs() as i64,
            self.now.subsec_nanos(),
        )
        .unwrap_or_default()
        .to_rfc3339()
    }

    // Internal accessors for the checker pipeline.
    pub(crate) fn isaac_mut(&mut self) -> &mut IsaacState {
        &mut self.isaac
    }

    pub(crate) fn manager_mut(&mut self) -> &mut StateManager {
        &mut self.manager
    }

    pub(crate) fn sync_mut(&mut self) -> &mut SyncState {
        &mut self.sync
    }

    pub(crate) fn sync_ref(&self) -> &SyncState {
        &self.sync
    }

    pub(crate) fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub(crate) fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub(crate) fn park(&mut self, basis: VotingBasis, ctx: BallotContext) {
        self.parked.insert(basis, ctx);
    }

    pub(crate) fn is_parked(&self, basis: &VotingBasis) -> bool {
        self.parked.contains_key(basis)
    }

    pub(crate) fn defer_ballot(&mut self, waiting_for: u64, ballot: Ballot) {
        self.deferred = Some((waiting_for, ballot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isaac_core::TimerId;
    use isaac_messages::{BallotGossip, NetworkMessage};
    use isaac_types::test_utils::test_keypair;
    use isaac_types::{BallotState, VotingHole};

    fn validators(n: u8) -> (Vec<KeyPair>, ValidatorSet) {
        let kps: Vec<KeyPair> = (1..=n).map(test_keypair).collect();
        let set = ValidatorSet::new(kps.iter().map(|kp| kp.address()).collect());
        (kps, set)
    }

    fn genesis() -> Block {
        Block::genesis(test_keypair(200).address(), "2024-01-01T00:00:00+00:00".into())
    }

    /// A consensus state whose local node is NOT the proposer for
    /// `(1, 0)`, so `start` does not emit a proposal.
    fn non_proposer_state() -> (ConsensusState, Vec<KeyPair>) {
        let (kps, set) = validators(4);
        let config = ConsensusConfig::default();
        let probe = ConsensusState::new(kps[0].clone(), set.clone(), config.clone(), genesis());
        let elected = probe.isaac().select_proposer(1, 0);
        let local = kps.iter().find(|kp| kp.address() != elected).unwrap().clone();
        (
            ConsensusState::new(local, set, config, genesis()),
            kps,
        )
    }

    fn build_init(proposer: &KeyPair, state: &ConsensusState, round: u64) -> Ballot {
        let config = ConsensusConfig::default();
        let basis = VotingBasis {
            height: 1,
            round,
            block_hash: state.isaac().latest_block().hash,
        };
        let inflation =
            calculate_inflation(config.initial_balance, &config.inflation_ratio).unwrap();
        let ptx = ProposerTransaction::new(
            proposer,
            &config.network_id,
            basis.height,
            Amount::ZERO,
            0,
            inflation,
            config.common_account,
            config.initial_balance,
            &config.inflation_ratio,
        );
        Ballot::new_init(
            basis,
            proposer,
            &config.network_id,
            vec![],
            ptx,
            "2024-01-01T00:01:00+00:00".into(),
        )
    }

    fn elected_keypair(state: &ConsensusState, kps: &[KeyPair], height: u64, round: u64) -> KeyPair {
        let elected = state.isaac().select_proposer(height, round);
        kps.iter().find(|kp| kp.address() == elected).unwrap().clone()
    }

    #[test]
    fn sign_timeout_abandons_round_and_keeps_latest_block() {
        let (mut state, kps) = non_proposer_state();
        let pool = TransactionPool::new();
        let genesis_hash = state.isaac().latest_block().hash;

        let actions = state.start(&pool);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SetTimer { id: TimerId::Sign, .. })));
        assert_eq!(state.round_state().unwrap().basis.round, 0);

        let actions = state.on_sign_timer(&pool);
        assert_eq!(state.round_state().unwrap().basis.round, 1);
        assert_eq!(state.isaac().latest_block().hash, genesis_hash);
        // The new round re-arms the SIGN timeout.
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::SetTimer { id: TimerId::Sign, .. })));

        // An INIT ballot for the new round is accepted and parked for
        // resolution.
        let proposer = elected_keypair(&state, &kps, 1, 1);
        if proposer.address() == state.local_address() {
            // The local node proposes round 1 itself; its proposal is
            // already in flight.
            assert!(state.is_parked(&state.round_state().unwrap().basis));
            return;
        }
        let init = build_init(&proposer, &state, 1);
        let actions = state.handle_ballot(BallotGossip::new(init.clone()).to_bytes(), &pool);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::ResolveProposal { .. })));
        assert!(state.isaac().has_running_round(&init.basis()));
    }

    #[test]
    fn resolved_proposal_yields_sign_broadcast_and_transition() {
        let (mut state, kps) = non_proposer_state();
        let pool = TransactionPool::new();
        state.start(&pool);

        let proposer = elected_keypair(&state, &kps, 1, 0);
        let init = build_init(&proposer, &state, 0);
        state.handle_ballot(BallotGossip::new(init.clone()).to_bytes(), &pool);
        assert!(state.is_parked(&init.basis()));

        let actions =
            state.on_proposal_resolved(init.basis(), proposer.address(), true, None, &pool);
        let sign = actions.iter().find_map(|a| match a {
            Action::Broadcast { message, .. } => match message {
                isaac_core::OutboundMessage::Ballot(gossip) => Some(gossip.ballot.clone()),
                _ => None,
            },
            _ => None,
        });
        let sign = sign.expect("SIGN broadcast");
        assert_eq!(sign.state(), BallotState::Sign);
        assert_eq!(sign.vote(), VotingHole::Yes);
        assert_eq!(sign.source(), state.local_address());
        assert_eq!(state.round_state().unwrap().state, BallotState::Sign);
    }

    #[test]
    fn failed_resolution_votes_no() {
        let (mut state, kps) = non_proposer_state();
        let pool = TransactionPool::new();
        state.start(&pool);

        let proposer = elected_keypair(&state, &kps, 1, 0);
        let init = build_init(&proposer, &state, 0);
        state.handle_ballot(BallotGossip::new(init.clone()).to_bytes(), &pool);

        let actions = state.on_proposal_resolved(
            init.basis(),
            proposer.address(),
            false,
            Some("missing transaction".into()),
            &pool,
        );
        let sign = actions
            .iter()
            .find_map(|a| match a {
                Action::Broadcast { message, .. } => match message {
                    isaac_core::OutboundMessage::Ballot(gossip) => Some(gossip.ballot.clone()),
                    _ => None,
                },
                _ => None,
            })
            .expect("SIGN broadcast");
        assert_eq!(sign.vote(), VotingHole::No);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (mut state, _) = non_proposer_state();
        let pool = TransactionPool::new();
        state.start(&pool);

        assert!(state.handle_ballot(b"not json".to_vec(), &pool).is_empty());

        // A tampered signature is dropped at the unmarshal step.
        let stranger = test_keypair(99);
        let init = build_init(&stranger, &state, 0);
        let mut gossip = BallotGossip::new(init);
        gossip.ballot = {
            let raw = serde_json::to_string(&gossip.ballot).unwrap();
            let raw = raw.replace("\"round\":0", "\"round\":3");
            serde_json::from_str(&raw).unwrap()
        };
        assert!(state.handle_ballot(gossip.to_bytes(), &pool).is_empty());
        assert!(!state.isaac().has_running_round(&VotingBasis {
            height: 1,
            round: 3,
            block_hash: state.isaac().latest_block().hash,
        }));
    }

    #[test]
    fn unknown_validator_ballots_are_dropped() {
        let (mut state, _) = non_proposer_state();
        let pool = TransactionPool::new();
        state.start(&pool);

        let stranger = test_keypair(123);
        let init = build_init(&stranger, &state, 0);
        let actions = state.handle_ballot(BallotGossip::new(init.clone()).to_bytes(), &pool);
        assert!(actions.is_empty());
        assert!(!state.isaac().has_running_round(&init.basis()));
    }
}

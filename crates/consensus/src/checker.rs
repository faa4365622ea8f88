//! The ballot checker pipeline.
//!
//! Every inbound ballot runs through an ordered table of checks over a
//! shared [`BallotContext`]. Each check either continues, aborts the
//! pipeline with a clean **stop** sentinel, parks the ballot while the
//! runner resolves its proposal, or fails with an error kind; failures
//! are logged and the ballot is dropped.
//!
//! The canonical order:
//!
//! 1.  unmarshal & well-formedness
//! 2.  sync check (catch-up detection, off-by-one fast path)
//! 3.  known validator
//! 4.  already finished
//! 5.  already voted
//! 6.  vote
//! 7.  same proposer
//! 8.  check result
//! 9.  INIT: validate proposal (proposer-transaction checks, then park
//!     for the runner's fetch + state validation)
//! 10. SIGN broadcast
//! 11. transit to SIGN
//! 12. ACCEPT broadcast
//! 13. transit to ACCEPT
//! 14. finished store

use crate::round_vote::RoundVoteResult;
use crate::ConsensusState;
use isaac_core::{Action, OutboundMessage};
use isaac_mempool::TransactionPool;
use isaac_messages::{BallotGossip, NetworkMessage};
use isaac_types::{calculate_inflation, Amount, Ballot, BallotState, VotingHole};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Per-step pipeline outcome, other than plain continuation.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Clean termination; not an error.
    #[error("{0}")]
    Stop(&'static str),
    /// The ballot was parked awaiting proposal resolution.
    #[error("ballot parked awaiting proposal resolution")]
    Park,
    #[error("malformed ballot: {0}")]
    Malformed(String),
    #[error("ballot from unknown validator")]
    UnknownValidator,
    #[error("ballot already finished")]
    AlreadyFinished,
    #[error("ballot already voted")]
    AlreadyVoted,
    #[error("running round not found")]
    RunningRoundNotFound,
    /// An impossible state; the runner aborts on this.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// The record each check consumes and mutates.
#[derive(Debug)]
pub struct BallotContext {
    data: Option<Vec<u8>>,
    ballot: Option<Ballot>,
    /// The engine's own vote on this proposal.
    pub voting_hole: VotingHole,
    /// Whether this ballot recorded anything new.
    pub is_new: bool,
    /// Whether the ballot's phase reached its threshold.
    pub voting_finished: bool,
    /// The phase result when finished.
    pub finished_hole: VotingHole,
    /// Tally snapshot for logging.
    pub result: RoundVoteResult,
    actions: Vec<Action>,
}

impl BallotContext {
    /// Context for a raw network frame.
    pub fn from_wire(data: Vec<u8>) -> Self {
        Self::empty(Some(data), None)
    }

    /// Context for an already-parsed ballot (own proposals, deferred
    /// re-processing); starts after the unmarshal step.
    pub fn from_ballot(ballot: Ballot) -> Self {
        Self::empty(None, Some(ballot))
    }

    fn empty(data: Option<Vec<u8>>, ballot: Option<Ballot>) -> Self {
        BallotContext {
            data,
            ballot,
            voting_hole: VotingHole::NotYet,
            is_new: false,
            voting_finished: false,
            finished_hole: VotingHole::NotYet,
            result: RoundVoteResult::new(),
            actions: Vec::new(),
        }
    }

    pub fn ballot(&self) -> Option<&Ballot> {
        self.ballot.as_ref()
    }

    fn require_ballot(&self) -> Result<Ballot, CheckError> {
        self.ballot
            .clone()
            .ok_or_else(|| CheckError::Fatal("check ran before unmarshal".into()))
    }

    fn push_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

type CheckFn = fn(&mut ConsensusState, &mut BallotContext, &TransactionPool) -> Result<(), CheckError>;

/// The pipeline, as data.
pub const BALLOT_CHECKS: &[(&str, CheckFn)] = &[
    ("unmarshal", ballot_unmarshal),
    ("sync", ballot_check_sync),
    ("known-validator", ballot_not_from_known_validators),
    ("already-finished", ballot_already_finished),
    ("already-voted", ballot_already_voted),
    ("vote", ballot_vote),
    ("same-proposer", ballot_is_same_proposer),
    ("check-result", ballot_check_result),
    ("init-validate-transactions", init_ballot_validate_transactions),
    ("sign-broadcast", sign_ballot_broadcast),
    ("transit-sign", transit_state_to_sign),
    ("accept-broadcast", accept_ballot_broadcast),
    ("transit-accept", transit_state_to_accept),
    ("finished-store", finished_ballot_store),
];

/// Start index for contexts built from an already-parsed ballot.
pub const AFTER_UNMARSHAL: usize = 1;
/// Resume index after the runner resolves a parked proposal.
pub const RESUME_AFTER_VALIDATE: usize = 9;

/// Run the pipeline from `start` to completion.
pub fn run(
    state: &mut ConsensusState,
    mut ctx: BallotContext,
    pool: &TransactionPool,
    start: usize,
) -> Vec<Action> {
    for (name, check) in &BALLOT_CHECKS[start..] {
        match check(state, &mut ctx, pool) {
            Ok(()) => continue,
            Err(CheckError::Stop(reason)) => {
                trace!(check = name, reason, "pipeline stopped");
                break;
            }
            Err(CheckError::Park) => {
                let actions = ctx.take_actions();
                if let Some(basis) = ctx.ballot().map(|b| b.basis()) {
                    state.park(basis, ctx);
                }
                return actions;
            }
            Err(CheckError::Fatal(reason)) => {
                error!(check = name, %reason, "fatal pipeline failure");
                break;
            }
            Err(e) => {
                debug!(check = name, error = %e, "ballot dropped");
                break;
            }
        }
    }
    ctx.take_actions()
}

/// Step 1: parse the frame, verify signature and structure.
fn ballot_unmarshal(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let data = ctx
        .data
        .take()
        .ok_or_else(|| CheckError::Malformed("empty frame".into()))?;
    let gossip =
        BallotGossip::from_bytes(&data).map_err(|e| CheckError::Malformed(e.to_string()))?;
    let ballot = gossip.into_ballot();
    ballot
        .well_formed(&state.config().network_id)
        .map_err(|e| CheckError::Malformed(e.to_string()))?;

    debug!(
        basis = %ballot.basis(),
        state = %ballot.state(),
        vote = %ballot.vote(),
        proposer = ?ballot.proposer(),
        from = ?ballot.source(),
        "ballot verified"
    );
    ctx.ballot = Some(ballot);
    Ok(())
}

/// Step 2: catch-up detection.
///
/// ACCEPT/YES ballots from the legitimately elected proposer double as
/// height reports. A ballot deciding a height we cannot participate in
/// either starts a range sync or, when the majority target is exactly one
/// block ahead, finalizes from the cached latest ballot and re-processes
/// this one after the commit.
fn ballot_check_sync(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    let basis = ballot.basis();
    let latest_height = state.isaac().latest_block().height;

    // Height reports are only trusted from set members carrying the
    // legitimately elected proposer, even though membership is not
    // enforced until the next step.
    let qualifying = ballot.state() == BallotState::Accept
        && ballot.vote() == VotingHole::Yes
        && state.isaac().validators().contains(&ballot.source())
        && ballot.proposer() == state.isaac().select_proposer(basis.height, basis.round);

    if state.sync_ref().is_syncing() {
        // ACCEPT ballots keep feeding the peer-height map during sync;
        // nothing votes until the sync worker is done.
        if qualifying {
            state
                .isaac_mut()
                .save_node_height(ballot.source(), basis.height);
        }
        return Err(CheckError::Stop("node is syncing"));
    }

    if qualifying {
        state
            .isaac_mut()
            .save_node_height(ballot.source(), basis.height);
    }

    if basis.height <= latest_height + 1 {
        if qualifying && basis.height == latest_height + 1 {
            state.isaac_mut().set_latest_ballot(ballot);
        }
        return Ok(());
    }
    if !qualifying {
        // Too far ahead and not a finalization carrier; the
        // already-finished check drops it.
        return Ok(());
    }

    let cached = state.isaac().latest_ballot().cloned();
    state.isaac_mut().set_latest_ballot(ballot.clone());

    let Some((target, validators)) = state.isaac().get_sync_info() else {
        return Err(CheckError::Stop("waiting for more peer height reports"));
    };

    if latest_height + 1 < target {
        if state.sync_mut().begin(target) {
            debug!(target, latest_height, "starting block sync");
            ctx.push_action(Action::StartSync { target, validators });
        }
        return Err(CheckError::Stop("ballot makes node in sync"));
    }

    // Off by exactly one: finalize from the cached latest ballot, then
    // re-process this ballot once the block commits. No range fetch.
    if let Some(cached) = cached.filter(|c| c.basis().height == latest_height + 1) {
        if let Some(ptx) =
            state.isaac().proposer_transaction_for(&cached.basis(), &cached.proposer())
        {
            debug!(
                height = latest_height + 1,
                "finalizing from cached latest ballot"
            );
            let pooled = pool.bodies(cached.transactions());
            ctx.push_action(Action::FinalizeBlock {
                ballot: cached,
                proposer_transaction: ptx,
                pooled,
            });
            state.defer_ballot(latest_height + 1, ballot);
            return Err(CheckError::Stop("ballot got consensus"));
        }
    }

    // The missing block's payload was never seen; fall back to a fetch.
    if state.sync_mut().begin(target) {
        ctx.push_action(Action::StartSync { target, validators });
    }
    Err(CheckError::Stop("ballot makes node in sync"))
}

/// Step 3: the signer must be a known validator.
fn ballot_not_from_known_validators(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if state.isaac().validators().contains(&ballot.source()) {
        return Ok(());
    }
    debug!(from = ?ballot.source(), "ballot from unknown validator");
    Err(CheckError::UnknownValidator)
}

/// Step 4: the basis must still be decidable.
fn ballot_already_finished(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if !state.isaac().is_available_round(&ballot.basis()) {
        return Err(CheckError::AlreadyFinished);
    }
    Ok(())
}

/// Step 5: duplicate votes from the same source are dropped.
fn ballot_already_voted(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if state.isaac().is_voted(&ballot) {
        return Err(CheckError::AlreadyVoted);
    }
    Ok(())
}

/// Step 6: record the vote, creating the running round lazily.
fn ballot_vote(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    ctx.is_new = state.isaac_mut().vote(&ballot);
    trace!(basis = %ballot.basis(), new = ctx.is_new, "ballot voted");
    Ok(())
}

/// Step 7: a ballot naming a different proposer than the locally elected
/// one is voted against, but keeps being processed.
fn ballot_is_same_proposer(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ctx.voting_hole != VotingHole::NotYet {
        return Ok(());
    }
    if ballot.is_from_proposer() && ballot.source() == state.local_address() {
        return Ok(());
    }
    if !state.isaac().has_running_round(&ballot.basis()) {
        return Err(CheckError::RunningRoundNotFound);
    }
    if !state.isaac().has_same_proposer(&ballot) {
        ctx.voting_hole = VotingHole::No;
        debug!(proposer = ?ballot.proposer(), "ballot names a different proposer");
    }
    Ok(())
}

/// Step 8: tally the ballot's phase.
fn ballot_check_result(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if !ballot.state().is_valid_for_vote() {
        return Ok(());
    }
    let (result, hole, finished) = state.isaac().can_get_voting_result(&ballot);
    ctx.result = result;
    ctx.voting_finished = finished;
    ctx.finished_hole = hole;
    if finished {
        debug!(
            basis = %ballot.basis(),
            phase = %ballot.state(),
            result = %hole,
            votes = ctx.result.len(),
            "voting finished"
        );
    }
    Ok(())
}

/// Step 9: first sight of an INIT proposal. The proposer transaction is
/// checked against configuration here; the transaction list is handed to
/// the runner to fetch missing bodies and validate against state, and the
/// ballot parks until the callback.
fn init_ballot_validate_transactions(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ballot.state() != BallotState::Init {
        return Ok(());
    }
    if ctx.voting_finished {
        return Ok(());
    }
    if state
        .isaac()
        .is_voted_by_node(&ballot, BallotState::Sign, &state.local_address())
    {
        return Err(CheckError::AlreadyVoted);
    }
    if ctx.voting_hole != VotingHole::NotYet {
        // Already decided NO (conflicting proposer); skip validation.
        return Ok(());
    }

    if let Err(reason) = validate_proposer_transaction(state, &ballot) {
        debug!(reason, "proposer transaction rejected");
        ctx.voting_hole = VotingHole::No;
        return Ok(());
    }

    if state.is_parked(&ballot.basis()) {
        return Err(CheckError::Stop("proposal resolution already in flight"));
    }
    let pooled = pool.bodies(ballot.transactions());
    ctx.push_action(Action::ResolveProposal {
        basis: ballot.basis(),
        proposer: ballot.proposer(),
        transactions: ballot.transactions().to_vec(),
        pooled,
    });
    Err(CheckError::Park)
}

/// The proposer-transaction field checks (fee-sum equality is enforced by
/// the finalizer, where the resolved transaction set is known).
fn validate_proposer_transaction(
    state: &ConsensusState,
    ballot: &Ballot,
) -> Result<(), &'static str> {
    let config = state.config();
    let basis = ballot.basis();
    let ptx = ballot
        .proposer_transaction()
        .ok_or("INIT ballot carries no proposer transaction")?;
    if ptx.source() != ballot.proposer() {
        return Err("proposer transaction signed by someone else");
    }

    let collect = ptx
        .collect_tx_fee()
        .map_err(|_| "missing collect-tx-fee operation")?;
    if collect.target != config.common_account {
        return Err("collect-tx-fee target is not the common account");
    }
    if collect.height != basis.height {
        return Err("collect-tx-fee height mismatch");
    }

    let inflation = ptx.inflation().map_err(|_| "missing inflation operation")?;
    if inflation.target != config.common_account {
        return Err("inflation target is not the common account");
    }
    if inflation.ratio != config.inflation_ratio {
        return Err("inflation ratio mismatch");
    }
    if inflation.initial_balance != config.initial_balance {
        return Err("inflation initial balance mismatch");
    }
    if inflation.height != basis.height {
        return Err("inflation height mismatch");
    }
    let expected = if basis.height <= config.end_of_inflation {
        calculate_inflation(config.initial_balance, &config.inflation_ratio)
            .unwrap_or(Amount::ZERO)
    } else {
        Amount::ZERO
    };
    if inflation.amount != expected {
        return Err("inflation amount mismatch");
    }
    Ok(())
}

/// Step 10: broadcast our SIGN ballot with the decided vote.
fn sign_ballot_broadcast(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ballot.state() != BallotState::Init {
        return Ok(());
    }
    if ctx.voting_hole == VotingHole::NotYet {
        return Ok(());
    }
    if !state.isaac().has_running_round(&ballot.basis()) {
        return Err(CheckError::RunningRoundNotFound);
    }

    let own = ballot.derive(
        BallotState::Sign,
        ctx.voting_hole,
        state.keypair(),
        &state.config().network_id,
    );
    state.isaac_mut().vote(&own);
    debug!(basis = %ballot.basis(), vote = %ctx.voting_hole, "SIGN ballot will be broadcast");
    ctx.push_action(Action::Broadcast {
        message: OutboundMessage::Ballot(Box::new(BallotGossip::new(own))),
        exclude: None,
    });
    Ok(())
}

/// Step 11.
fn transit_state_to_sign(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ballot.state() != BallotState::Init {
        return Ok(());
    }
    if let Some(actions) = state
        .manager_mut()
        .transit(ballot.basis(), BallotState::Sign)
    {
        ctx.actions.extend(actions);
    }
    Ok(())
}

/// Step 12: a finished SIGN phase yields our ACCEPT ballot.
fn accept_ballot_broadcast(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ballot.state() != BallotState::Sign {
        return Ok(());
    }
    if !ctx.voting_finished {
        return Ok(());
    }
    if state
        .isaac()
        .is_voted_by_node(&ballot, BallotState::Accept, &state.local_address())
    {
        return Ok(());
    }
    if !state.isaac().has_running_round(&ballot.basis()) {
        return Err(CheckError::RunningRoundNotFound);
    }

    let own = ballot.derive(
        BallotState::Accept,
        ctx.finished_hole,
        state.keypair(),
        &state.config().network_id,
    );
    state.isaac_mut().vote(&own);
    debug!(basis = %ballot.basis(), vote = %ctx.finished_hole, "ACCEPT ballot will be broadcast");
    ctx.push_action(Action::Broadcast {
        message: OutboundMessage::Ballot(Box::new(BallotGossip::new(own))),
        exclude: None,
    });
    Ok(())
}

/// Step 13.
fn transit_state_to_accept(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    _pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ballot.state() != BallotState::Sign || !ctx.voting_finished {
        return Ok(());
    }
    if let Some(actions) = state
        .manager_mut()
        .transit(ballot.basis(), BallotState::Accept)
    {
        ctx.actions.extend(actions);
    }
    Ok(())
}

/// Step 14: a finished ACCEPT phase either stores the block or abandons
/// the round.
fn finished_ballot_store(
    state: &mut ConsensusState,
    ctx: &mut BallotContext,
    pool: &TransactionPool,
) -> Result<(), CheckError> {
    let ballot = ctx.require_ballot()?;
    if ballot.state() != BallotState::Accept || !ctx.voting_finished {
        return Ok(());
    }
    let basis = ballot.basis();

    match ctx.finished_hole {
        VotingHole::Yes => {
            let Some(ptx) = state
                .isaac()
                .proposer_transaction_for(&basis, &ballot.proposer())
            else {
                // The INIT payload was never seen; a later ballot will
                // drive the sync path instead.
                warn!(%basis, "ACCEPT quorum without proposal payload");
                return Err(CheckError::Stop("missing proposal payload"));
            };
            let pooled = pool.bodies(ballot.transactions());
            ctx.push_action(Action::FinalizeBlock {
                ballot: ballot.clone(),
                proposer_transaction: ptx,
                pooled,
            });
            if let Some(actions) = state.manager_mut().transit(basis, BallotState::AllConfirm) {
                ctx.actions.extend(actions);
            }
            state.isaac_mut().set_latest_voting_basis(basis);
            state
                .isaac_mut()
                .remove_running_rounds_with_same_height(basis.height);
            Err(CheckError::Stop("ballot got consensus and will be stored"))
        }
        VotingHole::No | VotingHole::Exp => {
            state.isaac_mut().set_latest_voting_basis(basis);
            state
                .isaac_mut()
                .remove_running_rounds_with_same_height(basis.height);
            let actions = state.begin_round(basis.height, basis.round + 1, pool);
            ctx.actions.extend(actions);
            Err(CheckError::Stop("ballot got consensus"))
        }
        VotingHole::NotYet => Err(CheckError::Fatal(
            "voting finished with NOTYET result".into(),
        )),
    }
}

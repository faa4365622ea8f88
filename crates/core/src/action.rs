//! Action types for the deterministic state machine.

use crate::{message::OutboundMessage, TimerId};
use isaac_types::{
    Address, Ballot, Block, Hash, ProposerTransaction, Transaction, VotingBasis,
};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Best-effort send to every known validator, minus `exclude`.
    Broadcast {
        message: OutboundMessage,
        exclude: Option<Address>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration, replacing any timer with the
    /// same id.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated work (returns a callback event)
    // ═══════════════════════════════════════════════════════════════════════
    /// Resolve an INIT proposal: fetch the transactions missing from the
    /// pool from the proposer, validate every proposal transaction against
    /// current state, and stage fetched bodies into the persistent pool.
    ///
    /// Returns [`Event::ProposalResolved`](crate::Event). This is the only
    /// long-blocking step of the ballot pipeline; the ballot is parked
    /// until the callback arrives.
    ResolveProposal {
        basis: VotingBasis,
        proposer: Address,
        /// Full ordered transaction hash list of the proposal.
        transactions: Vec<Hash>,
        /// Bodies already held in the in-memory pool.
        pooled: Vec<Transaction>,
    },

    /// Apply a confirmed ballot to storage through the block finalizer.
    ///
    /// Returns [`Event::BlockApplied`](crate::Event) or
    /// [`Event::BlockApplyFailed`](crate::Event).
    FinalizeBlock {
        ballot: Ballot,
        proposer_transaction: ProposerTransaction,
        /// Ordinary transaction bodies resolvable from the in-memory pool;
        /// the finalizer resolves the rest from the persistent pool.
        pooled: Vec<Transaction>,
    },

    /// Re-validate pooled transactions whose sources a commit touched.
    ///
    /// Returns [`Event::PooledInvalidated`](crate::Event).
    RevalidatePooled { transactions: Vec<Transaction> },

    /// Fetch and apply blocks `[latest + 1, target]` from the given peers.
    ///
    /// Returns a stream of [`Event::SyncBlockApplied`](crate::Event)
    /// followed by `SyncCompleted` or `SyncFailed`.
    StartSync {
        target: u64,
        validators: Vec<Address>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════
    /// Record an accepted client/gossip transaction in the history store.
    PersistTransaction { transaction: Transaction },

    // ═══════════════════════════════════════════════════════════════════════
    // External notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Publish a committed block to downstream consumers.
    EmitCommittedBlock { block: Block },

    /// Answer a pending client submission.
    ClientResponse {
        tx_hash: Hash,
        accepted: bool,
        reason: Option<String>,
    },
}

impl Action {
    /// Check if this action is delegated work (returns a callback event).
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            Action::ResolveProposal { .. }
                | Action::FinalizeBlock { .. }
                | Action::RevalidatePooled { .. }
                | Action::StartSync { .. }
        )
    }

    /// Get the action type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::ResolveProposal { .. } => "ResolveProposal",
            Action::FinalizeBlock { .. } => "FinalizeBlock",
            Action::RevalidatePooled { .. } => "RevalidatePooled",
            Action::StartSync { .. } => "StartSync",
            Action::PersistTransaction { .. } => "PersistTransaction",
            Action::EmitCommittedBlock { .. } => "EmitCommittedBlock",
            Action::ClientResponse { .. } => "ClientResponse",
        }
    }
}

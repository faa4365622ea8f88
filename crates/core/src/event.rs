//! Event types for the deterministic state machine.

use isaac_types::{Address, Block, Transaction, VotingBasis};

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// The SIGN-phase timeout for the current round expired.
    SignTimer,

    /// The ACCEPT-phase timeout for the current round expired.
    AcceptTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// A raw ballot frame arrived from the network.
    ///
    /// Deliberately undecoded: parsing and signature verification are the
    /// first step of the ballot checker pipeline.
    BallotReceived { data: Vec<u8> },

    /// A validated transaction arrived via gossip from another validator.
    ///
    /// `from` is the forwarding peer, excluded from the re-broadcast.
    TransactionReceived {
        transaction: Transaction,
        from: Address,
    },

    /// A validated transaction was submitted by a client.
    ClientTransactionSubmitted { transaction: Transaction },

    // ═══════════════════════════════════════════════════════════════════════
    // Runner callbacks
    // ═══════════════════════════════════════════════════════════════════════
    /// The runner finished resolving an INIT proposal: missing transactions
    /// were fetched from the proposer and every proposal transaction was
    /// validated against current state.
    ///
    /// Callback from [`Action::ResolveProposal`](crate::Action).
    ProposalResolved {
        basis: VotingBasis,
        proposer: Address,
        valid: bool,
        /// Rejection detail when `valid` is false.
        reason: Option<String>,
    },

    /// A confirmed ballot was applied to storage as a block.
    ///
    /// Callback from [`Action::FinalizeBlock`](crate::Action).
    BlockApplied {
        block: Block,
        /// Source accounts whose state the block changed; pooled
        /// transactions from these sources must be re-validated.
        updated_sources: Vec<Address>,
    },

    /// Applying a confirmed ballot failed.
    BlockApplyFailed { basis: VotingBasis, reason: String },

    /// The runner re-validated pooled transactions after a commit and found
    /// these now invalid.
    ///
    /// Callback from [`Action::RevalidatePooled`](crate::Action).
    PooledInvalidated { hashes: Vec<isaac_types::Hash> },

    // ═══════════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════════
    /// The sync worker applied one fetched block.
    SyncBlockApplied { block: Block },

    /// The sync worker reached the target height.
    SyncCompleted { target: u64 },

    /// The sync worker gave up on the current target.
    SyncFailed { target: u64, reason: String },
}

impl Event {
    /// The event type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::SignTimer => "SignTimer",
            Event::AcceptTimer => "AcceptTimer",
            Event::BallotReceived { .. } => "BallotReceived",
            Event::TransactionReceived { .. } => "TransactionReceived",
            Event::ClientTransactionSubmitted { .. } => "ClientTransactionSubmitted",
            Event::ProposalResolved { .. } => "ProposalResolved",
            Event::BlockApplied { .. } => "BlockApplied",
            Event::BlockApplyFailed { .. } => "BlockApplyFailed",
            Event::PooledInvalidated { .. } => "PooledInvalidated",
            Event::SyncBlockApplied { .. } => "SyncBlockApplied",
            Event::SyncCompleted { .. } => "SyncCompleted",
            Event::SyncFailed { .. } => "SyncFailed",
        }
    }
}

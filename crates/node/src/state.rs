//! Node state machine.
//!
//! Composes the consensus engine and the transaction pool into a single
//! state machine and routes events between them. The transaction intake
//! pipeline lives here: runners pre-validate raw submissions against
//! storage (well-formedness, history, state checks) and deliver typed
//! events; this machine applies the pool rules and emits the persist,
//! broadcast and client-response actions.

use isaac_consensus::ConsensusState;
use isaac_core::{Action, Event, OutboundMessage, StateMachine};
use isaac_mempool::{PoolError, TransactionPool};
use isaac_messages::TransactionGossip;
use isaac_types::{
    Address, Block, ConsensusConfig, KeyPair, Transaction, ValidatorSet,
};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Combined node state machine.
pub struct NodeStateMachine {
    consensus: ConsensusState,
    pool: TransactionPool,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("address", &self.consensus.local_address())
            .field("latest_height", &self.consensus.isaac().latest_block().height)
            .field("pool_size", &self.pool.len())
            .field("syncing", &self.consensus.is_syncing())
            .finish()
    }
}

impl NodeStateMachine {
    pub fn new(
        keypair: KeyPair,
        validators: ValidatorSet,
        config: ConsensusConfig,
        latest_block: Block,
    ) -> Self {
        NodeStateMachine {
            consensus: ConsensusState::new(keypair, validators, config, latest_block),
            pool: TransactionPool::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.consensus.local_address()
    }

    pub fn consensus(&self) -> &ConsensusState {
        &self.consensus
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn latest_block(&self) -> &Block {
        self.consensus.isaac().latest_block()
    }

    pub fn is_syncing(&self) -> bool {
        self.consensus.is_syncing()
    }

    /// Start consensus from the stored latest block. Returns the initial
    /// actions (round timers, possibly our own proposal).
    pub fn start(&mut self) -> Vec<Action> {
        info!(
            address = ?self.address(),
            height = self.latest_block().height,
            "starting consensus"
        );
        self.consensus.start(&self.pool)
    }

    /// Client intake: the runner has already unmarshalled and validated
    /// the transaction against history and state.
    #[instrument(skip(self, transaction), fields(tx_hash = ?transaction.hash()))]
    fn on_client_transaction(&mut self, transaction: Transaction) -> Vec<Action> {
        let tx_hash = transaction.hash();
        match self.pool.add(transaction.clone()) {
            Ok(()) => {}
            Err(e) => {
                debug!(error = %e, "client transaction rejected by pool");
                return vec![Action::ClientResponse {
                    tx_hash,
                    accepted: false,
                    reason: Some(reject_reason(&e).to_string()),
                }];
            }
        }
        info!(tx_hash = ?tx_hash, pool_size = self.pool.len(), "transaction added to pool");

        vec![
            Action::PersistTransaction {
                transaction: transaction.clone(),
            },
            Action::Broadcast {
                message: OutboundMessage::Transaction(Box::new(TransactionGossip::new(
                    transaction,
                ))),
                exclude: None,
            },
            Action::ClientResponse {
                tx_hash,
                accepted: true,
                reason: None,
            },
        ]
    }

    /// Gossip intake: like client intake, but re-broadcast excludes the
    /// forwarding peer and duplicates are dropped silently.
    #[instrument(skip(self, transaction), fields(tx_hash = ?transaction.hash()))]
    fn on_transaction_gossip(&mut self, transaction: Transaction, from: Address) -> Vec<Action> {
        match self.pool.add(transaction.clone()) {
            Ok(()) => {}
            Err(e) => {
                debug!(error = %e, "gossiped transaction dropped");
                return Vec::new();
            }
        }

        vec![
            Action::PersistTransaction {
                transaction: transaction.clone(),
            },
            Action::Broadcast {
                message: OutboundMessage::Transaction(Box::new(TransactionGossip::new(
                    transaction,
                ))),
                exclude: Some(from),
            },
        ]
    }

    /// Post-commit pool maintenance: drop every transaction the block
    /// confirmed, then ask the runner to re-validate pooled transactions
    /// whose sources the block touched.
    fn reorganize_pool(&mut self, block: &Block, updated_sources: &[Address]) -> Vec<Action> {
        self.pool.remove(block.transactions.iter());

        let stale_candidates: Vec<Transaction> = updated_sources
            .iter()
            .filter_map(|source| self.pool.get_from_source(source).cloned())
            .collect();
        if stale_candidates.is_empty() {
            return Vec::new();
        }
        vec![Action::RevalidatePooled {
            transactions: stale_candidates,
        }]
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::SignTimer => self.consensus.on_sign_timer(&self.pool),
            Event::AcceptTimer => self.consensus.on_accept_timer(&self.pool),

            Event::BallotReceived { data } => self.consensus.handle_ballot(data, &self.pool),

            Event::ClientTransactionSubmitted { transaction } => {
                self.on_client_transaction(transaction)
            }
            Event::TransactionReceived { transaction, from } => {
                self.on_transaction_gossip(transaction, from)
            }

            Event::ProposalResolved {
                basis,
                proposer,
                valid,
                reason,
            } => self
                .consensus
                .on_proposal_resolved(basis, proposer, valid, reason, &self.pool),

            Event::BlockApplied {
                block,
                updated_sources,
            } => {
                let mut actions = vec![Action::EmitCommittedBlock {
                    block: block.clone(),
                }];
                actions.extend(self.reorganize_pool(&block, &updated_sources));
                actions.extend(self.consensus.on_block_applied(block, &self.pool));
                actions
            }
            Event::BlockApplyFailed { basis, reason } => self
                .consensus
                .on_block_apply_failed(basis, &reason, &self.pool),

            Event::PooledInvalidated { hashes } => {
                self.pool.remove(hashes.iter());
                Vec::new()
            }

            Event::SyncBlockApplied { block } => {
                let mut actions = vec![Action::EmitCommittedBlock {
                    block: block.clone(),
                }];
                self.pool.remove(block.transactions.iter());
                actions.extend(self.consensus.on_sync_block_applied(block));
                actions
            }
            Event::SyncCompleted { target } => self.consensus.on_sync_completed(target, &self.pool),
            Event::SyncFailed { target, reason } => {
                self.consensus.on_sync_failed(target, &reason, &self.pool)
            }
        }
    }

    fn set_now(&mut self, now: Duration) {
        self.consensus.set_now(now);
    }
}

fn reject_reason(error: &PoolError) -> &'static str {
    match error {
        PoolError::AlreadyKnown => "transaction already known",
        PoolError::DuplicateSource => "source already has a pending transaction",
    }
}

//! The production event loop.
//!
//! `NodeRunner::run` owns the node state machine: it drains a single
//! event queue, runs each event to completion, and executes the returned
//! actions. Timers, transport listeners, proposal fetches and sync
//! workers all run as separate tasks that only communicate through the
//! event queue, which keeps consensus state mutation single-threaded.

use crate::fetch::resolve_proposal;
use crate::serve;
use crate::sync::{run_sync, SyncConfig};
use crate::timers::TimerManager;
use crate::transport::Transport;
use isaac_core::{Action, Event, StateMachine};
use isaac_ledger::{
    finish_ballot, parse_transaction, preflight_transaction, save_tx_history,
    validate_transaction, IntakeError,
};
use isaac_messages::Envelope;
use isaac_node::NodeStateMachine;
use isaac_storage::Store;
use isaac_types::{Address, Block, ConsensusConfig, Hash};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const EVENT_QUEUE_DEPTH: usize = 1024;

/// Outcome of a client submission, published on the ack channel.
#[derive(Debug, Clone)]
pub struct ClientAck {
    pub tx_hash: Hash,
    pub accepted: bool,
    pub reason: Option<String>,
}

/// Cheap handle for transports and API surfaces to talk to a running
/// node.
#[derive(Clone)]
pub struct RunnerHandle {
    event_tx: mpsc::Sender<Event>,
    store: Store,
    config: ConsensusConfig,
    committed_tx: broadcast::Sender<Block>,
    ack_tx: broadcast::Sender<ClientAck>,
}

impl RunnerHandle {
    /// Submit a raw client transaction. Rejections are returned
    /// immediately; acceptance is confirmed asynchronously on the ack
    /// channel once the pool admits it.
    pub async fn submit_transaction(&self, data: &[u8]) -> Result<Hash, IntakeError> {
        let transaction = parse_transaction(data)?;
        preflight_transaction(&self.store, &transaction, &self.config.network_id)?;
        let hash = transaction.hash();
        let _ = self
            .event_tx
            .send(Event::ClientTransactionSubmitted { transaction })
            .await;
        Ok(hash)
    }

    /// Deliver one inbound broadcast frame from `from`.
    pub async fn deliver_frame(&self, data: &[u8], from: Address) {
        match Envelope::from_bytes(data) {
            Ok(Envelope::Ballot(gossip)) => {
                use isaac_messages::NetworkMessage;
                let _ = self
                    .event_tx
                    .send(Event::BallotReceived {
                        data: gossip.to_bytes(),
                    })
                    .await;
            }
            Ok(Envelope::Transaction(gossip)) => {
                let transaction = gossip.into_transaction();
                if let Err(e) =
                    preflight_transaction(&self.store, &transaction, &self.config.network_id)
                {
                    debug!(error = %e, "gossiped transaction dropped at intake");
                    return;
                }
                let _ = self
                    .event_tx
                    .send(Event::TransactionReceived { transaction, from })
                    .await;
            }
            Err(e) => {
                debug!(error = %e, "malformed inbound frame dropped");
            }
        }
    }

    /// Answer a peer's directed transaction fetch.
    pub fn serve_transactions(&self, hashes: &[Hash]) -> Vec<u8> {
        serve::serve_transactions(&self.store, hashes)
    }

    /// Answer a peer's directed block-range fetch.
    pub fn serve_blocks(&self, from_height: u64, to_height: u64) -> Vec<u8> {
        serve::serve_blocks(&self.store, from_height, to_height)
    }

    /// Committed blocks, as they are stored.
    pub fn subscribe_committed(&self) -> broadcast::Receiver<Block> {
        self.committed_tx.subscribe()
    }

    /// Client submission outcomes.
    pub fn subscribe_acks(&self) -> broadcast::Receiver<ClientAck> {
        self.ack_tx.subscribe()
    }
}

/// The production runner.
pub struct NodeRunner<T: Transport> {
    node: NodeStateMachine,
    store: Store,
    config: ConsensusConfig,
    sync_config: SyncConfig,
    transport: Arc<T>,
    timers: TimerManager,
    event_tx: mpsc::Sender<Event>,
    event_rx: mpsc::Receiver<Event>,
    committed_tx: broadcast::Sender<Block>,
    ack_tx: broadcast::Sender<ClientAck>,
}

impl<T: Transport> NodeRunner<T> {
    pub fn new(
        node: NodeStateMachine,
        store: Store,
        config: ConsensusConfig,
        sync_config: SyncConfig,
        transport: Arc<T>,
    ) -> (Self, RunnerHandle) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (committed_tx, _) = broadcast::channel(64);
        let (ack_tx, _) = broadcast::channel(256);

        let handle = RunnerHandle {
            event_tx: event_tx.clone(),
            store: store.clone(),
            config: config.clone(),
            committed_tx: committed_tx.clone(),
            ack_tx: ack_tx.clone(),
        };
        let timers = TimerManager::new(event_tx.clone());
        (
            NodeRunner {
                node,
                store,
                config,
                sync_config,
                transport,
                timers,
                event_tx,
                event_rx,
                committed_tx,
                ack_tx,
            },
            handle,
        )
    }

    /// Run until the event channel closes.
    pub async fn run(mut self) {
        info!(address = ?self.node.address(), "node runner started");
        self.node.set_now(unix_now());
        let actions = self.node.start();
        self.execute_all(actions).await;

        while let Some(event) = self.event_rx.recv().await {
            self.node.set_now(unix_now());
            let actions = self.node.handle(event);
            self.execute_all(actions).await;
        }
        info!("node runner stopped");
    }

    async fn execute_all(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::Broadcast { message, exclude } => {
                self.transport.broadcast(message.to_bytes(), exclude);
            }

            Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),
            Action::CancelTimer { id } => self.timers.cancel_timer(id),

            Action::ResolveProposal {
                basis,
                proposer,
                transactions,
                pooled,
            } => {
                let transport = Arc::clone(&self.transport);
                let store = self.store.clone();
                let config = self.config.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let event = resolve_proposal(
                        transport.as_ref(),
                        &store,
                        &config,
                        basis,
                        proposer,
                        transactions,
                        pooled,
                    )
                    .await;
                    let _ = event_tx.send(event).await;
                });
            }

            Action::FinalizeBlock {
                ballot,
                proposer_transaction,
                pooled,
            } => {
                // Short-lived batch; blocking storage I/O is acceptable
                // here because commit must complete before the next
                // ballot is processed anyway.
                let basis = ballot.basis();
                match finish_ballot(
                    &self.store,
                    &ballot,
                    &proposer_transaction,
                    &pooled,
                    &self.config,
                ) {
                    Ok(outcome) => {
                        let _ = self
                            .event_tx
                            .send(Event::BlockApplied {
                                block: outcome.block,
                                updated_sources: outcome.updated_sources,
                            })
                            .await;
                    }
                    Err(e) => {
                        error!(%basis, error = %e, "block finalize failed");
                        let _ = self
                            .event_tx
                            .send(Event::BlockApplyFailed {
                                basis,
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
            }

            Action::RevalidatePooled { transactions } => {
                let invalid: Vec<Hash> = transactions
                    .iter()
                    .filter(|tx| validate_transaction(&self.store, tx).is_err())
                    .map(|tx| tx.hash())
                    .collect();
                if !invalid.is_empty() {
                    debug!(count = invalid.len(), "pooled transactions invalidated by commit");
                    let _ = self
                        .event_tx
                        .send(Event::PooledInvalidated { hashes: invalid })
                        .await;
                }
            }

            Action::StartSync { target, validators } => {
                let transport = Arc::clone(&self.transport);
                let store = self.store.clone();
                let config = self.config.clone();
                let sync_config = self.sync_config.clone();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    run_sync(
                        transport.as_ref(),
                        &store,
                        &config,
                        &sync_config,
                        target,
                        validators,
                        event_tx,
                    )
                    .await;
                });
            }

            Action::PersistTransaction { transaction } => {
                if let Err(e) = save_tx_history(&self.store, &transaction) {
                    warn!(error = %e, "failed to persist transaction history");
                }
            }

            Action::EmitCommittedBlock { block } => {
                let _ = self.committed_tx.send(block);
            }

            Action::ClientResponse {
                tx_hash,
                accepted,
                reason,
            } => {
                let _ = self.ack_tx.send(ClientAck {
                    tx_hash,
                    accepted,
                    reason,
                });
            }
        }
    }
}

fn unix_now() -> std::time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

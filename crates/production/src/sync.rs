//! The sync worker: fetches a block range from peers and applies it.
//!
//! Any one peer suffices per block; failures rotate through the reported
//! validator set with a per-request timeout and a short cooldown before a
//! failed peer is retried. Validation and application go through the
//! ledger's sync commit path; the state machine learns about progress via
//! events.

use crate::transport::Transport;
use isaac_core::Event;
use isaac_ledger::{apply_synced_block, get_latest_block};
use isaac_messages::FetchItem;
use isaac_storage::Store;
use isaac_types::{Address, ConsensusConfig};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sync worker configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-request timeout before rotating to the next peer.
    pub request_timeout: Duration,
    /// Consecutive failures before a peer is put on cooldown.
    pub max_failures_per_peer: u32,
    /// How long a failed peer is skipped.
    pub peer_cooldown: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            request_timeout: Duration::from_secs(5),
            max_failures_per_peer: 3,
            peer_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct PeerState {
    failures: u32,
    cooldown_until: Option<Instant>,
}

/// Fetch and apply blocks `[latest + 1, target]` from `peers`.
///
/// Emits `SyncBlockApplied` per block, then `SyncCompleted` or
/// `SyncFailed`.
pub async fn run_sync<T: Transport>(
    transport: &T,
    store: &Store,
    config: &ConsensusConfig,
    sync_config: &SyncConfig,
    target: u64,
    peers: Vec<Address>,
    event_tx: mpsc::Sender<Event>,
) {
    if peers.is_empty() {
        let _ = event_tx
            .send(Event::SyncFailed {
                target,
                reason: "no peers to sync from".into(),
            })
            .await;
        return;
    }

    let mut latest = match get_latest_block(store) {
        Ok(Some(block)) => block,
        _ => {
            let _ = event_tx
                .send(Event::SyncFailed {
                    target,
                    reason: "no local chain tip".into(),
                })
                .await;
            return;
        }
    };

    info!(from = latest.height + 1, target, peers = peers.len(), "sync started");
    let mut peer_states: HashMap<Address, PeerState> = HashMap::new();

    let mut height = latest.height + 1;
    while height <= target {
        match fetch_one_block(
            transport,
            store,
            config,
            sync_config,
            &latest,
            height,
            &peers,
            &mut peer_states,
        )
        .await
        {
            Some(block) => {
                latest = block.clone();
                if event_tx.send(Event::SyncBlockApplied { block }).await.is_err() {
                    return;
                }
                height += 1;
            }
            None => {
                warn!(height, target, "sync gave up");
                let _ = event_tx
                    .send(Event::SyncFailed {
                        target,
                        reason: format!("no peer could serve block {height}"),
                    })
                    .await;
                return;
            }
        }
    }

    info!(target, "sync completed");
    let _ = event_tx.send(Event::SyncCompleted { target }).await;
}

/// Try every available peer for one block, with retry.
#[allow(clippy::too_many_arguments)]
async fn fetch_one_block<T: Transport>(
    transport: &T,
    store: &Store,
    config: &ConsensusConfig,
    sync_config: &SyncConfig,
    latest: &isaac_types::Block,
    height: u64,
    peers: &[Address],
    peer_states: &mut HashMap<Address, PeerState>,
) -> Option<isaac_types::Block> {
    for round in 0..sync_config.max_failures_per_peer {
        for peer in peers {
            let state = peer_states.entry(*peer).or_default();
            if state
                .cooldown_until
                .is_some_and(|until| Instant::now() < until)
            {
                continue;
            }

            match try_fetch(transport, store, config, sync_config, latest, height, *peer).await {
                Ok(block) => {
                    peer_states.entry(*peer).or_default().failures = 0;
                    return Some(block);
                }
                Err(reason) => {
                    debug!(height, peer = ?peer, round, reason, "sync fetch attempt failed");
                    let state = peer_states.entry(*peer).or_default();
                    state.failures += 1;
                    if state.failures >= sync_config.max_failures_per_peer {
                        state.cooldown_until =
                            Some(Instant::now() + sync_config.peer_cooldown);
                    }
                }
            }
        }
    }
    None
}

async fn try_fetch<T: Transport>(
    transport: &T,
    store: &Store,
    config: &ConsensusConfig,
    sync_config: &SyncConfig,
    latest: &isaac_types::Block,
    height: u64,
    peer: Address,
) -> Result<isaac_types::Block, String> {
    let raw = tokio::time::timeout(
        sync_config.request_timeout,
        transport.fetch_blocks(peer, height, height),
    )
    .await
    .map_err(|_| "request timed out".to_string())?
    .map_err(|e| e.to_string())?;

    let items = FetchItem::decode_stream(&raw).map_err(|e| e.to_string())?;
    let record = items
        .into_iter()
        .find_map(|item| match item {
            FetchItem::Block { record } => Some(record),
            _ => None,
        })
        .ok_or_else(|| "no block record in response".to_string())?;

    if record.block.height != height {
        return Err(format!(
            "peer served height {} instead of {height}",
            record.block.height
        ));
    }

    apply_synced_block(store, latest, &record.block, &record.transactions, config)
        .map_err(|e| e.to_string())?;
    Ok(record.block)
}

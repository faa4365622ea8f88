//! Proposal resolution: the runner half of the ballot pipeline's only
//! suspension point.
//!
//! Missing bodies are fetched from the proposer as a newline-delimited
//! stream of transaction-or-error records; every received transaction is
//! independently checked before the whole proposal set is validated
//! against state and the fetched bodies are staged into the persistent
//! pool in one batch.

use crate::transport::Transport;
use isaac_ledger::{get_tx_pool, save_tx_pool, validate_proposal_transactions};
use isaac_messages::FetchItem;
use isaac_storage::Store;
use isaac_types::{Address, ConsensusConfig, Hash, Transaction, VotingBasis};
use isaac_core::Event;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Resolve one INIT proposal. Always returns a `ProposalResolved` event;
/// failures surface as `valid: false` with a reason, which the state
/// machine turns into a NO vote.
pub async fn resolve_proposal<T: Transport>(
    transport: &T,
    store: &Store,
    config: &ConsensusConfig,
    basis: VotingBasis,
    proposer: Address,
    tx_hashes: Vec<Hash>,
    pooled: Vec<Transaction>,
) -> Event {
    match resolve_inner(transport, store, config, proposer, &tx_hashes, pooled).await {
        Ok(fetched) => {
            debug!(%basis, fetched, "proposal resolved");
            Event::ProposalResolved {
                basis,
                proposer,
                valid: true,
                reason: None,
            }
        }
        Err(reason) => {
            warn!(%basis, reason, "proposal resolution failed");
            Event::ProposalResolved {
                basis,
                proposer,
                valid: false,
                reason: Some(reason),
            }
        }
    }
}

async fn resolve_inner<T: Transport>(
    transport: &T,
    store: &Store,
    config: &ConsensusConfig,
    proposer: Address,
    tx_hashes: &[Hash],
    pooled: Vec<Transaction>,
) -> Result<usize, String> {
    let mut bodies: HashMap<Hash, Transaction> =
        pooled.into_iter().map(|tx| (tx.hash(), tx)).collect();

    // Fill from the persistent pool, then fetch the rest from the proposer.
    let mut missing = Vec::new();
    for hash in tx_hashes {
        if bodies.contains_key(hash) {
            continue;
        }
        match get_tx_pool(store, hash).map_err(|e| e.to_string())? {
            Some(tx) => {
                bodies.insert(*hash, tx);
            }
            None => missing.push(*hash),
        }
    }

    let mut fetched = Vec::new();
    if !missing.is_empty() {
        debug!(proposer = ?proposer, count = missing.len(), "fetching missing transactions");
        let raw = transport
            .fetch_transactions(proposer, missing.clone())
            .await
            .map_err(|e| e.to_string())?;
        let items = FetchItem::decode_stream(&raw).map_err(|e| e.to_string())?;
        for item in items {
            match item {
                FetchItem::Transaction { transaction } => {
                    let hash = transaction.hash();
                    if !missing.contains(&hash) {
                        return Err(format!("unrequested transaction {hash:?} in response"));
                    }
                    transaction
                        .well_formed(&config.network_id)
                        .map_err(|e| e.to_string())?;
                    bodies.insert(hash, transaction.clone());
                    fetched.push(transaction);
                }
                FetchItem::Error { code } => return Err(format!("peer error: {code}")),
                FetchItem::Block { .. } => {
                    return Err("unexpected block record in transaction fetch".into())
                }
            }
        }
    }

    validate_proposal_transactions(store, tx_hashes, &bodies, &config.network_id)
        .map_err(|e| e.to_string())?;

    if !fetched.is_empty() {
        let mut batch = store.open_batch();
        for tx in &fetched {
            save_tx_pool(&mut batch, tx).map_err(|e| e.to_string())?;
        }
        batch.commit().map_err(|e| e.to_string())?;
    }
    Ok(fetched.len())
}

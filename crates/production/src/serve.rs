//! Peer-facing fetch serving.
//!
//! Embedding transports call these to answer directed fetch requests.
//! Each requested item is answered independently, so one unknown hash
//! yields an error record rather than failing the stream.

use isaac_ledger::{get_block_by_height, get_tx_pool};
use isaac_messages::{BlockRecord, FetchItem};
use isaac_storage::{keys, KvRead, Store};
use isaac_types::{Hash, Transaction};
use tracing::trace;

/// Serve transaction bodies from history and the persistent pool.
pub fn serve_transactions(store: &Store, hashes: &[Hash]) -> Vec<u8> {
    let mut items = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let from_history: Option<Transaction> = store
            .get_json(&keys::tx_history_key(&hash.to_hex()))
            .ok()
            .flatten();
        let body = match from_history {
            Some(tx) => Some(tx),
            None => get_tx_pool(store, hash).ok().flatten(),
        };
        match body {
            Some(transaction) => items.push(FetchItem::Transaction { transaction }),
            None => items.push(FetchItem::Error {
                code: "transaction-not-found".to_string(),
            }),
        }
    }
    trace!(requested = hashes.len(), served = items.len(), "served transaction fetch");
    FetchItem::encode_stream(&items)
}

/// Serve a block range with full transaction bodies for each block.
pub fn serve_blocks(store: &Store, from_height: u64, to_height: u64) -> Vec<u8> {
    let mut items = Vec::new();
    for height in from_height..=to_height {
        match get_block_by_height(store, height) {
            Ok(Some(block)) => {
                let transactions = block
                    .transactions
                    .iter()
                    .filter_map(|hash| {
                        store
                            .get_json(&keys::tx_history_key(&hash.to_hex()))
                            .ok()
                            .flatten()
                            .or_else(|| get_tx_pool(store, hash).ok().flatten())
                    })
                    .collect();
                items.push(FetchItem::Block {
                    record: BlockRecord {
                        block,
                        transactions,
                    },
                });
            }
            _ => items.push(FetchItem::Error {
                code: format!("block-not-found-{height}"),
            }),
        }
    }
    FetchItem::encode_stream(&items)
}

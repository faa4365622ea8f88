//! Block persistence.
//!
//! Blocks are stored twice: the record under `b-hash-<hash>`, and the hash
//! under a `b-confirmed-<iso8601>-<uuid>` index key so the chain can be
//! iterated in commit-time order and the latest block found by a single
//! reverse scan.

use crate::error::LedgerError;
use isaac_storage::{keys, Batch, KvRead, Store};
use isaac_types::Block;
use uuid::Uuid;

/// Stage a block and its confirmed-index entry into `batch`.
///
/// Returns [`LedgerError::NotCommittable`] when a block with the same hash
/// is already stored; callers discard the batch and treat the commit as a
/// success.
pub fn save_block(batch: &mut Batch<'_>, block: &Block) -> Result<(), LedgerError> {
    let key = keys::block_key(&block.hash.to_hex());
    if batch.has(&key)? {
        return Err(LedgerError::NotCommittable);
    }
    batch.put_json(&key, block)?;

    let unique = Uuid::new_v4().simple().to_string();
    let confirmed_key = keys::block_confirmed_key(&block.confirmed, &unique);
    batch.put_json(&confirmed_key, &block.hash)?;
    batch.put_json(&keys::block_height_key(block.height), &block.hash)?;
    Ok(())
}

/// Load a block by height via the height index.
pub fn get_block_by_height(store: &Store, height: u64) -> Result<Option<Block>, LedgerError> {
    match store.get_json::<isaac_types::Hash>(&keys::block_height_key(height))? {
        Some(hash) => get_block(store, &hash),
        None => Ok(None),
    }
}

/// Whether a block with this hash exists.
pub fn exists_block(store: &Store, hash: &isaac_types::Hash) -> Result<bool, LedgerError> {
    Ok(store.has(&keys::block_key(&hash.to_hex()))?)
}

/// Load a block by hash.
pub fn get_block(store: &Store, hash: &isaac_types::Hash) -> Result<Option<Block>, LedgerError> {
    Ok(store.get_json(&keys::block_key(&hash.to_hex()))?)
}

/// The most recently confirmed block, via reverse iteration of the
/// confirmed index.
pub fn get_latest_block(store: &Store) -> Result<Option<Block>, LedgerError> {
    let entries = store.iterate(keys::BLOCK_PREFIX_CONFIRMED.as_bytes(), true)?;
    for (key, value) in entries {
        let hash: isaac_types::Hash =
            serde_json::from_slice(&value).map_err(|e| isaac_storage::StorageError::Corrupted {
                key: String::from_utf8_lossy(&key).into_owned(),
                reason: e.to_string(),
            })?;
        if let Some(block) = get_block(store, &hash)? {
            return Ok(Some(block));
        }
    }
    Ok(None)
}

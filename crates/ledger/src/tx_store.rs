//! Transaction history and persistent-pool stores.

use crate::error::LedgerError;
use isaac_storage::{keys, Batch, KvRead, Store};
use isaac_types::{Hash, Transaction};

/// Record an accepted transaction in history.
pub fn save_tx_history(store: &Store, tx: &Transaction) -> Result<(), LedgerError> {
    store.put_json(&keys::tx_history_key(&tx.hash().to_hex()), tx)?;
    Ok(())
}

/// Whether a transaction is in history.
pub fn exists_tx_history(store: &Store, hash: &Hash) -> Result<bool, LedgerError> {
    Ok(store.has(&keys::tx_history_key(&hash.to_hex()))?)
}

/// Stage a fetched proposal transaction into the persistent pool.
pub fn save_tx_pool(batch: &mut Batch<'_>, tx: &Transaction) -> Result<(), LedgerError> {
    batch.put_json(&keys::tx_pool_key(&tx.hash().to_hex()), tx)?;
    Ok(())
}

/// Whether a transaction is in the persistent pool.
pub fn exists_tx_pool<R: KvRead>(reader: &R, hash: &Hash) -> Result<bool, LedgerError> {
    Ok(reader.has(&keys::tx_pool_key(&hash.to_hex()))?)
}

/// Load a transaction from the persistent pool.
pub fn get_tx_pool<R: KvRead>(reader: &R, hash: &Hash) -> Result<Option<Transaction>, LedgerError> {
    Ok(reader.get_json(&keys::tx_pool_key(&hash.to_hex()))?)
}

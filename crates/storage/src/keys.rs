//! Storage key conventions.
//!
//! - `b-hash-<block-hash>`: block record
//! - `b-confirmed-<iso8601>-<uuid>`: block hash, for time-ordered iteration
//! - `b-height-<height>`: block hash, zero-padded for range serving
//! - `tx-<hash>`: transaction record in history
//! - `txpool-<hash>`: transaction record in the persistent pool
//! - `account-<address>`: account record

/// Prefix for block records keyed by hash.
pub const BLOCK_PREFIX_HASH: &str = "b-hash-";
/// Prefix for the time-ordered confirmed index.
pub const BLOCK_PREFIX_CONFIRMED: &str = "b-confirmed-";
/// Prefix for the height index.
pub const BLOCK_PREFIX_HEIGHT: &str = "b-height-";
/// Prefix for transaction history records.
pub const TX_PREFIX_HISTORY: &str = "tx-";
/// Prefix for persistent-pool transaction records.
pub const TX_PREFIX_POOL: &str = "txpool-";
/// Prefix for account records.
pub const ACCOUNT_PREFIX: &str = "account-";

pub fn block_key(hash: &str) -> Vec<u8> {
    format!("{BLOCK_PREFIX_HASH}{hash}").into_bytes()
}

pub fn block_confirmed_key(confirmed: &str, unique: &str) -> Vec<u8> {
    format!("{BLOCK_PREFIX_CONFIRMED}{confirmed}-{unique}").into_bytes()
}

pub fn block_height_key(height: u64) -> Vec<u8> {
    format!("{BLOCK_PREFIX_HEIGHT}{height:020}").into_bytes()
}

pub fn tx_history_key(hash: &str) -> Vec<u8> {
    format!("{TX_PREFIX_HISTORY}{hash}").into_bytes()
}

pub fn tx_pool_key(hash: &str) -> Vec<u8> {
    format!("{TX_PREFIX_POOL}{hash}").into_bytes()
}

pub fn account_key(address: &str) -> Vec<u8> {
    format!("{ACCOUNT_PREFIX}{address}").into_bytes()
}

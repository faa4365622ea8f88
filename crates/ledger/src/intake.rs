//! Runner-side intake checks for client and gossiped transactions.
//!
//! Runners run these against storage before handing a typed transaction
//! event to the node state machine; the pool rules (duplicate source) are
//! applied by the state machine itself.

use crate::tx_store::{exists_tx_history, exists_tx_pool};
use crate::validation::{validate_transaction, ValidationError};
use isaac_storage::Store;
use isaac_types::Transaction;
use thiserror::Error;

/// Why an inbound transaction was rejected before reaching the pool.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed transaction: {0}")]
    Malformed(String),
    #[error("transaction already known")]
    AlreadyKnown,
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ledger(#[from] crate::LedgerError),
}

/// Parse a raw client submission. Ballots and anything else that is not a
/// bare transaction are rejected as malformed.
pub fn parse_transaction(data: &[u8]) -> Result<Transaction, IntakeError> {
    serde_json::from_slice(data).map_err(|e| IntakeError::Malformed(e.to_string()))
}

/// Structural and state checks for an inbound transaction: signature and
/// shape, not already in history or the persistent pool, valid against
/// current state.
pub fn preflight_transaction(
    store: &Store,
    tx: &Transaction,
    network_id: &[u8],
) -> Result<(), IntakeError> {
    tx.well_formed(network_id)
        .map_err(|e| IntakeError::Malformed(e.to_string()))?;
    let hash = tx.hash();
    if exists_tx_history(store, &hash)? || exists_tx_pool(store, &hash)? {
        return Err(IntakeError::AlreadyKnown);
    }
    validate_transaction(store, tx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::make_genesis;
    use crate::tx_store::save_tx_history;
    use isaac_storage::MemoryBackend;
    use isaac_types::test_utils::{test_keypair, test_payment};
    use isaac_types::ConsensusConfig;
    use std::sync::Arc;

    const NET: &[u8] = b"test-network";

    #[test]
    fn preflight_accepts_fresh_valid_transaction() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let config = ConsensusConfig::default();
        let genesis_kp = test_keypair(0);
        make_genesis(&store, &config, genesis_kp.address(), "2024-01-01T00:00:00Z".into())
            .unwrap();

        // Payment target must exist, so pay the common account.
        let tx = test_payment(&genesis_kp, config.common_account, 100, 0, NET);
        preflight_transaction(&store, &tx, NET).unwrap();

        save_tx_history(&store, &tx).unwrap();
        assert!(matches!(
            preflight_transaction(&store, &tx, NET),
            Err(IntakeError::AlreadyKnown)
        ));
    }

    #[test]
    fn preflight_rejects_unknown_source() {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let tx = test_payment(&test_keypair(7), test_keypair(8).address(), 100, 0, NET);
        assert!(matches!(
            preflight_transaction(&store, &tx, NET),
            Err(IntakeError::Validation(_))
        ));
    }

    #[test]
    fn parse_rejects_non_transaction_payloads() {
        assert!(parse_transaction(b"{\"basis\":{}}").is_err());
        assert!(parse_transaction(b"not json").is_err());
    }
}

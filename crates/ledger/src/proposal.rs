//! Validation of a proposer's transaction set.
//!
//! Used by runners when resolving an INIT proposal: after fetching any
//! missing bodies, the whole ordered set is checked before the node votes
//! YES.

use crate::validation::{validate_transaction, ValidationError};
use isaac_storage::Store;
use isaac_types::{Address, Hash, Transaction};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Why a proposal's transaction set was rejected.
#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("transaction {0:?} missing from proposal bodies")]
    MissingBody(Hash),
    #[error("transaction body hash mismatch for {0:?}")]
    HashMismatch(Hash),
    #[error("malformed transaction {hash:?}: {reason}")]
    Malformed { hash: Hash, reason: String },
    #[error("two proposal transactions share source {0}")]
    DuplicateSource(Address),
    #[error("transaction {hash:?} failed validation: {source}")]
    Validation {
        hash: Hash,
        #[source]
        source: ValidationError,
    },
}

/// Check every transaction in the proposal: present, well-formed, hash
/// integrity, one per source, and valid against current state.
pub fn validate_proposal_transactions(
    store: &Store,
    hashes: &[Hash],
    bodies: &HashMap<Hash, Transaction>,
    network_id: &[u8],
) -> Result<(), ProposalError> {
    let mut sources = HashSet::new();
    for hash in hashes {
        let tx = bodies.get(hash).ok_or(ProposalError::MissingBody(*hash))?;
        if tx.hash() != *hash {
            return Err(ProposalError::HashMismatch(*hash));
        }
        tx.well_formed(network_id)
            .map_err(|e| ProposalError::Malformed {
                hash: *hash,
                reason: e.to_string(),
            })?;
        if !sources.insert(tx.source()) {
            return Err(ProposalError::DuplicateSource(tx.source()));
        }
        validate_transaction(store, tx).map_err(|e| ProposalError::Validation {
            hash: *hash,
            source: e,
        })?;
    }
    Ok(())
}

//! Blocks.

use crate::ballot::Ballot;
use crate::crypto::Address;
use crate::hash::Hash;
use crate::transaction::ProposerTransaction;
use serde::{Deserialize, Serialize};

/// The hashed header fields of a block.
#[derive(Debug, Clone, Serialize)]
struct BlockHeader<'a> {
    previous_hash: &'a Hash,
    height: u64,
    proposer: &'a Address,
    transactions: &'a [Hash],
    proposer_transaction: Option<Hash>,
    confirmed: &'a str,
}

/// A committed block.
///
/// `height` is strictly monotonic along the chain; `hash` is the content
/// hash over the header fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: Hash,
    pub previous_hash: Hash,
    pub height: u64,
    /// RFC 3339 proposal timestamp, taken from the winning ballot.
    pub confirmed: String,
    pub proposer: Address,
    /// Ordered hashes of the ordinary transactions.
    pub transactions: Vec<Hash>,
    /// Absent only on the genesis block.
    pub proposer_transaction: Option<ProposerTransaction>,
}

impl Block {
    /// Build the block a confirmed ballot describes.
    pub fn from_ballot(ballot: &Ballot, proposer_transaction: ProposerTransaction) -> Self {
        let basis = ballot.basis();
        Self::build(
            basis.block_hash,
            basis.height,
            ballot.proposed().confirmed.clone(),
            ballot.proposer(),
            ballot.transactions().to_vec(),
            Some(proposer_transaction),
        )
    }

    /// Build the genesis block at height 0.
    pub fn genesis(proposer: Address, confirmed: String) -> Self {
        Self::build(Hash::ZERO, 0, confirmed, proposer, Vec::new(), None)
    }

    fn build(
        previous_hash: Hash,
        height: u64,
        confirmed: String,
        proposer: Address,
        transactions: Vec<Hash>,
        proposer_transaction: Option<ProposerTransaction>,
    ) -> Self {
        let hash = Hash::digest_json(&BlockHeader {
            previous_hash: &previous_hash,
            height,
            proposer: &proposer,
            transactions: &transactions,
            proposer_transaction: proposer_transaction.as_ref().map(|p| p.hash()),
            confirmed: &confirmed,
        });
        Block {
            hash,
            previous_hash,
            height,
            confirmed,
            proposer,
            transactions,
            proposer_transaction,
        }
    }

    /// Recompute the header hash and compare with the stored one.
    pub fn verify_hash(&self) -> bool {
        let expected = Hash::digest_json(&BlockHeader {
            previous_hash: &self.previous_hash,
            height: self.height,
            proposer: &self.proposer,
            transactions: &self.transactions,
            proposer_transaction: self.proposer_transaction.as_ref().map(|p| p.hash()),
            confirmed: &self.confirmed,
        });
        expected == self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_keypair;

    #[test]
    fn genesis_block_shape() {
        let b = Block::genesis(test_keypair(1).address(), "2024-01-01T00:00:00Z".into());
        assert_eq!(b.height, 0);
        assert_eq!(b.previous_hash, Hash::ZERO);
        assert!(b.proposer_transaction.is_none());
        assert!(b.verify_hash());
    }

    #[test]
    fn hash_changes_with_contents() {
        let a = Block::genesis(test_keypair(1).address(), "2024-01-01T00:00:00Z".into());
        let b = Block::genesis(test_keypair(2).address(), "2024-01-01T00:00:00Z".into());
        assert_ne!(a.hash, b.hash);
    }
}

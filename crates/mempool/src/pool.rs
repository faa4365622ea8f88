//! Pool state.

use isaac_types::{Address, Hash, Transaction};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Why the pool rejected a transaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction already in pool")]
    AlreadyKnown,
    #[error("source already has a pending transaction")]
    DuplicateSource,
}

/// Validated but unconfirmed transactions, indexed by hash and by source.
///
/// At most one pending transaction per source at any instant: a second
/// arrival from the same source is rejected until the first is committed
/// or evicted. `pending` preserves insertion order so proposals pick the
/// oldest transactions first.
#[derive(Debug, Default)]
pub struct TransactionPool {
    by_hash: HashMap<Hash, Transaction>,
    by_source: HashMap<Address, Hash>,
    pending: VecDeque<Hash>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction.
    pub fn add(&mut self, tx: Transaction) -> Result<(), PoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyKnown);
        }
        if self.by_source.contains_key(&tx.source()) {
            return Err(PoolError::DuplicateSource);
        }
        self.by_source.insert(tx.source(), hash);
        self.pending.push_back(hash);
        self.by_hash.insert(hash, tx);
        Ok(())
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.by_hash.get(hash)
    }

    /// The pending transaction from `source`, if any.
    pub fn get_from_source(&self, source: &Address) -> Option<&Transaction> {
        self.by_source
            .get(source)
            .and_then(|hash| self.by_hash.get(hash))
    }

    /// Remove transactions by hash. Unknown hashes are ignored.
    pub fn remove<'a, I: IntoIterator<Item = &'a Hash>>(&mut self, hashes: I) {
        for hash in hashes {
            if let Some(tx) = self.by_hash.remove(hash) {
                self.by_source.remove(&tx.source());
                self.pending.retain(|h| h != hash);
            }
        }
    }

    /// The oldest pending hashes, up to `limit`, in insertion order.
    pub fn available_for_proposal(&self, limit: usize) -> Vec<Hash> {
        self.pending.iter().take(limit).copied().collect()
    }

    /// Bodies for a set of hashes, skipping unknown ones.
    pub fn bodies<'a, I: IntoIterator<Item = &'a Hash>>(&self, hashes: I) -> Vec<Transaction> {
        hashes
            .into_iter()
            .filter_map(|hash| self.by_hash.get(hash).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isaac_types::test_utils::{test_keypair, test_payment};

    const NET: &[u8] = b"test-network";

    #[test]
    fn rejects_duplicate_source_until_removed() {
        let kp = test_keypair(1);
        let target = test_keypair(2).address();
        let first = test_payment(&kp, target, 100, 0, NET);
        let second = test_payment(&kp, target, 200, 1, NET);

        let mut pool = TransactionPool::new();
        pool.add(first.clone()).unwrap();
        assert_eq!(pool.add(second.clone()), Err(PoolError::DuplicateSource));
        assert_eq!(pool.len(), 1);
        assert_eq!(
            pool.get_from_source(&kp.address()).unwrap().hash(),
            first.hash()
        );

        pool.remove(&[first.hash()]);
        pool.add(second).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rejects_same_hash() {
        let kp = test_keypair(1);
        let tx = test_payment(&kp, test_keypair(2).address(), 100, 0, NET);
        let mut pool = TransactionPool::new();
        pool.add(tx.clone()).unwrap();
        assert_eq!(pool.add(tx), Err(PoolError::AlreadyKnown));
    }

    #[test]
    fn proposal_batch_preserves_insertion_order() {
        let mut pool = TransactionPool::new();
        let mut hashes = Vec::new();
        for i in 0..5u8 {
            let kp = test_keypair(10 + i);
            let tx = test_payment(&kp, test_keypair(99).address(), 100, 0, NET);
            hashes.push(tx.hash());
            pool.add(tx).unwrap();
        }

        assert_eq!(pool.available_for_proposal(3), hashes[..3].to_vec());
        assert_eq!(pool.available_for_proposal(10), hashes);

        // Removal keeps the remaining order intact.
        pool.remove(&[hashes[1]]);
        let rest = pool.available_for_proposal(10);
        assert_eq!(rest, vec![hashes[0], hashes[2], hashes[3], hashes[4]]);
    }
}

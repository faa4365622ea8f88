//! Write batches with read-through staging.

use crate::backend::{StagedWrite, StorageError};
use crate::store::{KvRead, Store};
use serde::Serialize;
use std::collections::BTreeMap;

/// A short-lived write batch.
///
/// Reads see staged writes layered over the committed state, so the block
/// finalizer can re-validate transactions against the exact state the
/// block would produce. `commit` applies the staged set atomically;
/// dropping the batch discards it.
pub struct Batch<'a> {
    store: &'a Store,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Batch {
            store,
            staged: BTreeMap::new(),
        }
    }

    pub fn put_json<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(value)
            .map_err(|e| StorageError::Backend(format!("serialize: {e}")))?;
        self.staged.insert(key.to_vec(), Some(raw));
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.staged.insert(key.to_vec(), None);
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Apply every staged write atomically.
    pub fn commit(self) -> Result<(), StorageError> {
        let writes: Vec<StagedWrite> = self.staged.into_iter().collect();
        self.store.backend().apply(writes)
    }

    /// Drop every staged write.
    pub fn discard(self) {}
}

impl KvRead for Batch<'_> {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.get_raw(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::sync::Arc;

    fn store() -> Store {
        Store::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn batch_reads_through_staged_writes() {
        let store = store();
        store.put_json(b"k1", &"committed").unwrap();

        let mut batch = store.open_batch();
        batch.put_json(b"k2", &"staged").unwrap();
        assert_eq!(
            batch.get_json::<String>(b"k1").unwrap().as_deref(),
            Some("committed")
        );
        assert_eq!(
            batch.get_json::<String>(b"k2").unwrap().as_deref(),
            Some("staged")
        );
        // Not visible outside the batch before commit.
        assert!(store.get_json::<String>(b"k2").unwrap().is_none());

        batch.commit().unwrap();
        assert_eq!(
            store.get_json::<String>(b"k2").unwrap().as_deref(),
            Some("staged")
        );
    }

    #[test]
    fn discarded_batch_leaves_no_trace() {
        let store = store();
        let mut batch = store.open_batch();
        batch.put_json(b"k", &1u64).unwrap();
        batch.discard();
        assert!(store.get_json::<u64>(b"k").unwrap().is_none());
    }

    #[test]
    fn staged_delete_shadows_committed_value() {
        let store = store();
        store.put_json(b"k", &1u64).unwrap();
        let mut batch = store.open_batch();
        batch.delete(b"k");
        assert!(batch.get_json::<u64>(b"k").unwrap().is_none());
        batch.commit().unwrap();
        assert!(store.get_json::<u64>(b"k").unwrap().is_none());
    }
}

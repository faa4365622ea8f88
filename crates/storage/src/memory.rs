//! In-memory backend for tests and simulation.

use crate::backend::{Backend, StagedWrite, StorageError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A `BTreeMap` behind a lock. Key order matches the on-disk backend, so
/// prefix iteration behaves identically in both.
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn iterate(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let map = self.map.read();
        let mut items: Vec<(Vec<u8>, Vec<u8>)> = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if reverse {
            items.reverse();
        }
        Ok(items)
    }

    fn apply(&self, writes: Vec<StagedWrite>) -> Result<(), StorageError> {
        let mut map = self.map.write();
        for (key, value) in writes {
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

//! Typed store facade over a backend.

use crate::backend::{Backend, StorageError};
use crate::batch::Batch;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Read access shared by the store and its batches, so validation code can
/// run unchanged against committed state or a batch's staged snapshot.
pub trait KvRead {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get_raw(key)?.is_some())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.get_raw(key)? {
            None => Ok(None),
            Some(raw) => {
                let value =
                    serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupted {
                        key: String::from_utf8_lossy(key).into_owned(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(value))
            }
        }
    }
}

/// Handle to a storage backend with JSON-typed records.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Store { backend }
    }

    pub fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(value)
            .map_err(|e| StorageError::Backend(format!("serialize: {e}")))?;
        self.backend.apply(vec![(key.to_vec(), Some(raw))])
    }

    pub fn iterate(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.backend.iterate(prefix, reverse)
    }

    /// Open a write batch over this store.
    ///
    /// Every batch must either commit or be dropped (discard) before the
    /// caller yields; a batch's lifetime never crosses an await.
    pub fn open_batch(&self) -> Batch<'_> {
        Batch::new(self)
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

impl KvRead for Store {
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.backend.get(key)
    }
}

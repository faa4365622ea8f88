//! Backend trait.

use thiserror::Error;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("corrupted record at {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

/// A write staged into a batch: `Some` puts, `None` deletes.
pub type StagedWrite = (Vec<u8>, Option<Vec<u8>>);

/// Raw key-value backend.
///
/// Implementations must apply a staged write set atomically; everything
/// else is plain point reads and prefix scans.
pub trait Backend: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries whose key starts with `prefix`, in key order
    /// (descending when `reverse`).
    fn iterate(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply a write set atomically.
    fn apply(&self, writes: Vec<StagedWrite>) -> Result<(), StorageError>;
}

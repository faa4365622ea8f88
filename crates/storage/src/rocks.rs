//! RocksDB backend for production.
//!
//! All operations are synchronous blocking I/O. Callers in async contexts
//! should use `spawn_blocking` if needed to avoid blocking the runtime.

use crate::backend::{Backend, StagedWrite, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

/// RocksDB tuning knobs.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    pub max_background_jobs: i32,
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    pub keep_log_file_num: usize,
}

impl Default for RocksConfig {
    fn default() -> Self {
        RocksConfig {
            max_background_jobs: 4,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 4,
            keep_log_file_num: 10,
        }
    }
}

/// RocksDB-based storage for production use.
///
/// Features LZ4 compression and atomic write batches. The handle is cheap
/// to clone; RocksDB synchronizes internally.
#[derive(Clone)]
pub struct RocksBackend {
    db: Arc<DB>,
}

impl RocksBackend {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_config(path, RocksConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: RocksConfig,
    ) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(config.max_background_jobs);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_keep_log_file_num(config.keep_log_file_num);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(RocksBackend { db: Arc::new(db) })
    }
}

impl Backend for RocksBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db
            .get(key)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn iterate(
        &self,
        prefix: &[u8],
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));

        let mut items = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key.to_vec(), value.to_vec()));
        }
        if reverse {
            items.reverse();
        }
        Ok(items)
    }

    fn apply(&self, writes: Vec<StagedWrite>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::default();
        for (key, value) in writes {
            match value {
                Some(v) => batch.put(&key, &v),
                None => batch.delete(&key),
            }
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

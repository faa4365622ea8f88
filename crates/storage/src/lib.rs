//! Key-value storage for the node.
//!
//! The consensus core consumes storage as an abstract capability: get/put,
//! prefix iteration in either direction, and short-lived batches that
//! either commit atomically or are discarded. Two backends are provided:
//! an in-memory map for tests and simulation, and RocksDB for production.

mod backend;
mod batch;
pub mod keys;
mod memory;
mod rocks;
mod store;

pub use backend::{Backend, StorageError};
pub use batch::Batch;
pub use memory::MemoryBackend;
pub use rocks::{RocksBackend, RocksConfig};
pub use store::{KvRead, Store};

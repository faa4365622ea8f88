//! Production runner.
//!
//! Owns the node state machine and executes its actions against real
//! infrastructure: a transport implementation supplied by the embedder,
//! RocksDB-backed storage, tokio timers, and background workers for
//! missing-transaction fetches and block sync.
//!
//! One tokio task drains the event queue and owns the state machine, so
//! consensus state mutation is single-threaded; every other task
//! communicates with it through events.

mod fetch;
mod runner;
mod serve;
mod sync;
mod timers;
mod transport;

pub use fetch::resolve_proposal;
pub use runner::{ClientAck, NodeRunner, RunnerHandle};
pub use serve::{serve_blocks, serve_transactions};
pub use sync::{run_sync, SyncConfig};
pub use timers::TimerManager;
pub use transport::{Transport, TransportError};

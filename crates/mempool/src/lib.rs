//! The transaction pool.
//!
//! In-memory holding of validated but unconfirmed transactions. Access is
//! serialized through the node state machine, so a plain `HashMap` is used
//! rather than a concurrent map.

mod pool;

pub use pool::{PoolError, TransactionPool};

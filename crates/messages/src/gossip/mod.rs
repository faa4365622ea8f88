//! Broadcast messages.

mod ballot;
mod transaction;

pub use ballot::BallotGossip;
pub use transaction::TransactionGossip;

//! The consumed transport capability.
//!
//! The core never opens sockets; an embedder supplies an implementation
//! of this trait (HTTP, WebSocket, in-memory). Broadcast is best-effort
//! and non-blocking; directed fetches return newline-delimited
//! [`FetchItem`](isaac_messages::FetchItem) streams.

use isaac_types::{Address, Hash};
use std::future::Future;
use thiserror::Error;

/// Transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {0} unreachable")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Other(String),
}

/// Signed-message transport consumed by the runner.
pub trait Transport: Send + Sync + 'static {
    /// Best-effort send of an envelope frame to every known validator
    /// except `exclude`.
    fn broadcast(&self, frame: Vec<u8>, exclude: Option<Address>);

    /// Ask `peer` for transaction bodies; returns the raw
    /// newline-delimited response stream.
    fn fetch_transactions(
        &self,
        peer: Address,
        hashes: Vec<Hash>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Ask `peer` for blocks `[from, to]`; returns the raw
    /// newline-delimited response stream.
    fn fetch_blocks(
        &self,
        peer: Address,
        from_height: u64,
        to_height: u64,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

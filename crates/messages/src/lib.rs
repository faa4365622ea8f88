//! Network messages for the consensus protocol.
//!
//! All messages travel as JSON. Gossip messages are broadcast to the
//! validator set; request/response messages are directed at a single peer.
//! Directed fetch responses are newline-delimited streams of [`FetchItem`]
//! records so a peer can interleave payloads and per-item errors.

pub mod envelope;
pub mod gossip;
pub mod request;

pub use envelope::{Envelope, EnvelopeError};
pub use gossip::{BallotGossip, TransactionGossip};
pub use request::{BlockRecord, FetchItem, GetBlocksRequest, GetTransactionsRequest};

/// A typed network message with a stable wire identifier.
pub trait NetworkMessage: serde::Serialize + for<'de> serde::Deserialize<'de> {
    /// Stable identifier used for routing on the wire.
    fn message_type_id() -> &'static str;

    /// Serialize to wire bytes.
    fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("serializable message")
    }

    /// Parse from wire bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

//! The outer wire envelope.

use crate::{BallotGossip, NetworkMessage, TransactionGossip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to decode an inbound envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Tagged union of every broadcast message, used by transports to route an
/// inbound frame without knowing the payload type up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum Envelope {
    Ballot(BallotGossip),
    Transaction(TransactionGossip),
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("serializable envelope")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The inner message's wire identifier.
    pub fn message_type_id(&self) -> &'static str {
        match self {
            Envelope::Ballot(_) => BallotGossip::message_type_id(),
            Envelope::Transaction(_) => TransactionGossip::message_type_id(),
        }
    }
}

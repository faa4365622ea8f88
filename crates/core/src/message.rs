//! Outbound message wrapper.

use isaac_messages::{BallotGossip, Envelope, TransactionGossip};

/// A message the state machine wants broadcast.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Ballot(Box<BallotGossip>),
    Transaction(Box<TransactionGossip>),
}

impl OutboundMessage {
    /// Wrap into the wire envelope.
    pub fn into_envelope(self) -> Envelope {
        match self {
            OutboundMessage::Ballot(gossip) => Envelope::Ballot(*gossip),
            OutboundMessage::Transaction(gossip) => Envelope::Transaction(*gossip),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.clone().into_envelope().to_bytes()
    }
}

//! Ballot gossip message.

use crate::NetworkMessage;
use isaac_types::Ballot;
use serde::{Deserialize, Serialize};

/// Gossips a signed ballot to every validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotGossip {
    pub ballot: Ballot,
}

impl BallotGossip {
    pub fn new(ballot: Ballot) -> Self {
        BallotGossip { ballot }
    }

    pub fn into_ballot(self) -> Ballot {
        self.ballot
    }
}

impl NetworkMessage for BallotGossip {
    fn message_type_id() -> &'static str {
        "consensus.ballot"
    }
}

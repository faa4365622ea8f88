//! Transaction gossip message.

use crate::NetworkMessage;
use isaac_types::Transaction;
use serde::{Deserialize, Serialize};

/// Gossips a client transaction to every validator except the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionGossip {
    pub transaction: Transaction,
}

impl TransactionGossip {
    pub fn new(transaction: Transaction) -> Self {
        TransactionGossip { transaction }
    }

    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }
}

impl NetworkMessage for TransactionGossip {
    fn message_type_id() -> &'static str {
        "transaction.gossip"
    }
}

//! Directed request/response messages.

use crate::NetworkMessage;
use isaac_types::{Block, Hash, Transaction};
use serde::{Deserialize, Serialize};

/// Ask a peer for transaction bodies by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTransactionsRequest {
    pub hashes: Vec<Hash>,
}

impl NetworkMessage for GetTransactionsRequest {
    fn message_type_id() -> &'static str {
        "node.get-transactions"
    }
}

/// Ask a peer for a contiguous block range, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksRequest {
    pub from_height: u64,
    pub to_height: u64,
}

impl NetworkMessage for GetBlocksRequest {
    fn message_type_id() -> &'static str {
        "node.get-blocks"
    }
}

/// A block together with its ordinary transaction bodies, as served to a
/// syncing peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

/// One line of a newline-delimited fetch response.
///
/// A peer answers each requested item independently, so a single missing
/// transaction does not fail the whole stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FetchItem {
    Transaction { transaction: Transaction },
    Block { record: BlockRecord },
    Error { code: String },
}

impl FetchItem {
    /// Encode a sequence of items as a newline-delimited byte stream.
    pub fn encode_stream(items: &[FetchItem]) -> Vec<u8> {
        let mut out = Vec::new();
        for item in items {
            out.extend_from_slice(&serde_json::to_vec(item).expect("serializable item"));
            out.push(b'\n');
        }
        out
    }

    /// Decode a newline-delimited byte stream, skipping blank lines.
    pub fn decode_stream(body: &[u8]) -> Result<Vec<FetchItem>, serde_json::Error> {
        body.split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(serde_json::from_slice)
            .collect()
    }
}

use crate::{hash_hex, Block};
use serde::{Deserialize, Serialize};

/// Read-only rendering of a block for inspection and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub index: u64,
    pub hash: String,
    /// `"0"` for the genesis block.
    pub parent_hash: String,
    pub timestamp: u64,
    pub nonce: u64,
    pub transactions: Vec<String>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        let parent_hash = if block.header.previous_hash == [0u8; 32] {
            "0".to_string()
        } else {
            hash_hex(&block.header.previous_hash)
        };
        Self {
            index: block.header.index,
            hash: hash_hex(&block.hash),
            parent_hash,
            timestamp: block.header.timestamp,
            nonce: block.header.nonce,
            transactions: block.txs.iter().map(ToString::to_string).collect(),
        }
    }
}

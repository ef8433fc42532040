use crate::config::Role;
use crate::network::NodeId;
use serde::{Serialize, Serializer};
use simublock_core::{hash_hex, Hash, Rejection};
use std::fmt;

/// Notable transitions, rendered as one-line descriptions for whatever relays
/// them (a log, a push channel, a dashboard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    MiningStarted,
    MiningStopped,
    NodeStarted { node: NodeId, role: Role },
    NodeFinished { node: NodeId, chain_length: usize },
    BlockMined {
        node: NodeId,
        index: u64,
        #[serde(serialize_with = "hex_hash")]
        hash: Hash,
        nonce: u64,
    },
    BlockWithheld { node: NodeId, index: u64, withheld: usize },
    BlocksReleased { node: NodeId, count: usize },
    BlockCommitted {
        node: NodeId,
        index: u64,
        #[serde(serialize_with = "hex_hash")]
        hash: Hash,
    },
    TransactionConfirmed { node: NodeId, index: u64, tx: String },
    BlockRejected { node: NodeId, reason: Rejection },
    TransactionSkipped { node: NodeId, reason: Rejection },
    NothingToMine { node: NodeId },
}

fn hex_hash<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hash_hex(hash))
}

fn short(hash: &Hash) -> String {
    hash_hex(hash)[..12].to_string()
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimEvent::MiningStarted => write!(f, "Mining started"),
            SimEvent::MiningStopped => write!(f, "Mining stopped"),
            SimEvent::NodeStarted { node, role } => write!(f, "Node {node} ({role}) started"),
            SimEvent::NodeFinished { node, chain_length } => {
                write!(f, "Node {node} finished with {chain_length} blocks")
            }
            SimEvent::BlockMined {
                node,
                index,
                hash,
                nonce,
            } => write!(
                f,
                "Node {node} mined block {index} ({}) with nonce {nonce}",
                short(hash)
            ),
            SimEvent::BlockWithheld {
                node,
                index,
                withheld,
            } => write!(
                f,
                "Node {node} withheld block {index} ({withheld} private)"
            ),
            SimEvent::BlocksReleased { node, count } => {
                write!(f, "Node {node} released {count} withheld blocks")
            }
            SimEvent::BlockCommitted { node, index, hash } => {
                write!(f, "BLOCK {index} committed on node {node} ({})", short(hash))
            }
            SimEvent::TransactionConfirmed { node, index, tx } => {
                write!(f, "TX {tx} confirmed in block {index} on node {node}")
            }
            SimEvent::BlockRejected { node, reason } => write!(f, "Node {node}: {reason}"),
            SimEvent::TransactionSkipped { node, reason } => write!(f, "Node {node}: {reason}"),
            SimEvent::NothingToMine { node } => {
                write!(f, "Node {node}: {}", Rejection::EmptyQueue)
            }
        }
    }
}

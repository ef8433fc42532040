use crate::constants::MAX_DIFFICULTY;
use serde::Serialize;
use thiserror::Error;

/// Non-fatal outcomes that drop work on a single node. None of these stop the
/// simulation; they are reported through events and node statistics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("block {index} rejected: parent {found} does not match tip {expected}")]
    ParentMismatch {
        index: u64,
        expected: String,
        found: String,
    },
    #[error("block {index} rejected: hash has fewer than {difficulty} leading zero digits")]
    InsufficientWork { index: u64, difficulty: u32 },
    #[error("transaction {tx} skipped: balance {available} is below {needed}")]
    InsufficientBalance {
        tx: String,
        needed: u64,
        available: u64,
    },
    #[error("no operations to mine")]
    EmptyQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("difficulty {0} exceeds the {MAX_DIFFICULTY} hex digits of a hash")]
    DifficultyTooHigh(u32),
    #[error("network delay bounds are inverted: min {min_ms}ms > max {max_ms}ms")]
    InvertedDelay { min_ms: u64, max_ms: u64 },
    #[error("transaction amount bounds are inverted: min {min} > max {max}")]
    InvertedAmount { min: u64, max: u64 },
    #[error("a simulation needs at least one node")]
    NoNodes,
    #[error("at least two distinct accounts are required, got {0}")]
    TooFewAccounts(usize),
    #[error("account {0} is listed more than once")]
    DuplicateAccount(String),
    #[error("target chain length must be at least 2, got {0}")]
    TargetTooShort(usize),
    #[error("block capacity must be at least 1")]
    ZeroCapacity,
    #[error("withhold threshold must be at least 1")]
    ZeroWithholdThreshold,
    #[error("reference node {reference} is out of range for {nodes} nodes")]
    UnknownReference { reference: usize, nodes: usize },
}

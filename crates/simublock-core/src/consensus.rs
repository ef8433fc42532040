//! Proof-of-work proposal and validation.

use crate::constants::MAX_DIFFICULTY;
use crate::error::{ConfigError, Rejection};
use crate::{hash_hex, mine, pow, Block, Ledger};
use std::sync::atomic::AtomicBool;

/// True iff `block` carries enough work and extends `ledger`'s tip.
pub fn validate(block: &Block, difficulty: u32, ledger: &Ledger) -> bool {
    pow::meets_difficulty(&block.hash, difficulty) && block.header.previous_hash == ledger.tip_hash()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consensus {
    difficulty: u32,
    parallel: bool,
}

impl Consensus {
    pub fn new(difficulty: u32) -> Result<Self, ConfigError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(difficulty));
        }
        Ok(Self {
            difficulty,
            parallel: false,
        })
    }

    /// Spread the nonce search over the rayon pool.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Mine `block` until it meets the difficulty. Unbounded.
    pub fn propose_block(&self, block: Block) -> Block {
        pow::mine_block(block, self.difficulty)
    }

    /// Mine `block`, giving up with `None` once `cancel` is raised.
    pub fn propose_block_until(&self, block: Block, cancel: &AtomicBool) -> Option<Block> {
        if self.parallel {
            mine::mine_block_parallel(block, self.difficulty, cancel)
        } else {
            pow::mine_block_until(block, self.difficulty, cancel)
        }
    }

    pub fn validate_block(&self, block: &Block, ledger: &Ledger) -> bool {
        validate(block, self.difficulty, ledger)
    }

    /// The block's hash is genuine and has the required leading zeros.
    ///
    /// Stricter than [`validate`]: a block whose cached hash was not derived
    /// from its contents fails even if that hash looks valid.
    pub fn meets_difficulty(&self, block: &Block) -> bool {
        block.is_sealed() && pow::meets_difficulty(&block.hash, self.difficulty)
    }

    /// Like [`Consensus::meets_difficulty`], naming the failure.
    pub fn check_work(&self, block: &Block) -> Result<(), Rejection> {
        if self.meets_difficulty(block) {
            Ok(())
        } else {
            Err(Rejection::InsufficientWork {
                index: block.index(),
                difficulty: self.difficulty,
            })
        }
    }

    /// Full check before accepting an externally produced block.
    pub fn check(&self, block: &Block, ledger: &Ledger) -> Result<(), Rejection> {
        self.check_work(block)?;
        let expected = ledger.tip_hash();
        if block.header.previous_hash != expected {
            return Err(Rejection::ParentMismatch {
                index: block.index(),
                expected: hash_hex(&expected),
                found: hash_hex(&block.header.previous_hash),
            });
        }
        Ok(())
    }
}

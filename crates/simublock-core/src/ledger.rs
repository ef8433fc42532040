//! Per-node chain plus the balances derived from it.
//!
//! A block is appended only when it extends the current tip. There is no
//! fork choice: a block built on any other parent is dropped, so two ledgers
//! that accept different blocks at the same height stay apart unless one of
//! them later receives the other's whole branch in order.

use crate::constants::GENESIS_ACCOUNTS;
use crate::error::Rejection;
use crate::view::BlockView;
use crate::{genesis_block, hash_hex, Block, Hash, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// What happened to a single transaction of an accepted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxReceipt {
    Applied,
    SkippedInsufficientFunds { needed: u64, available: u64 },
}

/// Result of offering a block to [`Ledger::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Appended; one receipt per transaction, in block order.
    Accepted { receipts: Vec<TxReceipt> },
    RejectedParentMismatch { expected: Hash, found: Hash },
}

impl BlockOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BlockOutcome::Accepted { .. })
    }

    pub fn applied_count(&self) -> usize {
        match self {
            BlockOutcome::Accepted { receipts } => receipts
                .iter()
                .filter(|r| matches!(r, TxReceipt::Applied))
                .count(),
            BlockOutcome::RejectedParentMismatch { .. } => 0,
        }
    }

    /// Every non-fatal rejection this outcome carries, for reporting.
    pub fn rejections(&self, block: &Block) -> Vec<Rejection> {
        match self {
            BlockOutcome::Accepted { receipts } => receipts
                .iter()
                .zip(&block.txs)
                .filter_map(|(receipt, tx)| match receipt {
                    TxReceipt::Applied => None,
                    TxReceipt::SkippedInsufficientFunds { needed, available } => {
                        Some(Rejection::InsufficientBalance {
                            tx: tx.to_string(),
                            needed: *needed,
                            available: *available,
                        })
                    }
                })
                .collect(),
            BlockOutcome::RejectedParentMismatch { expected, found } => {
                vec![Rejection::ParentMismatch {
                    index: block.index(),
                    expected: hash_hex(expected),
                    found: hash_hex(found),
                }]
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Vec<Block>,
    balances: BTreeMap<String, u64>,
    committed_txs: usize,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::with_balances(
            GENESIS_ACCOUNTS
                .iter()
                .map(|(name, balance)| (name.to_string(), *balance)),
        )
    }
}

impl Ledger {
    /// Genesis-only ledger with the default allocation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Genesis-only ledger with the given opening balances.
    pub fn with_balances<I, S>(balances: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            chain: vec![genesis_block()],
            balances: balances
                .into_iter()
                .map(|(name, amount)| (name.into(), amount))
                .collect(),
            committed_txs: 0,
        }
    }

    pub fn last(&self) -> &Block {
        // The chain is created with genesis and never shrinks.
        &self.chain[self.chain.len() - 1]
    }

    pub fn tip_hash(&self) -> Hash {
        self.last().hash
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false: genesis is never removed. Present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn balances(&self) -> &BTreeMap<String, u64> {
        &self.balances
    }

    pub fn balance(&self, account: &str) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Transactions that actually moved funds, over the whole chain.
    pub fn committed_tx_count(&self) -> usize {
        self.committed_txs
    }

    pub fn view(&self) -> Vec<BlockView> {
        self.chain.iter().map(BlockView::from).collect()
    }

    /// Append `block` if it extends the tip, applying its transactions.
    ///
    /// A transaction whose sender cannot cover it is skipped; the rest of the
    /// block still applies. A rejected block leaves the ledger untouched.
    pub fn add(&mut self, block: Block) -> BlockOutcome {
        let expected = self.tip_hash();
        if block.header.previous_hash != expected {
            debug!(
                index = block.index(),
                tip = %hash_hex(&expected),
                parent = %hash_hex(&block.header.previous_hash),
                "rejecting block that does not extend the tip"
            );
            return BlockOutcome::RejectedParentMismatch {
                expected,
                found: block.header.previous_hash,
            };
        }

        let receipts = block.txs.iter().map(|tx| self.apply(tx)).collect();
        self.chain.push(block);
        BlockOutcome::Accepted { receipts }
    }

    fn apply(&mut self, tx: &Transaction) -> TxReceipt {
        let available = self.balance(&tx.from);
        if available < tx.amount {
            trace!(%tx, available, "skipping transaction with insufficient funds");
            return TxReceipt::SkippedInsufficientFunds {
                needed: tx.amount,
                available,
            };
        }
        *self.balances.entry(tx.from.clone()).or_insert(0) -= tx.amount;
        *self.balances.entry(tx.to.clone()).or_insert(0) += tx.amount;
        self.committed_txs += 1;
        TxReceipt::Applied
    }

    /// Every block links to its predecessor.
    pub fn is_linked(&self) -> bool {
        self.chain
            .windows(2)
            .all(|pair| pair[1].header.previous_hash == pair[0].hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::mine_block;

    fn alice_bob(balance: u64) -> Ledger {
        Ledger::with_balances([("Alice", balance), ("Bob", balance)])
    }

    fn mined_on(ledger: &Ledger, txs: Vec<Transaction>) -> Block {
        let block = Block::new(ledger.len() as u64, ledger.tip_hash(), txs);
        mine_block(block, 2)
    }

    #[test]
    fn starts_at_genesis() {
        let ledger = Ledger::new();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.last(), &genesis_block());
        assert_eq!(ledger.balance("Alice"), 100);
        assert_eq!(ledger.balance("Bob"), 100);
        assert_eq!(ledger.balance("Miner"), 0);
        assert!(!ledger.is_empty());
    }

    #[test]
    fn accepts_block_and_moves_funds() {
        let mut ledger = alice_bob(50);
        let block = mined_on(&ledger, vec![Transaction::new("Alice", "Bob", 5)]);
        let outcome = ledger.add(block);
        assert_eq!(
            outcome,
            BlockOutcome::Accepted {
                receipts: vec![TxReceipt::Applied]
            }
        );
        assert_eq!(ledger.balance("Alice"), 45);
        assert_eq!(ledger.balance("Bob"), 55);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.committed_tx_count(), 1);
    }

    #[test]
    fn skips_overdraft_but_appends_block() {
        let mut ledger = alice_bob(50);
        let block = mined_on(&ledger, vec![Transaction::new("Alice", "Bob", 1000)]);
        let outcome = ledger.add(block.clone());
        assert!(outcome.is_accepted());
        assert_eq!(outcome.applied_count(), 0);
        assert_eq!(
            outcome.rejections(&block),
            vec![Rejection::InsufficientBalance {
                tx: "Alice->Bob:1000".into(),
                needed: 1000,
                available: 50,
            }]
        );
        assert_eq!(ledger.balance("Alice"), 50);
        assert_eq!(ledger.balance("Bob"), 50);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn partial_block_applies_covered_transactions() {
        let mut ledger = alice_bob(10);
        let block = mined_on(
            &ledger,
            vec![
                Transaction::new("Alice", "Bob", 8),
                Transaction::new("Alice", "Bob", 8),
                Transaction::new("Bob", "Carol", 18),
            ],
        );
        let outcome = ledger.add(block);
        assert_eq!(
            outcome,
            BlockOutcome::Accepted {
                receipts: vec![
                    TxReceipt::Applied,
                    TxReceipt::SkippedInsufficientFunds {
                        needed: 8,
                        available: 2
                    },
                    TxReceipt::Applied,
                ]
            }
        );
        assert_eq!(ledger.balance("Alice"), 2);
        assert_eq!(ledger.balance("Bob"), 0);
        assert_eq!(ledger.balance("Carol"), 18);
    }

    #[test]
    fn unknown_sender_is_skipped() {
        let mut ledger = alice_bob(10);
        let block = mined_on(&ledger, vec![Transaction::new("Mallory", "Bob", 1)]);
        assert_eq!(ledger.add(block).applied_count(), 0);
        assert_eq!(ledger.balance("Mallory"), 0);
        assert_eq!(ledger.balance("Bob"), 10);
    }

    #[test]
    fn rejects_block_with_wrong_parent() {
        let mut ledger = alice_bob(50);
        let block = mine_block(
            Block::new(1, [9u8; 32], vec![Transaction::new("Alice", "Bob", 5)]),
            2,
        );
        let before = ledger.balances().clone();
        let outcome = ledger.add(block.clone());
        assert_eq!(
            outcome,
            BlockOutcome::RejectedParentMismatch {
                expected: genesis_block().hash,
                found: [9u8; 32],
            }
        );
        assert!(matches!(
            outcome.rejections(&block).as_slice(),
            [Rejection::ParentMismatch { index: 1, .. }]
        ));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.balances(), &before);
    }

    #[test]
    fn replay_is_rejected_without_side_effects() {
        let mut ledger = alice_bob(50);
        let block = mined_on(&ledger, vec![Transaction::new("Alice", "Bob", 5)]);
        assert!(ledger.add(block.clone()).is_accepted());
        let before = ledger.balances().clone();
        assert!(!ledger.add(block).is_accepted());
        assert_eq!(ledger.balances(), &before);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn identical_sequences_converge() {
        let mut a = alice_bob(50);
        let mut b = alice_bob(50);
        for amount in [3, 70, 20] {
            let block = mined_on(&a, vec![Transaction::new("Alice", "Bob", amount)]);
            assert!(a.add(block.clone()).is_accepted());
            assert!(b.add(block).is_accepted());
        }
        assert_eq!(a.tip_hash(), b.tip_hash());
        assert_eq!(a.balances(), b.balances());
        assert!(a.is_linked() && b.is_linked());
    }

    #[test]
    fn competing_blocks_diverge_for_good() {
        let mut a = alice_bob(50);
        let mut b = alice_bob(50);
        let block_a = mined_on(&a, vec![Transaction::new("Alice", "Bob", 1)]);
        let block_b = mined_on(&b, vec![Transaction::new("Bob", "Alice", 2)]);
        assert!(a.add(block_a.clone()).is_accepted());
        assert!(b.add(block_b.clone()).is_accepted());

        // Same height, different tips: each side drops the other's block.
        assert!(!a.add(block_b).is_accepted());
        assert!(!b.add(block_a.clone()).is_accepted());

        // Blocks extending `a` keep bouncing off `b`; there is no reorg.
        let next_a = mined_on(&a, vec![]);
        assert!(a.add(next_a.clone()).is_accepted());
        assert!(!b.add(next_a).is_accepted());
        assert_ne!(a.tip_hash(), b.tip_hash());
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn balances_never_negative_under_random_load() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let accounts = ["Alice", "Bob", "Carol"];
        let mut rng = StdRng::seed_from_u64(7);
        let mut ledger = Ledger::with_balances([("Alice", 20), ("Bob", 5)]);
        let supply: u64 = ledger.balances().values().sum();
        for _ in 0..20 {
            let txs = (0..4)
                .map(|_| {
                    let from = accounts[rng.gen_range(0..3)];
                    let to = accounts[rng.gen_range(0..3)];
                    Transaction::new(from, to, rng.gen_range(0..15))
                })
                .collect();
            let block = Block::new(ledger.len() as u64, ledger.tip_hash(), txs);
            assert!(ledger.add(block).is_accepted());
            assert_eq!(ledger.balances().values().sum::<u64>(), supply);
        }
        assert!(ledger.is_linked());
    }

    #[test]
    fn view_renders_chain_in_order() {
        let mut ledger = alice_bob(50);
        let block = mined_on(&ledger, vec![Transaction::new("Alice", "Bob", 5)]);
        ledger.add(block);
        let view = ledger.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].parent_hash, "0");
        assert_eq!(view[1].parent_hash, view[0].hash);
        assert_eq!(view[1].transactions, vec!["Alice->Bob:5".to_string()]);
    }
}

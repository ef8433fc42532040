//! Block, transaction and proof-of-work primitives shared by every simulated node.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod consensus;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod mine;
pub mod view;

pub use consensus::Consensus;
pub use error::{ConfigError, Rejection};
pub use ledger::{BlockOutcome, Ledger, TxReceipt};
pub use view::BlockView;

pub type Hash = [u8; 32];

pub fn hash_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Milliseconds since the unix epoch; a clock set before 1970 reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    pub to: String,
    pub amount: u64,
}

impl Transaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: u64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    /// Length-prefixed encoding used for the merkle leaves.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.from.len() + 8 + self.to.len() + 8);
        bytes.extend_from_slice(&(self.from.len() as u64).to_le_bytes());
        bytes.extend_from_slice(self.from.as_bytes());
        bytes.extend_from_slice(&(self.to.len() as u64).to_le_bytes());
        bytes.extend_from_slice(self.to.as_bytes());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.from, self.to, self.amount)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: u64,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    /// Creation time in milliseconds since the unix epoch.
    pub timestamp: u64,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(index: u64, previous_hash: Hash, merkle_root: Hash, nonce: u64) -> Self {
        Self {
            index,
            previous_hash,
            merkle_root,
            timestamp: now_millis(),
            nonce,
        }
    }

    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 32 + 32 + 8 + 8);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.previous_hash);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn hash(&self) -> Hash {
        sha256(&self.hash_bytes())
    }
}

/// A block together with its cached content hash.
///
/// The hash covers the header, and through the merkle root every transaction,
/// so it changes whenever the nonce does. Mining refreshes it via [`Block::rehash`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    pub hash: Hash,
}

impl Block {
    /// Candidate block at `index` on top of `previous_hash`, nonce 0.
    pub fn new(index: u64, previous_hash: Hash, txs: Vec<Transaction>) -> Self {
        let header = BlockHeader::new(index, previous_hash, merkle_root(&txs), 0);
        Self::from_parts(header, txs)
    }

    pub fn from_parts(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        let hash = header.hash();
        Self { header, txs, hash }
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.header.previous_hash
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn compute_hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    /// The cached hash matches the contents it claims to cover.
    pub fn is_sealed(&self) -> bool {
        self.header.merkle_root == merkle_root(&self.txs) && self.hash == self.compute_hash()
    }
}

/// The shared zero-transaction genesis block.
///
/// Its timestamp is pinned to 0 so every ledger starts from the same hash.
pub fn genesis_block() -> Block {
    let header = BlockHeader {
        index: 0,
        previous_hash: [0u8; 32],
        merkle_root: [0u8; 32],
        timestamp: 0,
        nonce: 0,
    };
    Block::from_parts(header, vec![])
}

fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..]);
    out
}

pub fn merkle_root(txs: &[Transaction]) -> Hash {
    if txs.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<Hash> = txs.iter().map(|t| sha256(&t.hash_bytes())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let (a, b) = if pair.len() == 2 {
                (pair[0], pair[1])
            } else {
                (pair[0], pair[0])
            };
            let mut hasher = Sha256::new();
            hasher.update(a);
            hasher.update(b);
            let digest = hasher.finalize();
            let mut out = [0u8; 32];
            out.copy_from_slice(&digest[..]);
            next.push(out);
        }
        level = next;
    }
    level[0]
}

pub mod pow {
    use super::{Block, Hash};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Mine the block by incrementing the nonce until its hash starts with
    /// `difficulty` zero hex digits. Never gives up.
    pub fn mine_block(block: Block, difficulty: u32) -> Block {
        let never = AtomicBool::new(false);
        match mine_block_until(block, difficulty, &never) {
            Some(mined) => mined,
            None => unreachable!("search without a cancel flag cannot be cancelled"),
        }
    }

    /// Same search as [`mine_block`], checking `cancel` before every attempt.
    /// Returns `None` once `cancel` is raised.
    pub fn mine_block_until(mut block: Block, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            if meets_difficulty(&block.hash, difficulty) {
                return Some(block);
            }
            block.header.nonce = block.header.nonce.wrapping_add(1);
            block.rehash();
        }
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_nibbles(hash) >= difficulty
    }

    /// Leading zero digits of the hash's hex rendering.
    pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
        count_leading_zero_bits(hash) / 4
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn sample_txs() -> Vec<Transaction> {
        vec![
            Transaction::new("Alice", "Bob", 10),
            Transaction::new("Bob", "Charlie", 5),
        ]
    }

    #[test]
    fn leading_zero_bits_examples() {
        let mut h = [0u8; 32];
        assert_eq!(pow::count_leading_zero_bits(&h), 256);
        h[0] = 0x0F; // 00001111
        assert_eq!(pow::count_leading_zero_bits(&h), 4);
        h = [0u8; 32];
        h[1] = 0x80; // 00000000 10000000
        assert_eq!(pow::count_leading_zero_bits(&h), 8);
        h[1] = 0x40; // 01000000
        assert_eq!(pow::count_leading_zero_bits(&h), 9);
    }

    #[test]
    fn leading_zero_nibbles_match_hex_rendering() {
        let mut h = [0xffu8; 32];
        h[0] = 0x00;
        h[1] = 0x0a;
        let hex = hash_hex(&h);
        let zeros = hex.chars().take_while(|c| *c == '0').count() as u32;
        assert_eq!(zeros, 3);
        assert_eq!(pow::count_leading_zero_nibbles(&h), 3);
        assert!(pow::meets_difficulty(&h, 3));
        assert!(!pow::meets_difficulty(&h, 4));
        assert_eq!(pow::count_leading_zero_nibbles(&[0u8; 32]), 64);
    }

    #[test]
    fn mine_block_example() {
        let block = Block::new(1, [0u8; 32], sample_txs());
        let mined = pow::mine_block(block, 3);
        assert!(hash_hex(&mined.hash).starts_with("000"));
        assert_eq!(mined.hash, mined.compute_hash());
        assert!(mined.is_sealed());
    }

    #[test]
    fn mine_block_difficulty_zero_keeps_nonce() {
        let block = Block::new(1, [0u8; 32], sample_txs());
        let mined = pow::mine_block(block.clone(), 0);
        assert_eq!(mined.header.nonce, 0);
        assert_eq!(mined.hash, block.hash);
    }

    #[test]
    fn mine_block_until_respects_cancel() {
        let cancel = AtomicBool::new(true);
        let block = Block::new(1, [0u8; 32], sample_txs());
        // 64 zero digits is unreachable in practice; only the flag can end it.
        assert!(pow::mine_block_until(block, 64, &cancel).is_none());
    }

    #[test]
    fn merkle_root_empty_txs() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn merkle_root_single_tx() {
        let txs = vec![Transaction::new("Alice", "Bob", 10)];
        assert_eq!(merkle_root(&txs), sha256(&txs[0].hash_bytes()));
    }

    #[test]
    fn merkle_root_three_txs() {
        let txs = vec![
            Transaction::new("Alice", "Bob", 10),
            Transaction::new("Bob", "Charlie", 5),
            Transaction::new("Charlie", "Dave", 2),
        ];
        let root = merkle_root(&txs);
        let expected_hex = "ebbab14aac88151c901b8d0606cb6b18fed93eb0c9b5d9407af738dd14ae9956";
        assert_eq!(hex::encode(root), expected_hex);
    }

    #[test]
    fn merkle_root_depends_on_order() {
        let mut txs = sample_txs();
        let root = merkle_root(&txs);
        txs.reverse();
        assert_ne!(root, merkle_root(&txs));
    }

    #[test]
    fn transaction_hash_bytes_example() {
        let tx = Transaction::new("Al", "Bo", 7);
        let bytes = tx.hash_bytes();
        assert_eq!(bytes.len(), 8 + 2 + 8 + 2 + 8);
        assert_eq!(&bytes[0..8], &2u64.to_le_bytes());
        assert_eq!(&bytes[8..10], b"Al");
        assert_eq!(&bytes[18..20], b"Bo");
        assert_eq!(&bytes[20..28], &7u64.to_le_bytes());
    }

    #[test]
    fn transaction_display() {
        assert_eq!(Transaction::new("Alice", "Bob", 5).to_string(), "Alice->Bob:5");
    }

    #[test]
    fn genesis_block_example() {
        let genesis = genesis_block();
        assert_eq!(genesis.header.index, 0);
        assert_eq!(genesis.header.previous_hash, [0u8; 32]);
        assert_eq!(genesis.header.merkle_root, [0u8; 32]);
        assert_eq!(genesis.header.nonce, 0);
        assert!(genesis.txs.is_empty());
        assert_eq!(hash_hex(&genesis.hash), "10eef285deef7a4b7c82b22aa53589b7833df29de3814649c772bbd5c832f365");
    }

    #[test]
    fn genesis_is_shared() {
        assert_eq!(genesis_block(), genesis_block());
    }

    #[test]
    fn block_hash_example() {
        let txs = sample_txs();
        let header = BlockHeader {
            index: 1,
            previous_hash: [0u8; 32],
            merkle_root: merkle_root(&txs),
            timestamp: 1_600_000_200_000,
            nonce: 0,
        };
        let block = Block::from_parts(header, txs);
        assert_eq!(hex::encode(block.hash), "3a9d273e528c0e458c682e44e764a5c1bcd7a173cdfa98b24b09687c8a3b49d2");
    }

    #[test]
    fn block_header_hash_bytes_example() {
        let header = BlockHeader::new(1, [0u8; 32], [1u8; 32], 42);
        let bytes = header.hash_bytes();
        assert_eq!(bytes.len(), 88);
        assert_eq!(&bytes[0..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..40], &[0u8; 32]);
        assert_eq!(&bytes[40..72], &[1u8; 32]);
        assert_eq!(&bytes[72..80], &header.timestamp.to_le_bytes());
        assert_eq!(&bytes[80..88], &42u64.to_le_bytes());
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut block = Block::new(1, [0u8; 32], sample_txs());
        let hash1 = block.hash();
        block.header.nonce += 1;
        assert!(!block.is_sealed());
        block.rehash();
        assert_ne!(hash1, block.hash());
        assert!(block.is_sealed());
    }

    #[test]
    fn tampered_transactions_unseal_block() {
        let mut block = pow::mine_block(Block::new(1, [0u8; 32], sample_txs()), 1);
        block.txs[0].amount = 1_000;
        assert!(!block.is_sealed());
    }

    #[test]
    fn block_serialization_example() {
        let block = Block::new(1, [7u8; 32], sample_txs());
        let json = serde_json::to_string(&block).unwrap();
        let deserialized: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, deserialized);
    }
}

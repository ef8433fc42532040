use crate::{pow::meets_difficulty, Block};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Searches nonces in parallel until the header hash has at least `difficulty`
/// leading zero hex digits. Returns the sealed block, or `None` if `cancel` was
/// raised first.
///
/// Unlike [`crate::pow::mine_block`] the winning nonce is whichever thread gets
/// there first, not necessarily the smallest one.
pub fn mine_block_parallel(block: Block, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
    // Only the nonce varies between attempts.
    let base_header = block.header;

    let found = (base_header.nonce..u64::MAX)
        .into_par_iter()
        .find_any(|nonce| {
            if cancel.load(Ordering::Relaxed) {
                return true;
            }
            let mut h = base_header;
            h.nonce = *nonce;
            meets_difficulty(&h.hash(), difficulty)
        })?;

    if cancel.load(Ordering::Relaxed) {
        return None;
    }

    let mut final_header = base_header;
    final_header.nonce = found;
    let mined = Block::from_parts(final_header, block.txs);
    debug!(
        index = mined.header.index,
        nonce = found,
        hash = %crate::hash_hex(&mined.hash),
        "mined block in parallel"
    );
    Some(mined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Transaction;

    #[test]
    fn parallel_search_meets_difficulty() {
        let block = Block::new(3, [4u8; 32], vec![Transaction::new("Alice", "Bob", 2)]);
        let cancel = AtomicBool::new(false);
        let mined = mine_block_parallel(block.clone(), 3, &cancel).expect("not cancelled");
        assert!(meets_difficulty(&mined.hash, 3));
        assert!(mined.is_sealed());
        assert_eq!(mined.header.previous_hash, block.header.previous_hash);
        assert_eq!(mined.txs, block.txs);
    }

    #[test]
    fn parallel_search_stops_when_cancelled() {
        let block = Block::new(3, [4u8; 32], vec![]);
        let cancel = AtomicBool::new(true);
        assert!(mine_block_parallel(block, 64, &cancel).is_none());
    }
}

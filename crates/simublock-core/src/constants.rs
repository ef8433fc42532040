pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Difficulty is counted in leading zero hex digits, so it can never exceed this.
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
pub const DEFAULT_DIFFICULTY: u32 = 3;
pub const DEFAULT_TARGET_LENGTH: usize = 15;
pub const DEFAULT_BLOCK_CAPACITY: usize = 10;
pub const DEFAULT_WITHHOLD_THRESHOLD: usize = 2;
pub const GENESIS_ACCOUNTS: [(&str, u64); 3] = [("Alice", 100), ("Bob", 100), ("Miner", 0)];

#![allow(dead_code)]

use simublock_core::{pow::mine_block, Block, Consensus, Ledger, Transaction};
use simublock_sim::{
    Network, NetworkConfig, Node, NodeId, NodeSettings, Role, SimConfig, SimulationControl,
};

pub const DIFFICULTY: u32 = 1;

/// Small, fast, seeded configuration with millisecond-scale delays.
pub fn quick_config(seed: u64) -> SimConfig {
    SimConfig {
        difficulty: DIFFICULTY,
        target_length: 6,
        network: NetworkConfig {
            min_delay_ms: 0,
            max_delay_ms: 2,
            ..Default::default()
        },
        seed: Some(seed),
        max_duration_ms: Some(30_000),
        ..Default::default()
    }
}

pub fn instant_network() -> Network {
    Network::new(
        &NetworkConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            ..Default::default()
        },
        Some(0),
    )
}

/// Node wired into `network` with deterministic transactions.
pub fn wired_node(
    id: NodeId,
    role: Role,
    network: &mut Network,
    control: &SimulationControl,
) -> Node {
    Node::new(
        id,
        role,
        Consensus::new(DIFFICULTY).expect("valid difficulty"),
        NodeSettings::default(),
        network.register(id),
        control.clone(),
    )
    .with_seed(100 + id as u64)
}

/// A sealed block extending `parent`.
pub fn mined_on(parent: &Block, txs: Vec<Transaction>) -> Block {
    mine_block(Block::new(parent.index() + 1, parent.hash, txs), DIFFICULTY)
}

/// Chain linkage holds and the transfers conserved the opening supply.
pub fn assert_ledger_sound(ledger: &Ledger, supply: u64) {
    assert!(ledger.is_linked(), "every block must link to its predecessor");
    assert_eq!(ledger.blocks()[0], simublock_core::genesis_block());
    assert_eq!(ledger.balances().values().sum::<u64>(), supply);
}

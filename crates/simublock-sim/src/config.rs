//! Simulation parameters. `SimConfig::default()` is the reference setup:
//! two honest nodes and one selfish node mining to 15 blocks at difficulty 3.

use serde::{Deserialize, Serialize};
use simublock_core::constants::{
    DEFAULT_BLOCK_CAPACITY, DEFAULT_DIFFICULTY, DEFAULT_TARGET_LENGTH, DEFAULT_WITHHOLD_THRESHOLD,
    GENESIS_ACCOUNTS, MAX_DIFFICULTY,
};
use simublock_core::{ConfigError, Ledger};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Broadcasts every block as soon as it is mined.
    Honest,
    /// Withholds blocks and releases them in a burst.
    Selfish,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Honest => f.write_str("honest"),
            Role::Selfish => f.write_str("selfish"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Deliver a broadcast back to the node that sent it.
    pub include_sender: bool,
    /// Deliver to all peers concurrently instead of one after another.
    pub parallel_delivery: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 50,
            max_delay_ms: 200,
            include_sender: true,
            parallel_delivery: false,
        }
    }
}

impl NetworkConfig {
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// One entry per node; node ids are the positions in this list.
    pub roles: Vec<Role>,
    pub difficulty: u32,
    /// A node stops mining once its own chain holds this many blocks.
    pub target_length: usize,
    pub block_capacity: usize,
    /// Withheld blocks a selfish node collects before releasing them.
    pub withhold_threshold: usize,
    pub accounts: Vec<String>,
    pub genesis_balances: BTreeMap<String, u64>,
    pub min_amount: u64,
    pub max_amount: u64,
    pub network: NetworkConfig,
    pub verify_pow_on_receipt: bool,
    pub parallel_mining: bool,
    /// Generate a transaction when nothing was submitted. When off, a cycle
    /// with an empty queue mines nothing.
    pub auto_transactions: bool,
    /// Mine only after an explicit trigger.
    pub manual_trigger: bool,
    pub start_running: bool,
    /// Node whose ledger is reported.
    pub reference_node: usize,
    pub seed: Option<u64>,
    pub max_duration_ms: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            roles: vec![Role::Honest, Role::Honest, Role::Selfish],
            difficulty: DEFAULT_DIFFICULTY,
            target_length: DEFAULT_TARGET_LENGTH,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            withhold_threshold: DEFAULT_WITHHOLD_THRESHOLD,
            accounts: vec!["Alice".into(), "Bob".into()],
            genesis_balances: GENESIS_ACCOUNTS
                .iter()
                .map(|(name, balance)| (name.to_string(), *balance))
                .collect(),
            min_amount: 1,
            max_amount: 5,
            network: NetworkConfig::default(),
            verify_pow_on_receipt: true,
            parallel_mining: false,
            auto_transactions: true,
            manual_trigger: false,
            start_running: true,
            reference_node: 0,
            seed: None,
            max_duration_ms: None,
        }
    }
}

impl SimConfig {
    /// `honest` honest nodes followed by `selfish` selfish ones.
    pub fn with_nodes(mut self, honest: usize, selfish: usize) -> Self {
        self.roles = std::iter::repeat(Role::Honest)
            .take(honest)
            .chain(std::iter::repeat(Role::Selfish).take(selfish))
            .collect();
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roles.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }
        if self.network.min_delay_ms > self.network.max_delay_ms {
            return Err(ConfigError::InvertedDelay {
                min_ms: self.network.min_delay_ms,
                max_ms: self.network.max_delay_ms,
            });
        }
        if self.min_amount > self.max_amount {
            return Err(ConfigError::InvertedAmount {
                min: self.min_amount,
                max: self.max_amount,
            });
        }
        let distinct: BTreeSet<&String> = self.accounts.iter().collect();
        if distinct.len() < 2 {
            return Err(ConfigError::TooFewAccounts(distinct.len()));
        }
        // Transactions pick sender and recipient by position.
        let mut seen = BTreeSet::new();
        if let Some(dup) = self.accounts.iter().find(|name| !seen.insert(*name)) {
            return Err(ConfigError::DuplicateAccount(dup.clone()));
        }
        if self.target_length < 2 {
            return Err(ConfigError::TargetTooShort(self.target_length));
        }
        if self.block_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.withhold_threshold == 0 {
            return Err(ConfigError::ZeroWithholdThreshold);
        }
        if self.reference_node >= self.roles.len() {
            return Err(ConfigError::UnknownReference {
                reference: self.reference_node,
                nodes: self.roles.len(),
            });
        }
        Ok(())
    }

    pub fn genesis_ledger(&self) -> Ledger {
        Ledger::with_balances(self.genesis_balances.clone())
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

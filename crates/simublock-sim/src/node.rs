//! A mining node: one ledger, one task, one disclosure policy.
//!
//! Each node owns its ledger outright. Blocks from the network arrive in its
//! inbox and are applied between mining attempts, so nothing else ever
//! mutates the ledger.

use crate::config::{Role, SimConfig};
use crate::control::SimulationControl;
use crate::error::SimError;
use crate::events::SimEvent;
use crate::network::{Delivery, Network, NodeId};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use simublock_core::{
    hash_hex, Block, BlockOutcome, BlockView, Consensus, Ledger, Rejection, Transaction,
    TxReceipt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Pause between polls of an empty queue when nothing generates work.
const IDLE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub target_length: usize,
    pub block_capacity: usize,
    pub withhold_threshold: usize,
    pub accounts: Vec<String>,
    pub min_amount: u64,
    pub max_amount: u64,
    pub verify_pow_on_receipt: bool,
    pub auto_transactions: bool,
    pub manual_trigger: bool,
}

impl From<&SimConfig> for NodeSettings {
    fn from(config: &SimConfig) -> Self {
        Self {
            target_length: config.target_length,
            block_capacity: config.block_capacity,
            withhold_threshold: config.withhold_threshold,
            accounts: config.accounts.clone(),
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            verify_pow_on_receipt: config.verify_pow_on_receipt,
            auto_transactions: config.auto_transactions,
            manual_trigger: config.manual_trigger,
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from(&SimConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub mined: usize,
    pub broadcast: usize,
    pub accepted: usize,
    pub rejected_parent: usize,
    pub rejected_work: usize,
    pub skipped_txs: usize,
    pub empty_cycles: usize,
}

/// What a node leaves behind once its task ends.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: NodeId,
    pub role: Role,
    pub ledger: Ledger,
    /// Blocks a selfish node mined but never released.
    pub withheld: Vec<Block>,
    pub stats: NodeStats,
}

pub struct Node {
    id: NodeId,
    role: Role,
    ledger: Ledger,
    private_chain: Vec<Block>,
    consensus: Consensus,
    settings: NodeSettings,
    rng: StdRng,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    control: SimulationControl,
    stats: NodeStats,
}

impl Node {
    pub fn new(
        id: NodeId,
        role: Role,
        consensus: Consensus,
        settings: NodeSettings,
        inbox: mpsc::UnboundedReceiver<Delivery>,
        control: SimulationControl,
    ) -> Self {
        Self {
            id,
            role,
            ledger: Ledger::new(),
            private_chain: Vec::new(),
            consensus,
            settings,
            rng: StdRng::from_entropy(),
            inbox,
            control,
            stats: NodeStats::default(),
        }
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn private_chain(&self) -> &[Block] {
        &self.private_chain
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// A random transfer between two distinct configured accounts.
    pub fn create_transaction(&mut self) -> Transaction {
        let accounts = &self.settings.accounts;
        let from = self.rng.gen_range(0..accounts.len());
        let mut to = self.rng.gen_range(0..accounts.len() - 1);
        if to >= from {
            to += 1;
        }
        let amount = self
            .rng
            .gen_range(self.settings.min_amount..=self.settings.max_amount);
        Transaction::new(accounts[from].clone(), accounts[to].clone(), amount)
    }

    /// Submitted transactions first; otherwise one generated transaction, if
    /// generation is on.
    fn collect_transactions(&mut self) -> Option<Vec<Transaction>> {
        let pending = self.control.take_pending(self.settings.block_capacity);
        if !pending.is_empty() {
            return Some(pending);
        }
        if self.settings.auto_transactions {
            return Some(vec![self.create_transaction()]);
        }
        None
    }

    /// Candidate on top of the ledger tip, whatever the role. Withheld
    /// blocks are not part of the ledger, so a selfish node's burst shares
    /// one parent.
    pub fn candidate(&self, txs: Vec<Transaction>) -> Block {
        Block::new(self.ledger.len() as u64, self.ledger.tip_hash(), txs)
    }

    /// Apply one inbound block to the ledger.
    pub fn receive(&mut self, delivery: Delivery) -> Option<BlockOutcome> {
        let block = delivery.block;
        if self.settings.verify_pow_on_receipt {
            if let Err(reason) = self.consensus.check_work(&block) {
                warn!(node = self.id, from = delivery.from, %reason, "dropping block");
                self.stats.rejected_work += 1;
                self.control.emit(SimEvent::BlockRejected {
                    node: self.id,
                    reason,
                });
                return None;
            }
        }

        let outcome = self.ledger.add(block.clone());
        match &outcome {
            BlockOutcome::Accepted { receipts } => {
                self.stats.accepted += 1;
                let applied = outcome.applied_count();
                debug!(
                    node = self.id,
                    from = delivery.from,
                    index = block.index(),
                    applied,
                    "block committed"
                );
                self.control
                    .publish_block(self.id, BlockView::from(&block), applied);
                self.control.emit(SimEvent::BlockCommitted {
                    node: self.id,
                    index: block.index(),
                    hash: block.hash,
                });
                for (receipt, tx) in receipts.iter().zip(&block.txs) {
                    if *receipt == TxReceipt::Applied {
                        self.control.emit(SimEvent::TransactionConfirmed {
                            node: self.id,
                            index: block.index(),
                            tx: tx.to_string(),
                        });
                    }
                }
                for reason in outcome.rejections(&block) {
                    self.stats.skipped_txs += 1;
                    self.control.emit(SimEvent::TransactionSkipped {
                        node: self.id,
                        reason,
                    });
                }
            }
            BlockOutcome::RejectedParentMismatch { .. } => {
                self.stats.rejected_parent += 1;
                for reason in outcome.rejections(&block) {
                    debug!(node = self.id, from = delivery.from, %reason, "block rejected");
                    self.control.emit(SimEvent::BlockRejected {
                        node: self.id,
                        reason,
                    });
                }
            }
        }
        Some(outcome)
    }

    /// Apply everything already waiting in the inbox.
    pub fn drain_inbox(&mut self) {
        while let Ok(delivery) = self.inbox.try_recv() {
            self.receive(delivery);
        }
    }

    /// Proof-of-work off the async workers. `None` when cancelled.
    async fn mine(&self, candidate: Block) -> Result<Option<Block>, SimError> {
        let consensus = self.consensus;
        let control = self.control.clone();
        let mined = tokio::task::spawn_blocking(move || {
            consensus.propose_block_until(candidate, control.cancel_flag())
        })
        .await?;
        Ok(mined)
    }

    /// Honest nodes publish at once; selfish nodes hold blocks back until
    /// they have `withhold_threshold` of them, then publish all in order.
    pub async fn disclose(&mut self, block: Block, network: &Network) {
        match self.role {
            Role::Honest => self.publish(vec![block], network).await,
            Role::Selfish => {
                let index = block.index();
                self.private_chain.push(block);
                debug!(
                    node = self.id,
                    index,
                    withheld = self.private_chain.len(),
                    "withholding block"
                );
                self.control.emit(SimEvent::BlockWithheld {
                    node: self.id,
                    index,
                    withheld: self.private_chain.len(),
                });
                if self.private_chain.len() >= self.settings.withhold_threshold {
                    let burst = std::mem::take(&mut self.private_chain);
                    info!(node = self.id, count = burst.len(), "releasing withheld blocks");
                    self.control.emit(SimEvent::BlocksReleased {
                        node: self.id,
                        count: burst.len(),
                    });
                    self.publish(burst, network).await;
                }
            }
        }
    }

    async fn publish(&mut self, blocks: Vec<Block>, network: &Network) {
        for block in blocks {
            if !network.delivers_to_sender() {
                self.receive(Delivery {
                    from: self.id,
                    block: block.clone(),
                });
            }
            network.broadcast(&block, self.id).await;
            self.stats.broadcast += 1;
        }
    }

    /// Mine until the own chain reaches the target length or the run is
    /// cancelled, then keep applying deliveries until every peer is done.
    pub async fn run(mut self, network: Arc<Network>) -> Result<NodeReport, SimError> {
        info!(node = self.id, role = %self.role, "node started");
        self.control.emit(SimEvent::NodeStarted {
            node: self.id,
            role: self.role,
        });
        self.control.publish_chain(
            self.id,
            self.ledger.view(),
            self.ledger.committed_tx_count(),
        );

        loop {
            self.drain_inbox();
            if self.ledger.len() >= self.settings.target_length {
                break;
            }
            if !self.control.wait_until_running().await {
                break;
            }
            if self.settings.manual_trigger && !self.control.wait_for_trigger().await {
                break;
            }
            // Waiting may have taken a while.
            self.drain_inbox();
            if self.ledger.len() >= self.settings.target_length {
                break;
            }

            let Some(txs) = self.collect_transactions() else {
                self.stats.empty_cycles += 1;
                debug!(node = self.id, "{}", Rejection::EmptyQueue);
                self.control.emit(SimEvent::NothingToMine { node: self.id });
                if !self.settings.manual_trigger {
                    tokio::select! {
                        _ = sleep(IDLE_BACKOFF) => {}
                        _ = self.control.cancelled() => break,
                    }
                }
                continue;
            };

            let candidate = self.candidate(txs);
            let Some(block) = self.mine(candidate).await? else {
                break;
            };
            self.stats.mined += 1;
            debug!(
                node = self.id,
                index = block.index(),
                nonce = block.header.nonce,
                hash = %hash_hex(&block.hash),
                "mined block"
            );
            self.control.emit(SimEvent::BlockMined {
                node: self.id,
                index: block.index(),
                hash: block.hash,
                nonce: block.header.nonce,
            });
            self.disclose(block, &network).await;
        }

        info!(
            node = self.id,
            chain_length = self.ledger.len(),
            withheld = self.private_chain.len(),
            "node stopped mining"
        );
        self.control.emit(SimEvent::NodeFinished {
            node: self.id,
            chain_length: self.ledger.len(),
        });

        // Peers may still be broadcasting. The inbox closes once the last of
        // them lets go of the network.
        drop(network);
        loop {
            tokio::select! {
                delivery = self.inbox.recv() => match delivery {
                    Some(delivery) => {
                        self.receive(delivery);
                    }
                    None => break,
                },
                _ = self.control.cancelled() => {
                    self.drain_inbox();
                    break;
                }
            }
        }

        Ok(NodeReport {
            id: self.id,
            role: self.role,
            ledger: self.ledger,
            withheld: self.private_chain,
            stats: self.stats,
        })
    }
}

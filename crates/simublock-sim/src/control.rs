//! Run-time control shared between the driver, the nodes and whatever sits on
//! top of them (CLI, dashboard).
//!
//! Nodes consult it once per mining cycle. It also carries the pending
//! transaction queue, the event channel, and a read-only mirror of each
//! node's chain. The mirror is written only by the owning node, after its
//! ledger accepted a block, so ledgers themselves never leave their task.

use crate::events::SimEvent;
use crate::metrics::RunMetrics;
use crate::network::NodeId;
use simublock_core::{BlockView, Transaction};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct ChainMirror {
    blocks: Vec<BlockView>,
    committed_txs: usize,
}

#[derive(Debug)]
struct Inner {
    run_id: String,
    difficulty: u32,
    started_at: Instant,
    running: watch::Sender<bool>,
    trigger: Notify,
    cancelled: AtomicBool,
    cancel: watch::Sender<bool>,
    pending: Mutex<VecDeque<Transaction>>,
    events: broadcast::Sender<SimEvent>,
    mirrors: Mutex<BTreeMap<NodeId, ChainMirror>>,
}

#[derive(Debug, Clone)]
pub struct SimulationControl {
    inner: Arc<Inner>,
}

impl SimulationControl {
    pub fn new(run_id: impl Into<String>, difficulty: u32, start_running: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                run_id: run_id.into(),
                difficulty,
                started_at: Instant::now(),
                running: watch::Sender::new(start_running),
                trigger: Notify::new(),
                cancelled: AtomicBool::new(false),
                cancel: watch::Sender::new(false),
                pending: Mutex::new(VecDeque::new()),
                events,
                mirrors: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn start(&self) {
        if !self.inner.running.send_replace(true) {
            info!("mining started");
            self.emit(SimEvent::MiningStarted);
        }
    }

    pub fn stop(&self) {
        if self.inner.running.send_replace(false) {
            info!("mining stopped");
            self.emit(SimEvent::MiningStopped);
        }
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Release one mining cycle. A trigger sent while nobody waits is kept
    /// until the next wait, and several such triggers still release only one cycle.
    pub fn trigger_mine(&self) {
        self.inner.trigger.notify_one();
    }

    /// Stop every node, including one in the middle of a nonce search.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            debug!("simulation cancelled");
            self.inner.cancel.send_replace(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Flag polled by the proof-of-work loop.
    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.inner.cancelled
    }

    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Wait until mining is switched on. False if cancelled first.
    pub async fn wait_until_running(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let mut running = self.inner.running.subscribe();
        tokio::select! {
            res = running.wait_for(|running| *running) => res.is_ok(),
            _ = self.cancelled() => false,
        }
    }

    /// Wait for one trigger. False if cancelled first.
    pub async fn wait_for_trigger(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.inner.trigger.notified() => true,
            _ = self.cancelled() => false,
        }
    }

    /// Queue a transaction for the next block any node mines.
    pub fn submit_transaction(&self, tx: Transaction) {
        debug!(%tx, "transaction submitted");
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(tx);
    }

    pub fn pending_len(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Up to `max` queued transactions, oldest first.
    pub fn take_pending(&self, max: usize) -> Vec<Transaction> {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let n = max.min(pending.len());
        pending.drain(..n).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.inner.events.subscribe()
    }

    pub fn emit(&self, event: SimEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn publish_block(&self, node: NodeId, view: BlockView, applied: usize) {
        let mut mirrors = self
            .inner
            .mirrors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mirror = mirrors.entry(node).or_default();
        mirror.blocks.push(view);
        mirror.committed_txs += applied;
    }

    pub(crate) fn publish_chain(&self, node: NodeId, blocks: Vec<BlockView>, committed_txs: usize) {
        let mut mirrors = self
            .inner
            .mirrors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        mirrors.insert(
            node,
            ChainMirror {
                blocks,
                committed_txs,
            },
        );
    }

    /// The chain `node` has accepted so far, in order.
    pub fn chain_view(&self, node: NodeId) -> Vec<BlockView> {
        self.inner
            .mirrors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node)
            .map(|mirror| mirror.blocks.clone())
            .unwrap_or_default()
    }

    /// Live metrics for `node`'s chain.
    pub fn metrics(&self, node: NodeId) -> RunMetrics {
        let mirrors = self
            .inner
            .mirrors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (blocks, committed) = match mirrors.get(&node) {
            Some(mirror) => (mirror.blocks.as_slice(), mirror.committed_txs),
            None => (&[][..], 0),
        };
        RunMetrics::from_chain(
            &self.inner.run_id,
            self.inner.difficulty,
            blocks,
            committed,
            self.inner.started_at.elapsed(),
        )
    }
}

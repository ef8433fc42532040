//! Simulated delayed multicast between nodes.
//!
//! The network never touches a ledger. It sleeps for an independently drawn
//! delay per recipient and then drops the block into that node's inbox; the
//! node applies it from its own task.

use crate::config::NetworkConfig;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use simublock_core::{hash_hex, Block};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

pub type NodeId = usize;

/// A block handed to one node's inbox.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: NodeId,
    pub block: Block,
}

/// Timing of one broadcast call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Propagation {
    pub block_index: u64,
    pub sender: NodeId,
    pub duration: Duration,
}

/// Append-only record of broadcast timings, shared with whoever reports on them.
#[derive(Debug, Clone, Default)]
pub struct PropagationLog {
    entries: Arc<Mutex<Vec<Propagation>>>,
}

impl PropagationLog {
    pub fn record(&self, entry: Propagation) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn snapshot(&self) -> Vec<Propagation> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total(&self) -> Duration {
        self.snapshot().iter().map(|p| p.duration).sum()
    }

    /// Mean broadcast span, `None` before the first broadcast.
    pub fn average(&self) -> Option<Duration> {
        let entries = self.snapshot();
        if entries.is_empty() {
            return None;
        }
        let total: Duration = entries.iter().map(|p| p.duration).sum();
        Some(total / entries.len() as u32)
    }
}

pub struct Network {
    peers: Vec<(NodeId, mpsc::UnboundedSender<Delivery>)>,
    min_delay: Duration,
    max_delay: Duration,
    include_sender: bool,
    parallel: bool,
    rng: Mutex<StdRng>,
    log: PropagationLog,
}

impl Network {
    pub fn new(config: &NetworkConfig, seed: Option<u64>) -> Self {
        let (min_delay, max_delay) = config.delay_bounds();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            peers: Vec::new(),
            min_delay,
            max_delay,
            include_sender: config.include_sender,
            parallel: config.parallel_delivery,
            rng: Mutex::new(rng),
            log: PropagationLog::default(),
        }
    }

    /// Add a node and hand back the inbox it reads deliveries from.
    pub fn register(&mut self, id: NodeId) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.push((id, tx));
        rx
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn delivers_to_sender(&self) -> bool {
        self.include_sender
    }

    pub fn log(&self) -> PropagationLog {
        self.log.clone()
    }

    fn sample_delay(&self) -> Duration {
        let min = self.min_delay.as_micros() as u64;
        let max = self.max_delay.as_micros() as u64;
        let micros = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(min..=max);
        Duration::from_micros(micros)
    }

    fn recipients(&self, sender: NodeId) -> impl Iterator<Item = &(NodeId, mpsc::UnboundedSender<Delivery>)> {
        let include_sender = self.include_sender;
        self.peers
            .iter()
            .filter(move |(id, _)| include_sender || *id != sender)
    }

    /// Deliver `block` to every recipient after its own random delay and
    /// record how long the whole call took.
    ///
    /// Sequential by default: each delay is slept in turn, so the caller is
    /// held for their sum. With parallel delivery the delays overlap and the
    /// call lasts as long as the slowest one.
    pub async fn broadcast(&self, block: &Block, sender: NodeId) -> Duration {
        let started = Instant::now();
        debug!(
            node = sender,
            index = block.index(),
            hash = %hash_hex(&block.hash),
            "broadcasting block"
        );

        if self.parallel {
            let mut deliveries = JoinSet::new();
            for (id, inbox) in self.recipients(sender) {
                let delay = self.sample_delay();
                let inbox = inbox.clone();
                let delivery = Delivery {
                    from: sender,
                    block: block.clone(),
                };
                let id = *id;
                deliveries.spawn(async move {
                    sleep(delay).await;
                    deliver(id, &inbox, delivery);
                });
            }
            while deliveries.join_next().await.is_some() {}
        } else {
            for (id, inbox) in self.recipients(sender) {
                sleep(self.sample_delay()).await;
                deliver(
                    *id,
                    inbox,
                    Delivery {
                        from: sender,
                        block: block.clone(),
                    },
                );
            }
        }

        let duration = started.elapsed();
        self.log.record(Propagation {
            block_index: block.index(),
            sender,
            duration,
        });
        duration
    }
}

fn deliver(id: NodeId, inbox: &mpsc::UnboundedSender<Delivery>, delivery: Delivery) {
    if inbox.send(delivery).is_err() {
        // The node's task is gone; nothing left to update.
        trace!(node = id, "dropping delivery to stopped node");
    }
}

//! Wires nodes to a network, runs every mining loop concurrently and
//! collects the report.

use crate::config::SimConfig;
use crate::control::SimulationControl;
use crate::error::SimError;
use crate::metrics::SimulationReport;
use crate::network::Network;
use crate::node::{Node, NodeReport, NodeSettings};
use simublock_core::Consensus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

pub struct Simulation {
    config: SimConfig,
    control: SimulationControl,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let run_id = hex::encode(rand::random::<[u8; 6]>());
        let control = SimulationControl::new(run_id, config.difficulty, config.start_running);
        Ok(Self { config, control })
    }

    /// Handle for starting, stopping, triggering, submitting and watching
    /// while [`Simulation::run`] is in progress.
    pub fn control(&self) -> SimulationControl {
        self.control.clone()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub async fn run(self) -> Result<SimulationReport, SimError> {
        let Simulation { config, control } = self;
        let consensus = Consensus::new(config.difficulty)?.parallel(config.parallel_mining);
        let settings = NodeSettings::from(&config);

        let mut network = Network::new(
            &config.network,
            config.seed.map(|seed| seed.wrapping_add(u64::MAX / 2)),
        );
        let mut nodes = Vec::with_capacity(config.roles.len());
        for (id, role) in config.roles.iter().copied().enumerate() {
            let inbox = network.register(id);
            let mut node = Node::new(id, role, consensus, settings.clone(), inbox, control.clone())
                .with_ledger(config.genesis_ledger());
            if let Some(seed) = config.seed {
                node = node.with_seed(seed.wrapping_add(id as u64));
            }
            nodes.push(node);
        }
        let log = network.log();
        // Nodes hold the only references, so inboxes close once every node is done.
        let network = Arc::new(network);

        info!(
            run_id = control.run_id(),
            nodes = nodes.len(),
            difficulty = config.difficulty,
            target_length = config.target_length,
            "simulation started"
        );
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        let mut task_nodes = HashMap::new();
        for node in nodes {
            let id = node.id();
            let handle = tasks.spawn(node.run(Arc::clone(&network)));
            task_nodes.insert(handle.id(), id);
        }
        drop(network);

        let watchdog = config.max_duration().map(|limit| {
            let control = control.clone();
            tokio::spawn(async move {
                sleep(limit).await;
                warn!(?limit, "run exceeded its time limit, cancelling");
                control.cancel();
            })
        });

        let mut reports: Vec<NodeReport> = Vec::with_capacity(config.roles.len());
        let mut failure = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((task, Err(err))) => {
                    warn!(node = ?task_nodes.get(&task), error = %err, "node failed");
                    control.cancel();
                    failure.get_or_insert(err);
                }
                Err(join_err) => {
                    let node = task_nodes.get(&join_err.id()).copied().unwrap_or_default();
                    warn!(node, error = %join_err, "node task aborted");
                    control.cancel();
                    failure.get_or_insert(SimError::NodeTask {
                        node,
                        source: join_err,
                    });
                }
            }
        }
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        if let Some(err) = failure {
            return Err(err);
        }

        reports.sort_by_key(|r| r.id);
        let elapsed = started.elapsed();
        let cancelled = control.is_cancelled();
        let reference = reports
            .iter()
            .find(|r| r.id == config.reference_node)
            .unwrap_or(&reports[0]);
        let report = SimulationReport::new(
            control.run_id(),
            config.difficulty,
            reference,
            &reports,
            log.snapshot(),
            elapsed,
            cancelled,
        );
        info!(
            run_id = control.run_id(),
            chain_length = report.chain_length,
            converged = report.converged,
            ?elapsed,
            "simulation finished"
        );
        Ok(report)
    }
}

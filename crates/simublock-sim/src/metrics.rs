use crate::config::Role;
use crate::network::{NodeId, Propagation};
use crate::node::{NodeReport, NodeStats};
use serde::Serialize;
use simublock_core::{hash_hex, BlockView};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Headline numbers for one chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub difficulty: u32,
    /// Blocks after genesis.
    pub block_count: usize,
    pub committed_tx_count: usize,
    /// Mean gap between consecutive mined block timestamps, in seconds.
    pub avg_block_time_secs: Option<f64>,
    pub elapsed_secs: f64,
}

impl RunMetrics {
    pub fn from_chain(
        run_id: &str,
        difficulty: u32,
        blocks: &[BlockView],
        committed_tx_count: usize,
        elapsed: Duration,
    ) -> Self {
        // Genesis carries a fixed timestamp, so gaps start at block 1.
        let mined: Vec<u64> = blocks
            .iter()
            .filter(|b| b.index > 0)
            .map(|b| b.timestamp)
            .collect();
        let avg_block_time_secs = if mined.len() >= 2 {
            let span = mined[mined.len() - 1].saturating_sub(mined[0]);
            Some(span as f64 / 1000.0 / (mined.len() - 1) as f64)
        } else {
            None
        };
        Self {
            run_id: run_id.to_string(),
            difficulty,
            block_count: blocks.len().saturating_sub(1),
            committed_tx_count,
            avg_block_time_secs,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub role: Role,
    pub chain_length: usize,
    pub tip_hash: String,
    pub withheld: usize,
    pub stats: NodeStats,
}

impl From<&NodeReport> for NodeSummary {
    fn from(report: &NodeReport) -> Self {
        Self {
            id: report.id,
            role: report.role,
            chain_length: report.ledger.len(),
            tip_hash: hash_hex(&report.ledger.tip_hash()),
            withheld: report.withheld.len(),
            stats: report.stats.clone(),
        }
    }
}

/// Everything a finished run reports, centred on one reference node.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub metrics: RunMetrics,
    pub reference_node: NodeId,
    pub chain_length: usize,
    pub balances: BTreeMap<String, u64>,
    pub avg_propagation_secs: Option<f64>,
    /// Reference chain length over total broadcast time.
    pub throughput: Option<f64>,
    /// Every node finished on the same tip.
    pub converged: bool,
    pub cancelled: bool,
    pub nodes: Vec<NodeSummary>,
    pub chain: Vec<BlockView>,
    pub propagation: Vec<Propagation>,
}

impl SimulationReport {
    pub fn new(
        run_id: &str,
        difficulty: u32,
        reference: &NodeReport,
        reports: &[NodeReport],
        propagation: Vec<Propagation>,
        elapsed: Duration,
        cancelled: bool,
    ) -> Self {
        let total: Duration = propagation.iter().map(|p| p.duration).sum();
        let avg_propagation_secs = if propagation.is_empty() {
            None
        } else {
            Some(total.as_secs_f64() / propagation.len() as f64)
        };
        let chain_length = reference.ledger.len();
        let throughput = if total.is_zero() {
            None
        } else {
            Some(chain_length as f64 / total.as_secs_f64())
        };
        let converged = reports
            .windows(2)
            .all(|pair| pair[0].ledger.tip_hash() == pair[1].ledger.tip_hash());
        let chain = reference.ledger.view();

        Self {
            metrics: RunMetrics::from_chain(
                run_id,
                difficulty,
                &chain,
                reference.ledger.committed_tx_count(),
                elapsed,
            ),
            reference_node: reference.id,
            chain_length,
            balances: reference.ledger.balances().clone(),
            avg_propagation_secs,
            throughput,
            converged,
            cancelled,
            nodes: reports.iter().map(NodeSummary::from).collect(),
            chain,
            propagation,
        }
    }

    /// `block_index,block_time` rows, one per broadcast, times in seconds.
    pub fn block_times_csv(&self) -> String {
        let mut out = String::from("block_index,block_time\n");
        for p in &self.propagation {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "{},{:.6}", p.block_index, p.duration.as_secs_f64());
        }
        out
    }

    /// Human-readable run summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Final chain length: {}", self.chain_length);
        let balances: Vec<String> = self
            .balances
            .iter()
            .map(|(name, balance)| format!("{name}: {balance}"))
            .collect();
        let _ = writeln!(out, "State: {{{}}}", balances.join(", "));
        match self.avg_propagation_secs {
            Some(avg) => {
                let _ = writeln!(out, "Avg block propagation time: {avg:.3} s");
            }
            None => {
                let _ = writeln!(out, "Avg block propagation time: n/a");
            }
        }
        match self.throughput {
            Some(tps) => {
                let _ = writeln!(out, "Approx TPS: {tps:.2}");
            }
            None => {
                let _ = writeln!(out, "Approx TPS: n/a");
            }
        }
        let _ = writeln!(
            out,
            "Nodes converged: {}",
            if self.converged { "yes" } else { "no (forked)" }
        );
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  node {} ({}): length {}, tip {}, mined {}, accepted {}, rejected {}, withheld {}",
                node.id,
                node.role,
                node.chain_length,
                &node.tip_hash[..12],
                node.stats.mined,
                node.stats.accepted,
                node.stats.rejected_parent + node.stats.rejected_work,
                node.withheld,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simublock_core::{genesis_block, Block, Ledger, Transaction};

    fn view(index: u64, timestamp: u64) -> BlockView {
        BlockView {
            index,
            hash: format!("{index:064x}"),
            parent_hash: "0".into(),
            timestamp,
            nonce: 0,
            transactions: vec![],
        }
    }

    #[test]
    fn block_time_ignores_genesis() {
        let blocks = vec![view(0, 0), view(1, 1_000), view(2, 1_500), view(3, 3_000)];
        let metrics = RunMetrics::from_chain("r", 3, &blocks, 4, Duration::from_secs(2));
        assert_eq!(metrics.block_count, 3);
        assert_eq!(metrics.committed_tx_count, 4);
        assert_eq!(metrics.avg_block_time_secs, Some(1.0));
        assert_eq!(metrics.elapsed_secs, 2.0);
    }

    #[test]
    fn block_time_needs_two_mined_blocks() {
        let blocks = vec![view(0, 0), view(1, 1_000)];
        let metrics = RunMetrics::from_chain("r", 3, &blocks, 0, Duration::ZERO);
        assert_eq!(metrics.avg_block_time_secs, None);
        assert_eq!(RunMetrics::from_chain("r", 3, &[], 0, Duration::ZERO).block_count, 0);
    }

    fn report(id: NodeId, ledger: Ledger) -> NodeReport {
        NodeReport {
            id,
            role: Role::Honest,
            ledger,
            withheld: vec![],
            stats: NodeStats::default(),
        }
    }

    fn propagation(block_index: u64, millis: u64) -> Propagation {
        Propagation {
            block_index,
            sender: 0,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn report_derives_propagation_throughput_and_forks() {
        let mut ahead = Ledger::new();
        let block = Block::new(1, genesis_block().hash, vec![Transaction::new("Alice", "Bob", 5)]);
        assert!(ahead.add(block).is_accepted());
        let reports = vec![report(0, ahead), report(1, Ledger::new())];

        let report = SimulationReport::new(
            "r",
            1,
            &reports[0],
            &reports,
            vec![propagation(1, 100), propagation(1, 300)],
            Duration::from_secs(1),
            false,
        );

        assert_eq!(report.chain_length, 2);
        assert_eq!(report.avg_propagation_secs, Some(0.2));
        assert_eq!(report.throughput, Some(2.0 / 0.4));
        assert!(!report.converged);
        assert_eq!(report.metrics.committed_tx_count, 1);
        assert_eq!(report.balances["Alice"], 95);
        assert_eq!(report.nodes[1].chain_length, 1);
        assert!(report.summary().contains("Nodes converged: no (forked)"));
    }

    #[test]
    fn report_without_broadcasts_has_no_rates() {
        let reports = vec![report(0, Ledger::new()), report(1, Ledger::new())];
        let report = SimulationReport::new("r", 1, &reports[1], &reports, vec![], Duration::ZERO, true);

        assert_eq!(report.reference_node, 1);
        assert_eq!(report.avg_propagation_secs, None);
        assert_eq!(report.throughput, None);
        assert!(report.converged);
        assert!(report.cancelled);
        assert_eq!(report.block_times_csv(), "block_index,block_time\n");
    }
}

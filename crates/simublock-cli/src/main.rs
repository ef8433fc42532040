use anyhow::{ensure, Context, Result};
use clap::Parser;
use simublock_sim::{SimConfig, Simulation, SimulationReport};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "simublock")]
#[command(about = "Simulate proof-of-work nodes racing over a delayed network")]
struct Args {
    /// JSON configuration file; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total number of nodes
    #[arg(long)]
    nodes: Option<usize>,

    /// How many of the nodes withhold blocks (the last ones)
    #[arg(long)]
    selfish: Option<usize>,

    /// Leading zero hex digits a block hash needs
    #[arg(long)]
    difficulty: Option<u32>,

    /// Chain length (genesis included) at which a node stops mining
    #[arg(long)]
    target_length: Option<usize>,

    #[arg(long)]
    min_delay_ms: Option<u64>,

    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Deliver each broadcast to all peers concurrently
    #[arg(long)]
    parallel_delivery: bool,

    /// Search nonces on every core
    #[arg(long)]
    parallel_mining: bool,

    /// Cancel a run that takes longer than this
    #[arg(long)]
    max_duration_ms: Option<u64>,

    /// Seed for transactions and delays; run n uses a seed derived from it
    #[arg(long)]
    seed: Option<u64>,

    /// Number of independent runs
    #[arg(long, env = "RUNS", default_value_t = 1)]
    runs: usize,

    /// Print each report as JSON instead of the summary
    #[arg(long)]
    json: bool,

    /// Also print block propagation times as CSV
    #[arg(long)]
    csv: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn build_config(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                SimConfig::from_json(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => SimConfig::default(),
        };

        if self.nodes.is_some() || self.selfish.is_some() {
            let selfish = self.selfish.unwrap_or(0);
            let nodes = self.nodes.unwrap_or(config.roles.len());
            ensure!(
                selfish <= nodes,
                "--selfish {selfish} exceeds --nodes {nodes}"
            );
            config = config.with_nodes(nodes - selfish, selfish);
        }
        if let Some(difficulty) = self.difficulty {
            config.difficulty = difficulty;
        }
        if let Some(target) = self.target_length {
            config.target_length = target;
        }
        if let Some(min) = self.min_delay_ms {
            config.network.min_delay_ms = min;
        }
        if let Some(max) = self.max_delay_ms {
            config.network.max_delay_ms = max;
        }
        config.network.parallel_delivery |= self.parallel_delivery;
        config.parallel_mining |= self.parallel_mining;
        if self.max_duration_ms.is_some() {
            config.max_duration_ms = self.max_duration_ms;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }

        config.validate().context("invalid simulation config")?;
        Ok(config)
    }
}

fn print_report(run: usize, report: &SimulationReport, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("--- SimuBlock Experiment {run} ---");
        print!("{}", report.summary());
    }
    if args.csv {
        print!("{}", report.block_times_csv());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let base = args.build_config()?;
    ensure!(args.runs > 0, "--runs must be at least 1");

    for run in 1..=args.runs {
        let mut config = base.clone();
        config.seed = base
            .seed
            .map(|seed| seed.wrapping_add(((run - 1) as u64) << 32));

        let sim = Simulation::new(config)?;
        let control = sim.control();
        info!(run, run_id = control.run_id(), "starting experiment");

        let handle = tokio::spawn(sim.run());
        let interrupt = tokio::spawn({
            let control = control.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling run");
                    control.cancel();
                }
            }
        });
        let report = handle
            .await
            .context("simulation task failed")?
            .with_context(|| format!("experiment {run} failed"))?;
        let interrupted = interrupt.is_finished();
        interrupt.abort();

        print_report(run, &report, &args)?;
        if report.cancelled {
            warn!(run, "run was cancelled before every node reached its target");
        }
        if interrupted {
            break;
        }
    }
    Ok(())
}

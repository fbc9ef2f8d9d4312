//! SPAWNWEAVE CLI
//!
//! Runs demo divide-and-conquer applications on a simulated multi-cluster
//! deployment and prints per-node statistics.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use spawnweave_cluster::{JobHandler, JobOutcome, StealStrategy};
use spawnweave_cli::Report;
use spawnweave_cli::apps::{Board, Branch, Fib, Knapsack, Queens};
use spawnweave_core::{SearchOutcome, decode, encode};
use spawnweave_sim::{
    FailureSchedule, NetworkCondition, SimCluster, SimConfig, SimNodeSpec, SimSeed,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spawnweave")]
#[command(about = "SPAWNWEAVE - distributed divide-and-conquer with cluster-aware work stealing", long_about = None)]
struct Cli {
    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ClusterArgs {
    /// Number of nodes; the first one is the master
    #[arg(long, global = true, default_value_t = 4)]
    nodes: usize,
    /// Number of clusters the nodes are dealt over
    #[arg(long, global = true, default_value_t = 2)]
    clusters: usize,
    /// Simulation seed
    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,
    /// Probability of stealing inside the own cluster
    #[arg(long, global = true, default_value_t = 0.8)]
    local_bias: f64,
    /// Pick victims uniformly, ignoring clusters
    #[arg(long, global = true)]
    random_stealing: bool,
    /// Latency inside a cluster (milliseconds)
    #[arg(long, global = true, default_value_t = 0)]
    intra_latency_ms: u64,
    /// Latency between clusters (milliseconds)
    #[arg(long, global = true, default_value_t = 5)]
    inter_latency_ms: u64,
    /// Crash a worker this long after the root job starts
    #[arg(long, global = true)]
    crash_after_ms: Option<u64>,
    /// Worker to crash (defaults to the last node)
    #[arg(long, global = true)]
    crash_node: Option<String>,
    /// Crash this many seeded-random workers instead
    #[arg(long, global = true, default_value_t = 0)]
    random_crashes: usize,
    /// Window the random crashes fall in (milliseconds)
    #[arg(long, global = true, default_value_t = 50)]
    crash_window_ms: u64,
    /// Abort the run after this long (milliseconds)
    #[arg(long, global = true, default_value_t = 120_000)]
    timeout_ms: u64,
    /// Emit JSON logs and a JSON report
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fibonacci with spawn/sync
    Fib {
        /// Argument
        #[arg(default_value_t = 25)]
        n: u64,
        /// Below this, compute sequentially
        #[arg(long, default_value_t = 12)]
        threshold: u64,
    },
    /// First solution of N-Queens with speculative aborts
    Queens {
        /// Board size
        #[arg(default_value_t = 12)]
        n: u8,
        /// Rows left to the sequential solver
        #[arg(long, default_value_t = 6)]
        sequential_rows: usize,
    },
    /// 0/1 knapsack branch-and-bound with a broadcast bound
    Knapsack {
        /// Number of random items
        #[arg(default_value_t = 32)]
        items: usize,
        /// Capacity
        #[arg(long, default_value_t = 200)]
        capacity: u64,
        /// Items left to the sequential solver
        #[arg(long, default_value_t = 10)]
        sequential_items: usize,
    },
}

impl ClusterArgs {
    fn config(&self) -> SimConfig {
        let strategy = if self.random_stealing {
            StealStrategy::Random
        } else {
            StealStrategy::ClusterAware {
                local_bias: self.local_bias,
            }
        };
        SimConfig::new(SimSeed::from_literal(self.seed))
            .with_strategy(strategy)
            .with_network(
                latency(self.intra_latency_ms),
                latency(self.inter_latency_ms),
            )
            .with_run_timeout(self.timeout_ms)
    }

    fn schedule(&self) -> Result<FailureSchedule> {
        if self.crash_after_ms.is_none() && self.random_crashes == 0 {
            return Ok(FailureSchedule::new());
        }
        if self.nodes < 2 {
            bail!("crashes need at least two nodes");
        }
        if let Some(after_ms) = self.crash_after_ms {
            let node = self
                .crash_node
                .clone()
                .unwrap_or_else(|| format!("node-{}", self.nodes - 1));
            return Ok(FailureSchedule::new().crash_after(node, after_ms));
        }
        let workers: Vec<String> = SimNodeSpec::uniform(self.nodes, self.clusters)
            .into_iter()
            .skip(1)
            .map(|spec| spec.name)
            .collect();
        Ok(FailureSchedule::random(
            &SimSeed::from_literal(self.seed),
            &workers,
            self.random_crashes,
            self.crash_window_ms,
        ))
    }
}

fn latency(ms: u64) -> NetworkCondition {
    if ms == 0 {
        NetworkCondition::Normal
    } else {
        NetworkCondition::Latency(ms)
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spawnweave=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn simulate(
    args: &ClusterArgs,
    handler: Arc<dyn JobHandler>,
    root: Vec<u8>,
) -> Result<spawnweave_sim::SimRun> {
    if args.nodes == 0 {
        bail!("--nodes must be at least 1");
    }
    let specs = SimNodeSpec::uniform(args.nodes, args.clusters);
    let cluster = SimCluster::new(args.config(), &specs, handler).await?;
    Ok(cluster.run(root, &args.schedule()?).await?)
}

fn value(outcome: &JobOutcome) -> Result<&[u8]> {
    match outcome {
        JobOutcome::Value(bytes) => Ok(bytes),
        JobOutcome::Failed(message) => Err(eyre!("root job failed: {message}")),
        JobOutcome::Aborted => Err(eyre!("root job was aborted")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.cluster.json);

    let (app, run, result) = match cli.command {
        Commands::Fib { n, threshold } => {
            let run = simulate(&cli.cluster, Arc::new(Fib::new(threshold)), encode(&n)?).await?;
            let fib: u64 = decode(value(&run.outcome)?)?;
            ("fib", run, format!("fib({n}) = {fib}"))
        }
        Commands::Queens { n, sequential_rows } => {
            let run = simulate(
                &cli.cluster,
                Arc::new(Queens::new(sequential_rows)),
                encode(&Board::new(n))?,
            )
            .await?;
            let result = match decode::<SearchOutcome<Board>>(value(&run.outcome)?)? {
                SearchOutcome::SolutionFound(board) => format!("{n}-queens solution {:?}", board.cols),
                _ => format!("{n}-queens has no solution"),
            };
            ("queens", run, result)
        }
        Commands::Knapsack {
            items,
            capacity,
            sequential_items,
        } => {
            let knapsack = Knapsack::random(cli.cluster.seed, items, capacity, sequential_items);
            let optimum = knapsack.optimum();
            let run = simulate(&cli.cluster, Arc::new(knapsack), encode(&Branch::root())?).await?;
            let best = decode::<SearchOutcome<u64>>(value(&run.outcome)?)?
                .solution()
                .unwrap_or(0);
            if best != optimum {
                bail!("knapsack search returned {best}, dynamic programming gives {optimum}");
            }
            ("knapsack", run, format!("best value {best} for {items} items, capacity {capacity}"))
        }
    };

    let report = Report::new(app, result, &run);
    if cli.cluster.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}

//! Maekawa mutual-exclusion demo node.
//!
//! `simulate` runs a whole cluster of nodes inside one process over
//! localhost TCP. `node` runs a single node of a cluster whose members are
//! started as separate processes.
//!
//! Lost messages are never resent, so in `node` mode every peer must be
//! listening before any node's first think time ends. A REQUEST sent to a
//! peer that is not up yet is dropped and the requester stalls.

use std::{sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use maekawa_core::QuorumTable;
use maekawa_node::{
    DriverConfig, NodeConfig, NodeDriver, NodeError, NodeRuntime, SystemEnv, TcpTransport,
    TerminationBarrier, address_table,
};
use maekawa_proto::NodeId;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Maekawa quorum mutual exclusion
#[derive(Parser, Debug)]
#[command(name = "maekawa-node")]
#[command(about = "Run Maekawa quorum mutual-exclusion nodes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every node of the cluster in this process
    Simulate(ClusterArgs),

    /// Run one node; peers are separate processes
    ///
    /// Start every peer before the first think time (--think-min-ms) ends:
    /// messages to a peer that is not listening yet are dropped, not resent.
    Node {
        /// Id of this node
        #[arg(long)]
        id: NodeId,

        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

#[derive(Args, Debug)]
struct ClusterArgs {
    /// Number of nodes in the cluster
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    /// Host every node listens on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Node i listens on base-port + i
    #[arg(long, default_value_t = 7000)]
    base_port: u16,

    /// Quorum table
    #[arg(long, value_enum, default_value_t = Quorums::AllOthers)]
    quorums: Quorums,

    /// Critical-section cycles per node
    #[arg(long, default_value_t = 3)]
    cycles: u32,

    /// Shortest think time before a request, in milliseconds
    #[arg(long, default_value_t = 2000)]
    think_min_ms: u64,

    /// Longest think time before a request, in milliseconds
    #[arg(long, default_value_t = 8000)]
    think_max_ms: u64,

    /// Time spent in the critical section, in milliseconds
    #[arg(long, default_value_t = 1000)]
    hold_ms: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Quorums {
    /// Every node asks every other node
    AllOthers,
    /// Fixed 4-node table where each quorum has three members
    Maekawa4,
}

impl ClusterArgs {
    fn table(&self) -> Result<QuorumTable, NodeError> {
        let table = match self.quorums {
            Quorums::AllOthers => QuorumTable::all_others(self.nodes)?,
            Quorums::Maekawa4 => QuorumTable::maekawa_four(),
        };
        if table.len() != self.nodes {
            return Err(maekawa_core::QuorumError::SizeMismatch {
                expected: self.nodes,
                actual: table.len(),
            }
            .into());
        }
        Ok(table)
    }

    fn driver(&self) -> Result<DriverConfig, NodeError> {
        Ok(DriverConfig::new(
            self.cycles,
            Duration::from_millis(self.think_min_ms),
            Duration::from_millis(self.think_max_ms),
            Duration::from_millis(self.hold_ms),
        )?)
    }

    fn node_config(&self, id: NodeId, table: &QuorumTable) -> Result<NodeConfig, NodeError> {
        let peers = address_table(&self.host, self.base_port, self.nodes);
        let listen = format!("{}:{}", self.host, u32::from(self.base_port) + id);
        Ok(NodeConfig::from_table(id, table, listen, peers)?)
    }
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Simulate(cluster) => simulate(&cluster).await,
        Command::Node { id, cluster } => run_node(id, &cluster).await,
    }
}

async fn simulate(cluster: &ClusterArgs) -> Result<(), NodeError> {
    let table = cluster.table()?;
    let driver_config = cluster.driver()?;
    let transport = Arc::new(TcpTransport);

    let mut handles = Vec::with_capacity(cluster.nodes);
    for id in 0..cluster.nodes as NodeId {
        let config = cluster.node_config(id, &table)?;
        handles.push(NodeRuntime::bind(config, Arc::clone(&transport)).await?);
    }
    info!(nodes = cluster.nodes, quorums = ?cluster.quorums, "cluster started");

    let barrier = Arc::new(TerminationBarrier::new(handles.len()));
    let mut drivers = JoinSet::new();
    for handle in &handles {
        let driver = NodeDriver::new(handle.clone(), SystemEnv, driver_config, Arc::clone(&barrier));
        drivers.spawn(driver.run());
    }

    let mut failed = None;
    while let Some(joined) = drivers.join_next().await {
        match joined {
            Ok(Ok(report)) => info!(node = report.node, cycles = report.cycles, "node finished"),
            Ok(Err(err)) => {
                error!(error = %err, "node failed");
                failed = failed.or(Some(err));
            },
            Err(err) => {
                error!(error = %err, "driver task panicked");
                failed = failed.or(Some(NodeError::Stopped));
            },
        }
    }

    for handle in &handles {
        handle.shutdown();
    }

    match failed {
        Some(err) => Err(err),
        None => {
            info!("simulation complete");
            Ok(())
        },
    }
}

async fn run_node(id: NodeId, cluster: &ClusterArgs) -> Result<(), NodeError> {
    let table = cluster.table()?;
    let driver = cluster.driver()?;
    let config = cluster.node_config(id, &table)?;

    let handle = NodeRuntime::bind(config, Arc::new(TcpTransport)).await?;

    // Only this process arrives here; peers in other processes may still need
    // our vote after we finish, so keep serving until interrupted.
    let barrier = Arc::new(TerminationBarrier::new(1));
    let report = NodeDriver::new(handle.clone(), SystemEnv, driver, barrier).run().await?;
    info!(node = report.node, cycles = report.cycles, "cycles finished; serving peers until interrupted");

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    info!(node = id, "shut down");
    Ok(())
}

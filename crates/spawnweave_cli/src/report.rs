//! Run reports: a text summary and a JSON document.

use serde::Serialize;
use spawnweave_cluster::NodeStats;
use spawnweave_sim::SimRun;
use std::fmt::Write;

/// Statistics of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    /// Node name
    pub name: String,
    /// True if the node was crashed during the run
    pub crashed: bool,
    /// Counters
    pub stats: NodeStats,
}

/// Everything printed after a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Application name
    pub app: String,
    /// Rendered root result
    pub result: String,
    /// Wall time in milliseconds
    pub elapsed_ms: u64,
    /// Per-node statistics
    pub nodes: Vec<NodeReport>,
    /// Cluster-wide totals
    pub total: NodeStats,
}

impl Report {
    /// Build a report from a finished run
    #[must_use]
    pub fn new(app: &str, result: String, run: &SimRun) -> Self {
        let nodes = run
            .stats
            .iter()
            .map(|(name, stats)| NodeReport {
                name: name.clone(),
                crashed: run.crashed.contains(name),
                stats: stats.clone(),
            })
            .collect();
        Self {
            app: app.to_string(),
            result,
            elapsed_ms: u64::try_from(run.elapsed.as_millis()).unwrap_or(u64::MAX),
            nodes,
            total: run.total.clone(),
        }
    }

    /// Human-readable summary
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: {} ({} ms)", self.app, self.result, self.elapsed_ms);
        for node in &self.nodes {
            let marker = if node.crashed { " [crashed]" } else { "" };
            let _ = writeln!(out, "\n{}{}", node.name, marker);
            for line in node.stats.to_string().lines() {
                let _ = writeln!(out, "  {line}");
            }
        }
        let _ = writeln!(out, "\ntotal");
        for line in self.total.to_string().lines() {
            let _ = writeln!(out, "  {line}");
        }
        out
    }
}

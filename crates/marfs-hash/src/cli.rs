//! Command line for inspecting ring placement.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use crate::config::RingConfig;
use crate::ring::Ring;

/// `marfs-ring` arguments.
#[derive(Debug, Parser)]
#[command(name = "marfs-ring")]
#[command(about = "Inspect MarFS consistent-hash placement", long_about = None)]
pub struct Cli {
    /// Ring definition (.toml or .json).
    #[arg(short, long, env = "MARFS_RING_CONFIG")]
    pub config: PathBuf,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,

    /// Operation to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// `marfs-ring` operations.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the node each key is placed on.
    Lookup {
        /// Keys to place.
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// List real nodes with their weights and virtual-node counts.
    Nodes,
    /// Sample synthetic keys and compare placement share with weight share.
    Balance {
        /// Number of keys to sample.
        #[arg(short, long, default_value = "100000")]
        samples: usize,
    },
}

impl Cli {
    /// Loads the ring and runs the selected command, writing to `out`.
    pub fn run(&self, out: &mut impl Write) -> Result<()> {
        let config = RingConfig::from_file(&self.config)?;
        let ring = config.build()?;
        tracing::info!(
            nodes = ring.node_count(),
            vnodes = ring.vnode_count(),
            "loaded ring from {}",
            self.config.display()
        );

        match &self.command {
            Command::Lookup { keys } => lookup(&ring, keys, out),
            Command::Nodes => nodes(&ring, out),
            Command::Balance { samples } => balance(&ring, *samples, out),
        }
    }
}

fn lookup(ring: &Ring, keys: &[String], out: &mut impl Write) -> Result<()> {
    for key in keys {
        let placement = ring.lookup(key);
        let kind = if placement.exact { "exact" } else { "successor" };
        writeln!(out, "{}\t{}\t{}", key, placement.node.name, kind)?;
    }
    Ok(())
}

fn nodes(ring: &Ring, out: &mut impl Write) -> Result<()> {
    writeln!(out, "NAME\tWEIGHT\tVNODES")?;
    for (index, node) in ring.nodes().iter().enumerate() {
        writeln!(out, "{}\t{}\t{}", node.name, node.weight, ring.vnodes_for(index))?;
    }
    Ok(())
}

fn balance(ring: &Ring, samples: usize, out: &mut impl Write) -> Result<()> {
    if samples == 0 {
        anyhow::bail!("--samples must be positive");
    }
    let mut hits: HashMap<usize, usize> = HashMap::new();
    for i in 0..samples {
        let placement = ring.lookup(&format!("sample-{}", i));
        *hits.entry(placement.node_index).or_default() += 1;
    }

    let total_weight: i64 = ring.nodes().iter().map(|n| n.weight.max(0)).sum();
    writeln!(out, "NAME\tWEIGHT_SHARE\tOBSERVED_SHARE")?;
    for (index, node) in ring.nodes().iter().enumerate() {
        let expected = if total_weight > 0 {
            node.weight.max(0) as f64 / total_weight as f64
        } else {
            0.0
        };
        let observed = *hits.get(&index).unwrap_or(&0) as f64 / samples as f64;
        writeln!(out, "{}\t{:.4}\t{:.4}", node.name, expected, observed)?;
    }
    Ok(())
}

//! One rank's share of a resource-manager iteration.

use tracing::info;

use crate::comm::RankComm;
use crate::config::RmanConfig;
use crate::dispatch::Dispatcher;
use crate::error::RmanResult;
use crate::namespace::Namespace;
use crate::summary::ScanSummary;

/// Result of [`run_rank`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Rank that produced the report.
    pub rank: usize,
    /// Iteration identifier agreed by all ranks.
    pub iteration: String,
    /// Namespaces covered by the run.
    pub total_namespaces: usize,
    /// Summaries of namespaces scanned by this rank.
    pub local: Vec<ScanSummary>,
    /// Every summary of the run; filled on rank 0 only.
    pub collected: Vec<ScanSummary>,
}

impl RunReport {
    /// True when none of the summaries this rank knows about record a failure.
    pub fn is_success(&self) -> bool {
        self.local
            .iter()
            .chain(self.collected.iter())
            .all(ScanSummary::succeeded)
    }

    /// The namespace count on success, `-1` otherwise.
    pub fn status(&self) -> i64 {
        if self.is_success() {
            self.total_namespaces as i64
        } else {
            -1
        }
    }

    /// Rank 0's printable summary lines.
    pub fn summary_lines(&self) -> Vec<String> {
        self.collected.iter().map(ToString::to_string).collect()
    }
}

/// Runs this rank's part of an iteration.
///
/// Rank 0 chooses the iteration identifier and broadcasts it; all ranks meet
/// at a barrier before any namespace is touched. After dispatch, rank 0
/// gathers exactly one summary per namespace of the run.
pub async fn run_rank(
    comm: &dyn RankComm,
    root: &Namespace,
    config: &RmanConfig,
) -> RmanResult<RunReport> {
    config.validate()?;
    let rank = comm.rank();

    let iteration = comm.broadcast_iteration(config.iteration.clone()).await?;
    info!(
        rank,
        ranks = comm.size(),
        iteration = %iteration,
        dry_run = config.dry_run,
        "starting resource manager iteration"
    );
    comm.barrier().await?;

    let outcome = Dispatcher::new(comm, config).dispatch(root).await?;

    let mut collected = Vec::new();
    if rank == 0 {
        for _ in 0..outcome.total {
            let summary = comm.recv_summary().await?;
            info!("{}", summary);
            collected.push(summary);
        }
        collected.sort_by(|a, b| a.namespace.cmp(&b.namespace));
    }

    Ok(RunReport {
        rank,
        iteration,
        total_namespaces: outcome.total,
        local: outcome.processed,
        collected,
    })
}

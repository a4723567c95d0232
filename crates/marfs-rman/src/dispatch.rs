//! Assigns namespaces to ranks and scans this rank's share.

use tracing::{error, info};

use crate::comm::RankComm;
use crate::config::RmanConfig;
use crate::error::{RmanError, RmanResult};
use crate::namespace::Namespace;
use crate::scan::NamespaceScan;
use crate::summary::ScanSummary;

/// What one rank's dispatch pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Namespaces covered by the whole run: the tree size, or 1 with an explicit target.
    pub total: usize,
    /// Summaries of the namespaces this rank scanned.
    pub processed: Vec<ScanSummary>,
}

impl DispatchOutcome {
    /// Namespaces this rank failed to scan.
    pub fn failed(&self) -> impl Iterator<Item = &ScanSummary> {
        self.processed.iter().filter(|s| !s.succeeded())
    }

    /// The namespace count, or `-1` if any of this rank's scans failed.
    pub fn status(&self) -> i64 {
        if self.failed().next().is_some() {
            -1
        } else {
            self.total as i64
        }
    }
}

/// Walks the namespace tree for one rank.
pub struct Dispatcher<'a> {
    comm: &'a dyn RankComm,
    config: &'a RmanConfig,
}

impl<'a> Dispatcher<'a> {
    /// Creates a dispatcher for the rank behind `comm`.
    pub fn new(comm: &'a dyn RankComm, config: &'a RmanConfig) -> Self {
        Self { comm, config }
    }

    /// Scans the namespaces assigned to this rank and sends a summary for each.
    ///
    /// With an explicit target only rank 0 scans, and only that namespace.
    /// Otherwise namespace `i` of the depth-first order goes to rank
    /// `i % size`. A failed scan is summarized and the pass continues.
    pub async fn dispatch(&self, root: &Namespace) -> RmanResult<DispatchOutcome> {
        let rank = self.comm.rank();
        let size = self.comm.size();

        if let Some(target) = &self.config.namespace_target {
            if rank != 0 {
                return Ok(DispatchOutcome {
                    total: 1,
                    processed: Vec::new(),
                });
            }
            let (path, ns) = root
                .find(target)
                .ok_or_else(|| RmanError::NamespaceNotFound(target.clone()))?;
            let summary = self.process(&path, ns).await?;
            return Ok(DispatchOutcome {
                total: 1,
                processed: vec![summary],
            });
        }

        let order = root.depth_first();
        let mut processed = Vec::new();
        for (index, (path, ns)) in order.iter().enumerate() {
            if index % size == rank {
                processed.push(self.process(path, ns).await?);
            }
        }
        info!(
            rank,
            total = order.len(),
            scanned = processed.len(),
            "dispatch pass complete"
        );
        Ok(DispatchOutcome {
            total: order.len(),
            processed,
        })
    }

    async fn process(&self, path: &str, ns: &Namespace) -> RmanResult<ScanSummary> {
        let rank = self.comm.rank();
        let deleted = !self.config.dry_run;
        let scan = NamespaceScan::new(
            path,
            ns.ref_dirs(),
            ns.backends.clone(),
            self.config.scan_settings(),
        );

        let summary = match scan.run().await {
            Ok(report) => ScanSummary::completed(rank, path, &report, deleted),
            Err(e) => {
                error!(rank, namespace = %path, error = %e, "namespace scan failed");
                ScanSummary::failed(rank, path, &e, deleted)
            }
        };
        self.comm.send_summary(&summary).await?;
        Ok(summary)
    }
}

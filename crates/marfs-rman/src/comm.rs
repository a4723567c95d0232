//! Messaging between the ranks of a run.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Barrier, Mutex};

use crate::config::RmanConfig;
use crate::error::{RmanError, RmanResult};
use crate::summary::ScanSummary;

/// A rank's view of the process group.
#[async_trait]
pub trait RankComm: Send + Sync {
    /// This rank's index.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Agrees on an iteration identifier. Rank 0 decides, using `proposed`
    /// or a fresh timestamp; every other rank receives rank 0's choice.
    async fn broadcast_iteration(&self, proposed: Option<String>) -> RmanResult<String>;

    /// Waits until every rank reaches the barrier.
    async fn barrier(&self) -> RmanResult<()>;

    /// Sends a namespace summary to rank 0.
    async fn send_summary(&self, summary: &ScanSummary) -> RmanResult<()>;

    /// Receives the next summary. Only rank 0 may call this. Fails once no
    /// rank can send any more.
    async fn recv_summary(&self) -> RmanResult<ScanSummary>;
}

/// Builds groups of in-process ranks joined by channels.
pub struct LocalGroup;

impl LocalGroup {
    /// Creates `size` connected ranks, indexed `0..size`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: usize) -> RmanResult<Vec<LocalRank>> {
        if size == 0 {
            return Err(RmanError::Config("a group needs at least one rank".into()));
        }
        let barrier = Arc::new(Barrier::new(size));
        let (iteration_tx, iteration_rx) = watch::channel(None);
        let iteration_tx = Arc::new(iteration_tx);
        let (summary_tx, summary_rx) = mpsc::unbounded_channel();
        let mut summary_rx = Some(Mutex::new(summary_rx));

        // Rank 0 queues its own summaries locally, so the channel closes once
        // every other rank is gone.
        Ok((0..size)
            .map(|rank| LocalRank {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                iteration_tx: Arc::clone(&iteration_tx),
                iteration_rx: iteration_rx.clone(),
                summary_tx: (rank != 0).then(|| summary_tx.clone()),
                summary_rx: if rank == 0 { summary_rx.take() } else { None },
                own_summaries: parking_lot::Mutex::new(VecDeque::new()),
            })
            .collect())
    }
}

/// One in-process rank created by [`LocalGroup::new`].
pub struct LocalRank {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    iteration_tx: Arc<watch::Sender<Option<String>>>,
    iteration_rx: watch::Receiver<Option<String>>,
    summary_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    summary_rx: Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    own_summaries: parking_lot::Mutex<VecDeque<Vec<u8>>>,
}

#[async_trait]
impl RankComm for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn broadcast_iteration(&self, proposed: Option<String>) -> RmanResult<String> {
        if self.rank == 0 {
            let iteration = proposed.unwrap_or_else(RmanConfig::default_iteration);
            self.iteration_tx.send_replace(Some(iteration.clone()));
            return Ok(iteration);
        }
        let mut rx = self.iteration_rx.clone();
        loop {
            if let Some(iteration) = rx.borrow_and_update().clone() {
                return Ok(iteration);
            }
            rx.changed()
                .await
                .map_err(|_| RmanError::Comm("rank 0 left before broadcasting".into()))?;
        }
    }

    async fn barrier(&self) -> RmanResult<()> {
        self.barrier.wait().await;
        Ok(())
    }

    async fn send_summary(&self, summary: &ScanSummary) -> RmanResult<()> {
        let record = summary.to_record()?;
        match &self.summary_tx {
            Some(tx) => tx
                .send(record)
                .map_err(|_| RmanError::Comm("rank 0 stopped receiving summaries".into())),
            None => {
                self.own_summaries.lock().push_back(record);
                Ok(())
            }
        }
    }

    async fn recv_summary(&self) -> RmanResult<ScanSummary> {
        let rx = self.summary_rx.as_ref().ok_or_else(|| {
            RmanError::Comm(format!("rank {} cannot receive summaries", self.rank))
        })?;
        let own = self.own_summaries.lock().pop_front();
        if let Some(record) = own {
            return ScanSummary::from_record(&record);
        }
        let record = rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| RmanError::Comm("every rank hung up".into()))?;
        ScanSummary::from_record(&record)
    }
}

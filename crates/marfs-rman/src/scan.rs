//! Producer/consumer pool scanning one namespace's reference directories.
//!
//! Producers claim reference directories one at a time and queue every stream
//! head they find; consumers walk the queued streams. The pool stops on the
//! first fatal error and reports it once every worker has exited.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backends;
use crate::config::ScanSettings;
use crate::error::{RmanError, RmanResult};
use crate::executor::GcExecutor;
use crate::quota::QuotaTotals;
use crate::walker::{StreamHead, StreamWalker};

/// Requested state of a scan pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSignal {
    /// Workers proceed.
    Run,
    /// Workers block before their next unit of work.
    Pause,
    /// Workers stop without taking more work.
    Abort,
}

/// Shared run/pause/abort switch for a pool's workers.
#[derive(Debug)]
pub struct PoolControl {
    signal: Mutex<PoolSignal>,
    changed: Condvar,
}

impl Default for PoolControl {
    fn default() -> Self {
        Self {
            signal: Mutex::new(PoolSignal::Run),
            changed: Condvar::new(),
        }
    }
}

impl PoolControl {
    /// A control in the `Run` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current signal.
    pub fn signal(&self) -> PoolSignal {
        *self.signal.lock()
    }

    /// Sets the signal and wakes paused workers. `Abort` is final.
    pub fn set(&self, signal: PoolSignal) {
        let mut current = self.signal.lock();
        if *current != PoolSignal::Abort {
            *current = signal;
        }
        self.changed.notify_all();
    }

    /// Blocks workers before their next unit of work.
    pub fn pause(&self) {
        self.set(PoolSignal::Pause);
    }

    /// Releases paused workers.
    pub fn resume(&self) {
        self.set(PoolSignal::Run);
    }

    /// Stops every worker.
    pub fn abort(&self) {
        self.set(PoolSignal::Abort);
    }

    /// Waits out a pause. Returns false once the pool is aborted.
    pub fn proceed(&self) -> bool {
        let mut current = self.signal.lock();
        while *current == PoolSignal::Pause {
            self.changed.wait(&mut current);
        }
        *current == PoolSignal::Run
    }
}

/// What one namespace scan found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Live usage and reclaimed items over all streams.
    pub totals: QuotaTotals,
    /// Streams walked to completion.
    pub streams_walked: u64,
    /// Streams skipped because their state was corrupt.
    pub streams_skipped: u64,
    /// Reference directories that could not be scanned.
    pub dirs_skipped: u64,
}

#[derive(Debug, Default)]
struct ProducerTally {
    heads: u64,
    dirs_skipped: u64,
}

#[derive(Debug, Default)]
struct ConsumerTally {
    totals: QuotaTotals,
    walked: u64,
    skipped: u64,
}

/// One namespace's scan: its reference directories and collaborators.
pub struct NamespaceScan {
    name: String,
    ref_dirs: Vec<String>,
    backends: Backends,
    settings: ScanSettings,
    control: Arc<PoolControl>,
}

impl NamespaceScan {
    /// Prepares a scan; nothing runs until [`NamespaceScan::run`].
    pub fn new(
        name: impl Into<String>,
        ref_dirs: Vec<String>,
        backends: Backends,
        settings: ScanSettings,
    ) -> Self {
        Self {
            name: name.into(),
            ref_dirs,
            backends,
            settings,
            control: Arc::new(PoolControl::new()),
        }
    }

    /// The pool's control switch, for pausing or aborting from outside.
    pub fn control(&self) -> Arc<PoolControl> {
        Arc::clone(&self.control)
    }

    /// Scans every reference directory and walks every stream found.
    ///
    /// On success the namespace's usage counters are updated with the live
    /// totals. A fatal worker error aborts the pool and is returned as
    /// [`RmanError::PoolAborted`]; partial totals are discarded.
    pub async fn run(self) -> RmanResult<ScanReport> {
        let settings = self.settings;
        let dirs = Arc::new(self.ref_dirs);
        let cursor = Arc::new(Mutex::new(0usize));
        let (tx, rx) = mpsc::channel::<StreamHead>(settings.queue_depth);
        let rx = Arc::new(Mutex::new(rx));
        let executor = Arc::new(GcExecutor::new(self.backends.clone(), settings.dry_run));
        let now = chrono::Utc::now().timestamp();

        let producer_count = settings.producers.min(dirs.len());
        info!(
            namespace = %self.name,
            dirs = dirs.len(),
            producers = producer_count,
            consumers = settings.consumers,
            dry_run = settings.dry_run,
            "starting namespace scan"
        );

        let mut producers: Vec<JoinHandle<RmanResult<ProducerTally>>> = Vec::new();
        for id in 0..producer_count {
            let tx = tx.clone();
            let dirs = Arc::clone(&dirs);
            let cursor = Arc::clone(&cursor);
            let backends = self.backends.clone();
            let control = Arc::clone(&self.control);
            producers.push(tokio::task::spawn_blocking(move || {
                produce(id, &dirs, &cursor, &backends, &control, &tx)
            }));
        }
        drop(tx);

        let mut consumers: Vec<JoinHandle<RmanResult<ConsumerTally>>> = Vec::new();
        for id in 0..settings.consumers {
            let rx = Arc::clone(&rx);
            let backends = self.backends.clone();
            let executor = Arc::clone(&executor);
            let control = Arc::clone(&self.control);
            consumers.push(tokio::task::spawn_blocking(move || {
                let walker =
                    StreamWalker::new(&backends, &*executor, now, settings.recent_threshold_secs);
                consume(id, &walker, &rx, &control)
            }));
        }
        drop(rx);

        let mut report = ScanReport::default();
        let mut failures = Vec::new();

        for handle in consumers {
            match handle.await {
                Ok(Ok(tally)) => {
                    report.totals += tally.totals;
                    report.streams_walked += tally.walked;
                    report.streams_skipped += tally.skipped;
                }
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(e) => {
                    self.control.abort();
                    failures.push(format!("consumer panicked: {}", e));
                }
            }
        }
        for handle in producers {
            match handle.await {
                Ok(Ok(tally)) => {
                    report.dirs_skipped += tally.dirs_skipped;
                    debug!(heads = tally.heads, "producer finished");
                }
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(e) => failures.push(format!("producer panicked: {}", e)),
            }
        }

        if !failures.is_empty() {
            error!(namespace = %self.name, errors = ?failures, "namespace scan aborted");
            return Err(RmanError::PoolAborted(format!(
                "namespace '{}': {}",
                self.name,
                failures.join("; ")
            )));
        }

        let meta = &self.backends.meta;
        if let Err(e) = meta.set_data_usage(report.totals.bytes) {
            warn!(namespace = %self.name, error = %e, "failed to record data usage");
        }
        if let Err(e) = meta.set_inode_usage(report.totals.file_count) {
            warn!(namespace = %self.name, error = %e, "failed to record inode usage");
        }

        info!(
            namespace = %self.name,
            files = report.totals.file_count,
            bytes = report.totals.bytes,
            objects = report.totals.objects_reclaimed,
            refs = report.totals.refs_reclaimed,
            skipped = report.streams_skipped,
            "namespace scan complete"
        );
        Ok(report)
    }
}

fn produce(
    id: usize,
    dirs: &[String],
    cursor: &Mutex<usize>,
    backends: &Backends,
    control: &PoolControl,
    tx: &mpsc::Sender<StreamHead>,
) -> RmanResult<ProducerTally> {
    let mut tally = ProducerTally::default();
    loop {
        if !control.proceed() {
            return Ok(tally);
        }
        let dir = {
            let mut next = cursor.lock();
            match dirs.get(*next) {
                Some(dir) => {
                    *next += 1;
                    dir
                }
                None => return Ok(tally),
            }
        };

        if let Err(e) = backends.meta.stat_ref(dir) {
            warn!(producer = id, dir = %dir, error = %e, "skipping unreadable reference directory");
            tally.dirs_skipped += 1;
            continue;
        }
        let scanner = match backends.meta.open_scanner(dir) {
            Ok(scanner) => scanner,
            Err(e) => {
                warn!(producer = id, dir = %dir, error = %e, "failed to open reference directory");
                tally.dirs_skipped += 1;
                continue;
            }
        };

        for entry in scanner {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(producer = id, dir = %dir, error = %e, "reference directory scan failed");
                    tally.dirs_skipped += 1;
                    break;
                }
            };
            if entry.name.starts_with('.') {
                continue;
            }
            if backends.codec.entry_fileno(&entry.name) != Some(0) {
                continue;
            }
            if !control.proceed() {
                return Ok(tally);
            }
            let head = StreamHead {
                dir: dir.clone(),
                entry: entry.name,
            };
            if tx.blocking_send(head).is_err() {
                // Consumers are gone; the pool is shutting down.
                return Ok(tally);
            }
            tally.heads += 1;
        }
    }
}

fn consume(
    id: usize,
    walker: &StreamWalker<'_>,
    rx: &Mutex<mpsc::Receiver<StreamHead>>,
    control: &PoolControl,
) -> RmanResult<ConsumerTally> {
    let mut tally = ConsumerTally::default();
    loop {
        if !control.proceed() {
            return Ok(tally);
        }
        let head = match rx.lock().blocking_recv() {
            Some(head) => head,
            None => return Ok(tally),
        };
        if control.signal() == PoolSignal::Abort {
            return Ok(tally);
        }

        match walker.walk(&head) {
            Ok(totals) => {
                tally.totals += totals;
                tally.walked += 1;
            }
            Err(e) if e.is_stream_local() => {
                warn!(consumer = id, stream = %head.path(), error = %e, "skipping stream");
                tally.skipped += 1;
            }
            Err(e) => {
                error!(consumer = id, stream = %head.path(), error = %e, "stream walk failed");
                control.abort();
                return Err(e);
            }
        }
    }
}

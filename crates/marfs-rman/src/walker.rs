//! Walks one data stream, reclaiming dead runs and tallying live usage.

use tracing::{debug, warn};

use crate::backend::{Backends, OpenMode, RefStat, FTAG_XATTR};
use crate::error::{RmanError, RmanResult};
use crate::executor::{read_marker, GcRange, Reclaimer};
use crate::ftag::Ftag;
use crate::quota::QuotaTotals;
use crate::skip::{Advance, SkipMarker};

/// The reference file that starts a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    /// Reference directory holding the entry.
    pub dir: String,
    /// Entry name within `dir`.
    pub entry: String,
}

impl StreamHead {
    /// Full path of the head reference.
    pub fn path(&self) -> String {
        format!("{}/{}", self.dir, self.entry)
    }
}

/// Liveness of one reference file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    /// The user-visible file still exists.
    Active,
    /// Only the reference remains; the file was deleted.
    Dead,
    /// Changed within the grace window; bounds dead runs but is not counted.
    TooRecent,
}

/// Classifies a reference by age and link count.
pub fn classify(stat: &RefStat, now: i64, recent_threshold: i64) -> RefState {
    if now - stat.ctime <= recent_threshold {
        RefState::TooRecent
    } else if stat.link_count < 2 {
        RefState::Dead
    } else {
        RefState::Active
    }
}

#[derive(Debug)]
struct Visit {
    path: String,
    ftag: Ftag,
    stat: RefStat,
    marker: SkipMarker,
}

/// Boundaries of the dead run being accumulated.
#[derive(Debug)]
struct RunState {
    inactive: bool,
    ignore_zero: bool,
    last_ref: i64,
    valid_ref: i64,
    last_obj: i64,
}

impl RunState {
    fn new() -> Self {
        Self {
            inactive: false,
            ignore_zero: false,
            last_ref: -1,
            valid_ref: -1,
            last_obj: -1,
        }
    }

    fn range(&self, tail_ref: i64, curr_obj: i64, end_of_stream: bool) -> GcRange {
        GcRange {
            last_valid_ref: self.valid_ref,
            head_ref: self.last_ref,
            tail_ref,
            first_obj: self.last_obj,
            curr_obj,
            end_of_stream,
            zero_deleted: self.last_ref < 0,
        }
    }

    fn pending(&self) -> bool {
        self.inactive && !self.ignore_zero
    }
}

/// Walks streams of one namespace.
pub struct StreamWalker<'a> {
    backends: &'a Backends,
    reclaimer: &'a dyn Reclaimer,
    now: i64,
    recent_threshold: i64,
}

impl<'a> StreamWalker<'a> {
    /// Creates a walker that treats references changed within
    /// `recent_threshold` seconds of `now` as too recent to judge.
    pub fn new(
        backends: &'a Backends,
        reclaimer: &'a dyn Reclaimer,
        now: i64,
        recent_threshold: i64,
    ) -> Self {
        Self {
            backends,
            reclaimer,
            now,
            recent_threshold,
        }
    }

    /// Walks the stream starting at `head`.
    ///
    /// Every maximal run of dead references is handed to the reclaimer exactly
    /// once, bounded by the nearest active references. Returns the live usage
    /// together with whatever the reclaimer removed.
    pub fn walk(&self, head: &StreamHead) -> RmanResult<QuotaTotals> {
        let mut quota = QuotaTotals::default();
        let mut visit = self.visit(head.path())?;
        if visit.ftag.fileno != 0 {
            return Err(RmanError::corrupt(
                &visit.path,
                format!("stream head carries fileno {}", visit.ftag.fileno),
            ));
        }
        let header_len = self.backends.codec.recovery_header_len(&visit.ftag);
        let mut run = RunState::new();

        loop {
            if !self.settle(&visit, &mut quota)? {
                return Ok(quota);
            }
            let advance = visit.marker.advance();
            let step = match advance {
                Advance::By(step)
                    if !visit.ftag.end_of_stream && visit.ftag.is_finalized() =>
                {
                    step
                }
                _ => break,
            };

            let fileno = visit.ftag.fileno as i64;
            let objno = visit.ftag.objno as i64;
            match classify(&visit.stat, self.now, self.recent_threshold) {
                RefState::Dead => {
                    if (!run.inactive || run.ignore_zero) && objno > run.last_obj + 1 {
                        run.last_obj = objno - 1;
                    }
                    if !run.inactive {
                        if run.last_ref >= 0 && fileno > run.last_ref + 1 {
                            run.last_ref = fileno - 1;
                        }
                        run.inactive = true;
                    }
                    run.ignore_zero = fileno == 0 && visit.marker.zero_deleted();
                }
                state => {
                    if run.pending() {
                        let range = run.range(fileno, objno, false);
                        quota += self.reclaimer.reclaim(&visit.ftag, &range)?;
                    }
                    run.inactive = false;
                    run.ignore_zero = false;
                    if state == RefState::Active {
                        quota.add_file(visit.stat.size);
                    }
                    run.last_ref = fileno;
                    run.valid_ref = fileno;
                    run.last_obj = visit.ftag.end_object(header_len)? as i64;
                }
            }

            let next = visit.ftag.with_fileno(visit.ftag.fileno + step);
            let path = self.backends.codec.reference_path(&next)?;
            visit = self.visit(path)?;
        }

        self.finish(&visit, &mut run, header_len, &mut quota)?;
        Ok(quota)
    }

    /// Handles the final reference of the stream.
    fn finish(
        &self,
        visit: &Visit,
        run: &mut RunState,
        header_len: u64,
        quota: &mut QuotaTotals,
    ) -> RmanResult<()> {
        let fileno = visit.ftag.fileno as i64;
        let objno = visit.ftag.objno as i64;
        let mut state = classify(&visit.stat, self.now, self.recent_threshold);
        if state == RefState::Dead && !visit.ftag.is_finalized() {
            // A writer may still be appending behind an unlinked tail.
            debug!(path = %visit.path, "unfinalized final reference left in place");
            state = RefState::TooRecent;
        }

        match state {
            RefState::Dead => {
                if !run.inactive {
                    if objno > run.last_obj + 1 {
                        run.last_obj = objno - 1;
                    }
                    if run.last_ref >= 0 && fileno > run.last_ref + 1 {
                        run.last_ref = fileno - 1;
                    }
                }
                let end = visit.ftag.end_object(header_len)? as i64;
                let range = run.range(fileno + 1, end + 1, true);
                *quota += self.reclaimer.reclaim(&visit.ftag, &range)?;
            }
            state => {
                if run.pending() {
                    let range = run.range(fileno, objno, false);
                    *quota += self.reclaimer.reclaim(&visit.ftag, &range)?;
                }
                if state == RefState::Active {
                    quota.add_file(visit.stat.size);
                }
            }
        }
        Ok(())
    }

    /// Repairs an interrupted reclamation recorded on `visit`.
    ///
    /// Returns false when the repair removed the whole stream.
    fn settle(&self, visit: &Visit, quota: &mut QuotaTotals) -> RmanResult<bool> {
        if let SkipMarker::InProgress {
            zero_deleted,
            end_of_stream,
            ..
        } = visit.marker
        {
            warn!(path = %visit.path, marker = %visit.marker, "found interrupted reclamation");
            *quota += self.reclaimer.resume(&visit.ftag, &visit.marker)?;
            if zero_deleted && end_of_stream {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reads a reference's status, FTAG, and marker.
    fn visit(&self, path: String) -> RmanResult<Visit> {
        let meta = &self.backends.meta;
        let stat = meta.stat_ref(&path)?;
        let handle = meta.open_ref(&path, OpenMode::ReadOnly)?;

        let read = || -> RmanResult<(Ftag, SkipMarker)> {
            let raw = handle
                .get_xattr(FTAG_XATTR)?
                .ok_or_else(|| RmanError::corrupt(&path, "reference has no FTAG"))?;
            let ftag = self.backends.codec.decode_ftag(&raw).map_err(|e| match e {
                RmanError::CorruptState { reason, .. } => RmanError::corrupt(&path, reason),
                other => other,
            })?;
            let marker = read_marker(&*handle)?;
            Ok((ftag, marker))
        };
        let result = read();
        if let Err(e) = handle.close() {
            warn!(path = %path, error = %e, "failed to close reference");
        }
        let (ftag, marker) = result?;

        if marker.zero_deleted() && ftag.fileno != 0 {
            return Err(RmanError::corrupt(
                &path,
                "zero flag on a reference other than zero",
            ));
        }
        Ok(Visit {
            path,
            ftag,
            stat,
            marker,
        })
    }
}

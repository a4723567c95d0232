//! Crash-safe reclamation of dead reference ranges.
//!
//! A range is reclaimed in a fixed order: objects first, then an in-progress
//! marker on the anchor, then the reference files from the highest index down,
//! then the committed marker. A crash at any point leaves either nothing
//! visible, or an in-progress marker with a suffix of the range already
//! unlinked, which [`GcExecutor::resume_marker`] completes.

use tracing::{debug, info, warn};

use crate::backend::{Backends, DeleteOutcome, OpenMode, RefHandle, SKIP_XATTR};
use crate::error::{RmanError, RmanResult};
use crate::ftag::Ftag;
use crate::quota::QuotaDelta;
use crate::skip::SkipMarker;

/// A run of dead references and the objects only they used.
///
/// Reference indices `(head_ref, tail_ref)` and object indices
/// `(first_obj, curr_obj)` are exclusive on both ends. `-1` stands for "before
/// the start of the stream".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcRange {
    /// Last reference known to be active; the marker is written on it
    /// (or on reference zero when nothing before the range is active).
    pub last_valid_ref: i64,
    /// Last reference before the dead run.
    pub head_ref: i64,
    /// First reference after the dead run.
    pub tail_ref: i64,
    /// Last object still in use before the run.
    pub first_obj: i64,
    /// First object in use after the run.
    pub curr_obj: i64,
    /// The run extends to the end of the stream.
    pub end_of_stream: bool,
    /// Reference zero belongs to the run.
    pub zero_deleted: bool,
}

impl GcRange {
    /// Checks the ordering constraints between the bounds.
    pub fn validate(&self) -> RmanResult<()> {
        if self.last_valid_ref < -1 || self.first_obj < -1 {
            return Err(RmanError::InvalidRange(format!(
                "bounds below -1 in {:?}",
                self
            )));
        }
        if self.head_ref < self.last_valid_ref {
            return Err(RmanError::InvalidRange(format!(
                "head_ref {} precedes last_valid_ref {}",
                self.head_ref, self.last_valid_ref
            )));
        }
        if self.tail_ref <= self.head_ref {
            return Err(RmanError::InvalidRange(format!(
                "tail_ref {} does not follow head_ref {}",
                self.tail_ref, self.head_ref
            )));
        }
        if self.zero_deleted != (self.head_ref < 0) {
            return Err(RmanError::InvalidRange(format!(
                "zero_deleted={} with head_ref {}",
                self.zero_deleted, self.head_ref
            )));
        }
        Ok(())
    }

    /// The reference carrying the marker.
    pub fn anchor(&self) -> u64 {
        self.last_valid_ref.max(0) as u64
    }

    /// Marker value: references skipped after the anchor, or `-1` at end-of-stream.
    pub fn skip(&self) -> i64 {
        if self.end_of_stream {
            -1
        } else {
            self.tail_ref - self.last_valid_ref.max(0) - 1
        }
    }

    /// Marker value while the range is being unlinked. At end-of-stream it is
    /// the negated distance from the anchor to `tail_ref`, so a resumed
    /// reclamation still covers references separated from the anchor by an
    /// earlier skip.
    pub fn in_progress_skip(&self) -> i64 {
        if self.end_of_stream {
            -(self.tail_ref - self.anchor() as i64).max(1)
        } else {
            self.skip()
        }
    }

    /// Objects the range owns.
    pub fn objects(&self) -> std::ops::Range<u64> {
        let start = (self.first_obj + 1).max(0) as u64;
        let end = self.curr_obj.max(0) as u64;
        start..end.max(start)
    }

    /// References unlinked before the marker commits. Reference zero is
    /// never among them; it is kept as the anchor or removed last.
    pub fn refs(&self) -> std::ops::Range<u64> {
        let start = (self.head_ref.max(0) + 1) as u64;
        let end = self.tail_ref.max(0) as u64;
        start..end.max(start)
    }

    /// Whether reference zero itself gets unlinked.
    pub fn unlinks_zero(&self) -> bool {
        self.zero_deleted && self.end_of_stream
    }
}

/// Seam between the walker and reclamation.
pub trait Reclaimer: Send + Sync {
    /// Reclaims one range of `stream`.
    fn reclaim(&self, stream: &Ftag, range: &GcRange) -> RmanResult<QuotaDelta>;

    /// Completes a reclamation interrupted after its in-progress marker was
    /// written on `anchor`.
    fn resume(&self, anchor: &Ftag, marker: &SkipMarker) -> RmanResult<QuotaDelta>;
}

/// Performs (or, in dry-run mode, only counts) reclamations.
#[derive(Debug, Clone)]
pub struct GcExecutor {
    backends: Backends,
    dry_run: bool,
}

impl GcExecutor {
    /// Creates an executor over a namespace's collaborators.
    pub fn new(backends: Backends, dry_run: bool) -> Self {
        Self { backends, dry_run }
    }

    /// True if nothing is ever deleted.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Reclaims the objects and references of a dead range.
    ///
    /// Repeating a committed range is a no-op. Missing objects and references
    /// are treated as already deleted.
    pub fn gc_range(&self, stream: &Ftag, range: &GcRange) -> RmanResult<QuotaDelta> {
        range.validate()?;
        let mut delta = QuotaDelta::default();
        let objects = range.objects();
        let refs = range.refs();

        if self.dry_run {
            delta.objects_reclaimed = objects.end - objects.start;
            delta.refs_reclaimed = refs.end - refs.start + u64::from(range.unlinks_zero());
            return Ok(delta);
        }

        let skip = range.skip();
        let codec = &self.backends.codec;
        let meta = &self.backends.meta;
        let anchor_path = codec.reference_path(&stream.with_fileno(range.anchor()))?;
        let mut handle = meta.open_ref(&anchor_path, OpenMode::ReadWrite)?;

        let marker = match read_marker(&*handle) {
            Ok(marker) => marker,
            Err(e) => {
                release(handle);
                return Err(e);
            }
        };
        if marker == SkipMarker::committed(skip, range.zero_deleted) {
            debug!(anchor = %anchor_path, skip, "range already reclaimed");
            release(handle);
            return Ok(delta);
        }

        for objno in objects {
            let target = codec.object_target(&stream.with_objno(objno))?;
            match self.backends.objects.delete_object(&target) {
                Ok(DeleteOutcome::Removed) => delta.objects_reclaimed += 1,
                Ok(DeleteOutcome::AlreadyAbsent) => {
                    debug!(object = %target.name, "object already deleted")
                }
                Err(e) => {
                    release(handle);
                    return Err(e);
                }
            }
        }

        if refs.is_empty() && !range.zero_deleted && !range.end_of_stream {
            release(handle);
            return Ok(delta);
        }

        if !refs.is_empty() || range.end_of_stream {
            handle.set_xattr(
                SKIP_XATTR,
                &SkipMarker::in_progress(range.in_progress_skip(), range.zero_deleted).encode(),
            )?;
            handle.close()?;

            for fileno in refs.clone().rev() {
                delta.refs_reclaimed += self.unlink(stream, fileno)?;
            }
            if range.end_of_stream {
                // Nothing may outlive the final reference.
                let mut fileno = refs.end.max(range.anchor() + 1);
                while self.unlink(stream, fileno)? > 0 {
                    delta.refs_reclaimed += 1;
                    fileno += 1;
                }
            }
            if range.unlinks_zero() {
                delta.refs_reclaimed += self.unlink(stream, 0)?;
                info!(
                    stream = %stream.stream_id,
                    objects = delta.objects_reclaimed,
                    refs = delta.refs_reclaimed,
                    "stream fully reclaimed"
                );
                return Ok(delta);
            }
            handle = meta.open_ref(&anchor_path, OpenMode::WriteOnly)?;
        }

        handle.set_xattr(
            SKIP_XATTR,
            &SkipMarker::committed(skip, range.zero_deleted).encode(),
        )?;
        handle.close()?;

        debug!(
            stream = %stream.stream_id,
            anchor = range.anchor(),
            skip,
            objects = delta.objects_reclaimed,
            refs = delta.refs_reclaimed,
            "range reclaimed"
        );
        Ok(delta)
    }

    /// Completes an interrupted reclamation recorded on `anchor`.
    ///
    /// The unlinked suffix of the original range is skipped over as absent, so
    /// only the references still present are removed. An end-of-stream range
    /// is rebuilt to its recorded extent and then probed past it. Objects were
    /// deleted before the marker was written and are not revisited.
    pub fn resume_marker(&self, anchor: &Ftag, marker: &SkipMarker) -> RmanResult<QuotaDelta> {
        let path = self.backends.codec.reference_path(anchor)?;
        let (skip, zero_deleted, end_of_stream) = match *marker {
            SkipMarker::InProgress {
                skip,
                zero_deleted,
                end_of_stream,
            } => (skip, zero_deleted, end_of_stream),
            _ => return Ok(QuotaDelta::default()),
        };
        if zero_deleted && anchor.fileno != 0 {
            return Err(RmanError::corrupt(
                path,
                "zero flag on a reference other than zero",
            ));
        }

        let anchor_ref = anchor.fileno as i64;
        let before = if zero_deleted { -1 } else { anchor_ref };
        let tail_ref = match marker.end_of_stream_extent() {
            Some(extent) => anchor_ref + extent as i64,
            None => anchor_ref + skip + 1,
        };
        let range = GcRange {
            last_valid_ref: before,
            head_ref: before,
            tail_ref,
            first_obj: -1,
            curr_obj: -1,
            end_of_stream,
            zero_deleted,
        };
        warn!(anchor = %path, %marker, "resuming interrupted reclamation");
        self.gc_range(anchor, &range)
    }

    fn unlink(&self, stream: &Ftag, fileno: u64) -> RmanResult<u64> {
        let path = self
            .backends
            .codec
            .reference_path(&stream.with_fileno(fileno))?;
        match self.backends.meta.unlink_ref(&path)? {
            DeleteOutcome::Removed => Ok(1),
            DeleteOutcome::AlreadyAbsent => Ok(0),
        }
    }
}

impl Reclaimer for GcExecutor {
    fn reclaim(&self, stream: &Ftag, range: &GcRange) -> RmanResult<QuotaDelta> {
        self.gc_range(stream, range)
    }

    fn resume(&self, anchor: &Ftag, marker: &SkipMarker) -> RmanResult<QuotaDelta> {
        self.resume_marker(anchor, marker)
    }
}

/// Reads and decodes the `gc_skip` marker through an open handle.
pub(crate) fn read_marker(handle: &dyn RefHandle) -> RmanResult<SkipMarker> {
    match handle.get_xattr(SKIP_XATTR)? {
        None => Ok(SkipMarker::Absent),
        Some(raw) => SkipMarker::parse(&raw).map_err(|e| RmanError::corrupt(handle.path(), e)),
    }
}

fn release(handle: Box<dyn RefHandle>) {
    let path = handle.path().to_string();
    if let Err(e) = handle.close() {
        warn!(path = %path, error = %e, "failed to close reference");
    }
}

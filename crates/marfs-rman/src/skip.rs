//! The `gc_skip` marker persisted on a stream's anchor reference.
//!
//! A committed marker `"<k>"` tells later walks that the `k` references after
//! the anchor are gone, so the next live reference is `k + 1` past it; `-1`
//! means the anchor is the last reference of the stream. A trailing `z` records
//! that reference zero itself was reclaimed even though it is retained as the
//! anchor. The `IN_PROG ` prefix marks a reclamation that started unlinking
//! and has not yet committed. An in-progress end-of-stream marker stores
//! `-n` instead of `-1`: the interrupted range reached reference `anchor + n`.

use std::fmt;

/// Prefix written before a marker whose reclamation is still running.
pub const IN_PROGRESS_PREFIX: &str = "IN_PROG";

/// Suffix flag recording that reference zero was reclaimed.
pub const ZERO_FLAG: char = 'z';

/// Decoded state of a `gc_skip` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipMarker {
    /// No marker: the following reference is the next one.
    Absent,
    /// A completed reclamation.
    Committed {
        /// References skipped after the anchor, or `-1` for end-of-stream.
        skip: i64,
        /// Reference zero was reclaimed.
        zero_deleted: bool,
    },
    /// A reclamation interrupted after it began unlinking.
    InProgress {
        /// References being skipped, or `-n` for an end-of-stream range
        /// ending before reference `anchor + n`.
        skip: i64,
        /// Reference zero is being reclaimed.
        zero_deleted: bool,
        /// The reclamation runs to the end of the stream.
        end_of_stream: bool,
    },
}

/// Why a stored marker could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparsable gc_skip value {raw:?}: {reason}")]
pub struct MarkerParseError {
    /// The stored text, lossily decoded.
    pub raw: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

/// Where the walker goes after reading a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Move this many references forward.
    By(u64),
    /// Nothing follows the anchor.
    EndOfStream,
}

impl SkipMarker {
    /// Builds the committed marker for a skip value.
    pub fn committed(skip: i64, zero_deleted: bool) -> Self {
        SkipMarker::Committed { skip, zero_deleted }
    }

    /// Builds the in-progress marker for a skip value; negative values mean
    /// end-of-stream.
    pub fn in_progress(skip: i64, zero_deleted: bool) -> Self {
        SkipMarker::InProgress {
            skip,
            zero_deleted,
            end_of_stream: skip < 0,
        }
    }

    /// Decodes a stored attribute value. Trailing NUL bytes are ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, MarkerParseError> {
        let text = std::str::from_utf8(raw).map_err(|_| MarkerParseError {
            raw: String::from_utf8_lossy(raw).into_owned(),
            reason: "not UTF-8",
        })?;
        let text = text.trim_end_matches('\0');
        let fail = |reason| MarkerParseError {
            raw: text.to_string(),
            reason,
        };

        if text.is_empty() {
            return Ok(SkipMarker::Absent);
        }

        let (body, in_progress) = match text.strip_prefix(IN_PROGRESS_PREFIX) {
            Some(rest) => match rest.strip_prefix(' ') {
                Some(body) => (body, true),
                None => return Err(fail("missing separator after in-progress prefix")),
            },
            None => (text, false),
        };

        let (digits, zero_deleted) = match body.strip_suffix(ZERO_FLAG) {
            Some(digits) => (digits, true),
            None => (body, false),
        };

        let unsigned = digits.strip_prefix('-').unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail("skip count is not an integer"));
        }
        let skip: i64 = digits.parse().map_err(|_| fail("skip count out of range"))?;

        if skip < -1 && !in_progress {
            return Err(fail("committed skip count below -1"));
        }
        if skip == 0 && !zero_deleted {
            return Err(fail("zero skip without the zero flag"));
        }

        Ok(if in_progress {
            SkipMarker::in_progress(skip, zero_deleted)
        } else {
            SkipMarker::committed(skip, zero_deleted)
        })
    }

    /// Encodes the marker for storage. `Absent` encodes as an empty value.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Whether reference zero was reclaimed.
    pub fn zero_deleted(&self) -> bool {
        match *self {
            SkipMarker::Absent => false,
            SkipMarker::Committed { zero_deleted, .. }
            | SkipMarker::InProgress { zero_deleted, .. } => zero_deleted,
        }
    }

    /// Distance from the anchor to the next reference worth visiting.
    ///
    /// An in-progress marker advances as if committed; callers repair it first.
    pub fn advance(&self) -> Advance {
        match *self {
            SkipMarker::Absent => Advance::By(1),
            SkipMarker::Committed { skip, .. } | SkipMarker::InProgress { skip, .. } => {
                if skip < 0 {
                    Advance::EndOfStream
                } else {
                    Advance::By(skip as u64 + 1)
                }
            }
        }
    }

    /// For an in-progress end-of-stream marker, how far past the anchor the
    /// interrupted range reached.
    pub fn end_of_stream_extent(&self) -> Option<u64> {
        match *self {
            SkipMarker::InProgress {
                skip,
                end_of_stream: true,
                ..
            } => Some(skip.unsigned_abs()),
            _ => None,
        }
    }

    /// True for an interrupted reclamation.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SkipMarker::InProgress { .. })
    }
}

impl fmt::Display for SkipMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (skip, zero) = match *self {
            SkipMarker::Absent => return Ok(()),
            SkipMarker::Committed { skip, zero_deleted } => (skip, zero_deleted),
            SkipMarker::InProgress {
                skip, zero_deleted, ..
            } => {
                write!(f, "{} ", IN_PROGRESS_PREFIX)?;
                (skip, zero_deleted)
            }
        };
        write!(f, "{}", skip)?;
        if zero {
            write!(f, "{}", ZERO_FLAG)?;
        }
        Ok(())
    }
}

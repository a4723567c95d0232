//! Per-namespace result records relayed to rank 0.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{RmanError, RmanResult};
use crate::quota::QuotaTotals;
use crate::scan::ScanReport;

/// Size of one encoded summary record.
pub const SUMMARY_RECORD_LEN: usize = 1024;

/// Longest failure reason carried in a record.
const MAX_REASON_LEN: usize = 256;

/// Appended to a field shortened to fit a record.
const ELLIPSIS: &str = "...";

/// Outcome of one namespace scan, as reported by the rank that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Rank that scanned the namespace.
    pub rank: usize,
    /// Namespace path.
    pub namespace: String,
    /// Live usage and reclaimed items.
    pub totals: QuotaTotals,
    /// Items were deleted rather than only counted.
    pub deleted: bool,
    /// Why the scan failed, if it did.
    pub failure: Option<String>,
}

impl ScanSummary {
    /// Summary of a completed scan.
    pub fn completed(rank: usize, namespace: &str, report: &ScanReport, deleted: bool) -> Self {
        Self {
            rank,
            namespace: namespace.to_string(),
            totals: report.totals,
            deleted,
            failure: None,
        }
    }

    /// Summary of a scan that aborted.
    pub fn failed(rank: usize, namespace: &str, error: &RmanError, deleted: bool) -> Self {
        let mut reason = error.to_string();
        truncate_at_boundary(&mut reason, MAX_REASON_LEN);
        Self {
            rank,
            namespace: namespace.to_string(),
            totals: QuotaTotals::default(),
            deleted,
            failure: Some(reason),
        }
    }

    /// True if the scan completed.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Encodes the summary as a fixed-size, NUL-padded record.
    ///
    /// A namespace path (then a failure reason) too long for the record is
    /// cut short and ends in `...`; the counters are always carried intact.
    pub fn to_record(&self) -> RmanResult<Vec<u8>> {
        let mut fitted = self.clone();
        loop {
            let mut record =
                serde_json::to_vec(&fitted).map_err(|e| RmanError::Comm(e.to_string()))?;
            if record.len() <= SUMMARY_RECORD_LEN {
                if fitted.namespace != self.namespace {
                    warn!(namespace = %self.namespace, "namespace shortened in summary record");
                }
                record.resize(SUMMARY_RECORD_LEN, 0);
                return Ok(record);
            }
            let excess = record.len() - SUMMARY_RECORD_LEN;
            let shortened = shorten(&mut fitted.namespace, excess)
                || fitted
                    .failure
                    .as_mut()
                    .is_some_and(|reason| shorten(reason, excess));
            if !shortened {
                return Err(RmanError::Comm(format!(
                    "summary for '{}' needs {} bytes, record holds {}",
                    self.namespace,
                    record.len(),
                    SUMMARY_RECORD_LEN
                )));
            }
        }
    }

    /// Decodes a record produced by [`ScanSummary::to_record`].
    pub fn from_record(record: &[u8]) -> RmanResult<Self> {
        if record.len() != SUMMARY_RECORD_LEN {
            return Err(RmanError::Comm(format!(
                "summary record is {} bytes, expected {}",
                record.len(),
                SUMMARY_RECORD_LEN
            )));
        }
        let end = record
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |i| i + 1);
        serde_json::from_slice(&record[..end]).map_err(|e| RmanError::Comm(e.to_string()))
    }
}

fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
}

/// Drops at least `excess` encoded bytes from `text`. False if it is already
/// too short to give any up.
fn shorten(text: &mut String, excess: usize) -> bool {
    if text.len() <= ELLIPSIS.len() {
        return false;
    }
    // Escaped characters encode wider than they are stored, so cutting
    // `excess` stored bytes may take a few rounds.
    let keep = text.len().saturating_sub(excess + ELLIPSIS.len());
    truncate_at_boundary(text, keep);
    text.push_str(ELLIPSIS);
    true
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.failure {
            return write!(
                f,
                "Rank: {} NS: \"{}\" FAILED: {}",
                self.rank, self.namespace, reason
            );
        }
        write!(
            f,
            "Rank: {} NS: \"{}\" Count: {} Size: {:.6}TiB {}: (Objs: {} Refs: {})",
            self.rank,
            self.namespace,
            self.totals.file_count,
            self.totals.tib(),
            if self.deleted {
                "Deleted"
            } else {
                "Eligible for GC"
            },
            self.totals.objects_reclaimed,
            self.totals.refs_reclaimed
        )
    }
}

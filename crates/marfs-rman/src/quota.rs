//! Per-stream and per-namespace usage tallies.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Bytes in one tebibyte.
pub const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// Live usage and reclaimed items accumulated over a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaTotals {
    /// Bytes held by live files.
    pub bytes: u64,
    /// Live files.
    pub file_count: u64,
    /// Data objects deleted, or eligible for deletion in a dry run.
    pub objects_reclaimed: u64,
    /// Reference files unlinked, or eligible for unlinking in a dry run.
    pub refs_reclaimed: u64,
}

/// The change produced by one reclamation.
pub type QuotaDelta = QuotaTotals;

impl QuotaTotals {
    /// Live bytes expressed in TiB.
    pub fn tib(&self) -> f64 {
        self.bytes as f64 / TIB
    }

    /// Counts one live file.
    pub fn add_file(&mut self, size: u64) {
        self.bytes += size;
        self.file_count += 1;
    }
}

impl AddAssign for QuotaTotals {
    fn add_assign(&mut self, other: Self) {
        self.bytes += other.bytes;
        self.file_count += other.file_count;
        self.objects_reclaimed += other.objects_reclaimed;
        self.refs_reclaimed += other.refs_reclaimed;
    }
}

impl std::iter::Sum for QuotaTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(QuotaTotals::default(), |mut acc, q| {
            acc += q;
            acc
        })
    }
}

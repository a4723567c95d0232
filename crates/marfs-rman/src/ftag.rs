//! File tags: the per-reference record of a file's place in its data stream.

use serde::{Deserialize, Serialize};

use crate::error::{RmanError, RmanResult};

/// How far a file's data has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataState {
    /// Created, no size recorded yet.
    Init,
    /// Size known, data still being written.
    Sized,
    /// All data written.
    Finalized,
    /// Finalized and verified.
    Complete,
}

/// Location of one file within a data stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ftag {
    /// Stream identifier, shared by every file of the stream.
    pub stream_id: String,
    /// Client tag of the writer.
    pub ctag: String,
    /// Position of this file within the stream.
    pub fileno: u64,
    /// Object holding the start of this file's data.
    pub objno: u64,
    /// Byte offset of the file's data within `objno`.
    pub offset: u64,
    /// Data progress.
    pub state: DataState,
    /// This file closed the stream.
    #[serde(default)]
    pub end_of_stream: bool,
    /// Maximum object size in bytes.
    pub objsize: u64,
    /// Per-file recovery trailer bytes stored alongside data.
    pub recovery_bytes: u64,
    /// Length of the file's data.
    pub bytes: u64,
}

impl Ftag {
    /// The same stream positioned at another file.
    pub fn with_fileno(&self, fileno: u64) -> Ftag {
        Ftag {
            fileno,
            ..self.clone()
        }
    }

    /// The same stream positioned at another object.
    pub fn with_objno(&self, objno: u64) -> Ftag {
        Ftag {
            objno,
            ..self.clone()
        }
    }

    /// At least finalized.
    pub fn is_finalized(&self) -> bool {
        self.state >= DataState::Finalized
    }

    /// Index of the last object this file's data touches.
    ///
    /// A finalized file that ends exactly on an object boundary does not touch
    /// the following object.
    pub fn end_object(&self, header_len: u64) -> RmanResult<u64> {
        let corrupt = |reason: String| {
            RmanError::corrupt(format!("{}.{}", self.stream_id, self.fileno), reason)
        };
        let data_per_obj = self
            .objsize
            .checked_sub(header_len.saturating_add(self.recovery_bytes))
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                corrupt(format!(
                    "object size {} leaves no room for data after {} header and {} recovery bytes",
                    self.objsize, header_len, self.recovery_bytes
                ))
            })?;

        let span = self
            .bytes
            .checked_add(self.offset)
            .ok_or_else(|| {
                corrupt(format!(
                    "length {} at offset {} overflows",
                    self.bytes, self.offset
                ))
            })?
            .saturating_sub(header_len);
        let mut fin = span / data_per_obj;
        if self.is_finalized() && fin > 0 && span % data_per_obj == 0 {
            fin -= 1;
        }
        // Object indices are carried as i64 by the walker.
        self.objno
            .checked_add(fin)
            .filter(|end| *end <= i64::MAX as u64)
            .ok_or_else(|| corrupt(format!("object {} + {} out of range", self.objno, fin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftag(objno: u64, offset: u64, bytes: u64, state: DataState) -> Ftag {
        Ftag {
            stream_id: "stream".to_string(),
            ctag: "client".to_string(),
            fileno: 4,
            objno,
            offset,
            state,
            end_of_stream: false,
            objsize: 1024,
            recovery_bytes: 24,
            bytes,
        }
    }

    #[test]
    fn test_state_ordering() {
        assert!(DataState::Init < DataState::Sized);
        assert!(DataState::Sized < DataState::Finalized);
        assert!(DataState::Finalized < DataState::Complete);
    }

    #[test]
    fn test_end_object_within_first_object() {
        let tag = ftag(2, 100, 300, DataState::Finalized);
        assert_eq!(tag.end_object(0).unwrap(), 2);
    }

    #[test]
    fn test_end_object_spans_objects() {
        // 1000 data bytes per object
        let tag = ftag(2, 500, 1800, DataState::Finalized);
        assert_eq!(tag.end_object(0).unwrap(), 4);
    }

    #[test]
    fn test_end_object_exact_boundary() {
        let tag = ftag(0, 0, 2000, DataState::Finalized);
        assert_eq!(tag.end_object(0).unwrap(), 1);

        let unfinished = ftag(0, 0, 2000, DataState::Sized);
        assert_eq!(unfinished.end_object(0).unwrap(), 2);
    }

    #[test]
    fn test_end_object_with_header() {
        // 1024 - (24 + 100) = 900 data bytes per object
        let tag = ftag(0, 100, 900, DataState::Finalized);
        assert_eq!(tag.end_object(100).unwrap(), 0);
        let tag = ftag(0, 100, 901, DataState::Finalized);
        assert_eq!(tag.end_object(100).unwrap(), 1);
    }

    #[test]
    fn test_end_object_rejects_degenerate_size() {
        let mut tag = ftag(0, 0, 10, DataState::Finalized);
        tag.objsize = 24;
        assert!(matches!(
            tag.end_object(0),
            Err(RmanError::CorruptState { .. })
        ));
        tag.objsize = 10;
        assert!(tag.end_object(0).is_err());
    }

    #[test]
    fn test_end_object_rejects_overflowing_extent() {
        let tag = ftag(0, 10, u64::MAX - 5, DataState::Finalized);
        assert!(matches!(
            tag.end_object(0),
            Err(RmanError::CorruptState { .. })
        ));

        let tag = ftag(u64::MAX - 1, 0, 5000, DataState::Finalized);
        assert!(tag.end_object(0).unwrap_err().is_stream_local());

        let tag = ftag(i64::MAX as u64, 0, 5000, DataState::Finalized);
        assert!(tag.end_object(0).is_err());
    }

    #[test]
    fn test_with_fileno_keeps_stream() {
        let tag = ftag(3, 0, 1, DataState::Complete);
        let other = tag.with_fileno(9).with_objno(1);
        assert_eq!(other.fileno, 9);
        assert_eq!(other.objno, 1);
        assert_eq!(other.stream_id, tag.stream_id);
        assert!(other.is_finalized());
    }

    #[test]
    fn test_serde_lowercase_state() {
        let tag = ftag(0, 0, 1, DataState::Finalized);
        let json = serde_json::to_string(&tag).unwrap();
        assert!(json.contains("\"finalized\""));
        let back: Ftag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }
}

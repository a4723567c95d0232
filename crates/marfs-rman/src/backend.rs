//! Collaborator interfaces: metadata, object storage, and stream encoding.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RmanResult;
use crate::ftag::Ftag;

/// Extended attribute holding a reference file's FTAG.
pub const FTAG_XATTR: &str = "MARFS-FILE";

/// Extended attribute holding the `gc_skip` marker.
pub const SKIP_XATTR: &str = "gc_skip";

/// The subset of a reference file's status the walker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefStat {
    /// Hard-link count; fewer than two means the user-visible name is gone.
    pub link_count: u64,
    /// Change time, in seconds since the Unix epoch.
    pub ctime: i64,
    /// Logical file size in bytes.
    pub size: u64,
}

/// Access requested when opening a reference file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Attribute reads only.
    ReadOnly,
    /// Attribute reads and writes.
    ReadWrite,
    /// Attribute writes only.
    WriteOnly,
}

/// Result of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The item existed and was removed.
    Removed,
    /// The item was already gone.
    AlreadyAbsent,
}

/// One entry of a reference directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name, without the directory.
    pub name: String,
}

/// Iterator over the entries of one reference directory.
pub type RefScanner = Box<dyn Iterator<Item = RmanResult<DirEntry>> + Send>;

/// An open reference file.
pub trait RefHandle: Send {
    /// Path the handle was opened with.
    fn path(&self) -> &str;

    /// Reads an attribute; `None` when it is not set.
    fn get_xattr(&self, name: &str) -> RmanResult<Option<Vec<u8>>>;

    /// Writes an attribute durably.
    fn set_xattr(&mut self, name: &str, value: &[u8]) -> RmanResult<()>;

    /// Releases the handle.
    fn close(self: Box<Self>) -> RmanResult<()>;
}

/// Reference-file namespace of one MarFS namespace.
pub trait MetadataStore: Send + Sync {
    /// Stats a reference file.
    fn stat_ref(&self, path: &str) -> RmanResult<RefStat>;

    /// Opens a reference file for attribute access.
    fn open_ref(&self, path: &str, mode: OpenMode) -> RmanResult<Box<dyn RefHandle>>;

    /// Removes a reference file. Absence is not an error.
    fn unlink_ref(&self, path: &str) -> RmanResult<DeleteOutcome>;

    /// Lists a reference directory.
    fn open_scanner(&self, dir: &str) -> RmanResult<RefScanner>;

    /// Records the namespace's live data usage in bytes.
    fn set_data_usage(&self, bytes: u64) -> RmanResult<()>;

    /// Records the namespace's live file count.
    fn set_inode_usage(&self, count: u64) -> RmanResult<()>;
}

/// Erasure parameters of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Protection {
    /// Data blocks.
    pub data: u32,
    /// Parity blocks.
    pub parity: u32,
    /// Erasure part size in bytes.
    pub part_size: u64,
}

/// Physical location of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Pod index.
    pub pod: u32,
    /// Capacity-unit index.
    pub cap: u32,
    /// Scatter index.
    pub scatter: u32,
}

/// Everything the object store needs to address one data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    /// Object name.
    pub name: String,
    /// Erasure parameters.
    pub protection: Protection,
    /// Placement.
    pub location: Location,
}

/// The data-object layer.
pub trait ObjectStore: Send + Sync {
    /// Deletes one object. Absence is not an error.
    fn delete_object(&self, target: &ObjectTarget) -> RmanResult<DeleteOutcome>;
}

/// Encoding rules shared by a namespace's reference files and objects.
pub trait StreamCodec: Send + Sync {
    /// Decodes an FTAG attribute value.
    fn decode_ftag(&self, raw: &[u8]) -> RmanResult<Ftag>;

    /// Path of the reference file for `ftag.fileno` of `ftag`'s stream.
    fn reference_path(&self, ftag: &Ftag) -> RmanResult<String>;

    /// Object holding `ftag.objno` of `ftag`'s stream.
    fn object_target(&self, ftag: &Ftag) -> RmanResult<ObjectTarget>;

    /// The file number encoded in a reference entry name, if it is one.
    fn entry_fileno(&self, name: &str) -> Option<u64>;

    /// Bytes of recovery header preceding file data in the stream's first object.
    fn recovery_header_len(&self, ftag: &Ftag) -> u64;
}

/// The collaborators serving one namespace.
#[derive(Clone)]
pub struct Backends {
    /// Reference-file metadata.
    pub meta: Arc<dyn MetadataStore>,
    /// Data objects.
    pub objects: Arc<dyn ObjectStore>,
    /// FTAG and path encoding.
    pub codec: Arc<dyn StreamCodec>,
}

impl Backends {
    /// Bundles a namespace's collaborators.
    pub fn new(
        meta: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        codec: Arc<dyn StreamCodec>,
    ) -> Self {
        Self {
            meta,
            objects,
            codec,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

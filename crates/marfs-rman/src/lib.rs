#![warn(missing_docs)]

//! MarFS resource manager: walks reference streams, reclaims the objects and
//! reference files of deleted data, and recomputes namespace usage.

pub mod backend;
pub mod comm;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod ftag;
pub mod memory;
pub mod namespace;
pub mod quota;
pub mod run;
pub mod scan;
pub mod skip;
pub mod summary;
pub mod walker;

pub use backend::{
    Backends, DeleteOutcome, DirEntry, MetadataStore, ObjectStore, ObjectTarget, OpenMode,
    RefHandle, RefStat, StreamCodec, FTAG_XATTR, SKIP_XATTR,
};
pub use comm::{LocalGroup, LocalRank, RankComm};
pub use config::{RmanConfig, ScanSettings};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{RmanError, RmanResult};
pub use executor::{GcExecutor, GcRange, Reclaimer};
pub use ftag::{DataState, Ftag};
pub use namespace::Namespace;
pub use quota::{QuotaDelta, QuotaTotals};
pub use run::{run_rank, RunReport};
pub use scan::{NamespaceScan, PoolControl, PoolSignal, ScanReport};
pub use skip::SkipMarker;
pub use summary::ScanSummary;
pub use walker::{RefState, StreamHead, StreamWalker};

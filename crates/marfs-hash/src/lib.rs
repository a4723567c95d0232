#![warn(missing_docs)]

//! MarFS placement: 128-bit MurmurHash3 identifiers and the weighted
//! consistent-hash ring used to place and locate data-placement units.
//!
//! Placement is reproducible without coordination: any process that builds a
//! ring from the same node list and mode resolves every key to the same node.

pub mod cli;
pub mod config;
pub mod error;
pub mod murmur;
pub mod ring;

pub use config::RingConfig;
pub use error::{RingError, RingResult};
pub use murmur::{hash128, Identifier, KEY_SEED};
pub use ring::{
    successor_search, Placement, RealNode, Ring, RingCursor, RingMode, VirtualNode,
    MAX_VNODE_COUNT, TARGET_VNODE_COUNT,
};

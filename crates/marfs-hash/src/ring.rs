//! Weighted consistent-hash ring.
//!
//! A ring is built once from a list of real nodes. Each weighted node is
//! expanded into `weight * ratio` virtual nodes named `"{name}-{index}"`, where
//! `ratio = ceil(target / total_weight)`, so the ring holds at least `target`
//! positions. Lookup rings additionally give every zero-weight node a single
//! virtual node identified by its bare name, which lets callers resolve such
//! nodes by exact name without them ever winning a successor search by weight.
//!
//! Independent processes building a ring from the same node list and mode get
//! identical virtual-node arrays, and therefore identical placements.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::error::{RingError, RingResult};
use crate::murmur::Identifier;

/// Number of virtual nodes a ring aims for, apportioned by weight.
pub const TARGET_VNODE_COUNT: u64 = 50_000;

/// Hard cap on the virtual-node array.
pub const MAX_VNODE_COUNT: u64 = 1 << 24;

/// A real placement target as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RealNode {
    /// Node name; also the basis of every virtual-node name.
    pub name: String,
    /// Relative weight. Negative values are rejected at build time.
    pub weight: i64,
}

impl RealNode {
    /// Creates a node with the given name and weight.
    pub fn new(name: impl Into<String>, weight: i64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// How the ring treats zero-weight nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingMode {
    /// Zero-weight nodes receive no positions; at least one node must be weighted.
    #[default]
    Placement,
    /// Zero-weight nodes receive one position, identified by the bare node name.
    Lookup,
}

/// One position on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualNode {
    /// Hash of the virtual-node name.
    pub id: Identifier,
    /// Index of the owning real node.
    pub node: usize,
    /// Position within the owner's `"{name}-{index}"` series, or `None` for a
    /// bare-name lookup entry.
    pub ordinal: Option<u64>,
}

impl VirtualNode {
    /// Reconstructs the string this virtual node's id was derived from.
    pub fn name(&self, nodes: &[RealNode]) -> String {
        let base = &nodes[self.node].name;
        match self.ordinal {
            Some(ordinal) => format!("{}-{}", base, ordinal),
            None => base.clone(),
        }
    }

    fn sort_key(&self) -> (Identifier, usize, Option<u64>) {
        (self.id, self.node, self.ordinal)
    }
}

/// Iteration position over the distinct real nodes of a ring.
///
/// Cursors are plain values: [`Ring::lookup`] hands one back positioned just
/// past the matched node, and [`Ring::iterate`] advances one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingCursor {
    next: usize,
    iterated: usize,
}

impl RingCursor {
    /// Cursor that yields every real node starting from node 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarts iteration from node 0.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of nodes produced since the last reset (a lookup counts as one).
    pub fn iterated(&self) -> usize {
        self.iterated
    }
}

/// Result of a ring lookup.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    /// The owning real node.
    pub node: &'a RealNode,
    /// Index of that node in the ring's node list.
    pub node_index: usize,
    /// Index of the virtual node that matched.
    pub vnode_index: usize,
    /// True when the target string named the matched virtual node exactly.
    pub exact: bool,
    /// Cursor positioned on the real node after `node`, with `node` counted.
    pub cursor: RingCursor,
}

/// Sorted virtual-node ring over an owned list of real nodes.
#[derive(Debug, Clone)]
pub struct Ring {
    nodes: Vec<RealNode>,
    vnodes: Vec<VirtualNode>,
    mode: RingMode,
    ratio: u64,
}

impl Ring {
    /// Builds a ring targeting [`TARGET_VNODE_COUNT`] positions.
    pub fn build(nodes: Vec<RealNode>, mode: RingMode) -> RingResult<Self> {
        Self::build_with_target(nodes, mode, TARGET_VNODE_COUNT)
    }

    /// Builds a ring with an explicit target position count.
    pub fn build_with_target(nodes: Vec<RealNode>, mode: RingMode, target: u64) -> RingResult<Self> {
        let mut total_weight: u64 = 0;
        let mut zero_count: u64 = 0;
        for node in &nodes {
            match node.weight.cmp(&0) {
                Ordering::Less => {
                    return Err(RingError::InvalidWeight {
                        node: node.name.clone(),
                        weight: node.weight,
                    })
                }
                Ordering::Equal => zero_count += 1,
                Ordering::Greater => total_weight = total_weight.saturating_add(node.weight as u64),
            }
        }

        let ratio = if total_weight > 0 {
            target.max(1).div_ceil(total_weight)
        } else if mode == RingMode::Placement {
            return Err(RingError::DegenerateInput);
        } else {
            1
        };

        let mut count = ratio.saturating_mul(total_weight);
        if mode == RingMode::Lookup {
            count = count.saturating_add(zero_count);
        }
        if count == 0 {
            return Err(RingError::EmptyRing);
        }
        if count > MAX_VNODE_COUNT {
            return Err(RingError::TooManyVirtualNodes { count });
        }

        let mut vnodes = Vec::with_capacity(count as usize);
        for (index, node) in nodes.iter().enumerate() {
            if node.weight > 0 {
                let per_node = node.weight as u64 * ratio;
                vnodes.extend((0..per_node).map(|ordinal| VirtualNode {
                    id: Identifier::of(&format!("{}-{}", node.name, ordinal)),
                    node: index,
                    ordinal: Some(ordinal),
                }));
            } else if mode == RingMode::Lookup {
                vnodes.push(VirtualNode {
                    id: Identifier::of(&node.name),
                    node: index,
                    ordinal: None,
                });
            }
        }
        vnodes.sort_unstable_by_key(VirtualNode::sort_key);

        debug!(
            nodes = nodes.len(),
            vnodes = vnodes.len(),
            ratio,
            ?mode,
            "built consistent-hash ring"
        );

        Ok(Self {
            nodes,
            vnodes,
            mode,
            ratio,
        })
    }

    /// Tears the ring down, handing the node list back to the caller.
    pub fn into_nodes(self) -> Vec<RealNode> {
        self.nodes
    }

    /// The real nodes, in the order supplied at build time.
    pub fn nodes(&self) -> &[RealNode] {
        &self.nodes
    }

    /// The sorted virtual-node array.
    pub fn vnodes(&self) -> &[VirtualNode] {
        &self.vnodes
    }

    /// Number of real nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of virtual nodes.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// Mode this ring was built in.
    pub fn mode(&self) -> RingMode {
        self.mode
    }

    /// Virtual nodes allotted per unit of weight.
    pub fn ratio(&self) -> u64 {
        self.ratio
    }

    /// Number of virtual nodes owned by the real node at `index`.
    pub fn vnodes_for(&self, index: usize) -> usize {
        self.vnodes.iter().filter(|v| v.node == index).count()
    }

    /// Locates the real node responsible for `target`.
    ///
    /// Never fails: the result is either the virtual node named exactly by
    /// `target` or the nearest successor of its identifier, wrapping past the
    /// largest identifier back to the start of the ring.
    pub fn lookup(&self, target: &str) -> Placement<'_> {
        let id = Identifier::of(target);
        let (vnode_index, exact) =
            successor_search(&self.vnodes, id, |v| v.name(&self.nodes) == target);

        let node_index = self.vnodes[vnode_index].node;
        let mut next = node_index + 1;
        if next >= self.nodes.len() {
            next = 0;
        }

        Placement {
            node: &self.nodes[node_index],
            node_index,
            vnode_index,
            exact,
            cursor: RingCursor { next, iterated: 1 },
        }
    }

    /// Produces the next distinct real node for `cursor`, wrapping once
    /// through the node list; `None` after `node_count` nodes in total.
    pub fn iterate(&self, cursor: &mut RingCursor) -> Option<&RealNode> {
        if cursor.iterated >= self.nodes.len() {
            return None;
        }
        let node = &self.nodes[cursor.next];
        cursor.iterated += 1;
        cursor.next += 1;
        if cursor.next >= self.nodes.len() {
            cursor.next = 0;
        }
        Some(node)
    }

    /// The lookup target followed by every other real node, in ring order.
    pub fn lookup_all(&self, target: &str) -> Vec<&RealNode> {
        let placement = self.lookup(target);
        let mut cursor = placement.cursor;
        let mut out = vec![placement.node];
        while let Some(node) = self.iterate(&mut cursor) {
            out.push(node);
        }
        out
    }
}

/// Successor search over a sorted virtual-node slice.
///
/// Returns the index of the first entry whose id is `>= id` (wrapping to 0
/// when none is), and whether that entry is an exact match. When several
/// entries share `id`, the run of equal ids is scanned for one that
/// `name_matches`; if none does, the first equal-id entry stands as an
/// inexact match.
pub fn successor_search<F>(vnodes: &[VirtualNode], id: Identifier, mut name_matches: F) -> (usize, bool)
where
    F: FnMut(&VirtualNode) -> bool,
{
    let first = vnodes.partition_point(|v| v.id < id);
    if first == vnodes.len() {
        return (0, false);
    }
    if vnodes[first].id != id {
        return (first, false);
    }

    let exact = vnodes[first..]
        .iter()
        .take_while(|v| v.id == id)
        .position(|v| name_matches(v));
    match exact {
        Some(offset) => (first + offset, true),
        None => (first, false),
    }
}

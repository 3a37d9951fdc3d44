mod building;
mod mini_tree;
mod printing;
mod ray_bvh_intersection;

use std::ops::Range;

use index_vec::{IndexSlice, IndexVec};
use thiserror::Error;

use crate::geometry::WorldBox;

pub use building::{BuildConfig, DEFAULT_PARALLEL_THRESHOLD, Quality};
pub use printing::{BuildStatistics, BuildStrategy};
pub use ray_bvh_intersection::{
    DEFAULT_STACK_CAPACITY, TraversalMode, TraversalOutcome, TraversalStack,
};

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
}

/// Binary bounding volume hierarchy over an abstract set of primitives.
///
/// Primitives are never moved, the hierarchy addresses them through a permutation:
/// leaves own contiguous ranges of slots and slot `i` refers to original primitive
/// `primitive_ids[i]`.
#[derive(Clone, Debug)]
pub struct Bvh {
    nodes: IndexVec<NodeIdx, Node>,
    primitive_ids: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub bounding_box: WorldBox,
    pub link: NodeLink,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeLink {
    /// Range of slots in the primitive permutation
    Leaf { primitives: Range<usize> },
    Inner { children: [NodeIdx; 2] },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BvhError {
    #[error("Node index {index} is out of range for a hierarchy with {len} nodes")]
    NodeOutOfRange { index: usize, len: usize },

    #[error("Primitive slot {slot} is out of range for a hierarchy with {len} primitives")]
    PrimitiveOutOfRange { slot: usize, len: usize },

    #[error("Traversal stack overflow, capacity is {capacity} entries")]
    StackOverflow { capacity: usize },
}

impl Node {
    pub fn new_leaf(bounding_box: WorldBox, primitives: Range<usize>) -> Node {
        Node {
            bounding_box,
            link: NodeLink::Leaf { primitives },
        }
    }

    pub fn new_inner(bounding_box: WorldBox, children: [NodeIdx; 2]) -> Node {
        Node {
            bounding_box,
            link: NodeLink::Inner { children },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.link, NodeLink::Leaf { .. })
    }

    pub fn leaf_range(&self) -> Option<Range<usize>> {
        match &self.link {
            NodeLink::Leaf { primitives } => Some(primitives.clone()),
            NodeLink::Inner { .. } => None,
        }
    }

    pub fn children(&self) -> Option<[NodeIdx; 2]> {
        match self.link {
            NodeLink::Leaf { .. } => None,
            NodeLink::Inner { children } => Some(children),
        }
    }

    /// Moves the node into a node array where its subtree starts at a different position
    /// and its primitives at a different slot.
    fn relocated(mut self, map_index: impl Fn(NodeIdx) -> NodeIdx, slot_offset: usize) -> Node {
        match &mut self.link {
            NodeLink::Leaf { primitives } => {
                *primitives = (primitives.start + slot_offset)..(primitives.end + slot_offset);
            }
            NodeLink::Inner { children } => {
                *children = children.map(&map_index);
            }
        }
        self
    }
}

impl Bvh {
    pub const ROOT: NodeIdx = NodeIdx::from_raw_unchecked(0);

    /// Assembles a hierarchy from finished parts.
    /// The root must be the first node. No validation is done here, malformed indices
    /// are reported when they are queried.
    pub fn from_parts(nodes: Vec<Node>, primitive_ids: Vec<usize>) -> Bvh {
        Bvh {
            nodes: IndexVec::from_vec(nodes),
            primitive_ids,
        }
    }

    pub fn root(&self) -> NodeIdx {
        Self::ROOT
    }

    pub fn nodes(&self) -> &IndexSlice<NodeIdx, [Node]> {
        &self.nodes
    }

    /// Permutation from hierarchy slots to original primitive indices.
    pub fn primitive_ids(&self) -> &[usize] {
        &self.primitive_ids
    }

    pub fn primitive_count(&self) -> usize {
        self.primitive_ids.len()
    }

    pub fn node(&self, index: NodeIdx) -> Result<&Node, BvhError> {
        self.nodes.get(index).ok_or(BvhError::NodeOutOfRange {
            index: index.index(),
            len: self.nodes.len(),
        })
    }

    /// Original index of the primitive in the given slot.
    pub fn primitive_id(&self, slot: usize) -> Result<usize, BvhError> {
        self.primitive_ids
            .get(slot)
            .copied()
            .ok_or(BvhError::PrimitiveOutOfRange {
                slot,
                len: self.primitive_ids.len(),
            })
    }

    pub fn is_leaf(&self, index: NodeIdx) -> Result<bool, BvhError> {
        Ok(self.node(index)?.is_leaf())
    }

    pub fn leaf_range(&self, index: NodeIdx) -> Result<Option<Range<usize>>, BvhError> {
        Ok(self.node(index)?.leaf_range())
    }

    pub fn children(&self, index: NodeIdx) -> Result<Option<[NodeIdx; 2]>, BvhError> {
        Ok(self.node(index)?.children())
    }

    pub fn bounding_box(&self, index: NodeIdx) -> Result<&WorldBox, BvhError> {
        Ok(&self.node(index)?.bounding_box)
    }
}

//! Build strategy for small scenes.
//!
//! Primitives are sorted along a Morton curve and cut into one group per worker. Each group
//! gets its own SAH subtree built in parallel, then a small top level tree is built over the
//! group bounds and the group subtrees are spliced in place of its leaves.

use assert2::debug_assert;
use index_vec::IndexVec;
use itertools::Itertools as _;
use morton_encoding::morton_encode;

use crate::{
    executor::{Executor, SequentialExecutor},
    geometry::{FloatType, WorldBox, WorldPoint},
};

use super::{
    Bvh, Node, NodeIdx, NodeLink,
    building::{BuildConfig, SahBuilder, SplitParams},
};

const GRID_BITS: u32 = 10;

struct MiniTree {
    /// Slot of the first primitive of this group in the final permutation
    first: usize,
    prim_ids: Vec<usize>,
    nodes: IndexVec<NodeIdx, Node>,
}

/// Returns the hierarchy and the number of groups it was built from.
/// Expects at least one primitive.
pub(super) fn build<E: Executor>(
    boxes: &[WorldBox],
    centers: &[WorldPoint],
    config: &BuildConfig,
    executor: &E,
) -> (Bvh, usize) {
    let count = boxes.len();
    let group_count = executor.worker_count().clamp(1, count);

    let mut primitive_ids: Vec<usize> = (0..count).collect();
    morton_sort(&mut primitive_ids, centers);

    let mut trees: Vec<MiniTree> = (0..=group_count)
        .map(|i| i * count / group_count)
        .tuple_windows()
        .map(|(start, end)| MiniTree {
            first: start,
            prim_ids: primitive_ids[start..end].to_vec(),
            nodes: IndexVec::new(),
        })
        .collect();

    let group_builder = SahBuilder::new(boxes, centers, config.into(), &SequentialExecutor);
    executor.for_each_mut(&mut trees, |_offset, chunk| {
        for tree in chunk {
            tree.nodes = group_builder.build_subtree(&mut tree.prim_ids, 0);
        }
    });

    let (top_boxes, top_centers): (Vec<WorldBox>, Vec<WorldPoint>) = trees
        .iter()
        .map(|tree| {
            let root_box = tree.nodes[Bvh::ROOT].bounding_box.clone();
            let center = root_box.center();
            (root_box, center)
        })
        .unzip();
    let top_params = SplitParams {
        min_leaf_size: 1,
        max_leaf_size: 1,
        ..SplitParams::from(config)
    };
    let top = SahBuilder::new(&top_boxes, &top_centers, top_params, &SequentialExecutor).build();

    let bvh = splice(top, trees);
    (bvh, group_count)
}

/// Replaces every leaf of the top level tree with the group subtree it refers to.
fn splice(top: Bvh, trees: Vec<MiniTree>) -> Bvh {
    let Bvh {
        mut nodes,
        primitive_ids: group_order,
    } = top;
    let primitive_ids: Vec<usize> = trees
        .iter()
        .flat_map(|tree| tree.prim_ids.iter().copied())
        .collect();
    let mut trees: Vec<Option<MiniTree>> = trees.into_iter().map(Some).collect();

    for position in nodes.indices() {
        let NodeLink::Leaf { primitives } = &nodes[position].link else {
            continue;
        };
        // Top level leaves hold exactly one group each
        debug_assert!(primitives.len() == 1);
        let group = group_order[primitives.start];
        let Some(tree) = trees[group].take() else {
            unreachable!("group {group} appears in two top level leaves");
        };

        let base = nodes.len();
        let map_index = |index: NodeIdx| {
            if index == Bvh::ROOT {
                position
            } else {
                NodeIdx::from_usize(base + index.index() - 1)
            }
        };
        let mut subtree = tree.nodes.into_iter().map(|node| node.relocated(map_index, tree.first));
        if let Some(root) = subtree.next() {
            debug_assert!(nodes[position].bounding_box.contains(&root.bounding_box));
            nodes[position] = root;
        }
        nodes.extend(subtree);
    }

    Bvh {
        nodes,
        primitive_ids,
    }
}

/// Orders primitives along a Morton curve through their centers.
fn morton_sort(prim_ids: &mut [usize], centers: &[WorldPoint]) {
    let Some(bounds) = WorldBox::from_points(prim_ids.iter().map(|id| &centers[*id])) else {
        return;
    };
    let grid_max = ((1u32 << GRID_BITS) - 1) as FloatType;
    let scale = bounds
        .size()
        .map(|extent| if extent > 0.0 { grid_max / extent } else { 0.0 });

    prim_ids.sort_by_cached_key(|id| {
        let grid_coordinates: [u16; 3] = (centers[*id] - bounds.min)
            .component_mul(&scale)
            .map(|x| x.round() as u16)
            .into();
        morton_encode(grid_coordinates)
    });
}

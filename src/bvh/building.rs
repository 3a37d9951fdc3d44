use std::time::Instant;

use arrayvec::ArrayVec;
use assert2::assert;
use bon::bon;
use index_vec::IndexVec;
use ordered_float::OrderedFloat;

use crate::{
    executor::Executor,
    geometry::{FloatType, WorldBox, WorldPoint},
};

use super::{BuildStatistics, BuildStrategy, Bvh, Node, NodeIdx, mini_tree};

/// Scenes with at most this many primitives are built with the mini-tree strategy by default.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1024;

/// Subsets larger than this are split into two forked tasks.
const PARALLEL_FORK_THRESHOLD: usize = 1024;

/// Cost of testing a single primitive, relative to `BuildConfig::traversal_cost`.
const INTERSECTION_COST: FloatType = 1.0;

const MAX_BINS: usize = 32;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Quality {
    /// Few bins, only the widest axis is searched.
    Low,
    #[default]
    Medium,
    /// Finest binning on every axis.
    High,
}

impl Quality {
    fn bin_count(self) -> usize {
        match self {
            Quality::Low => 8,
            Quality::Medium => 16,
            Quality::High => MAX_BINS,
        }
    }

    fn searches_all_axes(self) -> bool {
        self != Quality::Low
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildConfig {
    pub quality: Quality,
    /// Scenes with at most this many primitives use the mini-tree strategy.
    pub parallel_threshold: usize,
    /// Subsets this small always become leaves.
    pub min_leaf_size: usize,
    /// Subsets larger than this are always split, even when the SAH prefers a leaf.
    pub max_leaf_size: usize,
    pub traversal_cost: FloatType,
}

#[bon]
impl BuildConfig {
    #[builder]
    pub fn new(
        #[builder(default)] quality: Quality,
        #[builder(default = DEFAULT_PARALLEL_THRESHOLD)] parallel_threshold: usize,
        #[builder(default = 1)] min_leaf_size: usize,
        #[builder(default = 8)] max_leaf_size: usize,
        #[builder(default = 1.0)] traversal_cost: FloatType,
    ) -> Self {
        let min_leaf_size = min_leaf_size.max(1);
        let max_leaf_size = max_leaf_size.max(min_leaf_size);
        BuildConfig {
            quality,
            parallel_threshold,
            min_leaf_size,
            max_leaf_size,
            traversal_cost,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig::builder().build()
    }
}

/// The part of the configuration that drives individual split decisions.
#[derive(Copy, Clone, Debug)]
pub(super) struct SplitParams {
    pub bin_count: usize,
    pub all_axes: bool,
    pub min_leaf_size: usize,
    pub max_leaf_size: usize,
    pub traversal_cost: FloatType,
}

impl From<&BuildConfig> for SplitParams {
    fn from(config: &BuildConfig) -> Self {
        SplitParams {
            bin_count: config.quality.bin_count(),
            all_axes: config.quality.searches_all_axes(),
            min_leaf_size: config.min_leaf_size,
            max_leaf_size: config.max_leaf_size,
            traversal_cost: config.traversal_cost,
        }
    }
}

impl Bvh {
    /// Builds a hierarchy over primitives given by their bounding boxes and centers.
    ///
    /// Never fails: an empty input produces a single empty leaf, and degenerate inputs
    /// (identical centers, oversized leaf limits) fall back to valid trees.
    pub fn build<E: Executor>(
        boxes: &[WorldBox],
        centers: &[WorldPoint],
        config: &BuildConfig,
        executor: &E,
    ) -> (Bvh, BuildStatistics) {
        assert!(
            boxes.len() == centers.len(),
            "every primitive needs both a box and a center"
        );
        let start = Instant::now();
        let count = boxes.len();

        let (bvh, strategy) = if count > 0 && count <= config.parallel_threshold {
            let (bvh, groups) = mini_tree::build(boxes, centers, config, executor);
            (bvh, BuildStrategy::MiniTrees { groups })
        } else {
            let builder = SahBuilder::new(boxes, centers, config.into(), executor);
            (builder.build(), BuildStrategy::Recursive)
        };

        let statistics = bvh.statistics(strategy, start.elapsed());
        (bvh, statistics)
    }
}

/// Top down binned SAH builder over a subset of primitives.
pub(super) struct SahBuilder<'a, E> {
    boxes: &'a [WorldBox],
    centers: &'a [WorldPoint],
    params: SplitParams,
    executor: &'a E,
}

#[derive(Clone, Debug)]
struct Bin {
    bounding_box: WorldBox,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Bin {
            bounding_box: WorldBox::empty(),
            count: 0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct Split {
    axis: usize,
    /// Last bin that goes to the left child
    bin: usize,
    cost: FloatType,
}

impl<'a, E: Executor> SahBuilder<'a, E> {
    pub fn new(
        boxes: &'a [WorldBox],
        centers: &'a [WorldPoint],
        params: SplitParams,
        executor: &'a E,
    ) -> Self {
        SahBuilder {
            boxes,
            centers,
            params,
            executor,
        }
    }

    /// Builds the hierarchy over all primitives.
    pub fn build(&self) -> Bvh {
        let mut primitive_ids: Vec<usize> = (0..self.boxes.len()).collect();
        let nodes = self.build_subtree(&mut primitive_ids, 0);
        Bvh {
            nodes,
            primitive_ids,
        }
    }

    /// Builds a standalone subtree over `prim_ids`, reordering them in place.
    /// `first` is the slot of `prim_ids[0]` in the final permutation.
    /// The subtree root is the first node of the returned array.
    pub fn build_subtree(&self, prim_ids: &mut [usize], first: usize) -> IndexVec<NodeIdx, Node> {
        let mut nodes = IndexVec::new();
        self.build_into(prim_ids, first, &mut nodes);
        nodes
    }

    fn build_into(
        &self,
        prim_ids: &mut [usize],
        first: usize,
        nodes: &mut IndexVec<NodeIdx, Node>,
    ) -> NodeIdx {
        let count = prim_ids.len();
        let (bounding_box, centroid_bounds) = self.bounds(prim_ids);

        // Parent goes before its children, the leaf gets overwritten if we split
        let node_index = nodes.push(Node::new_leaf(bounding_box.clone(), first..first + count));

        let Some(mid) = self.split(prim_ids, &bounding_box, &centroid_bounds) else {
            return node_index;
        };
        let (left_ids, right_ids) = prim_ids.split_at_mut(mid);

        let children = if count > PARALLEL_FORK_THRESHOLD && self.executor.is_parallel() {
            let (left, right) = self.executor.join(
                || self.build_subtree(left_ids, first),
                || self.build_subtree(right_ids, first + mid),
            );
            [append_subtree(nodes, left), append_subtree(nodes, right)]
        } else {
            [
                self.build_into(left_ids, first, nodes),
                self.build_into(right_ids, first + mid, nodes),
            ]
        };

        let children_box = nodes[children[0]]
            .bounding_box
            .merge(&nodes[children[1]].bounding_box);
        nodes[node_index] = Node::new_inner(children_box, children);

        node_index
    }

    /// Union of primitive boxes and bounding box of primitive centers.
    fn bounds(&self, prim_ids: &[usize]) -> (WorldBox, WorldBox) {
        prim_ids.iter().fold(
            (WorldBox::empty(), WorldBox::empty()),
            |(mut bounding_box, mut centroid_bounds), id| {
                bounding_box.merge_assign(&self.boxes[*id]);
                centroid_bounds.extend(&self.centers[*id]);
                (bounding_box, centroid_bounds)
            },
        )
    }

    /// Decides whether the subset becomes a leaf (returns None),
    /// otherwise reorders `prim_ids` and returns the size of the left part.
    fn split(
        &self,
        prim_ids: &mut [usize],
        bounding_box: &WorldBox,
        centroid_bounds: &WorldBox,
    ) -> Option<usize> {
        let count = prim_ids.len();
        if count <= self.params.min_leaf_size {
            return None;
        }

        let split = self.find_split(prim_ids, bounding_box, centroid_bounds);
        let leaf_cost = count as FloatType * INTERSECTION_COST;
        let worth_splitting = split.is_some_and(|split| split.cost < leaf_cost);
        if !worth_splitting && count <= self.params.max_leaf_size {
            return None;
        }

        let mid = split.map_or(0, |split| self.partition(prim_ids, centroid_bounds, &split));
        if mid == 0 || mid == count {
            Some(self.median_split(prim_ids, centroid_bounds))
        } else {
            Some(mid)
        }
    }

    fn find_split(
        &self,
        prim_ids: &[usize],
        bounding_box: &WorldBox,
        centroid_bounds: &WorldBox,
    ) -> Option<Split> {
        let bin_count = self.params.bin_count;
        let parent_area = bounding_box.surface_area();
        let area_scale = if parent_area > 0.0 {
            INTERSECTION_COST / parent_area
        } else {
            INTERSECTION_COST
        };

        let axes = if self.params.all_axes {
            0..3
        } else {
            let axis = centroid_bounds.largest_axis();
            axis..axis + 1
        };

        let mut best: Option<Split> = None;
        for axis in axes {
            let min = centroid_bounds.min[axis];
            let extent = centroid_bounds.max[axis] - min;
            if !(extent > 0.0) {
                // All centers share the coordinate, nothing to separate here
                continue;
            }

            let mut bins: ArrayVec<Bin, MAX_BINS> = (0..bin_count).map(|_| Bin::default()).collect();
            for id in prim_ids {
                let bin = &mut bins[bin_index(self.centers[*id][axis], min, extent, bin_count)];
                bin.count += 1;
                bin.bounding_box.merge_assign(&self.boxes[*id]);
            }

            // right_side[i] describes everything after bin i
            let mut right_side: ArrayVec<(usize, FloatType), MAX_BINS> = ArrayVec::new();
            let mut accumulated = Bin::default();
            for bin in bins[1..].iter().rev() {
                accumulated.count += bin.count;
                accumulated.bounding_box.merge_assign(&bin.bounding_box);
                right_side.push((accumulated.count, accumulated.bounding_box.surface_area()));
            }
            right_side.reverse();

            let mut left = Bin::default();
            for (i, bin) in bins[..bin_count - 1].iter().enumerate() {
                left.count += bin.count;
                left.bounding_box.merge_assign(&bin.bounding_box);

                let (right_count, right_area) = right_side[i];
                if left.count == 0 || right_count == 0 {
                    continue;
                }

                let cost = self.params.traversal_cost
                    + area_scale
                        * (left.count as FloatType * left.bounding_box.surface_area()
                            + right_count as FloatType * right_area);
                if best.is_none_or(|best| cost < best.cost) {
                    best = Some(Split { axis, bin: i, cost });
                }
            }
        }

        best
    }

    /// Moves primitives whose center falls into bins up to `split.bin` to the front.
    fn partition(&self, prim_ids: &mut [usize], centroid_bounds: &WorldBox, split: &Split) -> usize {
        let min = centroid_bounds.min[split.axis];
        let extent = centroid_bounds.max[split.axis] - min;
        itertools::partition(prim_ids.iter_mut(), |id| {
            bin_index(self.centers[*id][split.axis], min, extent, self.params.bin_count) <= split.bin
        })
    }

    /// Splits the subset in half by primitive count along the widest centroid axis.
    fn median_split(&self, prim_ids: &mut [usize], centroid_bounds: &WorldBox) -> usize {
        let axis = centroid_bounds.largest_axis();
        let mid = prim_ids.len() / 2;
        prim_ids.select_nth_unstable_by_key(mid, |id| OrderedFloat(self.centers[*id][axis]));
        mid
    }
}

/// Bin of a center coordinate. Centers exactly on a boundary between two bins belong to
/// the lower one.
fn bin_index(coordinate: FloatType, min: FloatType, extent: FloatType, bin_count: usize) -> usize {
    let relative = (coordinate - min) * bin_count as FloatType / extent;
    (relative.ceil() as usize)
        .saturating_sub(1)
        .min(bin_count - 1)
}

/// Moves a standalone subtree to the end of `nodes`, returns the new index of its root.
pub(super) fn append_subtree(
    nodes: &mut IndexVec<NodeIdx, Node>,
    subtree: IndexVec<NodeIdx, Node>,
) -> NodeIdx {
    let offset = nodes.len();
    nodes.extend(
        subtree
            .into_iter()
            .map(|node| node.relocated(|index| index + offset, 0)),
    );
    NodeIdx::from_usize(offset)
}

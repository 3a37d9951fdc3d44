use std::ops::Range;

use arrayvec::ArrayVec;

use crate::geometry::{BoxTest, FloatType, PreparedRay, Ray, RayIntersectionExt as _};

use super::{Bvh, BvhError, NodeIdx, NodeLink};

pub const DEFAULT_STACK_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TraversalMode {
    /// Stop as soon as the visitor reports a hit.
    AnyHit,
    /// Visit nearer children first, the visitor shrinks `ray.t_max` as it finds hits.
    #[default]
    ClosestHit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraversalOutcome {
    /// Every node the ray could reach was visited.
    Exhausted,
    /// The visitor asked to stop.
    Terminated,
}

/// Fixed capacity stack of nodes waiting to be visited, with their ray entry distances.
///
/// Keep one per thread and reuse it between traversals.
#[derive(Clone, Debug, Default)]
pub struct TraversalStack<const N: usize = DEFAULT_STACK_CAPACITY> {
    entries: ArrayVec<(NodeIdx, FloatType), N>,
}

impl<const N: usize> TraversalStack<N> {
    pub fn new() -> Self {
        TraversalStack {
            entries: ArrayVec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    fn push(&mut self, index: NodeIdx, entry_distance: FloatType) -> Result<(), BvhError> {
        self.entries
            .try_push((index, entry_distance))
            .map_err(|_| BvhError::StackOverflow { capacity: N })
    }
}

impl Bvh {
    /// Walks the hierarchy along the ray and calls `visitor` with the slot range of every
    /// leaf whose box the ray enters within `[ray.t_min, ray.t_max]`.
    ///
    /// The visitor may shrink `ray.t_max`, nodes that start beyond it are skipped afterwards.
    /// Returning true from the visitor ends the traversal.
    pub fn traverse<const N: usize>(
        &self,
        ray: &mut Ray,
        mode: TraversalMode,
        box_test: BoxTest,
        stack: &mut TraversalStack<N>,
        mut visitor: impl FnMut(Range<usize>, &mut Ray) -> bool,
    ) -> Result<TraversalOutcome, BvhError> {
        stack.entries.clear();
        let prepared = PreparedRay::new(ray, box_test);

        let root_box = self.bounding_box(Bvh::ROOT)?;
        if let Some((entry, _)) = root_box.intersect(&prepared, ray.t_min, ray.t_max) {
            stack.push(Bvh::ROOT, entry)?;
        }

        while let Some((index, entry)) = stack.entries.pop() {
            if entry > ray.t_max {
                continue;
            }

            match &self.node(index)?.link {
                NodeLink::Leaf { primitives } => {
                    if visitor(primitives.clone(), ray) {
                        return Ok(TraversalOutcome::Terminated);
                    }
                }
                NodeLink::Inner { children } => {
                    let mut hit_children = ArrayVec::<(NodeIdx, FloatType), 2>::new();
                    for child in children {
                        let child_box = self.bounding_box(*child)?;
                        if let Some((entry, _)) =
                            child_box.intersect(&prepared, ray.t_min, ray.t_max)
                        {
                            hit_children.push((*child, entry));
                        }
                    }

                    if mode == TraversalMode::ClosestHit
                        && hit_children.len() == 2
                        && hit_children[1].1 < hit_children[0].1
                    {
                        hit_children.swap(0, 1);
                    }

                    // First child ends on top of the stack
                    for (child, entry) in hit_children.into_iter().rev() {
                        stack.push(child, entry)?;
                    }
                }
            }
        }

        Ok(TraversalOutcome::Exhausted)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::{assert, let_assert};

    use crate::{
        bvh::{BuildConfig, Node, test::boxes_and_centers},
        executor::SequentialExecutor,
        geometry::{Triangle, WorldBox, WorldPoint, WorldVector},
    };

    /// Horizontal triangles stacked along z, triangle `i` at height `i`.
    fn stacked_triangles(count: usize) -> Vec<Triangle<WorldPoint>> {
        (0..count)
            .map(|i| {
                let z = i as f32;
                Triangle::new(
                    WorldPoint::new(0.0, 0.0, z),
                    WorldPoint::new(1.0, 0.0, z),
                    WorldPoint::new(0.0, 1.0, z),
                )
            })
            .collect()
    }

    fn stacked_bvh(count: usize) -> Bvh {
        let (boxes, centers) = boxes_and_centers(&stacked_triangles(count));
        let config = BuildConfig::builder().parallel_threshold(0).build();
        Bvh::build(&boxes, &centers, &config, &SequentialExecutor).0
    }

    fn downward_ray() -> Ray {
        Ray::unbounded(
            WorldPoint::new(0.2, 0.2, 100.0),
            WorldVector::new(0.0, 0.0, -1.0),
        )
    }

    /// Chain of inner nodes whose first child is the next inner node and second child a
    /// leaf, so each level leaves one leaf waiting on the stack.
    /// Inner node of level `l` is at `2 * l`, its leaf at `2 * l + 1`.
    fn caterpillar(depth: usize) -> Bvh {
        let b = WorldBox::new([0.0, 0.0, 0.0].into(), [1.0, 1.0, 1.0].into());
        let mut nodes = Vec::with_capacity(2 * depth + 1);
        for level in 0..depth {
            nodes.push(Node::new_inner(
                b.clone(),
                [NodeIdx::new(2 * level + 2), NodeIdx::new(2 * level + 1)],
            ));
            nodes.push(Node::new_leaf(b.clone(), level..level + 1));
        }
        nodes.push(Node::new_leaf(b, depth..depth + 1));
        Bvh::from_parts(nodes, (0..=depth).collect())
    }

    #[test]
    fn miss_root_box_never_visits() {
        let bvh = stacked_bvh(20);
        let mut stack = TraversalStack::<DEFAULT_STACK_CAPACITY>::new();
        let mut ray = Ray::unbounded(
            WorldPoint::new(5.0, 5.0, 5.0),
            WorldVector::new(0.0, 0.0, -1.0),
        );

        for mode in [TraversalMode::AnyHit, TraversalMode::ClosestHit] {
            for box_test in [BoxTest::Fast, BoxTest::Robust] {
                let mut calls = 0;
                let outcome = bvh.traverse(&mut ray, mode, box_test, &mut stack, |_, _| {
                    calls += 1;
                    false
                });
                assert!(outcome == Ok(TraversalOutcome::Exhausted));
                assert!(calls == 0);
            }
        }
    }

    #[test]
    fn visits_every_slot_once() {
        let bvh = stacked_bvh(50);
        let mut stack: TraversalStack = TraversalStack::new();
        let mut visited = vec![0; 50];
        let outcome = bvh.traverse(
            &mut downward_ray(),
            TraversalMode::AnyHit,
            BoxTest::Fast,
            &mut stack,
            |range, _| {
                for slot in range {
                    visited[slot] += 1;
                }
                false
            },
        );
        assert!(outcome == Ok(TraversalOutcome::Exhausted));
        assert!(visited.iter().all(|count| *count == 1));
    }

    #[test]
    fn visitor_terminates() {
        let bvh = stacked_bvh(50);
        let mut stack: TraversalStack = TraversalStack::new();
        let mut calls = 0;
        let outcome = bvh.traverse(
            &mut downward_ray(),
            TraversalMode::AnyHit,
            BoxTest::Fast,
            &mut stack,
            |_, _| {
                calls += 1;
                true
            },
        );
        assert!(outcome == Ok(TraversalOutcome::Terminated));
        assert!(calls == 1);
    }

    /// Closest hit order reaches the topmost triangle first, and shrinking t_max
    /// to it prunes everything below.
    #[test]
    fn near_first_and_pruning() {
        let count = 50;
        let bvh = stacked_bvh(count);
        let mut stack: TraversalStack = TraversalStack::new();
        let mut ray = downward_ray();
        let mut visited_ids = Vec::new();

        let outcome = bvh.traverse(
            &mut ray,
            TraversalMode::ClosestHit,
            BoxTest::Fast,
            &mut stack,
            |range, ray| {
                for slot in range {
                    let id = bvh.primitive_id(slot).unwrap();
                    visited_ids.push(id);
                    // Triangle `id` is hit at distance 100 - id
                    ray.t_max = ray.t_max.min(100.0 - id as f32);
                }
                false
            },
        );

        assert!(outcome == Ok(TraversalOutcome::Exhausted));
        assert!(visited_ids.contains(&(count - 1)));
        assert!(visited_ids.len() < count / 2);
        assert!(ray.t_max == 100.0 - (count - 1) as f32);
    }

    #[test]
    fn any_hit_keeps_child_order() {
        let bvh = caterpillar(3);
        let mut stack: TraversalStack = TraversalStack::new();
        let mut leaf_order = Vec::new();
        let mut ray = Ray::unbounded(
            WorldPoint::new(0.5, 0.5, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );
        let outcome = bvh.traverse(
            &mut ray,
            TraversalMode::AnyHit,
            BoxTest::Fast,
            &mut stack,
            |range, _| {
                leaf_order.push(range.start);
                false
            },
        );
        assert!(outcome == Ok(TraversalOutcome::Exhausted));
        assert!(leaf_order == [3, 2, 1, 0]);
    }

    #[test]
    fn overflow_is_reported() {
        let bvh = caterpillar(10);
        let mut stack = TraversalStack::<4>::new();
        let mut ray = Ray::unbounded(
            WorldPoint::new(0.5, 0.5, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );
        let result = bvh.traverse(
            &mut ray,
            TraversalMode::ClosestHit,
            BoxTest::Robust,
            &mut stack,
            |_, _| false,
        );
        assert!(result == Err(BvhError::StackOverflow { capacity: 4 }));

        // Same tree fits a bigger stack
        let mut stack = TraversalStack::<16>::new();
        let result = bvh.traverse(
            &mut ray,
            TraversalMode::ClosestHit,
            BoxTest::Robust,
            &mut stack,
            |_, _| false,
        );
        assert!(result == Ok(TraversalOutcome::Exhausted));
    }

    #[test]
    fn overflow_in_built_tree() {
        let bvh = stacked_bvh(100);
        let mut stack = TraversalStack::<1>::new();
        let result = bvh.traverse(
            &mut downward_ray(),
            TraversalMode::ClosestHit,
            BoxTest::Fast,
            &mut stack,
            |_, _| false,
        );
        assert!(result == Err(BvhError::StackOverflow { capacity: 1 }));
    }

    #[test]
    fn malformed_child_index() {
        let b = WorldBox::new([0.0, 0.0, 0.0].into(), [1.0, 1.0, 1.0].into());
        let bvh = Bvh::from_parts(
            vec![
                Node::new_inner(b.clone(), [NodeIdx::new(1), NodeIdx::new(5)]),
                Node::new_leaf(b, 0..1),
            ],
            vec![0],
        );
        let mut stack: TraversalStack = TraversalStack::new();
        let mut ray = Ray::unbounded(
            WorldPoint::new(0.5, 0.5, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
        );
        let result = bvh.traverse(
            &mut ray,
            TraversalMode::AnyHit,
            BoxTest::Fast,
            &mut stack,
            |_, _| false,
        );
        let_assert!(Err(BvhError::NodeOutOfRange { index: 5, len: 2 }) = result);
    }

    #[test]
    fn stack_is_reusable() {
        let bvh = stacked_bvh(30);
        let mut stack: TraversalStack = TraversalStack::new();
        assert!(stack.capacity() == DEFAULT_STACK_CAPACITY);

        // Leaves entries behind on the stack
        let terminated = bvh.traverse(
            &mut downward_ray(),
            TraversalMode::AnyHit,
            BoxTest::Fast,
            &mut stack,
            |_, _| true,
        );
        assert!(terminated == Ok(TraversalOutcome::Terminated));

        let mut calls = 0;
        let mut ray = Ray::unbounded(
            WorldPoint::new(5.0, 5.0, 5.0),
            WorldVector::new(0.0, 0.0, -1.0),
        );
        let outcome = bvh.traverse(
            &mut ray,
            TraversalMode::AnyHit,
            BoxTest::Fast,
            &mut stack,
            |_, _| {
                calls += 1;
                false
            },
        );
        assert!(outcome == Ok(TraversalOutcome::Exhausted));
        assert!(calls == 0);
    }
}

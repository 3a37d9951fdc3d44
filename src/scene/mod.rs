pub mod mesh;

use crate::{
    bvh::{
        BuildConfig, BuildStatistics, Bvh, BvhError, DEFAULT_STACK_CAPACITY, TraversalMode,
        TraversalStack,
    },
    executor::Executor,
    geometry::{
        BarycentricCoordinates, BoxTest, FloatType, PrecomputedTriangle, Ray, Triangle,
        TriangleHit, WorldBox, WorldPoint,
    },
};

/// Triangles ready for ray queries.
///
/// Triangles are stored in hierarchy slot order, slot `i` holds the original triangle
/// `bvh.primitive_ids()[i]`. Hit records always report original indices.
#[derive(Clone, Debug)]
pub struct Scene {
    bvh: Bvh,
    triangles: Vec<PrecomputedTriangle>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HitRecord {
    /// Index of the triangle in the input of `Scene::build`
    pub primitive: usize,
    pub t: FloatType,
    pub uv: BarycentricCoordinates<FloatType>,
}

impl Scene {
    pub fn build<E: Executor>(
        triangles: &[Triangle<WorldPoint>],
        config: &BuildConfig,
        executor: &E,
    ) -> (Scene, BuildStatistics) {
        let mut bounds = vec![(WorldBox::empty(), WorldPoint::origin()); triangles.len()];
        executor.for_each_mut(&mut bounds, |offset, chunk| {
            for (i, (bounding_box, center)) in chunk.iter_mut().enumerate() {
                let triangle = &triangles[offset + i];
                *bounding_box = triangle.bounding_box();
                *center = triangle.centroid();
            }
        });
        let (boxes, centers): (Vec<WorldBox>, Vec<WorldPoint>) = bounds.into_iter().unzip();

        let (bvh, statistics) = Bvh::build(&boxes, &centers, config, executor);

        let placeholder = PrecomputedTriangle::new(&Triangle::new(
            WorldPoint::origin(),
            WorldPoint::origin(),
            WorldPoint::origin(),
        ));
        let mut precomputed = vec![placeholder; triangles.len()];
        let primitive_ids = bvh.primitive_ids();
        executor.for_each_mut(&mut precomputed, |offset, chunk| {
            for (i, slot) in chunk.iter_mut().enumerate() {
                *slot = PrecomputedTriangle::new(&triangles[primitive_ids[offset + i]]);
            }
        });

        (
            Scene {
                bvh,
                triangles: precomputed,
            },
            statistics,
        )
    }

    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Precomputed triangles in slot order.
    pub fn triangles(&self) -> &[PrecomputedTriangle] {
        &self.triangles
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Finds a hit of the ray within `[ray.t_min, ray.t_max)`.
    ///
    /// With `TraversalMode::ClosestHit` this is the nearest hit; of several hits at the same
    /// distance the one with the lowest original index wins. With `AnyHit` it is the first
    /// one found.
    pub fn intersect<const N: usize>(
        &self,
        ray: &Ray,
        mode: TraversalMode,
        box_test: BoxTest,
        stack: &mut TraversalStack<N>,
    ) -> Result<Option<HitRecord>, BvhError> {
        let limit = ray.t_max;
        let mut ray = *ray;
        let mut best: Option<(usize, TriangleHit)> = None;
        let mut missing_slot = None;

        self.bvh
            .traverse(&mut ray, mode, box_test, stack, |slots, ray| {
                for slot in slots {
                    let (Some(triangle), Some(&primitive)) =
                        (self.triangles.get(slot), self.bvh.primitive_ids().get(slot))
                    else {
                        missing_slot = Some(slot);
                        return true;
                    };
                    // Tested against the full range so that hits tied with the best one
                    // are seen too
                    let Some(hit) = triangle.intersect(&Ray { t_max: limit, ..*ray }) else {
                        continue;
                    };
                    let better = hit.t < ray.t_max
                        || best.is_some_and(|(best_primitive, best_hit)| {
                            hit.t == best_hit.t && primitive < best_primitive
                        });
                    if !better {
                        continue;
                    }
                    best = Some((primitive, hit));
                    match mode {
                        TraversalMode::AnyHit => return true,
                        TraversalMode::ClosestHit => ray.t_max = hit.t,
                    }
                }
                false
            })?;

        if let Some(slot) = missing_slot {
            return Err(BvhError::PrimitiveOutOfRange {
                slot,
                len: self.triangles.len(),
            });
        }

        Ok(best.map(|(primitive, hit)| HitRecord {
            primitive,
            t: hit.t,
            uv: hit.uv,
        }))
    }

    pub fn intersect_closest(&self, ray: &Ray) -> Result<Option<HitRecord>, BvhError> {
        let mut stack = TraversalStack::<DEFAULT_STACK_CAPACITY>::new();
        self.intersect(ray, TraversalMode::ClosestHit, BoxTest::Fast, &mut stack)
    }

    pub fn intersect_any(&self, ray: &Ray) -> Result<Option<HitRecord>, BvhError> {
        let mut stack = TraversalStack::<DEFAULT_STACK_CAPACITY>::new();
        self.intersect(ray, TraversalMode::AnyHit, BoxTest::Fast, &mut stack)
    }
}

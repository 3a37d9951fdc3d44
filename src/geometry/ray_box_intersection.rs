use super::{EPSILON, FloatType, Ray, WorldBox, WorldPoint, WorldVector};

/// Selects the variant of the ray-box slab test.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BoxTest {
    /// Near-zero direction components get the largest finite reciprocal. Only a ray
    /// starting exactly on a slab plane it is parallel to may be rejected.
    #[default]
    Fast,
    /// Exact reciprocals, NaN slabs are widened to infinity and exit distances are
    /// padded to stay conservative under rounding. Correct for axis aligned rays
    /// that start on a slab plane, slightly slower.
    Robust,
}

/// Ray data reused for every box test of a single traversal.
#[derive(Copy, Clone, Debug)]
pub struct PreparedRay {
    origin: WorldPoint,
    inv_direction: WorldVector,
    /// Per axis: true if the ray goes towards negative coordinates,
    /// in which case the box maximum is the near plane.
    negative: [bool; 3],
    box_test: BoxTest,
}

impl PreparedRay {
    pub fn new(ray: &Ray, box_test: BoxTest) -> PreparedRay {
        let inv_direction = match box_test {
            BoxTest::Fast => ray.direction.map(safe_inverse),
            BoxTest::Robust => ray.direction.map(|x| 1.0 / x),
        };
        // Sign of the inverse carries the sign of zeros too (1 / -0.0 == -inf)
        let negative = [0, 1, 2].map(|axis| inv_direction[axis].is_sign_negative());

        PreparedRay {
            origin: ray.origin,
            inv_direction,
            negative,
            box_test,
        }
    }
}

pub trait RayIntersectionExt {
    /// Calculate first and last ray intersection with the box, limited to the
    /// [t_min, t_max] interval.
    /// Returns None when the limited intersection is empty.
    fn intersect(
        &self,
        ray: &PreparedRay,
        t_min: FloatType,
        t_max: FloatType,
    ) -> Option<(FloatType, FloatType)>;
}

impl RayIntersectionExt for WorldBox {
    fn intersect(
        &self,
        ray: &PreparedRay,
        t_min: FloatType,
        t_max: FloatType,
    ) -> Option<(FloatType, FloatType)> {
        let mut entry = t_min;
        let mut exit = t_max;

        for axis in 0..3 {
            let (near, far) = if ray.negative[axis] {
                (self.max[axis], self.min[axis])
            } else {
                (self.min[axis], self.max[axis])
            };
            let mut near_t = (near - ray.origin[axis]) * ray.inv_direction[axis];
            let mut far_t = (far - ray.origin[axis]) * ray.inv_direction[axis];

            if ray.box_test == BoxTest::Robust {
                // The multiplication is NAN if the ray is starting on the slab bounding plane
                // and is parallel to it. In this case the slab doesn't limit the range.
                if near_t.is_nan() {
                    near_t = FloatType::NEG_INFINITY;
                }
                if far_t.is_nan() {
                    far_t = FloatType::INFINITY;
                }
                if far_t.is_finite() {
                    far_t += far_t.abs() * (ROBUST_EXIT_PADDING - 1.0);
                }
            }

            entry = entry.max(near_t);
            exit = exit.min(far_t);
        }

        if entry <= exit {
            Some((entry, exit))
        } else {
            None
        }
    }
}

/// Conservative rounding bound, see "Robust BVH Ray Traversal" (Ize, 2013)
const ROBUST_EXIT_PADDING: FloatType = 1.0 + 2.0 * gamma(3);

const fn gamma(n: u32) -> FloatType {
    let n = n as FloatType;
    (n * EPSILON) / (1.0 - n * EPSILON)
}

fn safe_inverse(x: FloatType) -> FloatType {
    if x.abs() <= EPSILON {
        FloatType::MAX.copysign(x)
    } else {
        1.0 / x
    }
}

#[cfg(test)]
pub mod test {
    use assert2::assert;
    use test_case::{test_case, test_matrix};

    use super::*;

    fn test_box() -> WorldBox {
        WorldBox::new([5.0, 5.0, 5.0].into(), [10.0, 10.0, 10.0].into())
    }

    /// Checks cases when the ray hits the box, including some corner cases.
    #[test_matrix(
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [5.0, 7.0, 10.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-1.0, 0.0, 2.0],
        [-10.0, -1.0, 0.0, 2.0, 5.0, 20.0],
        [BoxTest::Fast, BoxTest::Robust]
    )]
    fn hit(
        px: f32,
        py: f32,
        pz: f32,
        dx: f32,
        dy: f32,
        dz: f32,
        origin_pos: f32,
        box_test: BoxTest,
    ) {
        if dx == 0.0 && dy == 0.0 && dz == 0.0 {
            return;
        }
        let parallel_on_face = [(px, dx), (py, dy), (pz, dz)]
            .iter()
            .any(|&(p, d)| d == 0.0 && (p == 5.0 || p == 10.0));
        if box_test == BoxTest::Fast && parallel_on_face {
            // Fast variant is allowed to cut the range short here
            return;
        }

        let b = test_box();

        let p = WorldPoint::new(px, py, pz);
        let d = WorldVector::new(dx, dy, dz);
        let origin = p - d * origin_pos;
        let r = PreparedRay::new(&Ray::unbounded(origin, d), box_test);

        let result = b.intersect(&r, FloatType::NEG_INFINITY, FloatType::INFINITY);

        // The ray passes through a point in/on the box, so it must hit
        let (t1, t2) = result.expect("the ray goes through a point of the box");
        assert!(t1 <= t2);
        assert!(t1 <= origin_pos + 1e-3);
        assert!(t2 >= origin_pos - 1e-3);
    }

    /// Just a manual example of ray grazing along an edge.
    #[test_case(BoxTest::Fast)]
    #[test_case(BoxTest::Robust)]
    fn hit_along_edge(box_test: BoxTest) {
        let r = PreparedRay::new(
            &Ray::unbounded(
                WorldPoint::new(5.0, 5.0, 0.0),
                WorldVector::new(0.0, 0.0, 1.0),
            ),
            box_test,
        );

        let (t1, t2) = test_box()
            .intersect(&r, 0.0, FloatType::INFINITY)
            .expect("grazing ray must hit");

        assert!((t1 - 5.0).abs() < 1e-5);
        assert!((t2 - 10.0).abs() < 1e-4);
    }

    /// Rays that lie parallel to one axis and start outside the corresponding slab
    /// must miss, even if they move toward the box on other axes or remain unchanged.
    #[test_case( 0.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "low_x_parallel_miss")]
    #[test_case(12.0,  7.0,  7.0,   0.0, 1.0, 0.0 ; "high_x_parallel_miss")]
    #[test_case( 7.0,  0.0,  7.0,   1.0, 0.0, 0.0 ; "low_y_parallel_miss")]
    #[test_case( 7.0, 12.0,  7.0,   1.0, 0.0, 0.0 ; "high_y_parallel_miss")]
    #[test_case( 7.0,  7.0,  0.0,   1.0, 0.0, 0.0 ; "low_z_parallel_miss")]
    #[test_case( 7.0,  7.0, 12.0,   1.0, 0.0, 0.0 ; "high_z_parallel_miss")]
    #[test_case( 0.0,  5.0,  7.0,   1.0, 0.0, 1.0 ; "corner_miss")]
    #[test_case( 0.0,  0.0,  0.0,  -1.0, 1.0, 1.0 ; "corner_miss2")]
    fn only_misses(px: f32, py: f32, pz: f32, dx: f32, dy: f32, dz: f32) {
        for box_test in [BoxTest::Fast, BoxTest::Robust] {
            let r = PreparedRay::new(
                &Ray::unbounded(WorldPoint::new(px, py, pz), WorldVector::new(dx, dy, dz)),
                box_test,
            );
            let result = test_box().intersect(&r, FloatType::NEG_INFINITY, FloatType::INFINITY);
            assert!(result == None, "{box_test:?}");
        }
    }

    #[test]
    fn interval_limits() {
        let r = PreparedRay::new(
            &Ray::unbounded(
                WorldPoint::new(7.0, 7.0, 0.0),
                WorldVector::new(0.0, 0.0, 1.0),
            ),
            BoxTest::Fast,
        );
        let b = test_box();
        // Box spans distances 5 to 10
        assert!(b.intersect(&r, 0.0, 4.0) == None);
        assert!(b.intersect(&r, 11.0, 20.0) == None);
        assert!(b.intersect(&r, 6.0, 8.0) == Some((6.0, 8.0)));
    }

    #[test_case(BoxTest::Fast)]
    #[test_case(BoxTest::Robust)]
    fn empty_box_never_hits(box_test: BoxTest) {
        for d in [
            WorldVector::new(1.0, 1.0, 1.0),
            WorldVector::new(-1.0, 0.0, 0.0),
            WorldVector::new(0.0, 0.0, -1.0),
        ] {
            let r = PreparedRay::new(&Ray::unbounded(WorldPoint::origin(), d), box_test);
            let result =
                WorldBox::empty().intersect(&r, FloatType::NEG_INFINITY, FloatType::INFINITY);
            assert!(result == None);
        }
    }

    /// Ray starting exactly on the box face and travelling inside the face plane.
    /// Only the robust variant is guaranteed to report this one.
    #[test]
    fn robust_on_slab_plane() {
        let r = PreparedRay::new(
            &Ray::unbounded(
                WorldPoint::new(5.0, 7.0, 0.0),
                WorldVector::new(0.0, 0.0, 1.0),
            ),
            BoxTest::Robust,
        );
        assert!(test_box().intersect(&r, 0.0, FloatType::INFINITY).is_some());
    }

    /// Axis parallel ray running inside the box just next to a face. The slab distance to
    /// that face must not cut the interval short.
    #[test_case(0.99999, BoxTest::Fast; "fast")]
    #[test_case(0.99999, BoxTest::Robust; "robust")]
    #[test_case(1e-5, BoxTest::Fast; "fast near min face")]
    fn parallel_near_face(x: f32, box_test: BoxTest) {
        let b = WorldBox::new([0.0, -1.0, 0.0].into(), [1.0, 1.0, 0.0].into());
        for dx in [0.0, -0.0] {
            let r = PreparedRay::new(
                &Ray::unbounded(
                    WorldPoint::new(x, 0.0, 100.0),
                    WorldVector::new(dx, 0.0, -1.0),
                ),
                box_test,
            );
            let (t1, t2) = b
                .intersect(&r, 0.0, 1000.0)
                .expect("the ray runs through the box");
            assert!(t1 == 100.0);
            assert!(t2 >= 100.0);
        }
    }

    /// Box entirely behind the origin, reached only through a negative t_min.
    /// Robust exit padding must widen the interval, not shrink it.
    #[test]
    fn robust_exit_behind_origin() {
        let r = PreparedRay::new(
            &Ray::unbounded(
                WorldPoint::new(7.0, 7.0, 20.0),
                WorldVector::new(0.0, 0.0, 1.0),
            ),
            BoxTest::Robust,
        );
        let (t1, t2) = test_box()
            .intersect(&r, -100.0, FloatType::INFINITY)
            .expect("box is on the ray line");
        assert!(t1 <= -15.0);
        assert!(t2 >= -10.0);
    }
}

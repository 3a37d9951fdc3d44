mod aabb;
mod precomputed_triangle;
mod ray_box_intersection;
mod triangle;

pub use aabb::AABB;
pub use precomputed_triangle::{PrecomputedTriangle, TriangleHit};
pub use ray_box_intersection::{BoxTest, PreparedRay, RayIntersectionExt};
pub use triangle::{BarycentricCoordinates, Triangle};

pub type FloatType = f32;
pub type WorldPoint = nalgebra::Point3<FloatType>;
pub type WorldVector = nalgebra::Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;

pub const EPSILON: FloatType = FloatType::EPSILON;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Direction of the ray, not necessarily normalized.
    /// Distances along the ray are measured in multiples of this vector.
    pub direction: WorldVector,

    pub t_min: FloatType,
    /// Current cutoff distance of the ray.
    /// Closest hit traversal shrinks this to the nearest hit found so far.
    pub t_max: FloatType,
}

impl Ray {
    pub fn new(
        origin: WorldPoint,
        direction: WorldVector,
        t_min: FloatType,
        t_max: FloatType,
    ) -> Ray {
        Ray {
            origin,
            direction,
            t_min,
            t_max,
        }
    }

    /// Ray covering every non-negative distance.
    pub fn unbounded(origin: WorldPoint, direction: WorldVector) -> Ray {
        Ray::new(origin, direction, 0.0, FloatType::INFINITY)
    }
}

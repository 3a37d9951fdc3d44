use super::{BarycentricCoordinates, EPSILON, FloatType, Ray, Triangle, WorldPoint, WorldVector};

/// Triangle stored in the form used by the ray intersection test.
/// Intersection is two sided.
#[derive(Clone, Debug, PartialEq)]
pub struct PrecomputedTriangle {
    p0: WorldPoint,
    /// p0 - p1
    e1: WorldVector,
    /// p2 - p0
    e2: WorldVector,
    /// e1 x e2, not normalized
    n: WorldVector,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriangleHit {
    /// Distance along the ray
    pub t: FloatType,
    /// u weights the second vertex, v weights the third vertex
    pub uv: BarycentricCoordinates<FloatType>,
}

impl From<&Triangle<WorldPoint>> for PrecomputedTriangle {
    fn from(triangle: &Triangle<WorldPoint>) -> Self {
        let e1 = triangle[0] - triangle[1];
        let e2 = triangle[2] - triangle[0];
        PrecomputedTriangle {
            p0: triangle[0],
            e1,
            e2,
            n: e1.cross(&e2),
        }
    }
}

impl PrecomputedTriangle {
    pub fn new(triangle: &Triangle<WorldPoint>) -> PrecomputedTriangle {
        triangle.into()
    }

    /// Intersects the ray with the triangle, accepting distances in [ray.t_min, ray.t_max).
    /// Degenerate triangles never report a hit.
    pub fn intersect(&self, ray: &Ray) -> Option<TriangleHit> {
        let det = self.n.dot(&ray.direction);
        if det == 0.0 {
            // Parallel to the triangle plane (or the triangle has no area)
            return None;
        }
        let inv_det = 1.0 / det;

        let c = self.p0 - ray.origin;
        let r = ray.direction.cross(&c);
        let u = r.dot(&self.e2) * inv_det;
        let v = r.dot(&self.e1) * inv_det;
        let w = 1.0 - u - v;

        // Edges shared by two triangles must not leak rays between them
        const TOLERANCE: FloatType = -EPSILON;
        if !(u >= TOLERANCE && v >= TOLERANCE && w >= TOLERANCE) {
            return None;
        }

        let t = self.n.dot(&c) * inv_det;
        if t >= ray.t_min && t < ray.t_max {
            Some(TriangleHit {
                t,
                uv: BarycentricCoordinates { u, v },
            })
        } else {
            None
        }
    }
}

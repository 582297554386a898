use crate::{Point, Vector};
use serde::{Deserialize, Serialize};

/// Type for holding vertex indices for a triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 3]", into = "[usize; 3]")]
pub struct TriangleIndex(pub usize, pub usize, pub usize);

impl TriangleIndex {
    /// The three undirected edges, each stored with the smaller index first.
    pub fn edges(&self) -> [(usize, usize); 3] {
        let e = |a: usize, b: usize| if a < b { (a, b) } else { (b, a) };
        [e(self.0, self.1), e(self.1, self.2), e(self.2, self.0)]
    }
}

impl From<[usize; 3]> for TriangleIndex {
    fn from(v: [usize; 3]) -> Self {
        Self(v[0], v[1], v[2])
    }
}

impl From<TriangleIndex> for [usize; 3] {
    fn from(t: TriangleIndex) -> Self {
        [t.0, t.1, t.2]
    }
}

pub fn triangle_area(a: Point, b: Point, c: Point) -> f64 {
    let ab = b - a;
    let ac = c - a;
    0.5 * ab.cross(&ac).length()
}

/// Closest point on triangle (`v0`, `v1`, `v2`) to `point`.
///
/// Voronoi-region walk from "Real-Time Collision Detection" (Ericson).
pub fn closest_point_on_triangle(point: Point, v0: Point, v1: Point, v2: Point) -> Point {
    let ab = v1 - v0;
    let ac = v2 - v0;
    let ap = point - v0;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return v0;
    }

    let bp = point - v1;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return v1;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return v0 + ab * v;
    }

    let cp = point - v2;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return v2;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return v0 + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return v1 + (v2 - v1) * w;
    }

    // Inside the face region
    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    v0 + ab * v + ac * w
}

/// Squared distance from `point` to the triangle.
pub fn point_triangle_distance_squared(point: Point, v0: Point, v1: Point, v2: Point) -> f64 {
    (closest_point_on_triangle(point, v0, v1, v2) - point).length_squared()
}

/// Intersects the line through `origin` parallel to the x axis with a triangle.
///
/// Returns the x coordinate of the hit (which may lie on either side of
/// `origin`). Hits exactly on a triangle edge are reported, so callers must
/// keep the line away from shared edges.
pub fn line_x_triangle_intersect(origin: Point, v0: Point, v1: Point, v2: Point) -> Option<f64> {
    // Barycentric test in the yz-plane, then solve for x on the plane.
    let (y, z) = (origin.y, origin.z);
    let d = (v1.y - v0.y) * (v2.z - v0.z) - (v2.y - v0.y) * (v1.z - v0.z);
    if d.abs() < 1e-300 {
        return None; // triangle is parallel to the ray
    }
    let u = ((y - v0.y) * (v2.z - v0.z) - (v2.y - v0.y) * (z - v0.z)) / d;
    let v = ((v1.y - v0.y) * (z - v0.z) - (y - v0.y) * (v1.z - v0.z)) / d;
    if u < 0.0 || v < 0.0 || u + v > 1.0 {
        return None;
    }
    Some(v0.x + u * (v1.x - v0.x) + v * (v2.x - v0.x))
}

/// Outward unit normal of a counter-clockwise triangle.
pub fn triangle_normal(a: Point, b: Point, c: Point) -> Option<Vector> {
    Vector::normal(a, b, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> (Point, Point, Point) {
        (
            Point::new(0.0, 0.0, 0.0),
            Point::new(10.0, 0.0, 0.0),
            Point::new(0.0, 10.0, 0.0),
        )
    }

    #[test]
    fn test_area() {
        let (a, b, c) = tri();
        assert!((triangle_area(a, b, c) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_closest_point_regions() {
        let (a, b, c) = tri();
        // Face region
        let p = closest_point_on_triangle(Point::new(2.0, 3.0, 5.0), a, b, c);
        assert!(p.is_close(&Point::new(2.0, 3.0, 0.0)));
        // Vertex region
        let p = closest_point_on_triangle(Point::new(-1.0, -1.0, 0.0), a, b, c);
        assert!(p.is_close(&a));
        // Edge region (hypotenuse)
        let p = closest_point_on_triangle(Point::new(10.0, 10.0, 0.0), a, b, c);
        assert!(p.is_close(&Point::new(5.0, 5.0, 0.0)));
        let d2 = point_triangle_distance_squared(Point::new(5.0, -2.0, 0.0), a, b, c);
        assert!((d2 - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_line_x_intersection() {
        // Triangle in the plane x = 3
        let a = Point::new(3.0, 0.0, 0.0);
        let b = Point::new(3.0, 4.0, 0.0);
        let c = Point::new(3.0, 0.0, 4.0);
        let hit = line_x_triangle_intersect(Point::new(-5.0, 1.0, 1.0), a, b, c);
        assert!((hit.unwrap() - 3.0).abs() < 1e-12);
        assert!(line_x_triangle_intersect(Point::new(-5.0, 3.0, 3.0), a, b, c).is_none());
        // Parallel triangle
        let (p, q, r) = tri();
        assert!(line_x_triangle_intersect(Point::new(-1.0, 1.0, 0.0), p, q, r).is_none());
    }

    #[test]
    fn test_edges_are_sorted() {
        let t = TriangleIndex(4, 1, 7);
        assert_eq!(t.edges(), [(1, 4), (1, 7), (4, 7)]);
    }
}

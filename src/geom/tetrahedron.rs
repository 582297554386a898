use crate::{Point, Vector};

/// Signed volume: positive when `pt3` lies on the side of triangle
/// (`pt0`, `pt1`, `pt2`) that its counter-clockwise normal points to.
pub fn tetrahedron_signed_volume(pt0: Point, pt1: Point, pt2: Point, pt3: Point) -> f64 {
    let a = pt1 - pt0;
    let b = pt2 - pt0;
    let c = pt3 - pt0;
    a.dot(&b.cross(&c)) / 6.
}

/// Calculates the (unsigned) tetrahedron volume.
pub fn tetrahedron_volume(pt0: Point, pt1: Point, pt2: Point, pt3: Point) -> f64 {
    tetrahedron_signed_volume(pt0, pt1, pt2, pt3).abs()
}

/// Returns tetrahedron centroid (i.e. average of each vertices)
pub fn tetrahedron_centroid(pt0: Point, pt1: Point, pt2: Point, pt3: Point) -> Point {
    let x = (pt0.x + pt1.x + pt2.x + pt3.x) / 4.;
    let y = (pt0.y + pt1.y + pt2.y + pt3.y) / 4.;
    let z = (pt0.z + pt1.z + pt2.z + pt3.z) / 4.;
    Point::new(x, y, z)
}

/// Gradients of the four linear (P1) shape functions of a tetrahedron.
///
/// Returns `None` for degenerate elements. The gradients are constant over
/// the element and sum to zero.
pub fn shape_gradients(pts: [Point; 4]) -> Option<[Vector; 4]> {
    let e1 = pts[1] - pts[0];
    let e2 = pts[2] - pts[0];
    let e3 = pts[3] - pts[0];
    let det = e1.dot(&e2.cross(&e3)); // 6 * signed volume
    if det.abs() < 1e-300 {
        return None;
    }
    let g1 = e2.cross(&e3) / det;
    let g2 = e3.cross(&e1) / det;
    let g3 = e1.cross(&e2) / det;
    let g0 = -(g1 + g2 + g3);
    Some([g0, g1, g2, g3])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tet() -> [Point; 4] {
        [
            Point::new(0., 0., 0.),
            Point::new(1., 0., 0.),
            Point::new(0., 1., 0.),
            Point::new(0., 0., 1.),
        ]
    }

    #[test]
    fn test_volume_and_orientation() {
        let [a, b, c, d] = unit_tet();
        assert!((tetrahedron_signed_volume(a, b, c, d) - 1.0 / 6.0).abs() < 1e-15);
        assert!((tetrahedron_signed_volume(a, c, b, d) + 1.0 / 6.0).abs() < 1e-15);
        assert!((tetrahedron_volume(a, c, b, d) - 1.0 / 6.0).abs() < 1e-15);
    }

    #[test]
    fn test_centroid() {
        let [a, b, c, d] = unit_tet();
        assert!(tetrahedron_centroid(a, b, c, d).is_close(&Point::new(0.25, 0.25, 0.25)));
    }

    #[test]
    fn test_shape_gradients_reproduce_linear_field() {
        // T(x, y, z) = 3x - 2y + 5z + 1 must be represented exactly.
        let pts = [
            Point::new(0.2, 0.1, 0.0),
            Point::new(1.3, 0.0, 0.2),
            Point::new(0.1, 0.9, 0.1),
            Point::new(0.3, 0.2, 1.4),
        ];
        let grads = shape_gradients(pts).unwrap();
        let field = |p: Point| 3.0 * p.x - 2.0 * p.y + 5.0 * p.z + 1.0;
        let mut g = Vector::default();
        for i in 0..4 {
            g += grads[i] * field(pts[i]);
        }
        assert!((g - Vector::new(3.0, -2.0, 5.0)).length() < 1e-12, "g={g}");

        let sum = grads[0] + grads[1] + grads[2] + grads[3];
        assert!(sum.length() < 1e-12);
    }

    #[test]
    fn test_degenerate_has_no_gradients() {
        let flat = [
            Point::new(0., 0., 0.),
            Point::new(1., 0., 0.),
            Point::new(0., 1., 0.),
            Point::new(1., 1., 0.),
        ];
        assert!(shape_gradients(flat).is_none());
    }
}

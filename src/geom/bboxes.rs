use crate::geom::point::Point;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Edge lengths along x, y and z.
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z,
        ]
    }

    pub fn diagonal(&self) -> f64 {
        self.min.distance(&self.max)
    }

    pub fn volume(&self) -> f64 {
        let [ex, ey, ez] = self.extent();
        ex * ey * ez
    }
}

/// Returns the bounding box of `pts`, or `None` for an empty slice.
pub fn bounding_box(pts: &[Point]) -> Option<BoundingBox> {
    let first = *pts.first()?;
    let (mut min, mut max) = (first, first);
    for p in &pts[1..] {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }
    Some(BoundingBox { min, max })
}

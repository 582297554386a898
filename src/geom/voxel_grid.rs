use std::collections::HashMap;

use crate::Point;
use crate::geom::bboxes::bounding_box;
use crate::geom::mesh::SurfaceMesh;
use crate::geom::triangles::point_triangle_distance_squared;

type Key = (i32, i32, i32);

/// Uniform bucket grid of surface triangles for nearest-surface queries.
///
/// Every triangle is registered in each bucket its bounding box overlaps.
pub struct VoxelGrid {
    grid: HashMap<Key, Vec<usize>>,
    step: f64,
    key_min: Key,
    key_max: Key,
}

impl VoxelGrid {
    pub fn new(mesh: &SurfaceMesh, step: f64) -> Self {
        let mut grid: HashMap<Key, Vec<usize>> = HashMap::new();
        let mut key_min = (i32::MAX, i32::MAX, i32::MAX);
        let mut key_max = (i32::MIN, i32::MIN, i32::MIN);

        for (idx, tri) in mesh.triangles.iter().enumerate() {
            let (a, b, c) = mesh.triangle_points(tri);
            let Some(bbox) = bounding_box(&[a, b, c]) else {
                continue;
            };
            let lo = key_of(bbox.min, step);
            let hi = key_of(bbox.max, step);
            for i in lo.0..=hi.0 {
                for j in lo.1..=hi.1 {
                    for k in lo.2..=hi.2 {
                        grid.entry((i, j, k)).or_default().push(idx);
                    }
                }
            }
            key_min = (key_min.0.min(lo.0), key_min.1.min(lo.1), key_min.2.min(lo.2));
            key_max = (key_max.0.max(hi.0), key_max.1.max(hi.1), key_max.2.max(hi.2));
        }

        Self {
            grid,
            step,
            key_min,
            key_max,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Triangle indices registered in the buckets at Chebyshev distance
    /// exactly `r` from `center`.
    fn shell(&self, center: Key, r: i32) -> impl Iterator<Item = usize> + '_ {
        let (ci, cj, ck) = center;
        (-r..=r)
            .flat_map(move |dk| (-r..=r).map(move |dj| (dj, dk)))
            .flat_map(move |(dj, dk)| {
                let on_face = dj.abs() == r || dk.abs() == r;
                let dis: Vec<i32> = if on_face {
                    (-r..=r).collect()
                } else if r == 0 {
                    vec![0]
                } else {
                    vec![-r, r]
                };
                dis.into_iter().map(move |di| (ci + di, cj + dj, ck + dk))
            })
            .filter_map(|key| self.grid.get(&key))
            .flatten()
            .copied()
    }

    /// Largest shell radius around `center` that still reaches a bucket.
    fn max_radius(&self, center: Key) -> i32 {
        let span = |c: i32, lo: i32, hi: i32| (c - lo).abs().max((hi - c).abs());
        span(center.0, self.key_min.0, self.key_max.0)
            .max(span(center.1, self.key_min.1, self.key_max.1))
            .max(span(center.2, self.key_min.2, self.key_max.2))
    }

    /// Unsigned distance from `pos` to the closest triangle of `mesh`.
    ///
    /// Buckets are searched in expanding shells. Triangles outside shell `r`
    /// are at least `r * step` away, which bounds the search.
    /// Returns `f64::INFINITY` when the grid is empty.
    pub fn nearest_distance(&self, mesh: &SurfaceMesh, pos: Point) -> f64 {
        if self.is_empty() {
            return f64::INFINITY;
        }
        let center = key_of(pos, self.step);
        let r_max = self.max_radius(center);
        let mut best_sq = f64::INFINITY;

        for r in 0..=r_max {
            for idx in self.shell(center, r) {
                let (a, b, c) = mesh.triangle_points(&mesh.triangles[idx]);
                best_sq = best_sq.min(point_triangle_distance_squared(pos, a, b, c));
            }
            let bound = r as f64 * self.step;
            if best_sq.is_finite() && best_sq <= bound * bound {
                break;
            }
        }
        best_sq.sqrt()
    }
}

fn key_of(p: Point, step: f64) -> Key {
    (
        (p.x / step).floor() as i32,
        (p.y / step).floor() as i32,
        (p.z / step).floor() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};

    fn brute_force(mesh: &SurfaceMesh, p: Point) -> f64 {
        mesh.triangles
            .iter()
            .map(|t| {
                let (a, b, c) = mesh.triangle_points(t);
                point_triangle_distance_squared(p, a, b, c)
            })
            .fold(f64::INFINITY, f64::min)
            .sqrt()
    }

    #[test]
    fn test_matches_brute_force() {
        let mesh = BoxTessellator
            .tessellate(&BoxSolid::from_dims(10.0, 6.0, 4.0))
            .unwrap();
        let grid = VoxelGrid::new(&mesh, 1.5);
        let queries = [
            Point::new(5.0, 3.0, 2.0),
            Point::new(-3.0, 1.0, 1.0),
            Point::new(12.0, 9.0, -4.0),
            Point::new(0.1, 0.2, 0.3),
            Point::new(40.0, 40.0, 40.0),
        ];
        for p in queries {
            let d = grid.nearest_distance(&mesh, p);
            assert!((d - brute_force(&mesh, p)).abs() < 1e-12, "at {p}");
        }
    }

    #[test]
    fn test_shell_radius_zero_is_own_bucket() {
        let mesh = BoxTessellator
            .tessellate(&BoxSolid::from_dims(1.0, 1.0, 1.0))
            .unwrap();
        let grid = VoxelGrid::new(&mesh, 0.25);
        let own: Vec<usize> = grid.shell((0, 0, 0), 0).collect();
        assert!(!own.is_empty());
        // Nothing registered far away
        assert_eq!(grid.shell((100, 100, 100), 0).count(), 0);
    }

    #[test]
    fn test_empty_grid() {
        let grid = VoxelGrid::new(&SurfaceMesh::default(), 1.0);
        assert!(grid.is_empty());
        let d = grid.nearest_distance(&SurfaceMesh::default(), Point::new(0.0, 0.0, 0.0));
        assert!(d.is_infinite());
    }
}

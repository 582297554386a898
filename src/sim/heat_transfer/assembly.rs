use crate::error::{Result, SimError};
use crate::geom::mesh::tetrahedralize::TetrahedralMesh;
use crate::geom::tetrahedron::{shape_gradients, tetrahedron_volume};
use rayon::prelude::*;

use super::sparse::CsrMatrix;

/// Assembled linear-element operators over the tetrahedral mesh, in SI units.
#[derive(Debug, Clone)]
pub struct ThermalSystem {
    /// Conductivity matrix `K` in W/K.
    pub stiffness: CsrMatrix,
    /// Lumped nodal volume in m^3 (a quarter of each adjacent tet).
    pub lumped_volume: Vec<f64>,
    /// Exterior surface area carried by each node in m^2.
    pub boundary_area: Vec<f64>,
}

impl ThermalSystem {
    pub fn node_count(&self) -> usize {
        self.lumped_volume.len()
    }

    pub fn total_volume(&self) -> f64 {
        self.lumped_volume.iter().sum()
    }

    pub fn total_boundary_area(&self) -> f64 {
        self.boundary_area.iter().sum()
    }
}

struct ElementContribution {
    nodes: [usize; 4],
    conductivity: [[f64; 4]; 4],
    volume: f64,
}

/// Assembles the conductivity matrix, lumped volumes and boundary areas.
///
/// Mesh coordinates are multiplied by `length_scale` to obtain metres.
/// Element matrices are computed in parallel and summed in element order.
pub fn assemble_system(
    mesh: &TetrahedralMesh,
    conductivity: f64,
    length_scale: f64,
) -> Result<ThermalSystem> {
    let n = mesh.node_count();

    let elements: Vec<ElementContribution> = mesh
        .tetrahedra
        .par_iter()
        .enumerate()
        .map(|(e, tet)| {
            let pts = mesh.points(tet).map(|p| p.scale(length_scale));
            let grads = shape_gradients(pts).ok_or_else(|| {
                SimError::Geometry(format!("tetrahedron {e} is degenerate"))
            })?;
            let volume = tetrahedron_volume(pts[0], pts[1], pts[2], pts[3]);
            let mut local = [[0.0; 4]; 4];
            for a in 0..4 {
                for b in 0..4 {
                    local[a][b] = conductivity * volume * grads[a].dot(&grads[b]);
                }
            }
            Ok(ElementContribution {
                nodes: tet.nodes(),
                conductivity: local,
                volume,
            })
        })
        .collect::<Result<_>>()?;

    let mut pattern = mesh.node_neighbours();
    for (i, row) in pattern.iter_mut().enumerate() {
        let pos = row.partition_point(|c| *c < i);
        row.insert(pos, i);
    }
    let mut stiffness = CsrMatrix::from_pattern(&pattern);
    let mut lumped_volume = vec![0.0; n];

    for el in &elements {
        for a in 0..4 {
            lumped_volume[el.nodes[a]] += el.volume / 4.0;
            for b in 0..4 {
                stiffness.add(el.nodes[a], el.nodes[b], el.conductivity[a][b]);
            }
        }
    }

    let mut boundary_area = vec![0.0; n];
    let area_scale = length_scale * length_scale;
    for face in mesh.boundary_faces() {
        let share = face.area * area_scale / 3.0;
        for node in face.nodes {
            boundary_area[node] += share;
        }
    }

    Ok(ThermalSystem {
        stiffness,
        lumped_volume,
        boundary_area,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use crate::geom::mesh::tetrahedralize::{TetrahedronIndex, tetrahedralize_voxels};
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
    use crate::geom::mesh::voxel::build_voxel_mesh;
    use crate::geom::sdf::voxelize;
    use approx::assert_relative_eq;

    fn cube_mesh() -> TetrahedralMesh {
        let surface = BoxTessellator
            .tessellate(&BoxSolid::from_dims(10.0, 10.0, 10.0))
            .unwrap();
        let voxels = build_voxel_mesh(&voxelize(&surface, 2.0).unwrap(), 8).unwrap();
        tetrahedralize_voxels(&voxels)
    }

    #[test]
    fn test_single_tet_matrix() {
        let mesh = TetrahedralMesh::new(
            vec![
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
                Point::new(0.0, 0.0, 1.0),
            ],
            vec![TetrahedronIndex(0, 1, 2, 3)],
        );
        let sys = assemble_system(&mesh, 6.0, 1.0).unwrap();
        // k * V * grad(N_a).grad(N_b) with V = 1/6
        assert_relative_eq!(sys.stiffness.get(1, 1), 1.0, epsilon = 1e-12);
        assert_relative_eq!(sys.stiffness.get(0, 0), 3.0, epsilon = 1e-12);
        assert_relative_eq!(sys.stiffness.get(0, 1), -1.0, epsilon = 1e-12);
        assert_relative_eq!(sys.stiffness.get(1, 2), 0.0, epsilon = 1e-12);
        assert_relative_eq!(sys.total_volume(), 1.0 / 6.0, epsilon = 1e-15);
        // All four faces are exterior
        assert_relative_eq!(
            sys.total_boundary_area(),
            1.5 + 3f64.sqrt() / 2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_cube_system_is_consistent() {
        let mesh = cube_mesh();
        let sys = assemble_system(&mesh, 150.0, 1e-3).unwrap();
        assert_eq!(sys.node_count(), 125);
        // 8 mm cube of hexes, in m^3 and m^2
        assert_relative_eq!(sys.total_volume(), 512e-9, max_relative = 1e-12);
        assert_relative_eq!(sys.total_boundary_area(), 6.0 * 64e-6, max_relative = 1e-12);

        // Rows of K sum to zero: constants are in the null space.
        let ones = vec![1.0; 125];
        let mut y = vec![0.0; 125];
        sys.stiffness.apply(&ones, &mut y);
        assert!(y.iter().all(|v| v.abs() < 1e-9));

        // Symmetric with positive diagonal and non-positive couplings
        for i in 0..125 {
            assert!(sys.stiffness.get(i, i) > 0.0);
            for j in 0..125 {
                let (a, b) = (sys.stiffness.get(i, j), sys.stiffness.get(j, i));
                assert_relative_eq!(a, b, epsilon = 1e-12);
                if i != j {
                    assert!(a <= 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_assembly_is_reproducible() {
        let mesh = cube_mesh();
        let a = assemble_system(&mesh, 150.0, 1e-3).unwrap();
        let b = assemble_system(&mesh, 150.0, 1e-3).unwrap();
        assert_eq!(a.stiffness, b.stiffness);
        assert_eq!(a.lumped_volume, b.lumped_volume);
        assert_eq!(a.boundary_area, b.boundary_area);
    }
}

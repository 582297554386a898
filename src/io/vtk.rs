//! Legacy VTK export of the voxel mesh with nodal fields.
//!
//! Writes an ASCII `UNSTRUCTURED_GRID` of hexahedra that ParaView and VisIt
//! open directly.

use crate::geom::mesh::voxel::VoxelMesh;
use crate::sim::result::SimulationResult;
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const VTK_HEXAHEDRON: u8 = 12;

/// Value written for nodes that never solidified.
pub const NO_VALUE: f64 = -1.0;

/// Writes `mesh` with one scalar point-data array per entry of `fields`.
///
/// Every field must have one value per mesh node.
pub fn write_vtk(path: &Path, mesh: &VoxelMesh, fields: &[(&str, &[f64])]) -> Result<()> {
    for (name, values) in fields {
        if values.len() != mesh.nodes.len() {
            bail!(
                "Field '{}' has {} values, mesh has {} nodes",
                name,
                values.len(),
                mesh.nodes.len()
            );
        }
        if name.is_empty() || name.contains(char::is_whitespace) {
            bail!("Invalid VTK field name: '{}'", name);
        }
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_vtk_to(&mut w, mesh, fields)
        .with_context(|| format!("Failed to write VTK: {}", path.display()))?;
    w.flush()?;
    Ok(())
}

fn write_vtk_to<W: Write>(w: &mut W, mesh: &VoxelMesh, fields: &[(&str, &[f64])]) -> Result<()> {
    writeln!(w, "# vtk DataFile Version 3.0")?;
    writeln!(w, "castsim voxel mesh")?;
    writeln!(w, "ASCII")?;
    writeln!(w, "DATASET UNSTRUCTURED_GRID")?;

    writeln!(w, "POINTS {} double", mesh.nodes.len())?;
    for p in &mesh.nodes {
        writeln!(w, "{} {} {}", p.x, p.y, p.z)?;
    }

    let n_cells = mesh.hexes.len();
    writeln!(w, "CELLS {} {}", n_cells, n_cells * 9)?;
    for hex in &mesh.hexes {
        let ids: Vec<String> = hex.0.iter().map(|i| i.to_string()).collect();
        writeln!(w, "8 {}", ids.join(" "))?;
    }
    writeln!(w, "CELL_TYPES {}", n_cells)?;
    for _ in 0..n_cells {
        writeln!(w, "{}", VTK_HEXAHEDRON)?;
    }

    if !fields.is_empty() {
        writeln!(w, "POINT_DATA {}", mesh.nodes.len())?;
        for (name, values) in fields {
            writeln!(w, "SCALARS {} double 1", name)?;
            writeln!(w, "LOOKUP_TABLE default")?;
            for v in values.iter() {
                writeln!(w, "{}", v)?;
            }
        }
    }
    Ok(())
}

/// Writes the final temperature, solidification time and Niyama fields of
/// a completed run.
pub fn write_result_vtk(path: &Path, result: &SimulationResult) -> Result<()> {
    let mesh = &result.mesh.voxel_mesh;
    let Some(last) = result.timesteps.last() else {
        bail!("Run {} has no frames to export", result.run_id);
    };
    let defects = &result.defect_analysis;
    let niyama: Vec<f64> = defects
        .niyama
        .iter()
        .map(|n| n.unwrap_or(NO_VALUE))
        .collect();
    write_vtk(
        path,
        mesh,
        &[
            ("temperature", last.temperature.as_slice()),
            ("solidification_time", defects.solidification_time.as_slice()),
            ("niyama", niyama.as_slice()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
    use crate::geom::mesh::voxel::build_voxel_mesh;
    use crate::geom::sdf::voxelize;
    use tempfile::tempdir;

    fn cube_voxels() -> VoxelMesh {
        let surface = BoxTessellator
            .tessellate(&BoxSolid::from_dims(6.0, 6.0, 6.0))
            .unwrap();
        build_voxel_mesh(&voxelize(&surface, 2.0).unwrap(), 8).unwrap()
    }

    #[test]
    fn test_write_vtk() -> Result<()> {
        let mesh = cube_voxels();
        assert_eq!(mesh.nodes.len(), 27);
        let temps: Vec<f64> = (0..27).map(|i| 600.0 + i as f64).collect();

        let dir = tempdir()?;
        let path = dir.path().join("fields.vtk");
        write_vtk(&path, &mesh, &[("temperature", temps.as_slice())])?;

        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# vtk DataFile Version 3.0");
        assert!(lines.contains(&"POINTS 27 double"));
        assert!(lines.contains(&"CELLS 8 72"));
        assert!(lines.contains(&"CELL_TYPES 8"));
        assert!(lines.contains(&"POINT_DATA 27"));
        assert!(lines.contains(&"SCALARS temperature double 1"));
        assert_eq!(*lines.last().unwrap(), "626");
        Ok(())
    }

    #[test]
    fn test_rejects_mismatched_field() {
        let mesh = cube_voxels();
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.vtk");
        assert!(write_vtk(&path, &mesh, &[("temperature", &[1.0, 2.0][..])]).is_err());
        assert!(write_vtk(&path, &mesh, &[("two words", &[0.0; 27][..])]).is_err());
        assert!(!path.exists());
    }
}

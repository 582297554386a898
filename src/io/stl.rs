//! STL file format I/O.
//!
//! STL stores an unindexed list of triangles with facet normals. Shared
//! corners are merged on import so that the surface's edge topology can be
//! checked before voxelization.

use crate::geom::mesh::SurfaceMesh;
use crate::{Point, TriangleIndex, Vector};
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// STL file format variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StlFormat {
    /// ASCII text format (human-readable, larger file size)
    Ascii,
    /// Binary format (compact, faster to read/write)
    Binary,
}

/// Writes a surface mesh to an STL file.
///
/// # Example
/// ```no_run
/// use castsim::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
/// use castsim::io::stl::{write_stl, StlFormat};
/// use std::path::Path;
///
/// let mesh = BoxTessellator.tessellate(&BoxSolid::from_dims(10.0, 10.0, 10.0)).unwrap();
/// write_stl(Path::new("cube.stl"), &mesh, "cube", StlFormat::Binary).unwrap();
/// ```
pub fn write_stl(path: &Path, mesh: &SurfaceMesh, name: &str, format: StlFormat) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    match format {
        StlFormat::Ascii => write_stl_ascii(&mut writer, mesh, name)?,
        StlFormat::Binary => write_stl_binary(&mut writer, mesh, name)?,
    }
    writer.flush()?;
    Ok(())
}

fn facet_normal(mesh: &SurfaceMesh, tri: &TriangleIndex) -> Vector {
    let (p0, p1, p2) = mesh.triangle_points(tri);
    Vector::normal(p0, p1, p2).unwrap_or(Vector::new(0.0, 0.0, 1.0))
}

fn write_stl_ascii<W: Write>(writer: &mut W, mesh: &SurfaceMesh, name: &str) -> Result<()> {
    writeln!(writer, "solid {}", name)?;
    for tri in &mesh.triangles {
        let n = facet_normal(mesh, tri);
        writeln!(writer, "  facet normal {} {} {}", n.dx, n.dy, n.dz)?;
        writeln!(writer, "    outer loop")?;
        let (p0, p1, p2) = mesh.triangle_points(tri);
        for p in [p0, p1, p2] {
            writeln!(writer, "      vertex {} {} {}", p.x, p.y, p.z)?;
        }
        writeln!(writer, "    endloop")?;
        writeln!(writer, "  endfacet")?;
    }
    writeln!(writer, "endsolid {}", name)?;
    Ok(())
}

fn write_stl_binary<W: Write>(writer: &mut W, mesh: &SurfaceMesh, name: &str) -> Result<()> {
    // 80-byte header
    let mut header = [0u8; 80];
    let header_str = format!("binary STL - {}", name);
    let bytes = header_str.as_bytes();
    let len = bytes.len().min(80);
    header[..len].copy_from_slice(&bytes[..len]);
    writer.write_all(&header)?;

    writer.write_all(&(mesh.triangles.len() as u32).to_le_bytes())?;

    for tri in &mesh.triangles {
        let n = facet_normal(mesh, tri);
        let (p0, p1, p2) = mesh.triangle_points(tri);
        let values = [
            n.dx, n.dy, n.dz, p0.x, p0.y, p0.z, p1.x, p1.y, p1.z, p2.x, p2.y, p2.z,
        ];
        for v in values {
            writer.write_all(&(v as f32).to_le_bytes())?;
        }
        // Attribute byte count (unused)
        writer.write_all(&0u16.to_le_bytes())?;
    }
    Ok(())
}

/// Reads an STL file (ASCII or binary) into a surface mesh with shared
/// corners merged.
pub fn read_stl(path: &Path) -> Result<SurfaceMesh> {
    let mut bytes = Vec::new();
    File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    // Binary files may also start with "solid" in their header, so the size
    // formula decides first.
    let soup = if is_binary_stl(&bytes) {
        read_stl_binary(&bytes)
    } else {
        read_stl_ascii(&bytes[..])
    }
    .with_context(|| format!("Failed to parse STL: {}", path.display()))?;

    Ok(soup.deduplicate_nodes())
}

/// Binary STL: 80 header + 4 bytes count + 50 bytes per triangle.
fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    bytes.len() == 84 + count * 50
}

fn read_stl_ascii<R: BufRead>(reader: R) -> Result<SurfaceMesh> {
    let mut nodes: Vec<Point> = Vec::new();
    let mut triangles: Vec<TriangleIndex> = Vec::new();
    let mut current: Vec<Point> = Vec::with_capacity(3);

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("vertex") {
            let coords: Vec<f64> = rest
                .split_whitespace()
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Invalid vertex on line {}", lineno + 1))?;
            if coords.len() != 3 {
                bail!("Vertex on line {} has {} coordinates", lineno + 1, coords.len());
            }
            current.push(Point::new(coords[0], coords[1], coords[2]));
        } else if trimmed.starts_with("endloop") {
            if current.len() != 3 {
                bail!("Facet ending on line {} has {} vertices", lineno + 1, current.len());
            }
            let base = nodes.len();
            nodes.append(&mut current);
            triangles.push(TriangleIndex(base, base + 1, base + 2));
        }
    }

    if triangles.is_empty() {
        bail!("No facets found");
    }
    Ok(SurfaceMesh::new(nodes, triangles))
}

fn read_stl_binary(bytes: &[u8]) -> Result<SurfaceMesh> {
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    let mut nodes: Vec<Point> = Vec::with_capacity(count * 3);
    let mut triangles: Vec<TriangleIndex> = Vec::with_capacity(count);

    let f = |off: usize| {
        f32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]) as f64
    };

    for t in 0..count {
        // Skip the 12-byte normal; corners follow.
        let rec = 84 + t * 50 + 12;
        let base = nodes.len();
        for v in 0..3 {
            let off = rec + v * 12;
            nodes.push(Point::new(f(off), f(off + 4), f(off + 8)));
        }
        triangles.push(TriangleIndex(base, base + 1, base + 2));
    }

    Ok(SurfaceMesh::new(nodes, triangles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::mesh::tessellate::{BoxSolid, BoxTessellator, Tessellator};
    use tempfile::tempdir;

    fn create_test_mesh() -> SurfaceMesh {
        // Simple tetrahedron
        let nodes = vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.5, 1.0, 0.0),
            Point::new(0.5, 0.5, 1.0),
        ];
        let triangles = vec![
            TriangleIndex(0, 2, 1),
            TriangleIndex(0, 1, 3),
            TriangleIndex(1, 2, 3),
            TriangleIndex(2, 0, 3),
        ];
        SurfaceMesh::new(nodes, triangles)
    }

    #[test]
    fn test_write_stl_ascii() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.stl");

        write_stl(&path, &create_test_mesh(), "test", StlFormat::Ascii)?;

        let content = std::fs::read_to_string(&path)?;
        assert!(content.contains("solid test"));
        assert!(content.contains("facet normal"));
        assert!(content.contains("endsolid test"));
        Ok(())
    }

    #[test]
    fn test_write_stl_binary_size() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.stl");

        write_stl(&path, &create_test_mesh(), "test", StlFormat::Binary)?;

        // 80 header + 4 count + 4 triangles * 50 bytes
        assert_eq!(std::fs::metadata(&path)?.len(), 80 + 4 + 4 * 50);
        Ok(())
    }

    #[test]
    fn test_roundtrip_both_formats() -> Result<()> {
        let dir = tempdir()?;
        let original = create_test_mesh();
        for (fmt, file) in [(StlFormat::Ascii, "a.stl"), (StlFormat::Binary, "b.stl")] {
            let path = dir.path().join(file);
            write_stl(&path, &original, "tet", fmt)?;
            let loaded = read_stl(&path)?;
            assert_eq!(loaded.triangle_count(), 4);
            // Corners are merged back
            assert_eq!(loaded.node_count(), 4);
            loaded.validate_watertight()?;
        }
        Ok(())
    }

    #[test]
    fn test_binary_header_starting_with_solid() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("box.stl");
        let mesh = BoxTessellator
            .tessellate(&BoxSolid::from_dims(2.0, 3.0, 4.0))
            .map_err(anyhow::Error::from)?;
        // Header reads "binary STL - solid"; name chosen to confuse sniffing.
        write_stl(&path, &mesh, "solid", StlFormat::Binary)?;
        let mut bytes = std::fs::read(&path)?;
        bytes[..5].copy_from_slice(b"solid");
        std::fs::write(&path, &bytes)?;

        let loaded = read_stl(&path)?;
        assert_eq!(loaded.triangle_count(), 12);
        assert!((loaded.signed_volume() - 24.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_malformed_ascii() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bad.stl");
        std::fs::write(
            &path,
            "solid bad\n facet normal 0 0 1\n outer loop\n vertex 0 0\n endloop\nendsolid\n",
        )?;
        assert!(read_stl(&path).is_err());
        Ok(())
    }
}

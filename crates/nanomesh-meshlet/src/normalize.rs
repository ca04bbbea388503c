//! Index/attribute normalization
//!
//! Turns raw attribute streams into a compact indexed mesh:
//! - Vertices are merged when every stream compares bit-equal, and
//!   unreferenced vertices are dropped
//! - The index buffer is reordered for a small FIFO transform cache
//! - Vertices are reordered to first use

use meshopt::VertexStream;
use nanomesh_core::math::{Vec2, Vec3};

use crate::error::{MeshletError, MeshletResult};

/// Source geometry as it comes out of an importer
#[derive(Debug, Clone, Default)]
pub struct RawMesh {
    /// Per-vertex (or per-corner when unindexed) positions
    pub positions: Vec<Vec3>,
    /// Same length as `positions`
    pub normals: Vec<Vec3>,
    /// Same length as `positions`
    pub uvs: Vec<Vec2>,
    /// Triangle list; `None` means every three positions form a triangle
    pub indices: Option<Vec<u32>>,
}

impl RawMesh {
    /// Number of triangles described by the mesh
    pub fn triangle_count(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        }
    }

    /// Check the stream lengths and index range
    pub fn validate(&self) -> MeshletResult<()> {
        let expected = self.positions.len();
        for (stream, len) in [("normal", self.normals.len()), ("uv", self.uvs.len())] {
            if len != expected {
                return Err(MeshletError::AttributeLengthMismatch {
                    stream,
                    len,
                    expected,
                });
            }
        }

        match &self.indices {
            Some(indices) => {
                if indices.len() % 3 != 0 {
                    return Err(MeshletError::IndexCountNotTriangles(indices.len()));
                }
                if let Some(&index) = indices.iter().find(|&&i| i as usize >= expected) {
                    return Err(MeshletError::IndexOutOfRange {
                        index,
                        vertex_count: expected,
                    });
                }
            }
            None if expected % 3 != 0 => return Err(MeshletError::IndexCountNotTriangles(expected)),
            None => {}
        }
        Ok(())
    }
}

/// Deduplicated, cache-ordered mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedMesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl IndexedMesh {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Merge bit-identical vertices and drop unreferenced ones.
///
/// Unindexed input is treated as one vertex per corner.
fn deduplicate(raw: &RawMesh) -> IndexedMesh {
    let vertex_count = raw.positions.len();
    let indices = raw.indices.as_deref();
    let streams = [
        VertexStream::new(raw.positions.as_ptr()),
        VertexStream::new(raw.normals.as_ptr()),
        VertexStream::new(raw.uvs.as_ptr()),
    ];
    let (unique, remap) = meshopt::generate_vertex_remap_multi(vertex_count, &streams, indices);

    IndexedMesh {
        positions: meshopt::remap_vertex_buffer(&raw.positions, unique, &remap),
        normals: meshopt::remap_vertex_buffer(&raw.normals, unique, &remap),
        uvs: meshopt::remap_vertex_buffer(&raw.uvs, unique, &remap),
        indices: meshopt::remap_index_buffer(indices, vertex_count, &remap),
    }
}

/// Build a compact indexed mesh from raw streams.
///
/// Empty input yields an empty mesh.
pub fn normalize_mesh(raw: &RawMesh, vertex_cache_size: u32) -> MeshletResult<IndexedMesh> {
    raw.validate()?;
    if raw.triangle_count() == 0 {
        return Ok(IndexedMesh::default());
    }

    let optimized = optimize_mesh(deduplicate(raw), vertex_cache_size);
    log::trace!(
        "normalized {} triangles onto {} vertices",
        optimized.triangle_count(),
        optimized.vertex_count()
    );
    Ok(optimized)
}

/// Cache-order the triangles, then fetch-order the vertices
fn optimize_mesh(mesh: IndexedMesh, vertex_cache_size: u32) -> IndexedMesh {
    let vertex_count = mesh.vertex_count();
    let indices = meshopt::optimize_vertex_cache_fifo(&mesh.indices, vertex_count, vertex_cache_size);

    // Full-length table: unreferenced vertices map to `u32::MAX` and are
    // skipped by the remap helpers.
    let mut remap = vec![0u32; vertex_count];
    // SAFETY: `remap` holds `vertex_count` entries and every index is below
    // `vertex_count`.
    let used = unsafe {
        meshopt::ffi::meshopt_optimizeVertexFetchRemap(
            remap.as_mut_ptr(),
            indices.as_ptr(),
            indices.len(),
            vertex_count,
        )
    };

    IndexedMesh {
        positions: meshopt::remap_vertex_buffer(&mesh.positions, used, &remap),
        normals: meshopt::remap_vertex_buffer(&mesh.normals, used, &remap),
        uvs: meshopt::remap_vertex_buffer(&mesh.uvs, used, &remap),
        indices: meshopt::remap_index_buffer(Some(&indices), vertex_count, &remap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_corners() -> RawMesh {
        let p = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        let positions = vec![p[0], p[1], p[2], p[0], p[2], p[3]];
        RawMesh {
            normals: vec![Vec3::Z; positions.len()],
            uvs: positions.iter().map(|p| Vec2::new(p.x, p.y)).collect(),
            positions,
            indices: None,
        }
    }

    #[test]
    fn test_unindexed_corners_are_merged() {
        let mesh = normalize_mesh(&quad_corners(), 16).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.normals.len(), 4);
        assert_eq!(mesh.uvs.len(), 4);
    }

    #[test]
    fn test_attribute_seam_is_kept() {
        let mut raw = quad_corners();
        // Same position, different UV on the second triangle's first corner
        raw.uvs[3] = Vec2::new(0.5, 0.5);
        let mesh = normalize_mesh(&raw, 16).unwrap();
        assert_eq!(mesh.vertex_count(), 5);
    }

    #[test]
    fn test_indexed_input_drops_unused_vertices() {
        let raw = RawMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::splat(9.0), Vec3::Y],
            normals: vec![Vec3::Z; 4],
            uvs: vec![Vec2::ZERO; 4],
            indices: Some(vec![0, 1, 3]),
        };
        let mesh = normalize_mesh(&raw, 16).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert!(!mesh.positions.contains(&Vec3::splat(9.0)));
        // Fetch order follows first use
        assert_eq!(mesh.indices[0], 0);
        for triangle in mesh.indices.chunks(3) {
            let corners: Vec<Vec3> = triangle.iter().map(|&i| mesh.positions[i as usize]).collect();
            assert!(corners.contains(&Vec3::ZERO));
            assert!(corners.contains(&Vec3::X));
            assert!(corners.contains(&Vec3::Y));
        }
    }

    #[test]
    fn test_unused_leading_vertex() {
        let raw = RawMesh {
            positions: vec![Vec3::splat(9.0), Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 4],
            uvs: vec![Vec2::ZERO; 4],
            indices: Some(vec![1, 2, 3]),
        };
        let mesh = normalize_mesh(&raw, 16).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));
        assert!(!mesh.positions.contains(&Vec3::splat(9.0)));
    }

    #[test]
    fn test_indexed_duplicates_are_merged() {
        // Vertex 3 is a bit-exact copy of vertex 0
        let raw = RawMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ZERO],
            normals: vec![Vec3::Z; 4],
            uvs: vec![Vec2::ZERO; 4],
            indices: Some(vec![0, 1, 2, 3, 2, 1]),
        };
        let mesh = normalize_mesh(&raw, 16).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn test_empty_input() {
        let mesh = normalize_mesh(&RawMesh::default(), 16).unwrap();
        assert_eq!(mesh, IndexedMesh::default());
    }

    #[test]
    fn test_invalid_input() {
        let mut raw = quad_corners();
        raw.normals.pop();
        assert!(matches!(
            normalize_mesh(&raw, 16),
            Err(MeshletError::AttributeLengthMismatch { stream: "normal", .. })
        ));

        let raw = RawMesh {
            positions: vec![Vec3::ZERO; 3],
            normals: vec![Vec3::Z; 3],
            uvs: vec![Vec2::ZERO; 3],
            indices: Some(vec![0, 1, 5]),
        };
        assert!(matches!(
            normalize_mesh(&raw, 16),
            Err(MeshletError::IndexOutOfRange { index: 5, .. })
        ));

        let raw = RawMesh {
            indices: Some(vec![0, 1]),
            ..raw
        };
        assert!(matches!(normalize_mesh(&raw, 16), Err(MeshletError::IndexCountNotTriangles(2))));
    }
}

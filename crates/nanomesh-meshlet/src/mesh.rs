//! Meshlet data types
//!
//! Plain-old-data records shared by the builder, the DAG assembler, the
//! on-disk format and the GPU upload path.

use bytemuck::{Pod, Zeroable};
use nanomesh_core::math::{BoundingBox, BoundingSphere, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{MeshletError, MeshletResult};

/// One cluster of triangles.
///
/// `indirect_vertex_offset..+vertex_count` indexes the shared indirect-vertex
/// array (local to global vertex id); `micro_indices_offset..+triangle_count*3`
/// indexes the shared byte-sized local triangle corner array.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Meshlet {
    pub indirect_vertex_offset: u32,
    pub vertex_count: u32,
    pub micro_indices_offset: u32,
    pub triangle_count: u32,
}

/// Culling and LOD selection bounds of a meshlet
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct MeshletBoundingSpheres {
    /// Tight bounds of the meshlet's own triangles
    pub culling_sphere: BoundingSphere,
    /// Bounds of the simplification group that produced this meshlet
    pub lod_group_sphere: BoundingSphere,
    /// Bounds of the coarser group that replaces this meshlet
    pub lod_parent_group_sphere: BoundingSphere,
}

/// Simplification error of a meshlet and of its replacement
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct MeshletSimplificationError {
    /// Error accumulated by the group that produced this meshlet
    pub group_error: f32,
    /// Error of the coarser group that supersedes it, `+inf` while unassigned
    pub parent_group_error: f32,
}

impl MeshletSimplificationError {
    /// Error record of a finest-level meshlet
    pub const LEVEL_ZERO: Self = Self {
        group_error: 0.0,
        parent_group_error: f32::INFINITY,
    };

    /// Check whether a coarser group has claimed this meshlet
    pub fn has_parent(&self) -> bool {
        self.parent_group_error.is_finite()
    }
}

impl Default for MeshletSimplificationError {
    fn default() -> Self {
        Self::LEVEL_ZERO
    }
}

/// Pack a UV pair into two half floats
pub fn encode_uv(uv: Vec2) -> u32 {
    let u = half::f16::from_f32(uv.x).to_bits() as u32;
    let v = half::f16::from_f32(uv.y).to_bits() as u32;
    u | (v << 16)
}

/// Unpack a UV pair produced by [`encode_uv`]
pub fn decode_uv(code: u32) -> Vec2 {
    let u = half::f16::from_bits((code & 0xffff) as u16).to_f32();
    let v = half::f16::from_bits((code >> 16) as u16).to_f32();
    Vec2::new(u, v)
}

/// Flat meshlet arrays as produced by the clusterizer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshletGeometry {
    pub meshlets: Vec<Meshlet>,
    pub indirect_vertices: Vec<u32>,
    pub micro_indices: Vec<u8>,
}

impl MeshletGeometry {
    /// Number of meshlets
    pub fn len(&self) -> usize {
        self.meshlets.len()
    }

    /// Check if there are no meshlets
    pub fn is_empty(&self) -> bool {
        self.meshlets.is_empty()
    }

    /// Global vertex ids referenced by a meshlet, each listed once
    pub fn vertices(&self, meshlet_id: usize) -> &[u32] {
        let meshlet = &self.meshlets[meshlet_id];
        let start = meshlet.indirect_vertex_offset as usize;
        &self.indirect_vertices[start..start + meshlet.vertex_count as usize]
    }

    /// Local triangle corners of a meshlet
    pub fn micro_indices(&self, meshlet_id: usize) -> &[u8] {
        let meshlet = &self.meshlets[meshlet_id];
        let start = meshlet.micro_indices_offset as usize;
        &self.micro_indices[start..start + meshlet.triangle_count as usize * 3]
    }

    /// Global triangle list of a meshlet
    pub fn triangle_indices(&self, meshlet_id: usize) -> impl Iterator<Item = u32> + '_ {
        let vertices = self.vertices(meshlet_id);
        self.micro_indices(meshlet_id)
            .iter()
            .map(move |&local| vertices[local as usize])
    }

    /// Append another geometry batch, rebasing its offsets.
    ///
    /// Returns the id range of the appended meshlets.
    pub fn append(&mut self, other: &MeshletGeometry) -> std::ops::Range<usize> {
        let first = self.meshlets.len();
        let vertex_base = self.indirect_vertices.len() as u32;
        let micro_base = self.micro_indices.len() as u32;

        self.indirect_vertices.extend_from_slice(&other.indirect_vertices);
        self.micro_indices.extend_from_slice(&other.micro_indices);
        self.meshlets.extend(other.meshlets.iter().map(|m| Meshlet {
            indirect_vertex_offset: m.indirect_vertex_offset + vertex_base,
            micro_indices_offset: m.micro_indices_offset + micro_base,
            ..*m
        }));
        first..self.meshlets.len()
    }
}

/// A processed mesh: every LOD level's meshlets flattened into one set of
/// arrays, ready to be written to disk or uploaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshletMesh {
    /// Bounds of the whole mesh
    pub aabb: BoundingBox,
    /// Vertex positions
    pub positions: Vec<Vec3>,
    /// Octahedral-packed normals
    pub normals: Vec<u32>,
    /// Half-float packed UVs
    pub uvs: Vec<u32>,
    /// Meshlets of all levels, finest first
    pub meshlets: Vec<Meshlet>,
    /// One entry per meshlet
    pub bounding_spheres: Vec<MeshletBoundingSpheres>,
    /// One entry per meshlet
    pub simplification_errors: Vec<MeshletSimplificationError>,
    /// One entry per meshlet
    pub aabbs: Vec<BoundingBox>,
    /// Local triangle corners, indexed through each meshlet
    pub micro_indices: Vec<u8>,
    /// Local-to-global vertex remap, indexed through each meshlet
    pub indirect_vertices: Vec<u32>,
    /// First meshlet of every DAG level, plus a final end offset
    pub lod_level_offsets: Vec<u32>,
}

impl MeshletMesh {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of meshlets over all levels
    pub fn meshlet_count(&self) -> usize {
        self.meshlets.len()
    }

    /// Number of triangles over all levels
    pub fn triangle_count(&self) -> usize {
        self.meshlets.iter().map(|m| m.triangle_count as usize).sum()
    }

    /// Number of DAG levels
    pub fn lod_level_count(&self) -> usize {
        self.lod_level_offsets.len().saturating_sub(1)
    }

    /// Meshlet id range of one DAG level
    pub fn lod_level(&self, level: usize) -> Option<std::ops::Range<usize>> {
        let start = *self.lod_level_offsets.get(level)? as usize;
        let end = *self.lod_level_offsets.get(level + 1)? as usize;
        Some(start..end)
    }

    /// Number of triangles in one DAG level
    pub fn triangle_count_at_level(&self, level: usize) -> usize {
        self.lod_level(level)
            .map(|range| self.meshlets[range].iter().map(|m| m.triangle_count as usize).sum())
            .unwrap_or(0)
    }

    /// Check array lengths, meshlet ranges and level offsets against each
    /// other so that every accessor stays in bounds.
    pub fn validate(&self) -> MeshletResult<()> {
        let fail = |message: String| Err(MeshletError::InconsistentMesh(message));

        let vertex_count = self.positions.len();
        for (stream, len) in [("normals", self.normals.len()), ("uvs", self.uvs.len())] {
            if len != vertex_count {
                return fail(format!("{len} {stream} for {vertex_count} positions"));
            }
        }

        let meshlet_count = self.meshlets.len();
        for (array, len) in [
            ("bounding spheres", self.bounding_spheres.len()),
            ("simplification errors", self.simplification_errors.len()),
            ("aabbs", self.aabbs.len()),
        ] {
            if len != meshlet_count {
                return fail(format!("{len} {array} for {meshlet_count} meshlets"));
            }
        }

        if let Some(&vertex) = self.indirect_vertices.iter().find(|&&v| v as usize >= vertex_count) {
            return fail(format!("indirect vertex {vertex} out of {vertex_count} vertices"));
        }

        for (id, meshlet) in self.meshlets.iter().enumerate() {
            let vertices_end = meshlet.indirect_vertex_offset as u64 + meshlet.vertex_count as u64;
            let micro_end = meshlet.micro_indices_offset as u64 + meshlet.triangle_count as u64 * 3;
            if vertices_end > self.indirect_vertices.len() as u64 || micro_end > self.micro_indices.len() as u64 {
                return fail(format!("meshlet {id} addresses data past the shared arrays"));
            }
            let start = meshlet.micro_indices_offset as usize;
            let corners = &self.micro_indices[start..micro_end as usize];
            if corners.iter().any(|&local| local as u32 >= meshlet.vertex_count) {
                return fail(format!("meshlet {id} has a corner past its {} vertices", meshlet.vertex_count));
            }
        }

        let mut previous = 0;
        for &offset in &self.lod_level_offsets {
            if offset < previous || offset as usize > meshlet_count {
                return fail(format!("level offsets {:?} for {meshlet_count} meshlets", self.lod_level_offsets));
            }
            previous = offset;
        }
        Ok(())
    }

    /// Meshlets no coarser group replaces; together they form the coarsest cut
    pub fn root_meshlets(&self) -> impl Iterator<Item = usize> + '_ {
        self.simplification_errors
            .iter()
            .enumerate()
            .filter(|(_, error)| !error.has_parent())
            .map(|(index, _)| index)
    }
}

//! Meshlet Builder
//!
//! Splits an index buffer into clusters bounded by the configured vertex and
//! triangle caps, then computes per-meshlet culling spheres and AABBs.

use meshopt::ffi::meshopt_optimizeMeshlet;
use meshopt::{VertexDataAdapter, build_meshlets, compute_meshlet_bounds};
use nanomesh_core::math::{Aabb, BoundingBox, BoundingSphere, Vec3};

use crate::config::MeshletBuildConfig;
use crate::error::{MeshletError, MeshletResult};
use crate::mesh::{Meshlet, MeshletGeometry};

/// Freshly clustered meshlets and their bounds
#[derive(Debug, Clone, Default)]
pub struct MeshletBatch {
    pub geometry: MeshletGeometry,
    /// Tight sphere per meshlet
    pub culling_spheres: Vec<BoundingSphere>,
    /// Box per meshlet
    pub aabbs: Vec<BoundingBox>,
    /// Union of every meshlet's box; degenerate when there are no meshlets
    pub mesh_aabb: BoundingBox,
}

/// Wrap a position array for the meshopt entry points
pub(crate) fn position_adapter(positions: &[Vec3]) -> MeshletResult<VertexDataAdapter<'_>> {
    VertexDataAdapter::new(bytemuck::cast_slice(positions), std::mem::size_of::<Vec3>(), 0)
        .map_err(|err| MeshletError::VertexData(format!("{err:?}")))
}

/// Cluster `indices` into meshlets.
///
/// Zero triangles produce zero meshlets and a degenerate mesh AABB.
pub fn build_meshlet_batch(
    indices: &[u32],
    positions: &[Vec3],
    config: &MeshletBuildConfig,
) -> MeshletResult<MeshletBatch> {
    if indices.is_empty() {
        return Ok(MeshletBatch::default());
    }

    let vertices = position_adapter(positions)?;
    let mut meshlets = build_meshlets(
        indices,
        &vertices,
        config.max_vertices,
        config.max_triangles,
        config.cone_weight,
    );

    // The output arrays are sized for the worst case; cut them back to what
    // the last meshlet actually uses.
    let Some(last) = meshlets.meshlets.last().copied() else {
        return Ok(MeshletBatch::default());
    };
    meshlets
        .vertices
        .truncate((last.vertex_offset + last.vertex_count) as usize);
    meshlets
        .triangles
        .truncate((last.triangle_offset + last.triangle_count * 3) as usize);

    for meshlet in &meshlets.meshlets {
        // SAFETY: offsets and counts come straight from build_meshlets and
        // address in-bounds ranges of the two arrays.
        unsafe {
            meshopt_optimizeMeshlet(
                &mut meshlets.vertices[meshlet.vertex_offset as usize],
                &mut meshlets.triangles[meshlet.triangle_offset as usize],
                meshlet.triangle_count as usize,
                meshlet.vertex_count as usize,
            );
        }
    }

    let mut batch = MeshletBatch {
        geometry: MeshletGeometry {
            meshlets: Vec::with_capacity(meshlets.len()),
            indirect_vertices: Vec::new(),
            micro_indices: Vec::new(),
        },
        culling_spheres: Vec::with_capacity(meshlets.len()),
        aabbs: Vec::with_capacity(meshlets.len()),
        mesh_aabb: BoundingBox::ZERO,
    };

    let mut mesh_aabb = Aabb::EMPTY;
    for meshlet in meshlets.iter() {
        let (local_vertices, local_triangles) = (meshlet.vertices, meshlet.triangles);

        let aabb = Aabb::from_points(local_vertices.iter().map(|&v| positions[v as usize]));
        mesh_aabb = mesh_aabb.merge(&aabb);
        batch.aabbs.push(aabb.to_bounding_box());

        let geometry = &mut batch.geometry;
        geometry.meshlets.push(Meshlet {
            indirect_vertex_offset: geometry.indirect_vertices.len() as u32,
            vertex_count: local_vertices.len() as u32,
            micro_indices_offset: geometry.micro_indices.len() as u32,
            triangle_count: (local_triangles.len() / 3) as u32,
        });
        geometry.indirect_vertices.extend_from_slice(local_vertices);
        geometry.micro_indices.extend_from_slice(local_triangles);

        let bounds = compute_meshlet_bounds(meshlet, &vertices);
        batch
            .culling_spheres
            .push(BoundingSphere::new(Vec3::from(bounds.center), bounds.radius));
    }
    batch.mesh_aabb = mesh_aabb.to_bounding_box();

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes::{cube, grid};

    #[test]
    fn test_empty_input() {
        let batch = build_meshlet_batch(&[], &[], &MeshletBuildConfig::default()).unwrap();
        assert!(batch.geometry.is_empty());
        assert_eq!(batch.mesh_aabb, BoundingBox::ZERO);
    }

    #[test]
    fn test_cube_is_one_meshlet() {
        let mesh = cube(2.0);
        let batch =
            build_meshlet_batch(&mesh.indices, &mesh.positions, &MeshletBuildConfig::default()).unwrap();

        assert_eq!(batch.geometry.len(), 1);
        assert_eq!(batch.geometry.meshlets[0].triangle_count, 12);
        assert!(batch.mesh_aabb.center.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(batch.mesh_aabb.extent.abs_diff_eq(Vec3::ONE, 1e-6));
    }

    #[test]
    fn test_caps_and_membership() {
        let mesh = grid(32);
        let config = MeshletBuildConfig::default();
        let batch = build_meshlet_batch(&mesh.indices, &mesh.positions, &config).unwrap();

        assert!(batch.geometry.len() > 1);
        assert_eq!(batch.culling_spheres.len(), batch.geometry.len());
        assert_eq!(batch.aabbs.len(), batch.geometry.len());

        let mut triangles = 0;
        for id in 0..batch.geometry.len() {
            let meshlet = batch.geometry.meshlets[id];
            assert!(meshlet.vertex_count as usize <= config.max_vertices);
            assert!(meshlet.triangle_count as usize <= config.max_triangles);
            assert!(batch.geometry.micro_indices(id).iter().all(|&i| (i as u32) < meshlet.vertex_count));

            let sphere = batch.culling_spheres[id];
            for vertex in batch.geometry.vertices(id) {
                let point = mesh.positions[*vertex as usize];
                assert!(sphere.center.distance(point) <= sphere.radius * 1.001 + 1e-4);
            }
            triangles += meshlet.triangle_count as usize;
        }
        assert_eq!(triangles, mesh.triangle_count());
    }
}

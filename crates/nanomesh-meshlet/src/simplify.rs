//! Group simplification
//!
//! Attribute-aware edge collapse of one meshlet group down to about half of
//! its indices, with locked border vertices kept in place.

use meshopt::{SimplifyOptions, simplify_with_attributes_and_locks};
use nanomesh_core::math::Vec3;

use crate::builder::position_adapter;
use crate::config::MeshletBuildConfig;
use crate::error::MeshletResult;
use crate::mesh::MeshletGeometry;

/// Per-vertex data the simplifier reads
#[derive(Debug, Clone, Copy)]
pub struct SimplifyInput<'a> {
    pub positions: &'a [Vec3],
    /// Normals as a flat `[x, y, z, ...]` array
    pub normals: &'a [f32],
    /// One entry per vertex
    pub vertex_locks: &'a [bool],
}

/// A successfully simplified group
#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedGroup {
    /// Triangle list into the mesh's vertex arrays
    pub indices: Vec<u32>,
    /// Absolute geometric error of this simplification step
    pub error: f32,
}

/// Flatten a group's meshlets back into one triangle list
pub fn group_indices(group: &[usize], geometry: &MeshletGeometry) -> Vec<u32> {
    let mut indices = Vec::new();
    for &meshlet_id in group {
        indices.extend(geometry.triangle_indices(meshlet_id));
    }
    indices
}

/// Simplify one group.
///
/// Returns `Ok(None)` when the group is rejected: the result keeps more than
/// `simplification_failure_ratio` of the original indices, or collapses to
/// nothing.
pub fn simplify_group(
    group: &[usize],
    geometry: &MeshletGeometry,
    input: &SimplifyInput<'_>,
    config: &MeshletBuildConfig,
) -> MeshletResult<Option<SimplifiedGroup>> {
    let indices = group_indices(group, geometry);
    if indices.is_empty() {
        return Ok(None);
    }

    let vertices = position_adapter(input.positions)?;
    let weights = [config.normal_weight; 3];
    let mut error = 0.0;
    let simplified = simplify_with_attributes_and_locks(
        &indices,
        &vertices,
        input.normals,
        &weights,
        std::mem::size_of::<[f32; 3]>(),
        input.vertex_locks,
        indices.len() / 2,
        f32::MAX,
        SimplifyOptions::Sparse | SimplifyOptions::ErrorAbsolute,
        Some(&mut error),
    );

    let ratio = simplified.len() as f32 / indices.len() as f32;
    if simplified.is_empty() || ratio > config.simplification_failure_ratio {
        log::trace!(
            "group of {} meshlets rejected: {} -> {} indices",
            group.len(),
            indices.len(),
            simplified.len()
        );
        return Ok(None);
    }

    Ok(Some(SimplifiedGroup {
        indices: simplified,
        error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_meshlet_batch;
    use crate::test_meshes::grid;

    fn flat_normals(normals: &[Vec3]) -> Vec<f32> {
        normals.iter().flat_map(|n| n.to_array()).collect()
    }

    #[test]
    fn test_group_halves_indices() {
        let mesh = grid(16);
        let config = MeshletBuildConfig::default();
        let batch = build_meshlet_batch(&mesh.indices, &mesh.positions, &config).unwrap();
        let group: Vec<usize> = (0..batch.geometry.len()).collect();

        let normals = flat_normals(&mesh.normals);
        let locks = vec![false; mesh.vertex_count()];
        let input = SimplifyInput {
            positions: &mesh.positions,
            normals: &normals,
            vertex_locks: &locks,
        };

        let result = simplify_group(&group, &batch.geometry, &input, &config)
            .unwrap()
            .expect("a smooth grid simplifies");
        let original = group_indices(&group, &batch.geometry).len();
        assert_eq!(result.indices.len() % 3, 0);
        assert!(result.indices.len() as f32 <= original as f32 * 0.95);
        assert!(result.error >= 0.0);
    }

    #[test]
    fn test_fully_locked_group_is_rejected() {
        let mesh = grid(8);
        let config = MeshletBuildConfig::default();
        let batch = build_meshlet_batch(&mesh.indices, &mesh.positions, &config).unwrap();
        let group: Vec<usize> = (0..batch.geometry.len()).collect();

        let normals = flat_normals(&mesh.normals);
        let locks = vec![true; mesh.vertex_count()];
        let input = SimplifyInput {
            positions: &mesh.positions,
            normals: &normals,
            vertex_locks: &locks,
        };

        assert_eq!(simplify_group(&group, &batch.geometry, &input, &config).unwrap(), None);
    }
}

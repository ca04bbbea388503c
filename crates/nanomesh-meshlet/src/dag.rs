//! LOD DAG assembly
//!
//! Drives the level loop that turns level-0 meshlets into a DAG:
//! - Group the current queue and lock the borders between groups
//! - Simplify every group (in parallel when enabled)
//! - Propagate bounds and error from each accepted group to its members
//! - Re-cluster the simplified triangles into the next level's meshlets
//!
//! Meshlets are only ever appended. Rejected groups go back into the queue
//! with their ids unchanged.

use nanomesh_core::math::{BoundingBox, BoundingSphere, encode_octahedral};
use rayon::prelude::*;
use serde::Serialize;

use crate::builder::{MeshletBatch, build_meshlet_batch};
use crate::config::MeshletBuildConfig;
use crate::connectivity::{PositionRemap, find_connected_meshlets};
use crate::error::MeshletResult;
use crate::grouping::{MeshletGroup, group_meshlets};
use crate::locking::lock_group_borders;
use crate::mesh::{MeshletBoundingSpheres, MeshletGeometry, MeshletMesh, MeshletSimplificationError, encode_uv};
use crate::normalize::{IndexedMesh, RawMesh, normalize_mesh};
use crate::simplify::{SimplifiedGroup, SimplifyInput, simplify_group};

/// Why the level loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// At most one meshlet was left to simplify
    Converged,
    /// A whole level was rejected; regrouping would repeat it
    NoProgress,
    /// `max_lod_iterations` was reached
    IterationLimit,
}

/// Summary of one DAG build
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LodBuildReport {
    /// Number of group/simplify passes run
    pub iterations: u32,
    /// Meshlets created per level, level 0 first
    pub level_meshlet_counts: Vec<usize>,
    /// Groups of two or more meshlets that failed to simplify
    pub rejected_groups: usize,
    /// Meshlets left in the queue when the loop ended
    pub final_queue_len: usize,
    pub stop_reason: StopReason,
}

/// Result of applying one level's groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LevelOutcome {
    /// Newly created meshlets followed by the retried ones
    pub next_queue: Vec<usize>,
    pub created: usize,
    pub rejected: usize,
}

/// Incrementally built meshlet DAG over one indexed mesh
pub struct LodDagBuilder<'a> {
    mesh: &'a IndexedMesh,
    config: &'a MeshletBuildConfig,
    normals: Vec<f32>,
    remap: PositionRemap,
    geometry: MeshletGeometry,
    spheres: Vec<MeshletBoundingSpheres>,
    errors: Vec<MeshletSimplificationError>,
    aabbs: Vec<BoundingBox>,
    mesh_aabb: BoundingBox,
    level_offsets: Vec<u32>,
}

impl<'a> LodDagBuilder<'a> {
    /// Build level 0 of `mesh`
    pub fn new(mesh: &'a IndexedMesh, config: &'a MeshletBuildConfig) -> MeshletResult<Self> {
        config.validate()?;
        let batch = build_meshlet_batch(&mesh.indices, &mesh.positions, config)?;

        let mut builder = Self {
            mesh,
            config,
            normals: mesh.normals.iter().flat_map(|n| n.to_array()).collect(),
            remap: PositionRemap::new(&mesh.positions),
            geometry: MeshletGeometry::default(),
            spheres: Vec::new(),
            errors: Vec::new(),
            aabbs: Vec::new(),
            mesh_aabb: batch.mesh_aabb,
            level_offsets: vec![0],
        };
        builder.append_level_zero(batch);
        Ok(builder)
    }

    fn append_level_zero(&mut self, batch: MeshletBatch) {
        self.geometry.append(&batch.geometry);
        self.spheres
            .extend(batch.culling_spheres.iter().map(|&culling_sphere| MeshletBoundingSpheres {
                culling_sphere,
                lod_group_sphere: culling_sphere,
                lod_parent_group_sphere: BoundingSphere::ZERO,
            }));
        self.errors
            .extend(std::iter::repeat_n(MeshletSimplificationError::LEVEL_ZERO, batch.geometry.len()));
        self.aabbs.extend_from_slice(&batch.aabbs);
        self.level_offsets.push(self.geometry.len() as u32);
    }

    /// Number of meshlets built so far
    pub fn meshlet_count(&self) -> usize {
        self.geometry.len()
    }

    /// Run the level loop to completion
    pub fn build(&mut self) -> MeshletResult<LodBuildReport> {
        let level_zero = self.geometry.len();
        let mut report = LodBuildReport {
            iterations: 0,
            level_meshlet_counts: vec![level_zero],
            rejected_groups: 0,
            final_queue_len: level_zero,
            stop_reason: StopReason::Converged,
        };

        let mut queue: Vec<usize> = (0..level_zero).collect();
        let mut vertex_locks = vec![false; self.mesh.vertex_count()];

        while queue.len() > 1 {
            if report.iterations >= self.config.max_lod_iterations {
                log::warn!(
                    "LOD build stopped after {} iterations with {} meshlets queued",
                    report.iterations,
                    queue.len()
                );
                report.stop_reason = StopReason::IterationLimit;
                break;
            }
            report.iterations += 1;

            let adjacency = find_connected_meshlets(&queue, &self.geometry, &self.remap);
            let groups = group_meshlets(
                &queue,
                &adjacency,
                self.config.target_meshlets_per_group,
                self.config.partition_seed,
            )?;
            lock_group_borders(&mut vertex_locks, &groups, &self.geometry, &self.remap);

            let outcome = self.apply_groups(&groups, &vertex_locks)?;
            report.rejected_groups += outcome.rejected;
            log::debug!(
                "LOD level {}: {} meshlets in {} groups -> {} new, {} rejected groups",
                report.iterations,
                queue.len(),
                groups.len(),
                outcome.created,
                outcome.rejected
            );

            if outcome.created == 0 {
                log::warn!(
                    "LOD build stalled: no group of {} queued meshlets simplified",
                    queue.len()
                );
                report.stop_reason = StopReason::NoProgress;
                break;
            }
            self.level_offsets.push(self.geometry.len() as u32);
            report.level_meshlet_counts.push(outcome.created);
            queue = outcome.next_queue;
        }

        report.final_queue_len = queue.len();
        Ok(report)
    }

    /// Simplify every group of one level and commit the accepted ones.
    ///
    /// Groups are simplified independently but committed in order, so the
    /// output does not depend on scheduling.
    pub(crate) fn apply_groups(
        &mut self,
        groups: &[MeshletGroup],
        vertex_locks: &[bool],
    ) -> MeshletResult<LevelOutcome> {
        let input = SimplifyInput {
            positions: &self.mesh.positions,
            normals: &self.normals,
            vertex_locks,
        };
        let geometry = &self.geometry;
        let config = self.config;
        let attempt = |group: &MeshletGroup| -> MeshletResult<Option<SimplifiedGroup>> {
            if group.len() < 2 {
                return Ok(None);
            }
            simplify_group(group, geometry, &input, config)
        };

        let results: Vec<MeshletResult<Option<SimplifiedGroup>>> = if config.parallel_groups {
            groups.par_iter().map(attempt).collect()
        } else {
            groups.iter().map(attempt).collect()
        };

        let mut created = Vec::new();
        let mut retry = Vec::new();
        let mut rejected = 0;
        for (group, result) in groups.iter().zip(results) {
            match result? {
                Some(simplified) => {
                    let new_meshlets = self.commit_group(group, simplified)?;
                    created.extend(new_meshlets);
                }
                None => {
                    if group.len() > 1 {
                        rejected += 1;
                    }
                    retry.extend_from_slice(group);
                }
            }
        }

        let created_count = created.len();
        created.extend(retry);
        Ok(LevelOutcome {
            next_queue: created,
            created: created_count,
            rejected,
        })
    }

    /// Propagate bounds and error from an accepted group, then append its
    /// re-clustered meshlets.
    fn commit_group(
        &mut self,
        group: &[usize],
        simplified: SimplifiedGroup,
    ) -> MeshletResult<std::ops::Range<usize>> {
        let mut group_sphere = self.spheres[group[0]].lod_group_sphere;
        let mut group_error = simplified.error;
        for &meshlet_id in group {
            let spheres = &self.spheres[meshlet_id];
            group_sphere = group_sphere
                .merge(&spheres.lod_group_sphere)
                .merge(&spheres.culling_sphere);
            group_error = group_error.max(self.errors[meshlet_id].group_error);
        }

        for &meshlet_id in group {
            self.spheres[meshlet_id].lod_parent_group_sphere = group_sphere;
            self.errors[meshlet_id].parent_group_error = group_error;
        }

        let batch = build_meshlet_batch(&simplified.indices, &self.mesh.positions, self.config)?;
        let ids = self.geometry.append(&batch.geometry);
        self.spheres
            .extend(batch.culling_spheres.iter().map(|&culling_sphere| MeshletBoundingSpheres {
                culling_sphere,
                lod_group_sphere: group_sphere,
                lod_parent_group_sphere: BoundingSphere::ZERO,
            }));
        self.errors.extend(std::iter::repeat_n(
            MeshletSimplificationError {
                group_error,
                parent_group_error: f32::INFINITY,
            },
            ids.len(),
        ));
        self.aabbs.extend_from_slice(&batch.aabbs);
        Ok(ids)
    }

    /// Flatten the DAG into a [`MeshletMesh`]
    pub fn finish(self) -> MeshletMesh {
        MeshletMesh {
            aabb: self.mesh_aabb,
            positions: self.mesh.positions.clone(),
            normals: self.mesh.normals.iter().map(|&n| encode_octahedral(n)).collect(),
            uvs: self.mesh.uvs.iter().map(|&uv| encode_uv(uv)).collect(),
            meshlets: self.geometry.meshlets,
            bounding_spheres: self.spheres,
            simplification_errors: self.errors,
            aabbs: self.aabbs,
            micro_indices: self.geometry.micro_indices,
            indirect_vertices: self.geometry.indirect_vertices,
            lod_level_offsets: self.level_offsets,
        }
    }
}

/// Normalize `raw` and build its full meshlet DAG
pub fn build_meshlet_mesh(
    raw: &RawMesh,
    config: &MeshletBuildConfig,
) -> MeshletResult<(MeshletMesh, LodBuildReport)> {
    let mesh = normalize_mesh(raw, config.vertex_cache_size)?;
    let mut builder = LodDagBuilder::new(&mesh, config)?;
    let report = builder.build()?;
    log::info!(
        "built {} meshlets over {} levels from {} triangles ({:?})",
        builder.meshlet_count(),
        report.level_meshlet_counts.len(),
        mesh.triangle_count(),
        report.stop_reason
    );
    Ok((builder.finish(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes::{cube, grid, to_raw, triangle};
    use nanomesh_core::math::Vec3;
    use smallvec::smallvec;

    fn build(mesh: IndexedMesh) -> (MeshletMesh, LodBuildReport) {
        build_meshlet_mesh(&to_raw(mesh), &MeshletBuildConfig::default()).unwrap()
    }

    fn assert_dag_invariants(mesh: &MeshletMesh) {
        assert_eq!(mesh.bounding_spheres.len(), mesh.meshlet_count());
        assert_eq!(mesh.simplification_errors.len(), mesh.meshlet_count());
        assert_eq!(mesh.aabbs.len(), mesh.meshlet_count());

        for (id, (spheres, error)) in mesh
            .bounding_spheres
            .iter()
            .zip(&mesh.simplification_errors)
            .enumerate()
        {
            assert!(error.group_error <= error.parent_group_error, "meshlet {id}: {error:?}");
            if error.has_parent() {
                let parent = spheres.lod_parent_group_sphere;
                let tolerance = 1e-4 * parent.radius.max(1.0);
                assert!(
                    parent.contains_sphere(&spheres.culling_sphere, tolerance),
                    "meshlet {id}: {spheres:?}"
                );
            }
        }
    }

    #[test]
    fn test_single_triangle() {
        let (mesh, report) = build(triangle());
        assert_eq!(mesh.meshlet_count(), 1);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.stop_reason, StopReason::Converged);
        assert_eq!(mesh.simplification_errors[0].group_error, 0.0);
        assert_eq!(mesh.simplification_errors[0].parent_group_error, f32::INFINITY);
        assert_eq!(mesh.lod_level_count(), 1);
    }

    #[test]
    fn test_two_triangles() {
        let mut quad = triangle();
        quad.positions.push(Vec3::new(1.0, 1.0, 0.0));
        quad.normals.push(Vec3::Z);
        quad.uvs.push(nanomesh_core::math::Vec2::ONE);
        quad.indices.extend_from_slice(&[1, 3, 2]);

        let (mesh, report) = build(quad);
        assert_eq!(mesh.meshlet_count(), 1);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_cube() {
        let (mesh, report) = build(cube(2.0));
        assert_eq!(mesh.meshlet_count(), 1);
        assert_eq!(report.iterations, 0);
        assert!(mesh.aabb.center.abs_diff_eq(Vec3::ZERO, 1e-6));
        assert!(mesh.aabb.extent.abs_diff_eq(Vec3::ONE, 1e-6));
    }

    #[test]
    fn test_hundred_triangles() {
        // 50 quads in a 10 x 5 strip
        let mut mesh = grid(10);
        mesh.indices.truncate(300);
        let (mesh, report) = build(mesh);
        assert_eq!(mesh.triangle_count_at_level(0), 100);
        assert_ne!(report.stop_reason, StopReason::IterationLimit);
        assert_dag_invariants(&mesh);
    }

    #[test]
    fn test_large_mesh_converges() {
        // 2 * 224 * 224 = 100_352 triangles
        let (mesh, report) = build(grid(224));

        assert_eq!(mesh.triangle_count_at_level(0), 100_352);
        assert_ne!(report.stop_reason, StopReason::IterationLimit);
        assert!(report.iterations > 1);
        assert!(report.level_meshlet_counts.len() > 2);
        assert!(report.final_queue_len < report.level_meshlet_counts[0] / 8);
        assert_eq!(mesh.lod_level_count(), report.level_meshlet_counts.len());
        assert_dag_invariants(&mesh);
    }

    #[test]
    fn test_errors_accumulate_across_levels() {
        let (mesh, _) = build(grid(64));
        assert!(mesh.lod_level_count() > 1);
        assert_dag_invariants(&mesh);

        for level in 1..mesh.lod_level_count() {
            for id in mesh.lod_level(level).unwrap() {
                assert!(mesh.simplification_errors[id].group_error >= 0.0);
                assert!(mesh.simplification_errors[id].group_error.is_finite());
            }
        }
        // Everything below the coarsest level has been claimed or retried
        assert!(mesh.root_meshlets().count() >= 1);
    }

    #[test]
    fn test_rejected_group_keeps_identities() {
        let mesh = grid(32);
        let config = MeshletBuildConfig {
            parallel_groups: false,
            ..Default::default()
        };
        let mut builder = LodDagBuilder::new(&mesh, &config).unwrap();
        let before = builder.meshlet_count();
        let group: MeshletGroup = (0..before.min(4)).collect();
        let single: MeshletGroup = smallvec![before - 1];

        let locks = vec![true; mesh.vertex_count()];
        let outcome = builder.apply_groups(&[group.clone(), single.clone()], &locks).unwrap();

        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.rejected, 1);
        let mut expected: Vec<usize> = group.to_vec();
        expected.extend_from_slice(&single);
        assert_eq!(outcome.next_queue, expected);
        assert_eq!(builder.meshlet_count(), before);

        let mesh = builder.finish();
        assert!(mesh.simplification_errors.iter().all(|e| !e.has_parent()));
    }

    #[test]
    fn test_fully_locked_level_is_retried() {
        let mesh = grid(32);
        let config = MeshletBuildConfig::default();
        let mut builder = LodDagBuilder::new(&mesh, &config).unwrap();
        let level_zero = builder.meshlet_count();
        let groups = vec![(0..level_zero).collect::<MeshletGroup>()];
        let locks = vec![true; mesh.vertex_count()];

        let outcome = builder.apply_groups(&groups, &locks).unwrap();
        assert_eq!(outcome.next_queue, (0..level_zero).collect::<Vec<_>>());
    }

    #[test]
    fn test_build_stops_without_progress() {
        // A zero failure ratio rejects every simplified group
        let mesh = grid(32);
        let config = MeshletBuildConfig {
            simplification_failure_ratio: 0.0,
            ..Default::default()
        };
        let mut builder = LodDagBuilder::new(&mesh, &config).unwrap();
        let level_zero = builder.meshlet_count();
        assert!(level_zero > 1);

        let report = builder.build().unwrap();
        assert_eq!(report.stop_reason, StopReason::NoProgress);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.level_meshlet_counts, vec![level_zero]);
        assert_eq!(report.final_queue_len, level_zero);
        assert!(report.rejected_groups >= 1);

        let mesh = builder.finish();
        assert_eq!(mesh.lod_level_offsets, vec![0, level_zero as u32]);
        assert_eq!(mesh.root_meshlets().count(), level_zero);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_iteration_limit() {
        let mesh = grid(64);
        let config = MeshletBuildConfig {
            max_lod_iterations: 1,
            ..Default::default()
        };
        let mut builder = LodDagBuilder::new(&mesh, &config).unwrap();
        let report = builder.build().unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.stop_reason, StopReason::IterationLimit);
    }

    #[test]
    fn test_parallel_and_serial_agree() {
        let mesh = grid(48);
        let parallel = MeshletBuildConfig::default();
        let serial = MeshletBuildConfig {
            parallel_groups: false,
            ..Default::default()
        };

        let mut a = LodDagBuilder::new(&mesh, &parallel).unwrap();
        let mut b = LodDagBuilder::new(&mesh, &serial).unwrap();
        assert_eq!(a.build().unwrap(), b.build().unwrap());
        assert_eq!(a.finish(), b.finish());
    }
}

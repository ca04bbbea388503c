//! Build configuration

use serde::{Deserialize, Serialize};

use crate::error::{MeshletError, MeshletResult};
use crate::{
    MAX_TRIANGLES_PER_MESHLET, MAX_VERTICES_PER_MESHLET, SIMPLIFICATION_FAILURE_RATIO,
    TARGET_MESHLETS_PER_GROUP,
};

/// Tunables for the meshlet LOD build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshletBuildConfig {
    /// Vertex cap per meshlet
    pub max_vertices: usize,
    /// Triangle cap per meshlet (multiple of 4)
    pub max_triangles: usize,
    /// Weight of orientation against compactness when clustering
    pub cone_weight: f32,
    /// Desired number of meshlets per simplification group
    pub target_meshlets_per_group: usize,
    /// Groups keeping more than this fraction of their indices are rejected
    pub simplification_failure_ratio: f32,
    /// Collapse-cost weight of each normal component
    pub normal_weight: f32,
    /// Seed handed to the graph partitioner
    pub partition_seed: i32,
    /// Safety cutoff for the DAG loop
    pub max_lod_iterations: u32,
    /// Simplify the groups of one level on the rayon pool
    pub parallel_groups: bool,
    /// FIFO size simulated by the vertex cache optimizer
    pub vertex_cache_size: u32,
}

impl Default for MeshletBuildConfig {
    fn default() -> Self {
        Self {
            max_vertices: MAX_VERTICES_PER_MESHLET,
            max_triangles: MAX_TRIANGLES_PER_MESHLET,
            cone_weight: 1.0,
            target_meshlets_per_group: TARGET_MESHLETS_PER_GROUP,
            simplification_failure_ratio: SIMPLIFICATION_FAILURE_RATIO,
            normal_weight: 0.5,
            partition_seed: 17,
            max_lod_iterations: 64,
            parallel_groups: true,
            vertex_cache_size: 16,
        }
    }
}

impl MeshletBuildConfig {
    /// Reject settings the clusterizer cannot honour
    pub fn validate(&self) -> MeshletResult<()> {
        if !(3..=255).contains(&self.max_vertices) {
            return Err(MeshletError::InvalidConfig(format!(
                "max_vertices must be in 3..=255, got {}",
                self.max_vertices
            )));
        }
        if !(4..=512).contains(&self.max_triangles) || self.max_triangles % 4 != 0 {
            return Err(MeshletError::InvalidConfig(format!(
                "max_triangles must be a multiple of 4 in 4..=512, got {}",
                self.max_triangles
            )));
        }
        if self.target_meshlets_per_group < 2 {
            return Err(MeshletError::InvalidConfig(
                "target_meshlets_per_group must be at least 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.simplification_failure_ratio) {
            return Err(MeshletError::InvalidConfig(format!(
                "simplification_failure_ratio must be in 0..=1, got {}",
                self.simplification_failure_ratio
            )));
        }
        if self.vertex_cache_size == 0 {
            return Err(MeshletError::InvalidConfig("vertex_cache_size must be non-zero".into()));
        }
        Ok(())
    }
}

//! # Nanomesh Meshlet
//!
//! Offline conversion of triangle meshes into a meshlet LOD DAG.
//!
//! ## Pipeline
//! - **Normalize**: deduplicate corners, optimize vertex cache and fetch order
//! - **Build**: cluster triangles into meshlets with culling bounds
//! - **Connect / Group / Lock**: partition each level into groups and lock
//!   the vertices on group borders
//! - **Simplify**: halve each group under the locks, rejecting weak results
//! - **DAG**: repeat on the simplified output until one meshlet remains,
//!   propagating bounds and error from every group to its members

pub mod builder;
pub mod config;
pub mod connectivity;
pub mod dag;
pub mod error;
pub mod grouping;
pub mod locking;
pub mod mesh;
pub mod normalize;
pub mod simplify;

#[cfg(test)]
mod test_meshes;

pub use builder::{MeshletBatch, build_meshlet_batch};
pub use config::MeshletBuildConfig;
pub use dag::{LodBuildReport, LodDagBuilder, StopReason, build_meshlet_mesh};
pub use error::{MeshletError, MeshletResult};
pub use mesh::{Meshlet, MeshletBoundingSpheres, MeshletGeometry, MeshletMesh, MeshletSimplificationError};
pub use normalize::{IndexedMesh, RawMesh, normalize_mesh};

/// Vertex cap per meshlet
pub const MAX_VERTICES_PER_MESHLET: usize = 64;

/// Triangle cap per meshlet
pub const MAX_TRIANGLES_PER_MESHLET: usize = 124;

/// Meshlets per simplification group the partitioner aims for
pub const TARGET_MESHLETS_PER_GROUP: usize = 8;

/// Groups keeping more than this fraction of their indices are rejected
pub const SIMPLIFICATION_FAILURE_RATIO: f32 = 0.95;

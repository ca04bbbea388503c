//! Meshlet pipeline errors

use thiserror::Error;

/// Errors raised while turning a triangle mesh into a meshlet LOD DAG
#[derive(Error, Debug)]
pub enum MeshletError {
    #[error("Index count {0} is not a multiple of 3")]
    IndexCountNotTriangles(usize),

    #[error("Index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("Attribute stream '{stream}' has {len} entries, expected {expected}")]
    AttributeLengthMismatch {
        stream: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("Graph partitioning failed: {0}")]
    Partition(String),

    #[error("Vertex data rejected: {0}")]
    VertexData(String),

    #[error("Inconsistent meshlet mesh: {0}")]
    InconsistentMesh(String),
}

/// Result type for meshlet operations
pub type MeshletResult<T> = Result<T, MeshletError>;

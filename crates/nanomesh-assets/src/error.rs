//! Asset errors

use std::path::PathBuf;

use nanomesh_meshlet::MeshletError;
use thiserror::Error;

use crate::device::ResourceError;

/// Asset errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed glTF source: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("Meshlet build failed: {0}")]
    Meshlet(#[from] MeshletError),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Unexpected end of data: needed {needed} bytes at offset {offset}, {available} available")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Format version mismatch for '{name}': file has {found}, expected {expected}")]
    VersionMismatch {
        name: String,
        found: u32,
        expected: u32,
    },

    #[error("Texture {texture} is used as both sRGB and linear data")]
    ConflictingTextureUsage { texture: usize },

    #[error("Unsupported texture format: {0}")]
    UnsupportedTexture(String),

    #[error("Unknown manifest index {index} in {registry}")]
    UnknownManifestIndex { registry: &'static str, index: usize },

    #[error("GPU resource error: {0}")]
    Resource(#[from] ResourceError),
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

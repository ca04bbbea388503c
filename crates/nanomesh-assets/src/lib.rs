//! # Nanomesh Assets
//!
//! Everything between a source model and geometry resident on a device:
//! - **Import**: glTF models converted into `.bmesh`, `.btexture` and
//!   `.bmodel` artifacts, one meshlet LOD DAG per primitive
//! - **Formats**: versioned, LZ4-compressed binary artifacts
//! - **Loading**: per-primitive load tasks feeding upload queues
//! - **Manifest**: append-only registries of assets, meshes, mesh groups,
//!   textures and materials, mirrored on the device by [`GpuScene`]
//! - **Streaming**: feedback-driven texture residency with a cooldown

pub mod binary;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod fs;
pub mod gpu_scene;
pub mod import;
pub mod loader;
pub mod manifest;
pub mod texture;
pub mod upload;

pub use config::{AssetConfig, TextureStreamingConfig};
pub use device::{BufferDescriptor, BufferId, BufferUsage, DeviceStats, GpuDevice, HostDevice, ResourceError};
pub use error::{AssetError, AssetResult};
pub use format::{
    ColorSpace, MESH_EXTENSION, MODEL_EXTENSION, ModelAsset, TEXTURE_EXTENSION, TextureAsset, TextureUsage,
    read_artifact, write_artifact,
};
pub use gpu_scene::{FlushStats, GpuMirror, GpuScene};
pub use import::{ConversionReport, PrimitiveReport, convert_gltf};
pub use loader::{AssetLoader, LoadedModel, UploadSummary};
pub use manifest::{AssetManifest, ManifestStats, MeshStatus};
pub use texture::TextureStreamer;
pub use upload::{GpuMeshGeometry, MeshBufferLayout, upload_meshlet_mesh};

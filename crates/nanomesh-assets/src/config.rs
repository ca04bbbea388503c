//! Asset pipeline configuration

use std::path::PathBuf;

use nanomesh_meshlet::MeshletBuildConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AssetError, AssetResult};

/// Texture streaming parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureStreamingConfig {
    /// Consecutive frames a lower request must persist before a texture shrinks
    pub cooldown_threshold: u32,
    /// Smallest resolution ever requested
    pub min_resolution: u32,
    /// Largest resolution ever requested
    pub max_resolution: u32,
}

impl Default for TextureStreamingConfig {
    fn default() -> Self {
        Self {
            cooldown_threshold: 30,
            min_resolution: 16,
            max_resolution: 4096,
        }
    }
}

/// Asset pipeline settings, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory relative asset paths resolve against
    pub asset_root: PathBuf,
    /// Load workers
    pub worker_threads: usize,
    /// Texture streaming
    pub texture_streaming: TextureStreamingConfig,
    /// Meshlet conversion
    pub meshlet: MeshletBuildConfig,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("."),
            worker_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            texture_streaming: TextureStreamingConfig::default(),
            meshlet: MeshletBuildConfig::default(),
        }
    }
}

impl AssetConfig {
    /// Parse settings from JSON; absent fields keep their defaults
    pub fn from_json(json: &str) -> AssetResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| AssetError::InvalidData(format!("settings: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> AssetResult<()> {
        let streaming = &self.texture_streaming;
        if self.worker_threads == 0 {
            return Err(AssetError::InvalidData("worker_threads must be at least 1".into()));
        }
        if streaming.min_resolution == 0 || streaming.min_resolution > streaming.max_resolution {
            return Err(AssetError::InvalidData(format!(
                "texture resolution range {}..={} is empty",
                streaming.min_resolution, streaming.max_resolution
            )));
        }
        self.meshlet.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AssetConfig::default();
        assert!(config.worker_threads >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = AssetConfig::from_json(
            r#"{ "worker_threads": 2, "texture_streaming": { "cooldown_threshold": 5 }, "meshlet": { "max_lod_iterations": 8 } }"#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.texture_streaming.cooldown_threshold, 5);
        assert_eq!(config.texture_streaming.max_resolution, 4096);
        assert_eq!(config.meshlet.max_lod_iterations, 8);
        assert_eq!(config.meshlet.max_vertices, 64);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(AssetConfig::from_json(r#"{ "worker_threads": 0 }"#).is_err());
        assert!(
            AssetConfig::from_json(r#"{ "texture_streaming": { "min_resolution": 64, "max_resolution": 32 } }"#)
                .is_err()
        );
        assert!(AssetConfig::from_json(r#"{ "meshlet": { "max_triangles": 7 } }"#).is_err());
        assert!(AssetConfig::from_json("not json").is_err());
    }
}

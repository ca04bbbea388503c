//! Textures
//!
//! Mip chain generation for converted textures, and the streaming state that
//! decides which resolution each texture should be resident at.
//!
//! Streaming follows the per-material feedback the renderer reads back each
//! frame. Increases are applied at once; decreases wait until the lower
//! request has persisted for longer than the cooldown threshold, so a camera
//! hovering around a mip boundary does not thrash the loader.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::TextureStreamingConfig;
use crate::error::{AssetError, AssetResult};
use crate::format::MipLevel;

/// Build a box-filtered RGBA8 mip chain, largest level first
pub fn generate_mips(width: u32, height: u32, rgba: Vec<u8>) -> AssetResult<Vec<MipLevel>> {
    if width == 0 || height == 0 || rgba.len() as u64 != width as u64 * height as u64 * 4 {
        return Err(AssetError::InvalidData(format!(
            "{width}x{height} texture with {} bytes of RGBA8",
            rgba.len()
        )));
    }

    let mut mips = vec![MipLevel {
        width,
        height,
        data: rgba,
    }];
    while let Some(last) = mips.last() {
        if last.width == 1 && last.height == 1 {
            break;
        }
        let next = downsample(last);
        mips.push(next);
    }
    Ok(mips)
}

fn downsample(source: &MipLevel) -> MipLevel {
    let width = (source.width / 2).max(1);
    let height = (source.height / 2).max(1);
    let mut data = Vec::with_capacity((width * height * 4) as usize);

    let texel = |x: u32, y: u32, channel: usize| -> u32 {
        let x = x.min(source.width - 1);
        let y = y.min(source.height - 1);
        source.data[((y * source.width + x) * 4) as usize + channel] as u32
    };

    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = (x * 2, y * 2);
            for channel in 0..4 {
                let sum = texel(sx, sy, channel)
                    + texel(sx + 1, sy, channel)
                    + texel(sx, sy + 1, channel)
                    + texel(sx + 1, sy + 1, channel);
                data.push(((sum + 2) / 4) as u8);
            }
        }
    }

    MipLevel { width, height, data }
}

/// In-flight marker shared between the streamer and one load task.
///
/// Only the task holding the flag clears it: explicitly through
/// [`LoadingFlag::finish`], or when the task drops it, panicking included.
#[derive(Debug)]
pub struct LoadingFlag(Arc<AtomicBool>);

impl LoadingFlag {
    /// Mark the load as finished
    pub fn finish(self) {}
}

impl Drop for LoadingFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A load the streamer wants dispatched
#[derive(Debug)]
pub struct StreamRequest {
    /// Texture registry index
    pub texture: u32,
    /// Longest side of the wanted mip
    pub resolution: u32,
    /// Cleared by the load task on completion
    pub loading: LoadingFlag,
}

#[derive(Debug)]
struct StreamedTexture {
    /// Longest side of the source image
    native_resolution: u32,
    /// Resolution of the last dispatched load
    target_resolution: u32,
    /// Resolution of the last completed load
    resident_resolution: u32,
    /// Consecutive updates with a lower request
    cooldown: u32,
    loading: Arc<AtomicBool>,
}

/// Per-texture residency decisions
#[derive(Debug)]
pub struct TextureStreamer {
    config: TextureStreamingConfig,
    textures: Vec<StreamedTexture>,
    /// Textures referenced by each material
    material_textures: Vec<Vec<u32>>,
}

impl TextureStreamer {
    /// Create an empty streamer
    pub fn new(config: TextureStreamingConfig) -> Self {
        Self {
            config,
            textures: Vec::new(),
            material_textures: Vec::new(),
        }
    }

    /// Track a texture; indices follow registration order
    pub fn register_texture(&mut self, native_resolution: u32) -> u32 {
        self.textures.push(StreamedTexture {
            native_resolution: native_resolution.max(1),
            target_resolution: 0,
            resident_resolution: 0,
            cooldown: 0,
            loading: Arc::new(AtomicBool::new(false)),
        });
        (self.textures.len() - 1) as u32
    }

    /// Track a material and the textures it samples; indices follow
    /// registration order
    pub fn register_material(&mut self, textures: impl IntoIterator<Item = u32>) -> u32 {
        self.material_textures.push(textures.into_iter().collect());
        (self.material_textures.len() - 1) as u32
    }

    /// Number of tracked textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Resolution of the last completed load of a texture
    pub fn resident_resolution(&self, texture: u32) -> Option<u32> {
        self.textures.get(texture as usize).map(|t| t.resident_resolution)
    }

    /// Check whether a load of the texture is in flight
    pub fn is_loading(&self, texture: u32) -> bool {
        self.textures
            .get(texture as usize)
            .is_some_and(|t| t.loading.load(Ordering::Acquire))
    }

    /// Record a finished load
    pub fn mark_resident(&mut self, texture: u32, resolution: u32) {
        if let Some(entry) = self.textures.get_mut(texture as usize) {
            entry.resident_resolution = resolution;
        }
    }

    /// Record a failed load so the next update asks again
    pub fn mark_failed(&mut self, texture: u32) {
        if let Some(entry) = self.textures.get_mut(texture as usize) {
            entry.target_resolution = entry.resident_resolution;
        }
    }

    /// Wanted resolution per texture: the maximum feedback over the
    /// materials that sample it, clamped and rounded up to a power of two.
    fn requested_resolutions(&self, feedback: &[u32]) -> Vec<u32> {
        let mut requested = vec![0u32; self.textures.len()];
        for (material, textures) in self.material_textures.iter().enumerate() {
            let wanted = feedback.get(material).copied().unwrap_or(0);
            for &texture in textures {
                if let Some(slot) = requested.get_mut(texture as usize) {
                    *slot = (*slot).max(wanted);
                }
            }
        }

        requested
            .iter()
            .zip(&self.textures)
            .map(|(&wanted, texture)| {
                let ceiling = self.config.max_resolution.min(texture.native_resolution.next_power_of_two());
                wanted
                    .max(self.config.min_resolution)
                    .next_power_of_two()
                    .min(ceiling)
            })
            .collect()
    }

    /// Consume one frame of material feedback and return the loads to start.
    ///
    /// `feedback[m]` is the resolution material `m` was sampled at, `0` when
    /// it was not visible.
    pub fn update(&mut self, feedback: &[u32]) -> Vec<StreamRequest> {
        let requested = self.requested_resolutions(feedback);
        let threshold = self.config.cooldown_threshold;
        let mut requests = Vec::new();

        for (index, (texture, resolution)) in self.textures.iter_mut().zip(requested).enumerate() {
            if texture.loading.load(Ordering::Acquire) {
                continue;
            }

            let trigger = if resolution > texture.target_resolution {
                true
            } else if resolution < texture.target_resolution {
                texture.cooldown += 1;
                texture.cooldown > threshold
            } else {
                texture.cooldown = 0;
                false
            };

            if trigger {
                texture.cooldown = 0;
                texture.target_resolution = resolution;
                texture.loading.store(true, Ordering::Release);
                requests.push(StreamRequest {
                    texture: index as u32,
                    resolution,
                    loading: LoadingFlag(Arc::clone(&texture.loading)),
                });
            }
        }

        if !requests.is_empty() {
            log::debug!("texture streaming: {} loads requested", requests.len());
        }
        requests
    }
}

//! GPU scene
//!
//! Device-side mirrors of the manifest registries. A mirror only ever grows:
//! when the registry outgrows it, a buffer of twice the capacity is created,
//! the uploaded prefix is copied over and the old buffer released. Each flush
//! uploads the tail appended since the previous flush and rewrites the
//! entries the manifest marked dirty.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::device::{BufferDescriptor, BufferId, GpuDevice, ResourceError};
use crate::error::AssetResult;
use crate::manifest::{AssetManifest, GpuMaterialRecord, GpuMeshGroupRecord, GpuMeshRecord, GpuTextureRecord};

const MIN_CAPACITY: usize = 16;

/// What one mirror sync did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MirrorSync {
    /// The backing buffer was reallocated
    pub grown: bool,
    /// Entries appended since the previous sync
    pub appended: usize,
    /// Previously uploaded entries rewritten
    pub rewritten: usize,
}

/// Device copy of one append-only registry
#[derive(Debug)]
pub struct GpuMirror<T: Pod> {
    label: &'static str,
    buffer: Option<BufferId>,
    /// Capacity in elements
    capacity: usize,
    /// Entries already on the device
    uploaded: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuMirror<T> {
    /// Create an empty mirror; no buffer exists until the first sync
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            buffer: None,
            capacity: 0,
            uploaded: 0,
            _marker: PhantomData,
        }
    }

    /// Backing buffer, once created
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Capacity in elements
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries on the device
    pub fn len(&self) -> usize {
        self.uploaded
    }

    /// Check if nothing has been uploaded
    pub fn is_empty(&self) -> bool {
        self.uploaded == 0
    }

    fn element_size() -> u64 {
        std::mem::size_of::<T>() as u64
    }

    fn grow(&mut self, device: &dyn GpuDevice, required: usize) -> Result<(), ResourceError> {
        let mut capacity = self.capacity.max(MIN_CAPACITY);
        while capacity < required {
            capacity *= 2;
        }

        let size = capacity as u64 * Self::element_size();
        let buffer = device.create_buffer(&BufferDescriptor::storage(self.label, size))?;
        if let Some(old) = self.buffer {
            let copied = self.uploaded as u64 * Self::element_size();
            if copied > 0 {
                if let Err(err) = device.copy_buffer(old, 0, buffer, 0, copied) {
                    device.destroy_buffer(buffer)?;
                    return Err(err);
                }
            }
            device.destroy_buffer(old)?;
        }

        log::debug!("{} mirror grown {} -> {capacity} entries", self.label, self.capacity);
        self.buffer = Some(buffer);
        self.capacity = capacity;
        Ok(())
    }

    /// Bring the device copy up to date with `records`.
    ///
    /// `dirty` lists indices changed since the last sync; indices beyond the
    /// previously uploaded prefix are covered by the tail upload.
    pub fn sync(&mut self, device: &dyn GpuDevice, records: &[T], dirty: &[u32]) -> Result<MirrorSync, ResourceError> {
        let mut result = MirrorSync::default();
        if records.len() < self.uploaded {
            // Registries are append-only; a shorter snapshot has nothing new
            return Ok(result);
        }

        if records.len() > self.capacity || self.buffer.is_none() {
            self.grow(device, records.len())?;
            result.grown = true;
        }
        let Some(buffer) = self.buffer else {
            return Ok(result);
        };

        let size = Self::element_size();
        for &index in dirty {
            let index = index as usize;
            if index < self.uploaded {
                device.write_buffer(buffer, index as u64 * size, bytemuck::bytes_of(&records[index]))?;
                result.rewritten += 1;
            }
        }

        let tail = &records[self.uploaded..];
        if !tail.is_empty() {
            device.write_buffer(buffer, self.uploaded as u64 * size, bytemuck::cast_slice(tail))?;
            result.appended = tail.len();
        }
        self.uploaded = records.len();
        Ok(result)
    }

    /// Release the backing buffer
    pub fn release(&mut self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer)?;
        }
        self.capacity = 0;
        self.uploaded = 0;
        Ok(())
    }
}

/// What one flush did, per registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct FlushStats {
    pub meshes: MirrorSync,
    pub mesh_groups: MirrorSync,
    pub mesh_indices: MirrorSync,
    pub textures: MirrorSync,
    pub materials: MirrorSync,
}

/// Every manifest registry mirrored on the device
#[derive(Debug)]
pub struct GpuScene {
    pub meshes: GpuMirror<GpuMeshRecord>,
    pub mesh_groups: GpuMirror<GpuMeshGroupRecord>,
    pub mesh_indices: GpuMirror<u32>,
    pub textures: GpuMirror<GpuTextureRecord>,
    pub materials: GpuMirror<GpuMaterialRecord>,
}

impl Default for GpuScene {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuScene {
    /// Create empty mirrors
    pub fn new() -> Self {
        Self {
            meshes: GpuMirror::new("meshes"),
            mesh_groups: GpuMirror::new("mesh_groups"),
            mesh_indices: GpuMirror::new("mesh_indices"),
            textures: GpuMirror::new("textures"),
            materials: GpuMirror::new("materials"),
        }
    }

    /// Upload everything the manifest gained or changed since the last flush.
    ///
    /// The manifest's dirty lists are cleared on success and restored when
    /// a device operation fails.
    pub fn flush(&mut self, device: &dyn GpuDevice, manifest: &AssetManifest) -> AssetResult<FlushStats> {
        let dirty = manifest.take_dirty();
        match self.sync_all(device, manifest, &dirty.meshes, &dirty.mesh_groups, &dirty.textures) {
            Ok(stats) => Ok(stats),
            Err(err) => {
                manifest.restore_dirty(dirty);
                Err(err.into())
            }
        }
    }

    fn sync_all(
        &mut self,
        device: &dyn GpuDevice,
        manifest: &AssetManifest,
        dirty_meshes: &[u32],
        dirty_mesh_groups: &[u32],
        dirty_textures: &[u32],
    ) -> Result<FlushStats, ResourceError> {
        Ok(FlushStats {
            meshes: self.meshes.sync(device, &manifest.mesh_records(), dirty_meshes)?,
            mesh_groups: self
                .mesh_groups
                .sync(device, &manifest.mesh_group_records(), dirty_mesh_groups)?,
            mesh_indices: self.mesh_indices.sync(device, &manifest.mesh_index_records(), &[])?,
            textures: self.textures.sync(device, &manifest.texture_records(), dirty_textures)?,
            materials: self.materials.sync(device, &manifest.material_records(), &[])?,
        })
    }

    /// Release every mirror buffer
    pub fn release(&mut self, device: &dyn GpuDevice) -> Result<(), ResourceError> {
        self.meshes.release(device)?;
        self.mesh_groups.release(device)?;
        self.mesh_indices.release(device)?;
        self.textures.release(device)?;
        self.materials.release(device)
    }
}

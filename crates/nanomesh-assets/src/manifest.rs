//! Asset manifest
//!
//! CPU-side bookkeeping of everything loaded: append-only registries for
//! assets, meshes, mesh groups, the flattened mesh-index array, textures and
//! materials. Every slot a model needs is reserved in one step before any
//! load task is dispatched, so tasks own disjoint slots and indices never
//! move. Meshes, mesh groups and textures that change after registration are
//! recorded as dirty until the next GPU flush takes them.

use std::ops::Range;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use nanomesh_core::AppendArena;
use parking_lot::Mutex;

use crate::device::BufferId;
use crate::error::{AssetError, AssetResult};
use crate::format::{ColorSpace, ModelAsset, ModelMaterial};
use crate::upload::GpuMeshGeometry;

/// Marks an absent index in GPU records
pub const INVALID_INDEX: u32 = u32::MAX;

/// Buffer handle as stored in GPU records; handles past `u32` read as absent
fn buffer_index(buffer: BufferId) -> u32 {
    u32::try_from(buffer.0).unwrap_or(INVALID_INDEX)
}

fn range_u32(range: Range<usize>) -> Range<u32> {
    range.start as u32..range.end as u32
}

/// One loaded model
#[derive(Debug, Clone, PartialEq)]
pub struct AssetEntry {
    pub path: PathBuf,
    pub mesh_groups: Range<u32>,
    pub meshes: Range<u32>,
    pub textures: Range<u32>,
    pub materials: Range<u32>,
    pub unloaded: bool,
}

impl Default for AssetEntry {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            mesh_groups: 0..0,
            meshes: 0..0,
            textures: 0..0,
            materials: 0..0,
            unloaded: false,
        }
    }
}

/// Load state of a mesh slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MeshStatus {
    /// Load task dispatched, no result yet
    #[default]
    Pending,
    /// Geometry uploaded
    Resident(GpuMeshGeometry),
    /// Load task failed
    Failed(String),
    /// Geometry released with its asset
    Unloaded,
}

/// One processed primitive
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshEntry {
    pub asset: u32,
    pub mesh_group: u32,
    /// Global material index
    pub material: Option<u32>,
    pub mesh_file: PathBuf,
    pub status: MeshStatus,
}

impl MeshEntry {
    /// Geometry of a resident mesh
    pub fn geometry(&self) -> Option<&GpuMeshGeometry> {
        match &self.status {
            MeshStatus::Resident(geometry) => Some(geometry),
            _ => None,
        }
    }
}

/// One source mesh: a run of the mesh-index array
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshGroupEntry {
    pub asset: u32,
    pub name: String,
    /// Range in the flattened mesh-index array
    pub mesh_indices: Range<u32>,
}

/// One texture slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureEntry {
    pub asset: u32,
    pub path: PathBuf,
    pub color_space: ColorSpace,
    pub width: u32,
    pub height: u32,
    pub buffer: Option<BufferId>,
    pub resident_resolution: u32,
}

impl Default for TextureEntry {
    fn default() -> Self {
        Self {
            asset: 0,
            path: PathBuf::new(),
            color_space: ColorSpace::Srgb,
            width: 0,
            height: 0,
            buffer: None,
            resident_resolution: 0,
        }
    }
}

/// One material, texture indices global
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaterialEntry {
    pub asset: u32,
    pub material: ModelMaterial,
}

/// GPU record of a mesh
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMeshRecord {
    pub buffer: u32,
    pub material: u32,
    pub meshlet_count: u32,
    pub triangle_count: u32,
    pub vertex_count: u32,
    /// Section offsets in upload order
    pub section_offsets: [u32; 9],
}

/// GPU record of a mesh group
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMeshGroupRecord {
    pub first_mesh_index: u32,
    pub mesh_count: u32,
}

/// GPU record of a texture
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuTextureRecord {
    pub buffer: u32,
    pub resolution: u32,
    pub width: u32,
    pub height: u32,
    /// 0 sRGB, 1 linear
    pub color_space: u32,
}

/// GPU record of a material
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterialRecord {
    pub base_color_factor: [f32; 4],
    pub emissive_factor: [f32; 3],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    /// Base colour, normal, metallic-roughness, emissive, occlusion
    pub textures: [u32; 5],
}

impl MeshEntry {
    fn gpu_record(&self) -> GpuMeshRecord {
        let material = self.material.unwrap_or(INVALID_INDEX);
        match self.geometry() {
            Some(geometry) => {
                let mut section_offsets = [0u32; 9];
                for (slot, section) in section_offsets.iter_mut().zip(geometry.layout.sections()) {
                    *slot = section.offset as u32;
                }
                GpuMeshRecord {
                    buffer: buffer_index(geometry.buffer),
                    material,
                    meshlet_count: geometry.meshlet_count,
                    triangle_count: geometry.triangle_count,
                    vertex_count: geometry.vertex_count,
                    section_offsets,
                }
            }
            None => GpuMeshRecord {
                buffer: INVALID_INDEX,
                material,
                ..GpuMeshRecord::zeroed()
            },
        }
    }
}

impl MeshGroupEntry {
    fn gpu_record(&self) -> GpuMeshGroupRecord {
        GpuMeshGroupRecord {
            first_mesh_index: self.mesh_indices.start,
            mesh_count: self.mesh_indices.end - self.mesh_indices.start,
        }
    }
}

impl TextureEntry {
    fn gpu_record(&self) -> GpuTextureRecord {
        GpuTextureRecord {
            buffer: self.buffer.map_or(INVALID_INDEX, buffer_index),
            resolution: self.resident_resolution,
            width: self.width,
            height: self.height,
            color_space: match self.color_space {
                ColorSpace::Srgb => 0,
                ColorSpace::Linear => 1,
            },
        }
    }
}

impl MaterialEntry {
    fn gpu_record(&self) -> GpuMaterialRecord {
        let material = &self.material;
        let mut textures = [INVALID_INDEX; 5];
        for (slot, (_, texture)) in textures.iter_mut().zip(material.texture_slots()) {
            *slot = texture.unwrap_or(INVALID_INDEX);
        }
        GpuMaterialRecord {
            base_color_factor: material.base_color_factor.to_array(),
            emissive_factor: material.emissive_factor.to_array(),
            metallic_factor: material.metallic_factor,
            roughness_factor: material.roughness_factor,
            textures,
        }
    }
}

/// Slots reserved for one model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSlots {
    pub asset: u32,
    pub mesh_groups: Range<u32>,
    pub meshes: Range<u32>,
    pub textures: Range<u32>,
    pub materials: Range<u32>,
}

impl ModelSlots {
    /// Global index of a model-local mesh group
    pub fn mesh_group(&self, local: u32) -> u32 {
        self.mesh_groups.start + local
    }
}

/// Indices changed since the last flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    pub meshes: Vec<u32>,
    pub mesh_groups: Vec<u32>,
    pub textures: Vec<u32>,
}

impl DirtySet {
    /// Check if nothing changed
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.mesh_groups.is_empty() && self.textures.is_empty()
    }
}

/// Registry sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ManifestStats {
    pub assets: usize,
    pub meshes: usize,
    pub mesh_groups: usize,
    pub mesh_indices: usize,
    pub textures: usize,
    pub materials: usize,
    pub resident_meshes: usize,
    pub failed_meshes: usize,
    pub pending_meshes: usize,
}

/// Append-only registries of loaded assets
#[derive(Debug, Default)]
pub struct AssetManifest {
    assets: AppendArena<AssetEntry>,
    meshes: AppendArena<MeshEntry>,
    mesh_groups: AppendArena<MeshGroupEntry>,
    mesh_indices: AppendArena<u32>,
    textures: AppendArena<TextureEntry>,
    materials: AppendArena<MaterialEntry>,
    /// Serializes whole-model reservations
    registration: Mutex<()>,
    dirty: Mutex<DirtySet>,
}

impl AssetManifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve every slot a model needs.
    ///
    /// Model-local indices in mesh groups, materials and primitives are
    /// rebased onto the global registries; `.bmesh`/`.btexture` names resolve
    /// against `model_dir`.
    pub fn register_model(&self, path: &Path, model: &ModelAsset, model_dir: &Path) -> ModelSlots {
        let _guard = self.registration.lock();

        let asset = self.assets.len() as u32;
        let texture_base = self.textures.len() as u32;
        let material_base = self.materials.len() as u32;
        let mesh_group_base = self.mesh_groups.len() as u32;

        let textures = self.textures.extend(model.textures.iter().map(|texture| TextureEntry {
            asset,
            path: model_dir.join(&texture.texture_file),
            color_space: texture.color_space,
            width: texture.width,
            height: texture.height,
            buffer: None,
            resident_resolution: 0,
        }));

        let rebase = |texture: Option<u32>| texture.map(|t| t + texture_base);
        let materials = self.materials.extend(model.materials.iter().map(|material| MaterialEntry {
            asset,
            material: ModelMaterial {
                base_color_texture: rebase(material.base_color_texture),
                normal_texture: rebase(material.normal_texture),
                metallic_roughness_texture: rebase(material.metallic_roughness_texture),
                emissive_texture: rebase(material.emissive_texture),
                occlusion_texture: rebase(material.occlusion_texture),
                ..material.clone()
            },
        }));

        let first_mesh = self.meshes.len();
        let mut groups = Vec::with_capacity(model.mesh_groups.len());
        for (local, group) in model.mesh_groups.iter().enumerate() {
            let mesh_group = mesh_group_base + local as u32;
            let meshes = self.meshes.extend(group.primitives.iter().map(|primitive| MeshEntry {
                asset,
                mesh_group,
                material: primitive.material.map(|m| m + material_base),
                mesh_file: model_dir.join(&primitive.mesh_file),
                status: MeshStatus::Pending,
            }));
            let mesh_indices = self.mesh_indices.extend(meshes.map(|m| m as u32));
            groups.push(MeshGroupEntry {
                asset,
                name: group.name.clone(),
                mesh_indices: range_u32(mesh_indices),
            });
        }
        let mesh_groups = self.mesh_groups.extend(groups);
        let meshes = first_mesh..self.meshes.len();

        let slots = ModelSlots {
            asset,
            mesh_groups: range_u32(mesh_groups),
            meshes: range_u32(meshes),
            textures: range_u32(textures),
            materials: range_u32(materials),
        };
        self.assets.push(AssetEntry {
            path: path.to_path_buf(),
            mesh_groups: slots.mesh_groups.clone(),
            meshes: slots.meshes.clone(),
            textures: slots.textures.clone(),
            materials: slots.materials.clone(),
            unloaded: false,
        });

        log::debug!(
            "registered '{}' as asset {asset}: {} meshes, {} textures, {} materials",
            path.display(),
            slots.meshes.len(),
            slots.textures.len(),
            slots.materials.len()
        );
        slots
    }

    /// Get an asset entry
    pub fn asset(&self, index: u32) -> AssetResult<AssetEntry> {
        self.assets.get(index as usize).ok_or(AssetError::UnknownManifestIndex {
            registry: "assets",
            index: index as usize,
        })
    }

    /// Get a mesh entry
    pub fn mesh(&self, index: u32) -> AssetResult<MeshEntry> {
        self.meshes.get(index as usize).ok_or(AssetError::UnknownManifestIndex {
            registry: "meshes",
            index: index as usize,
        })
    }

    /// Get a mesh group entry
    pub fn mesh_group(&self, index: u32) -> AssetResult<MeshGroupEntry> {
        self.mesh_groups.get(index as usize).ok_or(AssetError::UnknownManifestIndex {
            registry: "mesh_groups",
            index: index as usize,
        })
    }

    /// Get a texture entry
    pub fn texture(&self, index: u32) -> AssetResult<TextureEntry> {
        self.textures.get(index as usize).ok_or(AssetError::UnknownManifestIndex {
            registry: "textures",
            index: index as usize,
        })
    }

    /// Get a material entry
    pub fn material(&self, index: u32) -> AssetResult<MaterialEntry> {
        self.materials.get(index as usize).ok_or(AssetError::UnknownManifestIndex {
            registry: "materials",
            index: index as usize,
        })
    }

    /// Global mesh indices of a mesh group
    pub fn mesh_group_meshes(&self, index: u32) -> AssetResult<Vec<u32>> {
        let group = self.mesh_group(index)?;
        Ok(self
            .mesh_indices
            .snapshot(group.mesh_indices.start as usize..group.mesh_indices.end as usize))
    }

    /// Set the load state of a mesh and mark it and its group dirty.
    ///
    /// Returns the previous state.
    pub fn set_mesh_status(&self, index: u32, status: MeshStatus) -> AssetResult<MeshStatus> {
        let mut previous = None;
        let mut mesh_group = 0;
        let found = self.meshes.update(index as usize, |entry| {
            previous = Some(std::mem::replace(&mut entry.status, status));
            mesh_group = entry.mesh_group;
        });
        if !found {
            return Err(AssetError::UnknownManifestIndex {
                registry: "meshes",
                index: index as usize,
            });
        }

        let mut dirty = self.dirty.lock();
        dirty.meshes.push(index);
        dirty.mesh_groups.push(mesh_group);
        Ok(previous.unwrap_or_default())
    }

    /// Record a resident texture buffer; returns the buffer it replaces
    pub fn set_texture_buffer(
        &self,
        index: u32,
        buffer: Option<BufferId>,
        resolution: u32,
    ) -> AssetResult<Option<BufferId>> {
        let mut previous = None;
        let found = self.textures.update(index as usize, |entry| {
            previous = std::mem::replace(&mut entry.buffer, buffer);
            entry.resident_resolution = resolution;
        });
        if !found {
            return Err(AssetError::UnknownManifestIndex {
                registry: "textures",
                index: index as usize,
            });
        }
        self.dirty.lock().textures.push(index);
        Ok(previous)
    }

    /// Flag an asset as unloaded
    pub fn mark_unloaded(&self, index: u32) -> AssetResult<AssetEntry> {
        if !self.assets.update(index as usize, |entry| entry.unloaded = true) {
            return Err(AssetError::UnknownManifestIndex {
                registry: "assets",
                index: index as usize,
            });
        }
        self.asset(index)
    }

    /// Check whether the asset owning a mesh was unloaded
    pub fn is_unloaded(&self, asset: u32) -> bool {
        self.assets.with(asset as usize, |entry| entry.unloaded).unwrap_or(true)
    }

    /// Take the dirty lists, leaving them empty.
    ///
    /// Indices are sorted and deduplicated.
    pub fn take_dirty(&self) -> DirtySet {
        let mut dirty = std::mem::take(&mut *self.dirty.lock());
        for list in [&mut dirty.meshes, &mut dirty.mesh_groups, &mut dirty.textures] {
            list.sort_unstable();
            list.dedup();
        }
        dirty
    }

    /// Put back dirty lists a failed flush could not apply
    pub fn restore_dirty(&self, restored: DirtySet) {
        let mut dirty = self.dirty.lock();
        dirty.meshes.extend(restored.meshes);
        dirty.mesh_groups.extend(restored.mesh_groups);
        dirty.textures.extend(restored.textures);
    }

    /// GPU records of every mesh
    pub fn mesh_records(&self) -> Vec<GpuMeshRecord> {
        self.meshes.snapshot(0..self.meshes.len()).iter().map(MeshEntry::gpu_record).collect()
    }

    /// GPU records of every mesh group
    pub fn mesh_group_records(&self) -> Vec<GpuMeshGroupRecord> {
        self.mesh_groups
            .snapshot(0..self.mesh_groups.len())
            .iter()
            .map(MeshGroupEntry::gpu_record)
            .collect()
    }

    /// The flattened mesh-index array
    pub fn mesh_index_records(&self) -> Vec<u32> {
        self.mesh_indices.snapshot(0..self.mesh_indices.len())
    }

    /// GPU records of every texture
    pub fn texture_records(&self) -> Vec<GpuTextureRecord> {
        self.textures
            .snapshot(0..self.textures.len())
            .iter()
            .map(TextureEntry::gpu_record)
            .collect()
    }

    /// GPU records of every material
    pub fn material_records(&self) -> Vec<GpuMaterialRecord> {
        self.materials
            .snapshot(0..self.materials.len())
            .iter()
            .map(MaterialEntry::gpu_record)
            .collect()
    }

    /// Registry sizes and mesh load states
    pub fn stats(&self) -> ManifestStats {
        let meshes = self.meshes.snapshot(0..self.meshes.len());
        let count = |f: fn(&MeshStatus) -> bool| meshes.iter().filter(|m| f(&m.status)).count();
        ManifestStats {
            assets: self.assets.len(),
            meshes: meshes.len(),
            mesh_groups: self.mesh_groups.len(),
            mesh_indices: self.mesh_indices.len(),
            textures: self.textures.len(),
            materials: self.materials.len(),
            resident_meshes: count(|s| matches!(s, MeshStatus::Resident(_))),
            failed_meshes: count(|s| matches!(s, MeshStatus::Failed(_))),
            pending_meshes: count(|s| matches!(s, MeshStatus::Pending)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::{ModelMeshGroup, ModelPrimitive, ModelTexture};
    use crate::upload::MeshBufferLayout;

    pub(crate) fn two_group_model() -> ModelAsset {
        let primitive = |material: Option<u32>, file: &str| ModelPrimitive {
            material,
            mesh_file: file.to_string(),
        };
        ModelAsset {
            nodes: Vec::new(),
            root_nodes: Vec::new(),
            mesh_groups: vec![
                ModelMeshGroup {
                    name: "body".into(),
                    primitives: vec![primitive(Some(0), "a.bmesh"), primitive(None, "b.bmesh")],
                },
                ModelMeshGroup {
                    name: "wheel".into(),
                    primitives: vec![primitive(Some(0), "c.bmesh")],
                },
            ],
            textures: vec![ModelTexture {
                texture_file: "paint.btexture".into(),
                color_space: ColorSpace::Srgb,
                width: 64,
                height: 64,
            }],
            materials: vec![ModelMaterial {
                name: "paint".into(),
                base_color_texture: Some(0),
                ..Default::default()
            }],
        }
    }

    pub(crate) fn geometry(buffer: usize) -> GpuMeshGeometry {
        GpuMeshGeometry {
            buffer: BufferId(buffer),
            layout: MeshBufferLayout::default(),
            meshlet_count: 4,
            triangle_count: 100,
            vertex_count: 80,
        }
    }

    #[test]
    fn test_registration_rebases_indices() {
        let manifest = AssetManifest::new();
        let model = two_group_model();
        let first = manifest.register_model(Path::new("a.bmodel"), &model, Path::new("assets"));
        let second = manifest.register_model(Path::new("b.bmodel"), &model, Path::new("assets"));

        assert_eq!(first.meshes, 0..3);
        assert_eq!(second.asset, 1);
        assert_eq!(second.meshes, 3..6);
        assert_eq!(second.mesh_groups, 2..4);
        assert_eq!(second.mesh_group(1), 3);

        let mesh = manifest.mesh(3).unwrap();
        assert_eq!(mesh.material, Some(1));
        assert_eq!(mesh.mesh_file, Path::new("assets").join("a.bmesh"));
        assert_eq!(manifest.mesh_group_meshes(3).unwrap(), vec![5]);

        let material = manifest.material(1).unwrap();
        assert_eq!(material.material.base_color_texture, Some(1));
        assert_eq!(manifest.texture(1).unwrap().path, Path::new("assets").join("paint.btexture"));

        let stats = manifest.stats();
        assert_eq!((stats.assets, stats.meshes, stats.mesh_indices), (2, 6, 6));
        assert_eq!(stats.pending_meshes, 6);
    }

    #[test]
    fn test_unknown_indices() {
        let manifest = AssetManifest::new();
        assert!(matches!(
            manifest.mesh(0),
            Err(AssetError::UnknownManifestIndex { registry: "meshes", index: 0 })
        ));
        assert!(manifest.set_mesh_status(7, MeshStatus::Unloaded).is_err());
        assert!(manifest.set_texture_buffer(0, None, 0).is_err());
    }

    #[test]
    fn test_status_changes_mark_dirty() {
        let manifest = AssetManifest::new();
        manifest.register_model(Path::new("a.bmodel"), &two_group_model(), Path::new("."));

        manifest.set_mesh_status(1, MeshStatus::Resident(geometry(7))).unwrap();
        manifest.set_mesh_status(0, MeshStatus::Failed("missing".into())).unwrap();
        manifest.set_mesh_status(1, MeshStatus::Resident(geometry(8))).unwrap();

        let dirty = manifest.take_dirty();
        assert_eq!(dirty.meshes, vec![0, 1]);
        assert_eq!(dirty.mesh_groups, vec![0]);
        assert!(manifest.take_dirty().is_empty());

        let record = manifest.mesh_records()[1];
        assert_eq!(record.buffer, 8);
        assert_eq!(record.meshlet_count, 4);
        assert_eq!(manifest.mesh_records()[0].buffer, INVALID_INDEX);

        let stats = manifest.stats();
        assert_eq!((stats.resident_meshes, stats.failed_meshes, stats.pending_meshes), (1, 1, 1));
    }

    #[test]
    fn test_oversized_buffer_handles_are_not_truncated() {
        let manifest = AssetManifest::new();
        manifest.register_model(Path::new("a.bmodel"), &two_group_model(), Path::new("."));

        manifest.set_mesh_status(0, MeshStatus::Resident(geometry(usize::MAX))).unwrap();
        manifest.set_texture_buffer(0, Some(BufferId(usize::MAX)), 64).unwrap();
        assert_eq!(manifest.mesh_records()[0].buffer, INVALID_INDEX);
        assert_eq!(manifest.texture_records()[0].buffer, INVALID_INDEX);

        manifest.set_texture_buffer(0, Some(BufferId(12)), 64).unwrap();
        assert_eq!(manifest.texture_records()[0].buffer, 12);
    }

    #[test]
    fn test_material_and_group_records() {
        let manifest = AssetManifest::new();
        manifest.register_model(Path::new("a.bmodel"), &two_group_model(), Path::new("."));

        let groups = manifest.mesh_group_records();
        assert_eq!(groups[1].first_mesh_index, 2);
        assert_eq!(groups[1].mesh_count, 1);

        let material = manifest.material_records()[0];
        assert_eq!(material.textures, [0, INVALID_INDEX, INVALID_INDEX, INVALID_INDEX, INVALID_INDEX]);
        assert_eq!(material.base_color_factor, [1.0; 4]);
    }
}

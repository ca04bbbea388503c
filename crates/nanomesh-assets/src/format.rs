//! On-disk artifacts
//!
//! Every artifact is `lz4(header ++ payload)` where the header is the
//! artifact name plus a format version. The version is checked on read and a
//! mismatch is an error; there is no migration.

use std::path::Path;

use nanomesh_core::math::{BoundingBox, Quat, Vec3, Vec4};
use nanomesh_core::scene::Transform;
use nanomesh_meshlet::MeshletMesh;
use serde::{Deserialize, Serialize};

use crate::binary::{BinaryReader, BinarySerialize, BinaryWriter, compress, decompress};
use crate::error::{AssetError, AssetResult};

/// Processed mesh extension
pub const MESH_EXTENSION: &str = "bmesh";
/// Model extension
pub const MODEL_EXTENSION: &str = "bmodel";
/// Texture extension
pub const TEXTURE_EXTENSION: &str = "btexture";

/// Artifact identity written in front of every payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHeader {
    pub name: String,
    pub version: u32,
}

impl BinarySerialize for AssetHeader {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_str(&self.name);
        writer.write_pod(&self.version);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
            version: reader.read_pod()?,
        })
    }
}

/// A payload type stored as its own artifact
pub trait Artifact: BinarySerialize {
    /// Current format version
    const VERSION: u32;
}

/// Serialize, compress and return the artifact bytes
pub fn encode_artifact<T: Artifact>(name: &str, payload: &T) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.write(&AssetHeader {
        name: name.to_string(),
        version: T::VERSION,
    });
    writer.write(payload);
    compress(&writer.into_bytes())
}

/// Decompress and parse artifact bytes, rejecting other format versions
pub fn decode_artifact<T: Artifact>(bytes: &[u8]) -> AssetResult<(AssetHeader, T)> {
    let data = decompress(bytes)?;
    let mut reader = BinaryReader::new(&data);
    let header: AssetHeader = reader.read()?;
    if header.version != T::VERSION {
        return Err(AssetError::VersionMismatch {
            name: header.name,
            found: header.version,
            expected: T::VERSION,
        });
    }
    let payload = reader.read()?;
    if !reader.is_at_end() {
        return Err(AssetError::InvalidData(format!(
            "{} trailing bytes after '{}'",
            reader.remaining(),
            header.name
        )));
    }
    Ok((header, payload))
}

/// Write an artifact file
pub fn write_artifact<T: Artifact>(path: &Path, name: &str, payload: &T) -> AssetResult<()> {
    std::fs::write(path, encode_artifact(name, payload))?;
    Ok(())
}

/// Read an artifact file
pub fn read_artifact<T: Artifact>(path: &Path) -> AssetResult<(AssetHeader, T)> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    decode_artifact(&bytes)
}

impl BinarySerialize for MeshletMesh {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_pod(&self.aabb);
        writer.write_slice(&self.positions);
        writer.write_slice(&self.normals);
        writer.write_slice(&self.uvs);
        writer.write_slice(&self.meshlets);
        writer.write_slice(&self.bounding_spheres);
        writer.write_slice(&self.simplification_errors);
        writer.write_slice(&self.aabbs);
        writer.write_slice(&self.micro_indices);
        writer.write_slice(&self.indirect_vertices);
        writer.write_slice(&self.lod_level_offsets);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        let mesh = Self {
            aabb: reader.read_pod::<BoundingBox>()?,
            positions: reader.read_slice()?,
            normals: reader.read_slice()?,
            uvs: reader.read_slice()?,
            meshlets: reader.read_slice()?,
            bounding_spheres: reader.read_slice()?,
            simplification_errors: reader.read_slice()?,
            aabbs: reader.read_slice()?,
            micro_indices: reader.read_slice()?,
            indirect_vertices: reader.read_slice()?,
            lod_level_offsets: reader.read_slice()?,
        };
        mesh.validate().map_err(|err| AssetError::InvalidData(err.to_string()))?;
        Ok(mesh)
    }
}

impl Artifact for MeshletMesh {
    const VERSION: u32 = 1;
}

/// Colour space of texel data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    Srgb,
    Linear,
}

impl BinarySerialize for ColorSpace {
    fn write(&self, writer: &mut BinaryWriter) {
        let tag: u8 = match self {
            ColorSpace::Srgb => 0,
            ColorSpace::Linear => 1,
        };
        writer.write_pod(&tag);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        match reader.read_pod::<u8>()? {
            0 => Ok(ColorSpace::Srgb),
            1 => Ok(ColorSpace::Linear),
            tag => Err(AssetError::InvalidData(format!("invalid colour space {tag}"))),
        }
    }
}

/// Material channel a texture is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureUsage {
    BaseColor,
    Normal,
    MetallicRoughness,
    Emissive,
    Occlusion,
}

impl TextureUsage {
    /// Colour space the channel samples in
    pub fn color_space(self) -> ColorSpace {
        match self {
            TextureUsage::BaseColor | TextureUsage::Emissive => ColorSpace::Srgb,
            TextureUsage::Normal | TextureUsage::MetallicRoughness | TextureUsage::Occlusion => {
                ColorSpace::Linear
            }
        }
    }

    fn tag(self) -> u8 {
        match self {
            TextureUsage::BaseColor => 0,
            TextureUsage::Normal => 1,
            TextureUsage::MetallicRoughness => 2,
            TextureUsage::Emissive => 3,
            TextureUsage::Occlusion => 4,
        }
    }
}

impl BinarySerialize for TextureUsage {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_pod(&self.tag());
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        match reader.read_pod::<u8>()? {
            0 => Ok(TextureUsage::BaseColor),
            1 => Ok(TextureUsage::Normal),
            2 => Ok(TextureUsage::MetallicRoughness),
            3 => Ok(TextureUsage::Emissive),
            4 => Ok(TextureUsage::Occlusion),
            tag => Err(AssetError::InvalidData(format!("invalid texture usage {tag}"))),
        }
    }
}

/// One level of a texture mip chain, tightly packed RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl BinarySerialize for MipLevel {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_pod(&self.width);
        writer.write_pod(&self.height);
        writer.write_slice(&self.data);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        let width: u32 = reader.read_pod()?;
        let height: u32 = reader.read_pod()?;
        let data: Vec<u8> = reader.read_slice()?;
        if data.len() as u64 != width as u64 * height as u64 * 4 {
            return Err(AssetError::InvalidData(format!(
                "mip {width}x{height} holds {} bytes",
                data.len()
            )));
        }
        Ok(Self { width, height, data })
    }
}

/// Texture artifact: the full mip chain, largest level first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureAsset {
    pub color_space: ColorSpace,
    pub mips: Vec<MipLevel>,
}

impl TextureAsset {
    /// Size of the largest level
    pub fn dimensions(&self) -> (u32, u32) {
        self.mips.first().map(|m| (m.width, m.height)).unwrap_or((0, 0))
    }

    /// Largest level whose longest side does not exceed `resolution`,
    /// or the smallest level when none fits.
    pub fn mip_for_resolution(&self, resolution: u32) -> Option<&MipLevel> {
        self.mips
            .iter()
            .find(|mip| mip.width.max(mip.height) <= resolution)
            .or_else(|| self.mips.last())
    }
}

impl BinarySerialize for TextureAsset {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write(&self.color_space);
        writer.write_vec(&self.mips);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            color_space: reader.read()?,
            mips: reader.read()?,
        })
    }
}

impl Artifact for TextureAsset {
    const VERSION: u32 = 1;
}

impl BinarySerialize for Transform {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_pod(&self.position);
        writer.write_pod(&self.rotation);
        writer.write_pod(&self.scale);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Transform::new(
            reader.read_pod::<Vec3>()?,
            reader.read_pod::<Quat>()?,
            reader.read_pod::<Vec3>()?,
        ))
    }
}

/// Node of a model hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct ModelNode {
    pub name: String,
    pub transform: Transform,
    /// Index into [`ModelAsset::mesh_groups`]
    pub mesh_group: Option<u32>,
    /// Indices into [`ModelAsset::nodes`]
    pub children: Vec<u32>,
}

impl BinarySerialize for ModelNode {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_str(&self.name);
        writer.write(&self.transform);
        writer.write(&self.mesh_group);
        writer.write_slice(&self.children);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
            transform: reader.read()?,
            mesh_group: reader.read()?,
            children: reader.read_slice()?,
        })
    }
}

/// One processed primitive of a mesh group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPrimitive {
    /// Index into [`ModelAsset::materials`]
    pub material: Option<u32>,
    /// `.bmesh` file name, relative to the model file
    pub mesh_file: String,
}

impl BinarySerialize for ModelPrimitive {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write(&self.material);
        writer.write_str(&self.mesh_file);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            material: reader.read()?,
            mesh_file: reader.read_string()?,
        })
    }
}

/// A source mesh: the primitives drawn together by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeshGroup {
    pub name: String,
    pub primitives: Vec<ModelPrimitive>,
}

impl BinarySerialize for ModelMeshGroup {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_str(&self.name);
        writer.write_vec(&self.primitives);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
            primitives: reader.read()?,
        })
    }
}

/// Texture reference of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTexture {
    /// `.btexture` file name, relative to the model file
    pub texture_file: String,
    /// Colour space every referencing channel agrees on
    pub color_space: ColorSpace,
    /// Size of the largest mip
    pub width: u32,
    pub height: u32,
}

impl BinarySerialize for ModelTexture {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_str(&self.texture_file);
        writer.write(&self.color_space);
        writer.write_pod(&self.width);
        writer.write_pod(&self.height);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            texture_file: reader.read_string()?,
            color_space: reader.read()?,
            width: reader.read_pod()?,
            height: reader.read_pod()?,
        })
    }
}

/// Metallic-roughness material
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMaterial {
    pub name: String,
    pub base_color_factor: Vec4,
    pub emissive_factor: Vec3,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    /// Indices into [`ModelAsset::textures`]
    pub base_color_texture: Option<u32>,
    pub normal_texture: Option<u32>,
    pub metallic_roughness_texture: Option<u32>,
    pub emissive_texture: Option<u32>,
    pub occlusion_texture: Option<u32>,
}

impl Default for ModelMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: Vec4::ONE,
            emissive_factor: Vec3::ZERO,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            base_color_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            emissive_texture: None,
            occlusion_texture: None,
        }
    }
}

impl ModelMaterial {
    /// Texture bound to each channel
    pub fn texture_slots(&self) -> [(TextureUsage, Option<u32>); 5] {
        [
            (TextureUsage::BaseColor, self.base_color_texture),
            (TextureUsage::Normal, self.normal_texture),
            (TextureUsage::MetallicRoughness, self.metallic_roughness_texture),
            (TextureUsage::Emissive, self.emissive_texture),
            (TextureUsage::Occlusion, self.occlusion_texture),
        ]
    }
}

impl BinarySerialize for ModelMaterial {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_str(&self.name);
        writer.write_pod(&self.base_color_factor);
        writer.write_pod(&self.emissive_factor);
        writer.write_pod(&self.metallic_factor);
        writer.write_pod(&self.roughness_factor);
        for (_, texture) in self.texture_slots() {
            writer.write(&texture);
        }
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        Ok(Self {
            name: reader.read_string()?,
            base_color_factor: reader.read_pod()?,
            emissive_factor: reader.read_pod()?,
            metallic_factor: reader.read_pod()?,
            roughness_factor: reader.read_pod()?,
            base_color_texture: reader.read()?,
            normal_texture: reader.read()?,
            metallic_roughness_texture: reader.read()?,
            emissive_texture: reader.read()?,
            occlusion_texture: reader.read()?,
        })
    }
}

/// Model artifact
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelAsset {
    pub nodes: Vec<ModelNode>,
    /// Indices of the top-level nodes
    pub root_nodes: Vec<u32>,
    pub mesh_groups: Vec<ModelMeshGroup>,
    pub textures: Vec<ModelTexture>,
    pub materials: Vec<ModelMaterial>,
}

impl ModelAsset {
    /// Total primitives over all mesh groups
    pub fn primitive_count(&self) -> usize {
        self.mesh_groups.iter().map(|g| g.primitives.len()).sum()
    }

    /// Check every cross reference
    pub fn validate(&self) -> AssetResult<()> {
        let check = |what: &str, index: u32, len: usize| {
            if (index as usize) < len {
                Ok(())
            } else {
                Err(AssetError::InvalidData(format!("{what} index {index} out of {len}")))
            }
        };

        for &root in &self.root_nodes {
            check("root node", root, self.nodes.len())?;
        }
        for node in &self.nodes {
            for &child in &node.children {
                check("child node", child, self.nodes.len())?;
            }
            if let Some(group) = node.mesh_group {
                check("mesh group", group, self.mesh_groups.len())?;
            }
        }
        for primitive in self.mesh_groups.iter().flat_map(|g| &g.primitives) {
            if let Some(material) = primitive.material {
                check("material", material, self.materials.len())?;
            }
        }
        for material in &self.materials {
            for texture in material.texture_slots().into_iter().filter_map(|(_, t)| t) {
                check("texture", texture, self.textures.len())?;
            }
        }
        Ok(())
    }
}

impl BinarySerialize for ModelAsset {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_vec(&self.nodes);
        writer.write_slice(&self.root_nodes);
        writer.write_vec(&self.mesh_groups);
        writer.write_vec(&self.textures);
        writer.write_vec(&self.materials);
    }

    fn read(reader: &mut BinaryReader<'_>) -> AssetResult<Self> {
        let model = Self {
            nodes: reader.read()?,
            root_nodes: reader.read_slice()?,
            mesh_groups: reader.read()?,
            textures: reader.read()?,
            materials: reader.read()?,
        };
        model.validate()?;
        Ok(model)
    }
}

impl Artifact for ModelAsset {
    const VERSION: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanomesh_meshlet::{MeshletBuildConfig, RawMesh, build_meshlet_mesh};

    fn processed_sphere_patch() -> MeshletMesh {
        let n = 12;
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                let (u, v) = (x as f32 / n as f32, y as f32 / n as f32);
                let (theta, phi) = (u * std::f32::consts::PI, v * std::f32::consts::FRAC_PI_2);
                positions.push(Vec3::new(theta.cos() * phi.cos(), phi.sin(), theta.sin() * phi.cos()));
                uvs.push(nanomesh_core::math::Vec2::new(u, v));
            }
        }
        let mut indices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                indices.extend_from_slice(&[i, i + 1, i + n + 1, i + 1, i + n + 2, i + n + 1]);
            }
        }
        let normals = positions.iter().map(|p| p.normalize_or_zero()).collect();
        let raw = RawMesh {
            positions,
            normals,
            uvs,
            indices: Some(indices),
        };
        build_meshlet_mesh(&raw, &MeshletBuildConfig::default()).unwrap().0
    }

    #[test]
    fn test_mesh_round_trip_is_byte_exact() {
        let mesh = processed_sphere_patch();
        assert!(mesh.meshlet_count() >= 1);

        let bytes = encode_artifact("patch", &mesh);
        let (header, decoded): (AssetHeader, MeshletMesh) = decode_artifact(&bytes).unwrap();
        assert_eq!(header.name, "patch");
        assert_eq!(header.version, MeshletMesh::VERSION);

        // Bit-level comparison covers the +inf parent errors of root meshlets
        assert_eq!(
            bytemuck::cast_slice::<_, u8>(&decoded.simplification_errors),
            bytemuck::cast_slice::<_, u8>(&mesh.simplification_errors)
        );
        assert_eq!(decoded, mesh);
        assert_eq!(encode_artifact("patch", &decoded), bytes);
    }

    #[test]
    fn test_inconsistent_mesh_is_rejected() {
        let mut mesh = processed_sphere_patch();
        let meshlet_count = mesh.meshlet_count() as u32;
        mesh.lod_level_offsets.push(meshlet_count + 3);
        let bytes = encode_artifact("corrupt", &mesh);
        assert!(matches!(
            decode_artifact::<MeshletMesh>(&bytes),
            Err(AssetError::InvalidData(_))
        ));

        let mut mesh = processed_sphere_patch();
        mesh.simplification_errors.pop();
        let bytes = encode_artifact("corrupt", &mesh);
        assert!(matches!(
            decode_artifact::<MeshletMesh>(&bytes),
            Err(AssetError::InvalidData(_))
        ));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut writer = BinaryWriter::new();
        writer.write(&AssetHeader {
            name: "old".into(),
            version: MeshletMesh::VERSION + 1,
        });
        writer.write(&MeshletMesh::default());
        let bytes = compress(&writer.into_bytes());

        assert!(matches!(
            decode_artifact::<MeshletMesh>(&bytes),
            Err(AssetError::VersionMismatch { found: 2, expected: 1, .. })
        ));
    }

    #[test]
    fn test_model_round_trip() {
        let model = ModelAsset {
            nodes: vec![
                ModelNode {
                    name: "root".into(),
                    transform: Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
                    mesh_group: None,
                    children: vec![1],
                },
                ModelNode {
                    name: "child".into(),
                    transform: Transform::IDENTITY,
                    mesh_group: Some(0),
                    children: vec![],
                },
            ],
            root_nodes: vec![0],
            mesh_groups: vec![ModelMeshGroup {
                name: "mesh".into(),
                primitives: vec![ModelPrimitive {
                    material: Some(0),
                    mesh_file: "mesh.bmesh".into(),
                }],
            }],
            textures: vec![ModelTexture {
                texture_file: "albedo.btexture".into(),
                color_space: ColorSpace::Srgb,
                width: 256,
                height: 128,
            }],
            materials: vec![ModelMaterial {
                name: "paint".into(),
                base_color_texture: Some(0),
                ..Default::default()
            }],
        };

        let bytes = encode_artifact("model", &model);
        let (_, decoded): (_, ModelAsset) = decode_artifact(&bytes).unwrap();
        assert_eq!(decoded, model);
        assert_eq!(decoded.primitive_count(), 1);
    }

    #[test]
    fn test_model_with_dangling_reference_is_rejected() {
        let model = ModelAsset {
            root_nodes: vec![3],
            ..Default::default()
        };
        let bytes = encode_artifact("broken", &model);
        assert!(matches!(
            decode_artifact::<ModelAsset>(&bytes),
            Err(AssetError::InvalidData(_))
        ));
    }

    #[test]
    fn test_texture_mip_selection() {
        let texture = TextureAsset {
            color_space: ColorSpace::Linear,
            mips: [8u32, 4, 2, 1]
                .iter()
                .map(|&s| MipLevel {
                    width: s,
                    height: s,
                    data: vec![0; (s * s * 4) as usize],
                })
                .collect(),
        };
        assert_eq!(texture.dimensions(), (8, 8));
        assert_eq!(texture.mip_for_resolution(16).unwrap().width, 8);
        assert_eq!(texture.mip_for_resolution(5).unwrap().width, 4);
        assert_eq!(texture.mip_for_resolution(0).unwrap().width, 1);

        let bytes = encode_artifact("tex", &texture);
        let (_, decoded): (_, TextureAsset) = decode_artifact(&bytes).unwrap();
        assert_eq!(decoded, texture);
    }
}

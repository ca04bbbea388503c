//! glTF conversion
//!
//! Converts a glTF model into a `.bmodel` plus one `.bmesh` per triangle
//! primitive and one `.btexture` per referenced image, all written beside the
//! source. Primitives are processed in parallel as the chunks of a single job.
//!
//! Malformed sources and textures shared between sRGB and linear material
//! channels are errors that abort the whole conversion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gltf::image::Format;
use gltf::mesh::Mode;
use nanomesh_core::math::{Quat, Vec2, Vec3, Vec4};
use nanomesh_core::scene::Transform;
use nanomesh_core::{Job, JobSystem};
use nanomesh_meshlet::{LodBuildReport, MeshletBuildConfig, MeshletMesh, RawMesh, build_meshlet_mesh};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{AssetError, AssetResult};
use crate::format::{
    ColorSpace, MESH_EXTENSION, MODEL_EXTENSION, ModelAsset, ModelMaterial, ModelMeshGroup, ModelNode, ModelPrimitive,
    ModelTexture, TEXTURE_EXTENSION, TextureAsset, TextureUsage, write_artifact,
};
use crate::fs::{file_name, unique_artifact_path};
use crate::texture::generate_mips;

/// Geometry of one triangle primitive, ready for meshlet building
#[derive(Debug, Clone)]
pub struct PrimitiveSource {
    pub mesh: usize,
    pub primitive: usize,
    pub name: String,
    pub raw: RawMesh,
}

/// Outcome of one converted primitive
#[derive(Debug, Clone, Serialize)]
pub struct PrimitiveReport {
    pub mesh: usize,
    pub primitive: usize,
    pub name: String,
    pub mesh_file: PathBuf,
    pub source_triangles: usize,
    pub meshlets: usize,
    pub lod_levels: usize,
    pub root_triangles: usize,
    pub max_error: f32,
    pub lod: LodBuildReport,
}

/// Outcome of a model conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub model_file: PathBuf,
    pub primitives: Vec<PrimitiveReport>,
    pub skipped_primitives: usize,
    pub textures: usize,
    pub materials: usize,
    pub nodes: usize,
}

/// Material channels of a glTF material with the image each one samples
fn material_channels(material: &gltf::Material<'_>) -> [(TextureUsage, Option<usize>); 5] {
    let pbr = material.pbr_metallic_roughness();
    [
        (
            TextureUsage::BaseColor,
            pbr.base_color_texture().map(|info| info.texture().source().index()),
        ),
        (
            TextureUsage::Normal,
            material.normal_texture().map(|t| t.texture().source().index()),
        ),
        (
            TextureUsage::MetallicRoughness,
            pbr.metallic_roughness_texture().map(|info| info.texture().source().index()),
        ),
        (
            TextureUsage::Emissive,
            material.emissive_texture().map(|info| info.texture().source().index()),
        ),
        (
            TextureUsage::Occlusion,
            material.occlusion_texture().map(|t| t.texture().source().index()),
        ),
    ]
}

/// Colour space of every image referenced by a material, `None` for
/// unreferenced images.
///
/// An image sampled by both an sRGB and a linear channel is rejected.
pub fn resolve_texture_usage(document: &gltf::Document) -> AssetResult<Vec<Option<ColorSpace>>> {
    let mut spaces = vec![None; document.images().len()];
    for material in document.materials() {
        for (usage, image) in material_channels(&material) {
            let Some(image) = image else { continue };
            let wanted = usage.color_space();
            match spaces[image] {
                None => spaces[image] = Some(wanted),
                Some(existing) if existing == wanted => {}
                Some(_) => return Err(AssetError::ConflictingTextureUsage { texture: image }),
            }
        }
    }
    Ok(spaces)
}

/// Expand decoded image data to tightly packed RGBA8
fn to_rgba8(image: &gltf::image::Data) -> AssetResult<Vec<u8>> {
    let pixels = &image.pixels;
    let high_byte = |chunk: &[u8]| (u16::from_ne_bytes([chunk[0], chunk[1]]) >> 8) as u8;
    let rgba = match image.format {
        Format::R8 => pixels.iter().flat_map(|&r| [r, r, r, 255]).collect(),
        Format::R8G8 => pixels.chunks_exact(2).flat_map(|c| [c[0], c[1], 0, 255]).collect(),
        Format::R8G8B8 => pixels.chunks_exact(3).flat_map(|c| [c[0], c[1], c[2], 255]).collect(),
        Format::R8G8B8A8 => pixels.clone(),
        Format::R16 => pixels
            .chunks_exact(2)
            .flat_map(|c| {
                let r = high_byte(c);
                [r, r, r, 255]
            })
            .collect(),
        Format::R16G16B16A16 => pixels.chunks_exact(2).map(high_byte).collect(),
        other => return Err(AssetError::UnsupportedTexture(format!("{other:?}"))),
    };
    Ok(rgba)
}

/// Read one triangle primitive; positions are required, missing normals
/// default to +Z and missing UVs to zero.
fn read_primitive(primitive: &gltf::Primitive<'_>, buffers: &[gltf::buffer::Data]) -> AssetResult<RawMesh> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

    let positions: Vec<Vec3> = reader
        .read_positions()
        .ok_or_else(|| AssetError::InvalidData(format!("primitive {} has no positions", primitive.index())))?
        .map(Vec3::from)
        .collect();
    let normals = match reader.read_normals() {
        Some(normals) => normals.map(Vec3::from).collect(),
        None => vec![Vec3::Z; positions.len()],
    };
    let uvs = match reader.read_tex_coords(0) {
        Some(uvs) => uvs.into_f32().map(Vec2::from).collect(),
        None => vec![Vec2::ZERO; positions.len()],
    };
    let indices = reader.read_indices().map(|indices| indices.into_u32().collect());

    let raw = RawMesh {
        positions,
        normals,
        uvs,
        indices,
    };
    raw.validate()?;
    Ok(raw)
}

/// Collect every triangle primitive; returns the sources and the number of
/// skipped non-triangle primitives.
pub fn collect_primitives(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
) -> AssetResult<(Vec<PrimitiveSource>, usize)> {
    let mut sources = Vec::new();
    let mut skipped = 0;
    for mesh in document.meshes() {
        let mesh_name = mesh.name().map_or_else(|| format!("mesh{}", mesh.index()), str::to_string);
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                log::warn!(
                    "skipping primitive {} of '{mesh_name}': {:?} topology",
                    primitive.index(),
                    primitive.mode()
                );
                skipped += 1;
                continue;
            }
            sources.push(PrimitiveSource {
                mesh: mesh.index(),
                primitive: primitive.index(),
                name: format!("{mesh_name}-{}", primitive.index()),
                raw: read_primitive(&primitive, buffers)?,
            });
        }
    }
    Ok((sources, skipped))
}

/// Build and write one primitive's meshlet mesh
fn convert_primitive(
    source: &PrimitiveSource,
    config: &MeshletBuildConfig,
    output_dir: &Path,
) -> AssetResult<PrimitiveReport> {
    let (mesh, lod) = build_meshlet_mesh(&source.raw, config)?;
    let path = unique_artifact_path(output_dir, &source.name, MESH_EXTENSION);
    write_artifact(&path, &source.name, &mesh)?;

    Ok(PrimitiveReport {
        mesh: source.mesh,
        primitive: source.primitive,
        name: source.name.clone(),
        mesh_file: path,
        source_triangles: source.raw.triangle_count(),
        meshlets: mesh.meshlet_count(),
        lod_levels: mesh.lod_level_count(),
        root_triangles: mesh
            .lod_level_count()
            .checked_sub(1)
            .map_or(0, |level| mesh.triangle_count_at_level(level)),
        max_error: max_group_error(&mesh),
        lod,
    })
}

fn max_group_error(mesh: &MeshletMesh) -> f32 {
    mesh.simplification_errors
        .iter()
        .map(|e| e.group_error)
        .fold(0.0, f32::max)
}

/// Every primitive of a model as the chunks of one job
struct ConvertPrimitivesJob {
    sources: Vec<PrimitiveSource>,
    config: MeshletBuildConfig,
    output_dir: PathBuf,
    results: Mutex<Vec<Option<AssetResult<PrimitiveReport>>>>,
}

impl Job for ConvertPrimitivesJob {
    fn execute(&self, chunk_index: u32, _chunk_count: u32) {
        let source = &self.sources[chunk_index as usize];
        let result = convert_primitive(source, &self.config, &self.output_dir);
        if let Err(err) = &result {
            log::error!("failed to convert '{}': {err}", source.name);
        }
        self.results.lock()[chunk_index as usize] = Some(result);
    }

    fn chunk_count(&self) -> u32 {
        self.sources.len() as u32
    }

    fn name(&self) -> &str {
        "convert_primitives"
    }
}

/// Run every primitive through the meshlet pipeline on the job system
pub fn convert_primitives(
    jobs: &JobSystem,
    sources: Vec<PrimitiveSource>,
    config: &MeshletBuildConfig,
    output_dir: &Path,
) -> AssetResult<Vec<PrimitiveReport>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let count = sources.len();
    let job = Arc::new(ConvertPrimitivesJob {
        sources,
        config: config.clone(),
        output_dir: output_dir.to_path_buf(),
        results: Mutex::new((0..count).map(|_| None).collect()),
    });
    jobs.submit_arc(job.clone()).wait();

    let results = std::mem::take(&mut *job.results.lock());
    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| {
            result.unwrap_or_else(|| Err(AssetError::InvalidData(format!("conversion of primitive {index} panicked"))))
        })
        .collect()
}

/// Convert every referenced image into a `.btexture`
fn convert_textures(
    images: &[gltf::image::Data],
    spaces: &[Option<ColorSpace>],
    output_dir: &Path,
    stem: &str,
) -> AssetResult<(Vec<ModelTexture>, Vec<Option<u32>>)> {
    let mut textures = Vec::new();
    let mut remap = vec![None; spaces.len()];

    for (image_index, space) in spaces.iter().enumerate() {
        let Some(color_space) = *space else { continue };
        let image = images.get(image_index).ok_or_else(|| {
            AssetError::InvalidData(format!("image {image_index} referenced but not decoded"))
        })?;

        let mips = generate_mips(image.width, image.height, to_rgba8(image)?)?;
        let asset = TextureAsset { color_space, mips };
        let name = format!("{stem}-image{image_index}");
        let path = unique_artifact_path(output_dir, &name, TEXTURE_EXTENSION);
        write_artifact(&path, &name, &asset)?;

        remap[image_index] = Some(textures.len() as u32);
        textures.push(ModelTexture {
            texture_file: file_name(&path)?,
            color_space,
            width: image.width,
            height: image.height,
        });
    }
    Ok((textures, remap))
}

/// Model materials with image indices remapped onto converted textures
fn convert_materials(document: &gltf::Document, texture_remap: &[Option<u32>]) -> Vec<ModelMaterial> {
    document
        .materials()
        .map(|material| {
            let pbr = material.pbr_metallic_roughness();
            let mut converted = ModelMaterial {
                name: material.name().unwrap_or_default().to_string(),
                base_color_factor: Vec4::from(pbr.base_color_factor()),
                emissive_factor: Vec3::from(material.emissive_factor()),
                metallic_factor: pbr.metallic_factor(),
                roughness_factor: pbr.roughness_factor(),
                ..Default::default()
            };
            for (usage, image) in material_channels(&material) {
                let texture = image.and_then(|i| texture_remap.get(i).copied().flatten());
                match usage {
                    TextureUsage::BaseColor => converted.base_color_texture = texture,
                    TextureUsage::Normal => converted.normal_texture = texture,
                    TextureUsage::MetallicRoughness => converted.metallic_roughness_texture = texture,
                    TextureUsage::Emissive => converted.emissive_texture = texture,
                    TextureUsage::Occlusion => converted.occlusion_texture = texture,
                }
            }
            converted
        })
        .collect()
}

/// Node hierarchy and root list
fn convert_nodes(document: &gltf::Document) -> (Vec<ModelNode>, Vec<u32>) {
    let nodes = document
        .nodes()
        .map(|node| {
            let (translation, rotation, scale) = node.transform().decomposed();
            ModelNode {
                name: node.name().map_or_else(|| format!("node{}", node.index()), str::to_string),
                transform: Transform::new(
                    Vec3::from(translation),
                    Quat::from_array(rotation),
                    Vec3::from(scale),
                ),
                mesh_group: node.mesh().map(|mesh| mesh.index() as u32),
                children: node.children().map(|child| child.index() as u32).collect(),
            }
        })
        .collect::<Vec<_>>();

    let roots = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().map(|node| node.index() as u32).collect(),
        None => {
            // No scene: every node nobody lists as a child is a root
            let mut is_child = vec![false; nodes.len()];
            for child in nodes.iter().flat_map(|n: &ModelNode| &n.children) {
                is_child[*child as usize] = true;
            }
            (0..nodes.len() as u32).filter(|&i| !is_child[i as usize]).collect()
        }
    };
    (nodes, roots)
}

/// Convert `source` into binary artifacts.
///
/// Artifacts land beside the source; the model goes to `output` when given,
/// otherwise to a fresh name beside the source.
pub fn convert_gltf(
    jobs: &JobSystem,
    source: &Path,
    output: Option<&Path>,
    config: &MeshletBuildConfig,
) -> AssetResult<ConversionReport> {
    config.validate()?;
    let (document, buffers, images) = gltf::import(source)?;

    let output_dir = source.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();

    let spaces = resolve_texture_usage(&document)?;
    let (textures, texture_remap) = convert_textures(&images, &spaces, &output_dir, &stem)?;
    let materials = convert_materials(&document, &texture_remap);
    let (nodes, root_nodes) = convert_nodes(&document);

    let (sources, skipped_primitives) = collect_primitives(&document, &buffers)?;
    log::info!(
        "converting '{}': {} primitives, {} textures, {} materials",
        source.display(),
        sources.len(),
        textures.len(),
        materials.len()
    );

    // Remember which group each primitive belongs to before the job takes them
    let owners: Vec<(usize, Option<u32>)> = document
        .meshes()
        .flat_map(|mesh| {
            mesh.primitives()
                .filter(|p| p.mode() == Mode::Triangles)
                .map(move |p| (mesh.index(), p.material().index().map(|m| m as u32)))
        })
        .collect();
    let reports = convert_primitives(jobs, sources, config, &output_dir)?;

    let mut mesh_groups: Vec<ModelMeshGroup> = document
        .meshes()
        .map(|mesh| ModelMeshGroup {
            name: mesh.name().map_or_else(|| format!("mesh{}", mesh.index()), str::to_string),
            primitives: Vec::new(),
        })
        .collect();
    for ((mesh, material), report) in owners.into_iter().zip(&reports) {
        mesh_groups[mesh].primitives.push(ModelPrimitive {
            material,
            mesh_file: file_name(&report.mesh_file)?,
        });
    }

    let model = ModelAsset {
        nodes,
        root_nodes,
        mesh_groups,
        textures,
        materials,
    };
    model.validate()?;

    let model_file = match output {
        Some(path) => path.to_path_buf(),
        None => unique_artifact_path(&output_dir, &stem, MODEL_EXTENSION),
    };
    write_artifact(&model_file, &stem, &model)?;
    log::info!("wrote '{}'", model_file.display());

    Ok(ConversionReport {
        model_file,
        skipped_primitives,
        textures: model.textures.len(),
        materials: model.materials.len(),
        nodes: model.nodes.len(),
        primitives: reports,
    })
}

//! # Nanomesh CLI
//!
//! Command-line front end of the nanomesh asset pipeline.
//!
//! ## Commands
//! - `convert` - Convert a glTF model into meshlet LOD artifacts
//! - `inspect` - Summarize a `.bmesh` or `.bmodel` artifact
//! - `load` - Load a converted model into a host device and report

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use nanomesh_assets::device::DeviceStats;
use nanomesh_assets::loader::UploadSummary;
use nanomesh_assets::{
    AssetConfig, AssetLoader, ConversionReport, FlushStats, GpuScene, HostDevice, MESH_EXTENSION, MODEL_EXTENSION,
    ManifestStats, ModelAsset, convert_gltf, read_artifact,
};
use nanomesh_core::{JobSystem, SceneGraph};
use nanomesh_meshlet::MeshletMesh;

/// Nanomesh asset pipeline CLI
#[derive(Parser)]
#[command(name = "nanomesh")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Convert a glTF model into .bmodel, .bmesh and .btexture artifacts
    Convert {
        /// Source .gltf or .glb file
        model: PathBuf,

        /// JSON settings file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Output .bmodel path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize a converted artifact
    Inspect {
        /// A .bmesh or .bmodel file
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Load a converted model into a host device
    Load {
        /// A .bmodel file
        model: PathBuf,

        /// JSON settings file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Stream every texture at this resolution after loading
        #[arg(short, long)]
        texture_resolution: Option<u32>,
    },
}

/// Read settings from a JSON file, or use the defaults
pub fn load_settings(path: Option<&Path>) -> Result<AssetConfig> {
    let Some(path) = path else {
        return Ok(AssetConfig::default());
    };
    let json =
        std::fs::read_to_string(path).with_context(|| format!("failed to read settings '{}'", path.display()))?;
    AssetConfig::from_json(&json).with_context(|| format!("invalid settings '{}'", path.display()))
}

/// Meshlet and triangle counts of one DAG level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub level: usize,
    pub meshlets: usize,
    pub triangles: usize,
}

/// Summary of a `.bmesh`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshSummary {
    pub name: String,
    pub version: u32,
    pub vertices: usize,
    pub meshlets: usize,
    pub triangles: usize,
    pub levels: Vec<LevelSummary>,
    pub root_meshlets: usize,
    pub min_error: f32,
    pub max_error: f32,
    pub aabb_min: [f32; 3],
    pub aabb_max: [f32; 3],
}

impl MeshSummary {
    fn new(name: String, version: u32, mesh: &MeshletMesh) -> Self {
        let levels = (0..mesh.lod_level_count())
            .map(|level| LevelSummary {
                level,
                meshlets: mesh.lod_level(level).map_or(0, |range| range.len()),
                triangles: mesh.triangle_count_at_level(level),
            })
            .collect();
        let (min_error, max_error) = mesh
            .simplification_errors
            .iter()
            .map(|error| error.group_error)
            .fold((f32::INFINITY, 0.0f32), |(lo, hi), e| (lo.min(e), hi.max(e)));

        Self {
            name,
            version,
            vertices: mesh.vertex_count(),
            meshlets: mesh.meshlet_count(),
            triangles: mesh.triangle_count(),
            levels,
            root_meshlets: mesh.root_meshlets().count(),
            min_error: if min_error.is_finite() { min_error } else { 0.0 },
            max_error,
            aabb_min: mesh.aabb.min().to_array(),
            aabb_max: mesh.aabb.max().to_array(),
        }
    }
}

/// Summary of a `.bmodel`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub version: u32,
    pub nodes: usize,
    pub root_nodes: usize,
    pub mesh_groups: usize,
    pub primitives: usize,
    pub textures: usize,
    pub materials: usize,
}

/// What `inspect` reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InspectReport {
    Mesh(MeshSummary),
    Model(ModelSummary),
}

/// Summarize an artifact, chosen by extension
pub fn inspect_file(path: &Path) -> Result<InspectReport> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let report = if extension == MESH_EXTENSION {
        let (header, mesh): (_, MeshletMesh) =
            read_artifact(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        InspectReport::Mesh(MeshSummary::new(header.name, header.version, &mesh))
    } else if extension == MODEL_EXTENSION {
        let (header, model): (_, ModelAsset) =
            read_artifact(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        InspectReport::Model(ModelSummary {
            name: header.name,
            version: header.version,
            nodes: model.nodes.len(),
            root_nodes: model.root_nodes.len(),
            mesh_groups: model.mesh_groups.len(),
            primitives: model.primitive_count(),
            textures: model.textures.len(),
            materials: model.materials.len(),
        })
    } else {
        bail!(
            "'{}' is neither a .{MESH_EXTENSION} nor a .{MODEL_EXTENSION} file",
            path.display()
        );
    };
    Ok(report)
}

/// What `load` reports
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub nodes: usize,
    pub uploads: UploadSummary,
    pub flush: FlushStats,
    pub manifest: ManifestStats,
    pub device: DeviceStats,
}

/// Load a model into a fresh host device and flush the GPU scene
pub fn load_model(path: &Path, config: &AssetConfig, texture_resolution: Option<u32>) -> Result<LoadReport> {
    let device = Arc::new(HostDevice::new());
    let mut loader = AssetLoader::new(config, device.clone())?;
    let mut scene = SceneGraph::new();

    let loaded = loader
        .load_model(path, &mut scene, None)
        .with_context(|| format!("failed to load '{}'", path.display()))?;
    loader.wait_idle();
    let mut uploads = loader.process_uploads()?;

    if let Some(resolution) = texture_resolution {
        let feedback = vec![resolution; loader.manifest().stats().materials];
        let dispatched = loader.update_streaming(&feedback)?;
        log::info!("streaming {dispatched} textures at {resolution}");
        loader.wait_idle();
        let streamed = loader.process_uploads()?;
        uploads.textures_resident += streamed.textures_resident;
        uploads.textures_failed += streamed.textures_failed;
    }

    let mut gpu_scene = GpuScene::new();
    let flush = gpu_scene.flush(device.as_ref(), loader.manifest())?;

    Ok(LoadReport {
        nodes: loaded.node_count,
        uploads,
        flush,
        manifest: loader.manifest().stats(),
        device: device.stats(),
    })
}

fn print_conversion(report: &ConversionReport) {
    println!("model: {}", report.model_file.display());
    for primitive in &report.primitives {
        println!(
            "  {} ({}:{}): {} tris -> {} meshlets, {} levels, root {} tris, max error {:.6}, {:?}",
            primitive.name,
            primitive.mesh,
            primitive.primitive,
            primitive.source_triangles,
            primitive.meshlets,
            primitive.lod_levels,
            primitive.root_triangles,
            primitive.max_error,
            primitive.lod.stop_reason,
        );
    }
    println!(
        "  {} textures, {} materials, {} nodes, {} primitives skipped",
        report.textures, report.materials, report.nodes, report.skipped_primitives
    );
}

fn print_inspection(report: &InspectReport) {
    match report {
        InspectReport::Mesh(mesh) => {
            println!("mesh '{}' (v{})", mesh.name, mesh.version);
            println!(
                "  {} vertices, {} meshlets, {} triangles, {} roots",
                mesh.vertices, mesh.meshlets, mesh.triangles, mesh.root_meshlets
            );
            for level in &mesh.levels {
                println!(
                    "  level {}: {} meshlets, {} triangles",
                    level.level, level.meshlets, level.triangles
                );
            }
            println!("  error {:.6} .. {:.6}", mesh.min_error, mesh.max_error);
            println!("  aabb {:?} .. {:?}", mesh.aabb_min, mesh.aabb_max);
        }
        InspectReport::Model(model) => {
            println!("model '{}' (v{})", model.name, model.version);
            println!(
                "  {} nodes ({} roots), {} mesh groups, {} primitives",
                model.nodes, model.root_nodes, model.mesh_groups, model.primitives
            );
            println!("  {} textures, {} materials", model.textures, model.materials);
        }
    }
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Convert {
            model,
            settings,
            output,
        } => {
            let config = load_settings(settings.as_deref())?;
            let jobs = JobSystem::new(config.worker_threads)?;
            log::info!("Converting {}...", model.display());
            let report = convert_gltf(&jobs, &model, output.as_deref(), &config.meshlet)
                .with_context(|| format!("failed to convert '{}'", model.display()))?;
            print_conversion(&report);
        }

        Commands::Inspect { file, json } => {
            let report = inspect_file(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_inspection(&report);
            }
        }

        Commands::Load {
            model,
            settings,
            texture_resolution,
        } => {
            let config = load_settings(settings.as_deref())?;
            log::info!("Loading {}...", model.display());
            let report = load_model(&model, &config, texture_resolution)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.uploads.meshes_failed > 0 {
                log::warn!("{} meshes failed to load", report.uploads.meshes_failed);
            }
        }
    }

    Ok(())
}

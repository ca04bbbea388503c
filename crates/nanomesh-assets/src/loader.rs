//! Asset loading
//!
//! Loading a `.bmodel` reserves its manifest slots, instantiates its node
//! hierarchy and dispatches one task per primitive. Each task reads its
//! `.bmesh`, uploads it into a single device buffer and appends the outcome
//! to a shared queue that the owning thread drains once per frame. A failed
//! task is contained to its own mesh slot: the error is logged and recorded
//! in the manifest; every other task keeps running.
//!
//! Texture loads follow the same pattern through a second queue, driven by
//! the [`TextureStreamer`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nanomesh_core::scene::{NodeId, SceneGraph};
use nanomesh_core::{JobSystem, UploadQueue};
use nanomesh_meshlet::MeshletMesh;

use crate::config::AssetConfig;
use crate::device::{BufferDescriptor, BufferId, GpuDevice};
use crate::error::{AssetError, AssetResult};
use crate::format::{ModelAsset, TextureAsset, read_artifact};
use crate::fs::AssetRoot;
use crate::manifest::{AssetManifest, MeshStatus, ModelSlots};
use crate::texture::{StreamRequest, TextureStreamer};
use crate::upload::{GpuMeshGeometry, upload_meshlet_mesh};

/// Outcome of one mesh load task
#[derive(Debug)]
pub struct MeshLoadResult {
    /// Manifest mesh index the task was assigned
    pub mesh: u32,
    pub outcome: AssetResult<GpuMeshGeometry>,
}

/// Outcome of one texture load task
#[derive(Debug)]
pub struct TextureLoadResult {
    /// Manifest texture index
    pub texture: u32,
    /// Longest side of the uploaded mip
    pub resolution: u32,
    pub outcome: AssetResult<BufferId>,
}

/// A model instantiated into the scene
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub slots: ModelSlots,
    /// Scene nodes created for the model's root nodes
    pub root_nodes: Vec<NodeId>,
    /// Scene nodes created in total
    pub node_count: usize,
}

/// What one drain of the upload queues applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct UploadSummary {
    pub meshes_resident: usize,
    pub meshes_failed: usize,
    pub textures_resident: usize,
    pub textures_failed: usize,
    /// Results for assets unloaded while their task ran
    pub discarded: usize,
}

fn load_mesh(device: &dyn GpuDevice, path: &Path) -> AssetResult<GpuMeshGeometry> {
    let (header, mesh): (_, MeshletMesh) = read_artifact(path)?;
    Ok(upload_meshlet_mesh(device, &mesh, &header.name)?)
}

fn load_texture(device: &dyn GpuDevice, path: &Path, resolution: u32) -> AssetResult<(BufferId, u32)> {
    let (header, texture): (_, TextureAsset) = read_artifact(path)?;
    let mip = texture
        .mip_for_resolution(resolution)
        .ok_or_else(|| AssetError::InvalidData(format!("texture '{}' has no mips", header.name)))?;

    let buffer = device.create_buffer(&BufferDescriptor::storage(header.name, mip.data.len() as u64))?;
    if let Err(err) = device.write_buffer(buffer, 0, &mip.data) {
        device.destroy_buffer(buffer)?;
        return Err(err.into());
    }
    Ok((buffer, mip.width.max(mip.height)))
}

/// Loads models through the job system into a device
pub struct AssetLoader {
    device: Arc<dyn GpuDevice>,
    jobs: JobSystem,
    root: AssetRoot,
    manifest: Arc<AssetManifest>,
    mesh_results: Arc<UploadQueue<MeshLoadResult>>,
    texture_results: Arc<UploadQueue<TextureLoadResult>>,
    streamer: TextureStreamer,
}

impl AssetLoader {
    /// Create a loader with its own worker pool
    pub fn new(config: &AssetConfig, device: Arc<dyn GpuDevice>) -> AssetResult<Self> {
        config.validate()?;
        Ok(Self {
            device,
            jobs: JobSystem::new(config.worker_threads)?,
            root: AssetRoot::new(&config.asset_root),
            manifest: Arc::new(AssetManifest::new()),
            mesh_results: Arc::new(UploadQueue::new()),
            texture_results: Arc::new(UploadQueue::new()),
            streamer: TextureStreamer::new(config.texture_streaming.clone()),
        })
    }

    /// The shared manifest
    pub fn manifest(&self) -> &Arc<AssetManifest> {
        &self.manifest
    }

    /// The device loads upload into
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// The worker pool
    pub fn jobs(&self) -> &JobSystem {
        &self.jobs
    }

    /// Load a `.bmodel` below the asset root.
    ///
    /// Nodes are created under `parent` (or as roots) before this returns;
    /// geometry arrives asynchronously through [`AssetLoader::process_uploads`].
    /// A missing or malformed model file is returned as an error.
    pub fn load_model(
        &mut self,
        path: impl AsRef<Path>,
        scene: &mut SceneGraph,
        parent: Option<NodeId>,
    ) -> AssetResult<LoadedModel> {
        let path = self.root.resolve(path);
        let (header, model): (_, ModelAsset) = read_artifact(&path)?;
        let model_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let slots = self.manifest.register_model(&path, &model, &model_dir);
        self.register_streaming(&slots)?;
        let (root_nodes, node_count) = instantiate_nodes(&model, &slots, scene, parent);

        for mesh in slots.meshes.clone() {
            let mesh_file = self.manifest.mesh(mesh)?.mesh_file;
            self.dispatch_mesh_load(mesh, mesh_file);
        }

        log::info!(
            "loading '{}' ({}): {} meshes dispatched, {node_count} nodes",
            header.name,
            path.display(),
            slots.meshes.len()
        );
        Ok(LoadedModel {
            slots,
            root_nodes,
            node_count,
        })
    }

    fn register_streaming(&mut self, slots: &ModelSlots) -> AssetResult<()> {
        for texture in slots.textures.clone() {
            let entry = self.manifest.texture(texture)?;
            let index = self.streamer.register_texture(entry.width.max(entry.height));
            debug_assert_eq!(index, texture);
        }
        for material in slots.materials.clone() {
            let entry = self.manifest.material(material)?;
            let textures = entry.material.texture_slots().into_iter().filter_map(|(_, t)| t);
            self.streamer.register_material(textures);
        }
        Ok(())
    }

    fn dispatch_mesh_load(&self, mesh: u32, path: PathBuf) {
        let device = Arc::clone(&self.device);
        let results = Arc::clone(&self.mesh_results);
        self.jobs.submit_fn("mesh_load", move || {
            let outcome = load_mesh(device.as_ref(), &path);
            if let Err(err) = &outcome {
                log::error!("mesh {mesh} ('{}') failed to load: {err}", path.display());
            }
            results.push(MeshLoadResult { mesh, outcome });
        });
    }

    fn dispatch_texture_load(&self, request: StreamRequest) -> AssetResult<()> {
        let path = self.manifest.texture(request.texture)?.path;
        let device = Arc::clone(&self.device);
        let results = Arc::clone(&self.texture_results);
        self.jobs.submit_fn("texture_load", move || {
            let StreamRequest {
                texture,
                resolution,
                loading,
            } = request;
            let result = load_texture(device.as_ref(), &path, resolution);
            let (outcome, resolution) = match result {
                Ok((buffer, loaded)) => (Ok(buffer), loaded),
                Err(err) => {
                    log::error!("texture {texture} ('{}') failed to load: {err}", path.display());
                    (Err(err), resolution)
                }
            };
            results.push(TextureLoadResult {
                texture,
                resolution,
                outcome,
            });
            loading.finish();
        });
        Ok(())
    }

    /// Feed one frame of per-material feedback to the streamer and dispatch
    /// the texture loads it asks for; returns the number dispatched.
    pub fn update_streaming(&mut self, feedback: &[u32]) -> AssetResult<usize> {
        let requests = self.streamer.update(feedback);
        let count = requests.len();
        for request in requests {
            self.dispatch_texture_load(request)?;
        }
        Ok(count)
    }

    /// Drain both upload queues into the manifest
    pub fn process_uploads(&mut self) -> AssetResult<UploadSummary> {
        let mut summary = UploadSummary::default();

        for result in self.mesh_results.drain() {
            let asset = self.manifest.mesh(result.mesh)?.asset;
            match result.outcome {
                Ok(geometry) if self.manifest.is_unloaded(asset) => {
                    self.device.destroy_buffer(geometry.buffer)?;
                    summary.discarded += 1;
                }
                Ok(geometry) => {
                    self.manifest.set_mesh_status(result.mesh, MeshStatus::Resident(geometry))?;
                    summary.meshes_resident += 1;
                }
                Err(err) => {
                    self.manifest.set_mesh_status(result.mesh, MeshStatus::Failed(err.to_string()))?;
                    summary.meshes_failed += 1;
                }
            }
        }

        for result in self.texture_results.drain() {
            let asset = self.manifest.texture(result.texture)?.asset;
            match result.outcome {
                Ok(buffer) if self.manifest.is_unloaded(asset) => {
                    self.device.destroy_buffer(buffer)?;
                    summary.discarded += 1;
                }
                Ok(buffer) => {
                    let replaced = self
                        .manifest
                        .set_texture_buffer(result.texture, Some(buffer), result.resolution)?;
                    if let Some(old) = replaced {
                        self.device.destroy_buffer(old)?;
                    }
                    self.streamer.mark_resident(result.texture, result.resolution);
                    summary.textures_resident += 1;
                }
                Err(_) => {
                    self.streamer.mark_failed(result.texture);
                    summary.textures_failed += 1;
                }
            }
        }

        if summary != UploadSummary::default() {
            log::debug!("uploads applied: {summary:?}");
        }
        Ok(summary)
    }

    /// Block until every dispatched task finished
    pub fn wait_idle(&self) {
        self.jobs.wait_idle();
    }

    /// Release an asset's device buffers; its manifest slots stay reserved
    pub fn unload_asset(&mut self, asset: u32) -> AssetResult<usize> {
        let entry = self.manifest.mark_unloaded(asset)?;
        let mut released = 0;

        for mesh in entry.meshes.clone() {
            if let MeshStatus::Resident(geometry) = self.manifest.set_mesh_status(mesh, MeshStatus::Unloaded)? {
                self.device.destroy_buffer(geometry.buffer)?;
                released += 1;
            }
        }
        for texture in entry.textures.clone() {
            if let Some(buffer) = self.manifest.set_texture_buffer(texture, None, 0)? {
                self.device.destroy_buffer(buffer)?;
                released += 1;
            }
        }

        log::info!("unloaded '{}': {released} buffers released", entry.path.display());
        Ok(released)
    }
}

/// Create scene nodes for a model with an explicit worklist.
///
/// Returns the created root nodes and the total count. A node reachable
/// twice is instantiated once.
fn instantiate_nodes(
    model: &ModelAsset,
    slots: &ModelSlots,
    scene: &mut SceneGraph,
    parent: Option<NodeId>,
) -> (Vec<NodeId>, usize) {
    let mut visited = vec![false; model.nodes.len()];
    let mut roots = Vec::with_capacity(model.root_nodes.len());
    let mut created = 0;

    let mut worklist: Vec<(u32, Option<NodeId>)> = model.root_nodes.iter().rev().map(|&n| (n, None)).collect();
    while let Some((index, model_parent)) = worklist.pop() {
        let Some(node) = model.nodes.get(index as usize) else {
            continue;
        };
        if std::mem::replace(&mut visited[index as usize], true) {
            log::warn!("node {index} ('{}') is reachable twice; skipping", node.name);
            continue;
        }

        let is_root = model_parent.is_none();
        let id = scene.create_node(
            model_parent.or(parent),
            node.name.clone(),
            node.transform,
            node.mesh_group.map(|group| slots.mesh_group(group)),
        );
        created += 1;
        if is_root {
            roots.push(id);
        }
        worklist.extend(node.children.iter().rev().map(|&child| (child, Some(id))));
    }
    (roots, created)
}

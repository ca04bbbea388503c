//! # Nanomesh Core
//!
//! Shared runtime pieces for the nanomesh virtual-geometry pipeline.
//!
//! This crate provides the foundations the meshlet builder and the asset
//! layer sit on:
//! - **Math**: AABBs, bounding spheres and octahedral direction packing
//! - **Job System**: Fixed worker pool with chunked jobs
//! - **Arena**: Append-only registries with stable indices
//! - **Queue**: Mutex-guarded upload queues drained once per frame
//! - **Scene Graph**: Node hierarchy that loaded models are instantiated into

pub mod arena;
pub mod job;
pub mod math;
pub mod queue;
pub mod scene;

pub use arena::{AppendArena, ArenaStats};
pub use job::{Job, JobHandle, JobSystem};
pub use math::{Aabb, BoundingBox, BoundingSphere};
pub use queue::UploadQueue;
pub use scene::{Node, NodeId, SceneGraph, Transform};

//! GPU device abstraction
//!
//! The asset pipeline only needs linear buffers: create, write, copy, read
//! back and destroy. [`HostDevice`] implements the trait in system memory and
//! backs the tests and the command-line loader.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ahash::AHashMap;
use bitflags::bitflags;
use parking_lot::RwLock;
use thiserror::Error;

bitflags! {
    /// How a buffer will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Readable by the host
        const MAP_READ = 1 << 0;
        /// Writable by the host
        const MAP_WRITE = 1 << 1;
        /// Source of a copy
        const COPY_SRC = 1 << 2;
        /// Destination of a copy or write
        const COPY_DST = 1 << 3;
        /// Bound as a shader storage buffer
        const STORAGE = 1 << 4;
        /// Source of indirect draw/dispatch arguments
        const INDIRECT = 1 << 5;
    }
}

/// Opaque handle to a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// Buffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor<'a> {
    /// Debug label
    pub label: Option<Cow<'a, str>>,
    /// Size in bytes
    pub size: u64,
    /// Allowed usages
    pub usage: BufferUsage,
}

impl<'a> BufferDescriptor<'a> {
    /// Storage buffer that can be written, copied from and copied into
    pub fn storage(label: impl Into<Cow<'a, str>>, size: u64) -> Self {
        Self {
            label: Some(label.into()),
            size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        }
    }
}

/// GPU resource errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Invalid buffer handle {0:?}")]
    InvalidHandle(BufferId),

    #[error("Access of {size} bytes at offset {offset} exceeds buffer {buffer:?} of {capacity} bytes")]
    OutOfBounds {
        buffer: BufferId,
        offset: u64,
        size: u64,
        capacity: u64,
    },

    #[error("Buffer {buffer:?} lacks usage {required:?}")]
    MissingUsage { buffer: BufferId, required: BufferUsage },

    #[error("Out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
}

/// Device-side buffer operations used by the asset pipeline
pub trait GpuDevice: Send + Sync {
    /// Allocate a zero-initialised buffer
    fn create_buffer(&self, descriptor: &BufferDescriptor<'_>) -> Result<BufferId, ResourceError>;

    /// Write `data` at `offset`
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Copy `size` bytes between two buffers
    fn copy_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError>;

    /// Read `size` bytes at `offset` back to the host
    fn read_buffer(&self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError>;

    /// Release a buffer
    fn destroy_buffer(&self, buffer: BufferId) -> Result<(), ResourceError>;

    /// Size in bytes of a live buffer
    fn buffer_size(&self, buffer: BufferId) -> Result<u64, ResourceError>;
}

#[derive(Debug)]
struct HostBuffer {
    label: Option<String>,
    usage: BufferUsage,
    data: Vec<u8>,
}

impl HostBuffer {
    fn range(&self, id: BufferId, offset: u64, size: u64) -> Result<std::ops::Range<usize>, ResourceError> {
        let capacity = self.data.len() as u64;
        match offset.checked_add(size) {
            Some(end) if end <= capacity => Ok(offset as usize..end as usize),
            _ => Err(ResourceError::OutOfBounds {
                buffer: id,
                offset,
                size,
                capacity,
            }),
        }
    }

    fn require(&self, id: BufferId, required: BufferUsage) -> Result<(), ResourceError> {
        if self.usage.intersects(required) {
            Ok(())
        } else {
            Err(ResourceError::MissingUsage { buffer: id, required })
        }
    }
}

/// Allocation statistics of a [`HostDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct DeviceStats {
    /// Live buffers
    pub buffer_count: usize,
    /// Live bytes
    pub allocated_bytes: u64,
    /// Buffers created over the device's lifetime
    pub total_created: usize,
}

/// System-memory device
#[derive(Debug)]
pub struct HostDevice {
    buffers: RwLock<AHashMap<BufferId, HostBuffer>>,
    next_id: AtomicUsize,
    allocated: AtomicU64,
    memory_budget: u64,
}

impl HostDevice {
    /// Create a device with no memory limit
    pub fn new() -> Self {
        Self::with_budget(u64::MAX)
    }

    /// Create a device that refuses allocations beyond `memory_budget` bytes
    pub fn with_budget(memory_budget: u64) -> Self {
        Self {
            buffers: RwLock::new(AHashMap::new()),
            next_id: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
            memory_budget,
        }
    }

    /// Current allocation statistics
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            buffer_count: self.buffers.read().len(),
            allocated_bytes: self.allocated.load(Ordering::Relaxed),
            total_created: self.next_id.load(Ordering::Relaxed),
        }
    }

    /// Debug label of a live buffer
    pub fn buffer_label(&self, buffer: BufferId) -> Option<String> {
        self.buffers.read().get(&buffer).and_then(|b| b.label.clone())
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HostDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor<'_>) -> Result<BufferId, ResourceError> {
        let mut buffers = self.buffers.write();
        let allocated = self.allocated.load(Ordering::Relaxed);
        let available = self.memory_budget.saturating_sub(allocated);
        if descriptor.size > available {
            return Err(ResourceError::OutOfMemory {
                requested: descriptor.size,
                available,
            });
        }

        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        buffers.insert(
            id,
            HostBuffer {
                label: descriptor.label.as_ref().map(|l| l.to_string()),
                usage: descriptor.usage,
                data: vec![0; descriptor.size as usize],
            },
        );
        self.allocated.fetch_add(descriptor.size, Ordering::Relaxed);
        Ok(id)
    }

    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut buffers = self.buffers.write();
        let target = buffers.get_mut(&buffer).ok_or(ResourceError::InvalidHandle(buffer))?;
        target.require(buffer, BufferUsage::COPY_DST | BufferUsage::MAP_WRITE)?;
        let range = target.range(buffer, offset, data.len() as u64)?;
        target.data[range].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer(
        &self,
        source: BufferId,
        source_offset: u64,
        destination: BufferId,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ResourceError> {
        let mut buffers = self.buffers.write();

        let bytes = {
            let src = buffers.get(&source).ok_or(ResourceError::InvalidHandle(source))?;
            src.require(source, BufferUsage::COPY_SRC)?;
            let range = src.range(source, source_offset, size)?;
            src.data[range].to_vec()
        };

        let dst = buffers
            .get_mut(&destination)
            .ok_or(ResourceError::InvalidHandle(destination))?;
        dst.require(destination, BufferUsage::COPY_DST)?;
        let range = dst.range(destination, destination_offset, size)?;
        dst.data[range].copy_from_slice(&bytes);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>, ResourceError> {
        let buffers = self.buffers.read();
        let source = buffers.get(&buffer).ok_or(ResourceError::InvalidHandle(buffer))?;
        // The host device reads back anything that can be copied out
        source.require(buffer, BufferUsage::MAP_READ | BufferUsage::COPY_SRC)?;
        let range = source.range(buffer, offset, size)?;
        Ok(source.data[range].to_vec())
    }

    fn destroy_buffer(&self, buffer: BufferId) -> Result<(), ResourceError> {
        let removed = self
            .buffers
            .write()
            .remove(&buffer)
            .ok_or(ResourceError::InvalidHandle(buffer))?;
        self.allocated.fetch_sub(removed.data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn buffer_size(&self, buffer: BufferId) -> Result<u64, ResourceError> {
        self.buffers
            .read()
            .get(&buffer)
            .map(|b| b.data.len() as u64)
            .ok_or(ResourceError::InvalidHandle(buffer))
    }
}

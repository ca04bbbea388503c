//! Mesh upload
//!
//! A processed mesh is uploaded as one contiguous device allocation. The
//! sections follow each other in a fixed order, each starting on a 4-byte
//! boundary:
//!
//! | section | element |
//! |---|---|
//! | meshlets | [`Meshlet`] |
//! | bounding spheres | [`MeshletBoundingSpheres`] |
//! | simplification errors | [`MeshletSimplificationError`] |
//! | meshlet AABBs | [`BoundingBox`] |
//! | micro-indices | `u8` |
//! | indirect vertices | `u32` |
//! | positions | `Vec3` |
//! | normals | `u32` octahedral |
//! | UVs | `u32` half pair |
//!
//! [`Meshlet`]: nanomesh_meshlet::Meshlet
//! [`MeshletBoundingSpheres`]: nanomesh_meshlet::MeshletBoundingSpheres
//! [`MeshletSimplificationError`]: nanomesh_meshlet::MeshletSimplificationError
//! [`BoundingBox`]: nanomesh_core::BoundingBox

use bytemuck::Pod;
use nanomesh_meshlet::MeshletMesh;

use crate::device::{BufferDescriptor, BufferId, GpuDevice, ResourceError};

const SECTION_ALIGNMENT: u64 = 4;

fn align(offset: u64) -> u64 {
    offset.div_ceil(SECTION_ALIGNMENT) * SECTION_ALIGNMENT
}

/// Byte range of one section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferSection {
    pub offset: u64,
    pub size: u64,
}

impl BufferSection {
    /// First byte past the section
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Section layout of an uploaded mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshBufferLayout {
    pub meshlets: BufferSection,
    pub bounding_spheres: BufferSection,
    pub simplification_errors: BufferSection,
    pub aabbs: BufferSection,
    pub micro_indices: BufferSection,
    pub indirect_vertices: BufferSection,
    pub positions: BufferSection,
    pub normals: BufferSection,
    pub uvs: BufferSection,
    /// Whole allocation
    pub total_size: u64,
}

impl MeshBufferLayout {
    /// Compute offsets by cumulative, aligned section sizes
    pub fn new(mesh: &MeshletMesh) -> Self {
        let mut cursor = 0u64;
        let mut section = |bytes: usize| {
            let offset = align(cursor);
            cursor = offset + bytes as u64;
            BufferSection {
                offset,
                size: bytes as u64,
            }
        };

        let meshlets = section(byte_len(&mesh.meshlets));
        let bounding_spheres = section(byte_len(&mesh.bounding_spheres));
        let simplification_errors = section(byte_len(&mesh.simplification_errors));
        let aabbs = section(byte_len(&mesh.aabbs));
        let micro_indices = section(byte_len(&mesh.micro_indices));
        let indirect_vertices = section(byte_len(&mesh.indirect_vertices));
        let positions = section(byte_len(&mesh.positions));
        let normals = section(byte_len(&mesh.normals));
        let uvs = section(byte_len(&mesh.uvs));

        Self {
            meshlets,
            bounding_spheres,
            simplification_errors,
            aabbs,
            micro_indices,
            indirect_vertices,
            positions,
            normals,
            uvs,
            total_size: align(cursor),
        }
    }

    /// Sections in upload order
    pub fn sections(&self) -> [BufferSection; 9] {
        [
            self.meshlets,
            self.bounding_spheres,
            self.simplification_errors,
            self.aabbs,
            self.micro_indices,
            self.indirect_vertices,
            self.positions,
            self.normals,
            self.uvs,
        ]
    }
}

fn byte_len<T: Pod>(values: &[T]) -> usize {
    std::mem::size_of_val(values)
}

/// A mesh resident on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMeshGeometry {
    /// The single allocation holding every section
    pub buffer: BufferId,
    pub layout: MeshBufferLayout,
    pub meshlet_count: u32,
    pub triangle_count: u32,
    pub vertex_count: u32,
}

/// Pack `mesh` into one buffer
pub fn upload_meshlet_mesh(
    device: &dyn GpuDevice,
    mesh: &MeshletMesh,
    label: &str,
) -> Result<GpuMeshGeometry, ResourceError> {
    let layout = MeshBufferLayout::new(mesh);

    let mut staging = vec![0u8; layout.total_size as usize];
    let payloads: [&[u8]; 9] = [
        bytemuck::cast_slice(&mesh.meshlets),
        bytemuck::cast_slice(&mesh.bounding_spheres),
        bytemuck::cast_slice(&mesh.simplification_errors),
        bytemuck::cast_slice(&mesh.aabbs),
        &mesh.micro_indices,
        bytemuck::cast_slice(&mesh.indirect_vertices),
        bytemuck::cast_slice(&mesh.positions),
        bytemuck::cast_slice(&mesh.normals),
        bytemuck::cast_slice(&mesh.uvs),
    ];
    for (section, bytes) in layout.sections().iter().zip(payloads) {
        staging[section.offset as usize..section.end() as usize].copy_from_slice(bytes);
    }

    // Zero-sized buffers are not valid on every backend
    let size = layout.total_size.max(SECTION_ALIGNMENT);
    let buffer = device.create_buffer(&BufferDescriptor::storage(label.to_string(), size))?;
    if let Err(err) = device.write_buffer(buffer, 0, &staging) {
        device.destroy_buffer(buffer)?;
        return Err(err);
    }

    Ok(GpuMeshGeometry {
        buffer,
        layout,
        meshlet_count: mesh.meshlet_count() as u32,
        triangle_count: mesh.triangle_count() as u32,
        vertex_count: mesh.vertex_count() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;
    use nanomesh_core::math::{Vec2, Vec3};
    use nanomesh_meshlet::{MeshletBuildConfig, RawMesh, build_meshlet_mesh};

    fn triangle_mesh() -> MeshletMesh {
        let raw = RawMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 3],
            uvs: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            indices: Some(vec![0, 1, 2]),
        };
        build_meshlet_mesh(&raw, &MeshletBuildConfig::default()).unwrap().0
    }

    #[test]
    fn test_layout_is_ordered_and_aligned() {
        let mesh = triangle_mesh();
        let layout = MeshBufferLayout::new(&mesh);
        let sections = layout.sections();

        for pair in sections.windows(2) {
            assert!(pair[0].end() <= pair[1].offset);
        }
        assert!(sections.iter().all(|s| s.offset % 4 == 0));
        // 3 micro-indices are padded before the indirect vertices
        assert_eq!(layout.micro_indices.size, 3);
        assert_eq!(layout.indirect_vertices.offset, layout.micro_indices.offset + 4);
        assert_eq!(layout.total_size, layout.uvs.end());
    }

    #[test]
    fn test_upload_contents() {
        let mesh = triangle_mesh();
        let device = HostDevice::new();
        let geometry = upload_meshlet_mesh(&device, &mesh, "triangle").unwrap();

        assert_eq!(geometry.meshlet_count, 1);
        assert_eq!(geometry.triangle_count, 1);
        assert_eq!(geometry.vertex_count, 3);

        let positions = geometry.layout.positions;
        let bytes = device
            .read_buffer(geometry.buffer, positions.offset, positions.size)
            .unwrap();
        let read_back: Vec<Vec3> = bytemuck::pod_collect_to_vec(&bytes);
        assert_eq!(read_back, mesh.positions);

        let errors = geometry.layout.simplification_errors;
        let bytes = device.read_buffer(geometry.buffer, errors.offset, errors.size).unwrap();
        assert_eq!(bytes, bytemuck::cast_slice::<_, u8>(&mesh.simplification_errors));
    }

    #[test]
    fn test_upload_failure_leaves_no_buffer() {
        let mesh = triangle_mesh();
        let device = HostDevice::with_budget(8);
        assert!(matches!(
            upload_meshlet_mesh(&device, &mesh, "too big"),
            Err(ResourceError::OutOfMemory { .. })
        ));
        assert_eq!(device.stats().buffer_count, 0);
    }
}

//! Border locking
//!
//! Vertices whose position is referenced by meshlets of more than one group
//! are locked, so independently simplified neighbours keep a shared seam.

use crate::connectivity::PositionRemap;
use crate::grouping::MeshletGroup;
use crate::mesh::MeshletGeometry;

/// Which group a position has been seen in so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Unseen,
    Group(usize),
    Shared,
}

/// Recompute `vertex_locks` for one DAG level.
///
/// `vertex_locks` holds one entry per vertex and is fully overwritten; every
/// copy of a seam vertex receives the same lock state.
pub fn lock_group_borders(
    vertex_locks: &mut [bool],
    groups: &[MeshletGroup],
    geometry: &MeshletGeometry,
    remap: &PositionRemap,
) {
    let mut owners = vec![Owner::Unseen; remap.unique_count()];

    for (group_id, group) in groups.iter().enumerate() {
        for &meshlet_id in group {
            for &vertex in geometry.vertices(meshlet_id) {
                let owner = &mut owners[remap.get(vertex)];
                *owner = match *owner {
                    Owner::Unseen => Owner::Group(group_id),
                    Owner::Group(existing) if existing == group_id => Owner::Group(group_id),
                    _ => Owner::Shared,
                };
            }
        }
    }

    for (vertex, lock) in vertex_locks.iter_mut().enumerate() {
        *lock = owners[remap.get(vertex as u32)] == Owner::Shared;
    }
}

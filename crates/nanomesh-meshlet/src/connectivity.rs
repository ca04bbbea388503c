//! Meshlet connectivity
//!
//! Weighted adjacency between meshlets of a simplification queue. Two
//! meshlets are adjacent when they reference a common vertex position; the
//! edge weight is the number of such positions.

use ahash::AHashMap;
use nanomesh_core::math::Vec3;

use crate::mesh::MeshletGeometry;

/// Maps every vertex to a representative sharing its exact position.
///
/// UV and normal seams split vertices; connectivity and border locking must
/// treat the copies as one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionRemap {
    remap: Vec<u32>,
    unique_count: usize,
}

impl PositionRemap {
    /// Build the remap, numbering positions in order of first appearance
    pub fn new(positions: &[Vec3]) -> Self {
        let (unique_count, remap) = meshopt::generate_vertex_remap(positions, None);
        Self { remap, unique_count }
    }

    /// Position id of a vertex
    #[inline]
    pub fn get(&self, vertex: u32) -> usize {
        self.remap[vertex as usize] as usize
    }

    /// Number of distinct positions
    pub fn unique_count(&self) -> usize {
        self.unique_count
    }

    /// Number of vertices covered
    pub fn vertex_count(&self) -> usize {
        self.remap.len()
    }
}

/// Adjacency of one queue entry: `(neighbour queue position, shared vertex count)`
pub type MeshletAdjacency = Vec<(usize, usize)>;

/// Build the weighted adjacency list of `queue`.
///
/// Entries are addressed by position in `queue`, not by meshlet id, and every
/// list is sorted by neighbour for deterministic partitioning.
pub fn find_connected_meshlets(
    queue: &[usize],
    geometry: &MeshletGeometry,
    remap: &PositionRemap,
) -> Vec<MeshletAdjacency> {
    // For each position, the queue entries that use it
    let mut position_to_meshlets: Vec<Vec<usize>> = vec![Vec::new(); remap.unique_count()];
    for (queue_id, &meshlet_id) in queue.iter().enumerate() {
        for &vertex in geometry.vertices(meshlet_id) {
            let users = &mut position_to_meshlets[remap.get(vertex)];
            // Meshlets are visited in order, so a repeat can only be the last entry
            if users.last() != Some(&queue_id) {
                users.push(queue_id);
            }
        }
    }

    let mut shared_counts: AHashMap<(usize, usize), usize> = AHashMap::new();
    for users in &position_to_meshlets {
        for (i, &a) in users.iter().enumerate() {
            for &b in &users[i + 1..] {
                *shared_counts.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
    }

    let mut adjacency = vec![MeshletAdjacency::new(); queue.len()];
    for ((a, b), count) in shared_counts {
        adjacency[a].push((b, count));
        adjacency[b].push((a, count));
    }
    for neighbours in &mut adjacency {
        neighbours.sort_unstable();
    }
    adjacency
}

//! Meshlet grouping
//!
//! Partitions the connectivity graph of a simplification queue into groups of
//! roughly `target_meshlets_per_group` meshlets with METIS k-way partitioning,
//! minimising the shared-vertex weight cut between groups.

use smallvec::SmallVec;

use crate::TARGET_MESHLETS_PER_GROUP;
use crate::connectivity::MeshletAdjacency;
use crate::error::{MeshletError, MeshletResult};

/// Meshlet ids of one simplification group
pub type MeshletGroup = SmallVec<[usize; TARGET_MESHLETS_PER_GROUP]>;

/// Number of partitions requested for a queue of `queue_len` meshlets
pub fn partition_count(queue_len: usize, target_meshlets_per_group: usize) -> usize {
    queue_len.div_ceil(target_meshlets_per_group.max(1))
}

/// Split `queue` into groups.
///
/// `adjacency` is addressed by queue position as produced by
/// [`find_connected_meshlets`](crate::connectivity::find_connected_meshlets);
/// the returned groups hold meshlet ids and cover the queue exactly once.
/// A queue that fits in one group is returned whole without partitioning.
pub fn group_meshlets(
    queue: &[usize],
    adjacency: &[MeshletAdjacency],
    target_meshlets_per_group: usize,
    seed: i32,
) -> MeshletResult<Vec<MeshletGroup>> {
    if queue.is_empty() {
        return Ok(Vec::new());
    }
    let partitions = partition_count(queue.len(), target_meshlets_per_group);
    if partitions <= 1 {
        return Ok(vec![queue.iter().copied().collect()]);
    }

    let mut xadj = Vec::with_capacity(adjacency.len() + 1);
    let mut adjncy = Vec::new();
    let mut adjwgt = Vec::new();
    for neighbours in adjacency {
        xadj.push(adjncy.len() as i32);
        for &(neighbour, shared_vertices) in neighbours {
            adjncy.push(neighbour as i32);
            adjwgt.push(shared_vertices as i32);
        }
    }
    xadj.push(adjncy.len() as i32);

    let mut group_per_meshlet = vec![0; queue.len()];
    metis::Graph::new(1, partitions as i32, &xadj, &adjncy)
        .map_err(|err| MeshletError::Partition(format!("{err:?}")))?
        .set_option(metis::option::Seed(seed))
        .set_adjwgt(&adjwgt)
        .part_kway(&mut group_per_meshlet)
        .map_err(|err| MeshletError::Partition(format!("{err:?}")))?;

    let mut groups = vec![MeshletGroup::new(); partitions];
    for (queue_id, group) in group_per_meshlet.into_iter().enumerate() {
        let group = usize::try_from(group)
            .ok()
            .filter(|&g| g < partitions)
            .ok_or_else(|| MeshletError::Partition(format!("partition id {group} out of range")))?;
        groups[group].push(queue[queue_id]);
    }
    groups.retain(|group| !group.is_empty());
    Ok(groups)
}

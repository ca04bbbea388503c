//! Scene Graph
//!
//! Minimal node hierarchy that loaded models are instantiated into:
//! - Nodes live in a flat vector addressed by [`NodeId`]
//! - Each node carries a local transform and an optional mesh-group reference
//! - Traversals use an explicit stack, never recursion

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Local transform of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Local position
    pub position: Vec3,
    /// Local rotation
    pub rotation: Quat,
    /// Local scale
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a new transform from all components
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Create a new transform with the given position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Decompose an affine matrix
    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Get the local transformation matrix
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Handle to a node in a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Scene graph node
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name for identification
    pub name: String,
    /// Local transform
    pub local_transform: Transform,
    /// Parent node
    pub parent: Option<NodeId>,
    /// Child nodes in creation order
    pub children: SmallVec<[NodeId; 8]>,
    /// Manifest index of the mesh group rendered by this node
    pub mesh_group: Option<u32>,
}

/// Flat node hierarchy
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    /// Create a new empty scene graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node under `parent` (or as a root) and return its handle.
    ///
    /// An unknown parent makes the node a root.
    pub fn create_node(
        &mut self,
        parent: Option<NodeId>,
        name: impl Into<String>,
        local_transform: Transform,
        mesh_group: Option<u32>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = parent.filter(|p| (p.0 as usize) < self.nodes.len());
        self.nodes.push(Node {
            name: name.into(),
            local_transform,
            parent,
            children: SmallVec::new(),
            mesh_group,
        });
        match parent {
            Some(parent) => self.nodes[parent.0 as usize].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Get a node by handle
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    /// Root nodes
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// World matrix of a node, composed up the parent chain
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.get(id)) {
            matrix = node.local_transform.local_matrix() * matrix;
            current = node.parent;
        }
        matrix
    }

    /// All descendants of `id` in depth-first pre-order, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = match self.get(id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return result,
        };
        while let Some(next) = stack.pop() {
            result.push(next);
            if let Some(node) = self.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        result
    }

    /// Nodes that reference a mesh group
    pub fn mesh_nodes(&self) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.mesh_group.map(|group| (NodeId(index as u32), group)))
    }

    /// Get the number of nodes in the scene
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the scene is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_matrix_round_trip() {
        let transform = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.5),
            Vec3::splat(2.0),
        );
        let back = Transform::from_matrix(transform.local_matrix());
        assert!(back.position.abs_diff_eq(transform.position, 1e-5));
        assert!(back.scale.abs_diff_eq(transform.scale, 1e-5));
    }

    #[test]
    fn test_hierarchy_and_world_matrix() {
        let mut scene = SceneGraph::new();
        let root = scene.create_node(None, "root", Transform::from_position(Vec3::X), None);
        let child = scene.create_node(Some(root), "child", Transform::from_position(Vec3::Y), Some(3));

        assert_eq!(scene.roots(), &[root]);
        assert_eq!(scene.get(child).unwrap().parent, Some(root));

        let world = scene.world_matrix(child).transform_point3(Vec3::ZERO);
        assert!(world.abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
        assert_eq!(scene.mesh_nodes().collect::<Vec<_>>(), vec![(child, 3)]);
    }

    #[test]
    fn test_descendants_pre_order() {
        let mut scene = SceneGraph::new();
        let root = scene.create_node(None, "root", Transform::IDENTITY, None);
        let a = scene.create_node(Some(root), "a", Transform::IDENTITY, None);
        let a1 = scene.create_node(Some(a), "a1", Transform::IDENTITY, None);
        let b = scene.create_node(Some(root), "b", Transform::IDENTITY, None);

        assert_eq!(scene.descendants(root), vec![a, a1, b]);
        assert!(scene.descendants(b).is_empty());
    }

    #[test]
    fn test_unknown_parent_becomes_root() {
        let mut scene = SceneGraph::new();
        let orphan = scene.create_node(Some(NodeId(9)), "orphan", Transform::IDENTITY, None);
        assert_eq!(scene.roots(), &[orphan]);
        assert_eq!(scene.node_count(), 1);
    }
}

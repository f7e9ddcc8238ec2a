//! Logical tree mirroring the source hierarchy.
//!
//! The tree is an arena: nodes live in one map addressed by [`NodeKey`], each
//! node lists its children as ordered keys, and the `parent` key is only a
//! lookup hint. Every loaded resource owns an independent subtree registered
//! under the resource id, plus the render tree built from it.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::convert::GeometryConverter;
use crate::render::{RenderTree, RenderTreeBuilder};
use crate::source::SourceRef;

/// Errors raised by logical tree lookups.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("No logical tree registered for resource {0}")]
    MissingTree(String),

    #[error("Unknown tree node {0:?}")]
    MissingNode(NodeKey),
}

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Stable handle of a node inside a [`WorldTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(u64);

/// Data written onto a tree node by its conversion delegate.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModelData {
    /// Flat vertex positions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertices: Option<Vec<f32>>,

    /// Triangle indices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces: Option<Vec<u32>>,

    /// Flat vertex colors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<f32>>,

    /// Format specific payload
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub extras: serde_json::Value,
}

impl ModelData {
    /// Check if a delegate wrote anything.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_none()
            && self.faces.is_none()
            && self.colors.is_none()
            && self.extras.is_null()
    }
}

/// Destination of converted data on a tree node.
#[derive(Clone, Debug, Default)]
pub struct NodeModel {
    pub raw: ModelData,
}

/// Description of a node before it is placed in the tree.
#[derive(Clone, Debug)]
pub struct NodeData {
    /// Resource id for roots, source identity otherwise
    pub id: String,

    /// Originating source node
    pub raw: SourceRef,

    /// Conversion unit boundary
    pub atomic: bool,

    /// Position among the source parent's children
    pub slot: usize,
}

/// A node of the logical tree.
#[derive(Clone, Debug)]
pub struct TreeNode {
    pub id: String,
    pub raw: SourceRef,
    pub atomic: bool,
    pub children: Vec<NodeKey>,
    /// Advisory only, the tree never relies on it
    pub parent: Option<NodeKey>,
    pub slot: usize,
    pub model: NodeModel,
}

/// Arena of logical nodes grouped into per-resource subtrees.
#[derive(Default)]
pub struct WorldTree {
    nodes: HashMap<NodeKey, TreeNode>,
    /// Resource id -> root, in registration order
    subtrees: Vec<(String, NodeKey)>,
    render_trees: HashMap<String, RenderTree>,
    next_key: u64,
}

impl WorldTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a detached node and return its key.
    pub fn parse(&mut self, data: NodeData) -> NodeKey {
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        self.nodes.insert(
            key,
            TreeNode {
                id: data.id,
                raw: data.raw,
                atomic: data.atomic,
                children: Vec::new(),
                parent: None,
                slot: data.slot,
                model: NodeModel::default(),
            },
        );
        key
    }

    /// Register `root` as the subtree of the resource named by its id.
    ///
    /// A resource that already has a subtree is purged first.
    pub fn add_subtree(&mut self, root: NodeKey) -> TreeResult<()> {
        let resource = self.node(root)?.id.clone();
        if self.root(&resource).is_some() {
            log::debug!("Replacing existing subtree for {}", resource);
            self.purge(&resource);
        }
        self.subtrees.push((resource, root));
        Ok(())
    }

    /// Attach `child` under `parent`, ordered by the child's source slot.
    pub fn add_node(&mut self, child: NodeKey, parent: NodeKey) -> TreeResult<()> {
        let slot = self.node(child)?.slot;
        let position = self
            .node(parent)?
            .children
            .partition_point(|key| self.nodes.get(key).map_or(0, |n| n.slot) <= slot);

        self.node_mut(parent)?.children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Get a node by key.
    pub fn node(&self, key: NodeKey) -> TreeResult<&TreeNode> {
        self.nodes.get(&key).ok_or(TreeError::MissingNode(key))
    }

    /// Get a mutable node by key.
    pub fn node_mut(&mut self, key: NodeKey) -> TreeResult<&mut TreeNode> {
        self.nodes.get_mut(&key).ok_or(TreeError::MissingNode(key))
    }

    /// Root of a resource's subtree.
    pub fn root(&self, resource: &str) -> Option<NodeKey> {
        self.subtrees
            .iter()
            .find(|(id, _)| id == resource)
            .map(|(_, key)| *key)
    }

    /// Registered resource ids, in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.subtrees.iter().map(|(id, _)| id.as_str())
    }

    /// Visit a resource's subtree in pre-order.
    ///
    /// The visitor receives each node with its depth (root = 0). Iterative so
    /// arbitrarily deep hierarchies don't grow the call stack.
    pub fn walk<F>(&self, resource: &str, mut visit: F) -> TreeResult<()>
    where
        F: FnMut(NodeKey, &TreeNode, usize),
    {
        let root = self
            .root(resource)
            .ok_or_else(|| TreeError::MissingTree(resource.to_string()))?;

        let mut stack = vec![(root, 0)];
        while let Some((key, depth)) = stack.pop() {
            let node = self.node(key)?;
            visit(key, node, depth);
            for child in node.children.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        Ok(())
    }

    /// Number of logical nodes in a resource's subtree (0 if unknown).
    pub fn node_count(&self, resource: &str) -> usize {
        let mut count = 0;
        if self.walk(resource, |_, _, _| count += 1).is_err() {
            return 0;
        }
        count
    }

    /// Total number of nodes across all resources, detached ones included.
    pub fn total_node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Tear down a resource's logical tree and render tree.
    ///
    /// Returns false if the resource was never registered.
    pub fn purge(&mut self, resource: &str) -> bool {
        let Some(position) = self.subtrees.iter().position(|(id, _)| id == resource) else {
            return false;
        };
        let (_, root) = self.subtrees.remove(position);

        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.remove(&key) {
                stack.extend(node.children);
            }
        }
        self.render_trees.remove(resource);
        true
    }

    /// Build a fresh render tree for a resource and store it, replacing any
    /// previous one.
    pub fn build_render_tree(
        &mut self,
        resource: &str,
        converter: &dyn GeometryConverter,
    ) -> TreeResult<&RenderTree> {
        let render_tree = RenderTreeBuilder::build(self, resource, converter)?;
        self.render_trees.insert(resource.to_string(), render_tree);
        self.render_trees
            .get(resource)
            .ok_or_else(|| TreeError::MissingTree(resource.to_string()))
    }

    /// Last render tree built for a resource.
    pub fn render_tree(&self, resource: &str) -> Option<&RenderTree> {
        self.render_trees.get(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceNode;

    fn data(id: &str, slot: usize) -> NodeData {
        NodeData {
            id: id.to_string(),
            raw: SourceNode::group(id).into_ref(),
            atomic: true,
            slot,
        }
    }

    #[test]
    fn test_subtree_registration() {
        let mut tree = WorldTree::new();
        let root = tree.parse(data("model.ifc", 0));
        tree.add_subtree(root).unwrap();

        assert_eq!(tree.root("model.ifc"), Some(root));
        assert_eq!(tree.resources().collect::<Vec<_>>(), vec!["model.ifc"]);
        assert_eq!(tree.node_count("model.ifc"), 1);
        assert_eq!(tree.node_count("other"), 0);
    }

    #[test]
    fn test_children_follow_source_slot() {
        let mut tree = WorldTree::new();
        let root = tree.parse(data("res", 0));
        tree.add_subtree(root).unwrap();

        // Registered out of order, as concurrent traversal may do
        let c = tree.parse(data("c", 2));
        let a = tree.parse(data("a", 0));
        let b = tree.parse(data("b", 1));
        tree.add_node(c, root).unwrap();
        tree.add_node(a, root).unwrap();
        tree.add_node(b, root).unwrap();

        assert_eq!(tree.node(root).unwrap().children, vec![a, b, c]);
        assert_eq!(tree.node(b).unwrap().parent, Some(root));
    }

    #[test]
    fn test_walk_pre_order() {
        let mut tree = WorldTree::new();
        let root = tree.parse(data("res", 0));
        tree.add_subtree(root).unwrap();
        let a = tree.parse(data("a", 0));
        let a1 = tree.parse(data("a1", 0));
        let b = tree.parse(data("b", 1));
        tree.add_node(a, root).unwrap();
        tree.add_node(b, root).unwrap();
        tree.add_node(a1, a).unwrap();

        let mut visited = Vec::new();
        tree.walk("res", |_, node, depth| visited.push((node.id.clone(), depth)))
            .unwrap();

        assert_eq!(
            visited,
            vec![
                ("res".to_string(), 0),
                ("a".to_string(), 1),
                ("a1".to_string(), 2),
                ("b".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_walk_missing_resource() {
        let tree = WorldTree::new();
        let result = tree.walk("nope", |_, _, _| {});

        assert_eq!(result, Err(TreeError::MissingTree("nope".to_string())));
    }

    #[test]
    fn test_purge_removes_subtree() {
        let mut tree = WorldTree::new();
        let root = tree.parse(data("res", 0));
        tree.add_subtree(root).unwrap();
        let child = tree.parse(data("child", 0));
        tree.add_node(child, root).unwrap();

        assert!(tree.purge("res"));
        assert!(!tree.purge("res"));
        assert_eq!(tree.root("res"), None);
        assert_eq!(tree.total_node_count(), 0);
    }

    #[test]
    fn test_add_subtree_replaces_previous() {
        let mut tree = WorldTree::new();
        let first = tree.parse(data("res", 0));
        tree.add_subtree(first).unwrap();
        let second = tree.parse(data("res", 0));
        tree.add_subtree(second).unwrap();

        assert_eq!(tree.root("res"), Some(second));
        assert_eq!(tree.resources().count(), 1);
        assert!(tree.node(first).is_err());
    }
}

//! Source node graph handed over by a model parser.
//!
//! The converter treats this graph as an in-memory contract only: nodes carry
//! a type tag, a stable identity, a world matrix and, for mesh-like nodes,
//! raw buffer geometry. Nodes are shared through [`SourceRef`] so the logical
//! tree can keep a handle to the node it was created from.

use std::cell::RefCell;
use std::rc::Rc;

use arbor_math::Mat4;

use crate::geometry::BufferGeometry;

/// Shared handle to a source node.
pub type SourceRef = Rc<RefCell<SourceNode>>;

/// Type tag of grouping/instance nodes.
pub const GROUP_TYPE: &str = "Group";

/// Type tag of mesh nodes.
pub const MESH_TYPE: &str = "Mesh";

/// Type tag of composite model roots.
pub const COMPOSITE_MODEL_TYPE: &str = "IFCModel";

/// A node of an externally produced scene graph.
#[derive(Clone, Debug)]
pub struct SourceNode {
    /// Stable identity
    pub id: String,

    /// Semantic type tag (`"Group"`, `"Mesh"`, ...)
    pub type_tag: String,

    /// Display name (optional)
    pub name: Option<String>,

    /// World transform
    pub matrix_world: Mat4,

    /// Raw geometry (mesh-like and composite nodes only)
    pub geometry: Option<BufferGeometry>,

    /// Child nodes in source order
    pub children: Vec<SourceRef>,
}

impl SourceNode {
    /// Create a node with an explicit type tag and no geometry.
    pub fn new(id: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            name: None,
            matrix_world: Mat4::IDENTITY,
            geometry: None,
            children: Vec::new(),
        }
    }

    /// Create a grouping node.
    pub fn group(id: impl Into<String>) -> Self {
        Self::new(id, GROUP_TYPE)
    }

    /// Create a mesh node carrying `geometry`.
    pub fn mesh(id: impl Into<String>, geometry: BufferGeometry) -> Self {
        let mut node = Self::new(id, MESH_TYPE);
        node.geometry = Some(geometry);
        node
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the world transform.
    pub fn with_matrix_world(mut self, matrix: Mat4) -> Self {
        self.matrix_world = matrix;
        self
    }

    /// Append a child node.
    pub fn with_child(mut self, child: SourceNode) -> Self {
        self.children.push(child.into_ref());
        self
    }

    /// Wrap the node in a shared handle.
    pub fn into_ref(self) -> SourceRef {
        Rc::new(RefCell::new(self))
    }

    /// Count this node and every node reachable below it.
    pub fn reachable_count(&self) -> usize {
        let mut count = 1;
        let mut stack = self.children.clone();
        while let Some(child) = stack.pop() {
            count += 1;
            stack.extend(child.borrow().children.iter().cloned());
        }
        count
    }
}

impl Drop for SourceNode {
    // Unlink uniquely owned descendants one by one, deep chains would
    // otherwise drop recursively.
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(child) = stack.pop() {
            if let Ok(child) = Rc::try_unwrap(child) {
                stack.append(&mut child.into_inner().children);
            }
        }
    }
}

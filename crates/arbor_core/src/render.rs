//! Render tree: the flattened, render-ready view of one resource.
//!
//! A render tree is built in one pass over a resource's logical tree and then
//! handed off whole. Batching and GPU upload happen downstream.

use std::collections::HashMap;

use arbor_math::Mat4Ext;
use serde::Serialize;

use crate::convert::{AttributeChannel, GeometryConverter, GeometryPayload, SemanticType};
use crate::tree::{TreeResult, WorldTree};

/// One geometry payload and the logical node it came from.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEntry {
    pub id: String,
    pub semantic_type: SemanticType,
    pub payload: GeometryPayload,
}

/// Summary counts of a render tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub meshes: usize,
    pub instances: usize,
    pub vertices: usize,
    pub triangles: usize,
}

/// Geometry payloads of a resource, keyed by logical node id.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RenderTree {
    resource: String,
    entries: Vec<RenderEntry>,
    #[serde(skip)]
    lookup: HashMap<String, usize>,
}

impl RenderTree {
    /// Create an empty render tree for a resource.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload recorded for a logical node id.
    pub fn get(&self, id: &str) -> Option<&GeometryPayload> {
        self.lookup.get(id).map(|&i| &self.entries[i].payload)
    }

    /// Entries in logical tree pre-order.
    pub fn iter(&self) -> impl Iterator<Item = &RenderEntry> {
        self.entries.iter()
    }

    /// Positions of a node with its bake transform applied.
    pub fn baked_positions(&self, id: &str) -> Option<Vec<f32>> {
        let payload = self.get(id)?;
        let positions = payload.attribute(AttributeChannel::Position)?.as_f32()?;
        Some(match payload.bake_transform() {
            Some(matrix) => matrix.transform_flat_points(positions),
            None => positions.to_vec(),
        })
    }

    /// Count meshes, placements, vertices and triangles.
    pub fn stats(&self) -> RenderStats {
        let mut stats = RenderStats::default();
        for entry in &self.entries {
            if entry.payload.is_placement() {
                stats.instances += 1;
            } else {
                stats.meshes += 1;
            }
            stats.vertices += entry.payload.vertex_count();
            stats.triangles += entry.payload.triangle_count();
        }
        stats
    }

    fn insert(&mut self, id: String, semantic_type: SemanticType, payload: GeometryPayload) {
        let entry = RenderEntry {
            id: id.clone(),
            semantic_type,
            payload,
        };
        match self.lookup.get(&id) {
            Some(&i) => {
                log::warn!("Duplicate node id {} in {}, keeping the latest payload", id, self.resource);
                self.entries[i] = entry;
            }
            None => {
                self.lookup.insert(id, self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

/// Builds render trees from logical trees.
pub struct RenderTreeBuilder;

impl RenderTreeBuilder {
    /// Extract every node of a resource's logical tree.
    ///
    /// Nodes without a payload are skipped. Fails only when the resource has
    /// no logical tree.
    pub fn build(
        tree: &WorldTree,
        resource: &str,
        converter: &dyn GeometryConverter,
    ) -> TreeResult<RenderTree> {
        let mut render_tree = RenderTree::new(resource);
        let mut skipped = 0;

        tree.walk(resource, |_, node, _| match converter.extract(node) {
            Some(payload) => render_tree.insert(node.id.clone(), converter.classify(node), payload),
            None => skipped += 1,
        })?;

        log::debug!(
            "Built render tree for {}: {} payloads, {} nodes without geometry",
            resource,
            render_tree.len(),
            skipped
        );
        Ok(render_tree)
    }
}

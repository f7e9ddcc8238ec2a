//! Geometry extraction: logical tree node -> render payload.
//!
//! Dispatch is by semantic category, derived from the source type tag:
//!
//! - **Instance**: places shared content in space; contributes a render-time
//!   `transform` and no attributes
//! - **Mesh**: owns vertex buffers; contributes attributes plus a
//!   `bake_transform` applied to positions
//! - **CompositeModel**: a sub-format model root; extracted like a mesh from
//!   its own geometry, if it has any
//! - **Unknown**: contributes nothing but stays in the logical tree

use std::collections::BTreeMap;

use arbor_math::{Mat4, Mat4Ext};
use serde::Serialize;

use super::{ConvertError, ConvertResult};
use crate::geometry::{BufferGeometry, DEFAULT_MERGE_TOLERANCE};
use crate::source::{COMPOSITE_MODEL_TYPE, GROUP_TYPE, MESH_TYPE};
use crate::tree::TreeNode;

/// Semantic category of a source node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SemanticType {
    Instance,
    Mesh,
    CompositeModel,
    Unknown,
}

impl SemanticType {
    /// Category for a source type tag.
    pub fn from_type_tag(type_tag: &str) -> Self {
        match type_tag {
            GROUP_TYPE => SemanticType::Instance,
            MESH_TYPE => SemanticType::Mesh,
            COMPOSITE_MODEL_TYPE => SemanticType::CompositeModel,
            _ => SemanticType::Unknown,
        }
    }
}

/// Named vertex attribute channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttributeChannel {
    Position,
    Index,
    Color,
}

impl AttributeChannel {
    /// Channel name as used by render backends.
    pub fn name(&self) -> &'static str {
        match self {
            AttributeChannel::Position => "POSITION",
            AttributeChannel::Index => "INDEX",
            AttributeChannel::Color => "COLOR",
        }
    }
}

/// Flat numeric buffer of one attribute channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeBuffer {
    F32(Vec<f32>),
    U32(Vec<u32>),
}

impl AttributeBuffer {
    /// Number of scalar elements.
    pub fn len(&self) -> usize {
        match self {
            AttributeBuffer::F32(values) => values.len(),
            AttributeBuffer::U32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            AttributeBuffer::F32(values) => Some(values),
            AttributeBuffer::U32(_) => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            AttributeBuffer::U32(values) => Some(values),
            AttributeBuffer::F32(_) => None,
        }
    }

    /// Raw bytes for GPU upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AttributeBuffer::F32(values) => bytemuck::cast_slice(values),
            AttributeBuffer::U32(values) => bytemuck::cast_slice(values),
        }
    }
}

/// Attribute channels of a payload, ordered by channel.
pub type GeometryAttributes = BTreeMap<AttributeChannel, AttributeBuffer>;

/// Render-ready contribution of one logical node.
///
/// A payload either bakes a transform into its vertex data or carries a
/// placement transform for render time, never both. The constructors are
/// the only way to build one.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryPayload {
    attributes: Option<GeometryAttributes>,
    bake_transform: Option<Mat4>,
    transform: Option<Mat4>,
}

impl GeometryPayload {
    /// Payload with geometry whose positions are transformed by `bake_transform`.
    pub fn baked(attributes: GeometryAttributes, bake_transform: Mat4) -> Self {
        Self {
            attributes: Some(attributes),
            bake_transform: Some(bake_transform),
            transform: None,
        }
    }

    /// Payload without geometry, placed at render time by `transform`.
    pub fn placed(transform: Mat4) -> Self {
        Self {
            attributes: None,
            bake_transform: None,
            transform: Some(transform),
        }
    }

    pub fn attributes(&self) -> Option<&GeometryAttributes> {
        self.attributes.as_ref()
    }

    /// Buffer of a single channel.
    pub fn attribute(&self, channel: AttributeChannel) -> Option<&AttributeBuffer> {
        self.attributes.as_ref()?.get(&channel)
    }

    pub fn bake_transform(&self) -> Option<&Mat4> {
        self.bake_transform.as_ref()
    }

    pub fn transform(&self) -> Option<&Mat4> {
        self.transform.as_ref()
    }

    /// Check if this payload only places content (instance-like).
    pub fn is_placement(&self) -> bool {
        self.transform.is_some()
    }

    /// Number of vertices in the position channel.
    pub fn vertex_count(&self) -> usize {
        self.attribute(AttributeChannel::Position)
            .map_or(0, |buffer| buffer.len() / 3)
    }

    /// Number of triangles in the index channel.
    pub fn triangle_count(&self) -> usize {
        self.attribute(AttributeChannel::Index)
            .map_or(0, |buffer| buffer.len() / 3)
    }
}

/// Strategy turning logical tree nodes into render payloads.
pub trait GeometryConverter {
    /// Semantic category of a node.
    fn classify(&self, node: &TreeNode) -> SemanticType;

    /// Render payload of a node, or `None` when it has nothing to render.
    fn extract(&self, node: &TreeNode) -> Option<GeometryPayload>;
}

/// Geometry converter for model-loader scene graphs.
///
/// Stateless apart from its settings, so one instance can serve any number
/// of resources.
#[derive(Clone, Debug)]
pub struct ModelGeometryConverter {
    /// Uniform unit conversion applied to every payload
    conversion_factor: f32,

    /// Tolerance used when merging non-indexed meshes
    merge_tolerance: f32,
}

impl Default for ModelGeometryConverter {
    fn default() -> Self {
        Self {
            conversion_factor: 1.0,
            merge_tolerance: DEFAULT_MERGE_TOLERANCE,
        }
    }
}

impl ModelGeometryConverter {
    /// Create a converter with a unit conversion factor.
    ///
    /// The factor must be finite and greater than 0, instance transforms are
    /// divided by it.
    pub fn new(conversion_factor: f32) -> ConvertResult<Self> {
        if !is_positive_finite(conversion_factor) {
            return Err(ConvertError::InvalidConversionFactor(conversion_factor));
        }
        Ok(Self {
            conversion_factor,
            ..Default::default()
        })
    }

    /// Set the vertex merge tolerance (finite and greater than 0).
    pub fn with_merge_tolerance(mut self, merge_tolerance: f32) -> ConvertResult<Self> {
        if !is_positive_finite(merge_tolerance) {
            return Err(ConvertError::InvalidMergeTolerance(merge_tolerance));
        }
        self.merge_tolerance = merge_tolerance;
        Ok(self)
    }

    pub fn conversion_factor(&self) -> f32 {
        self.conversion_factor
    }

    pub fn merge_tolerance(&self) -> f32 {
        self.merge_tolerance
    }

    fn instance_to_payload(&self, node: &TreeNode) -> Option<GeometryPayload> {
        let Ok(source) = node.raw.try_borrow() else {
            log::warn!("Source of node {} is busy, skipping", node.id);
            return None;
        };
        Some(GeometryPayload::placed(
            source.matrix_world.rescaled(self.conversion_factor),
        ))
    }

    /// Mesh and composite extraction.
    ///
    /// Non-indexed geometry is merged first and written back to the source
    /// node, so extracting the same node again reuses the merged buffers.
    fn geometry_to_payload(&self, node: &TreeNode) -> Option<GeometryPayload> {
        let Ok(mut source) = node.raw.try_borrow_mut() else {
            log::warn!("Source of node {} is busy, skipping", node.id);
            return None;
        };
        let geometry = source.geometry.as_mut()?;
        if geometry.positions.is_empty() {
            return None;
        }

        if !geometry.has_index() {
            log::debug!(
                "Merging {} vertices of node {} to build an index",
                geometry.vertex_count(),
                node.id
            );
            *geometry = geometry.merge_vertices(self.merge_tolerance);
        }

        Some(GeometryPayload::baked(
            Self::attributes(geometry),
            Mat4::uniform_scale(self.conversion_factor),
        ))
    }

    fn attributes(geometry: &BufferGeometry) -> GeometryAttributes {
        let mut attributes = GeometryAttributes::new();
        attributes.insert(
            AttributeChannel::Position,
            AttributeBuffer::F32(geometry.positions.clone()),
        );
        attributes.insert(
            AttributeChannel::Index,
            AttributeBuffer::U32(geometry.index.clone().unwrap_or_default()),
        );
        if let Some(colors) = geometry.colors.as_ref().filter(|c| !c.is_empty()) {
            attributes.insert(AttributeChannel::Color, AttributeBuffer::F32(colors.clone()));
        }
        attributes
    }
}

fn is_positive_finite(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

impl GeometryConverter for ModelGeometryConverter {
    fn classify(&self, node: &TreeNode) -> SemanticType {
        match node.raw.try_borrow() {
            Ok(source) => SemanticType::from_type_tag(&source.type_tag),
            Err(_) => SemanticType::Unknown,
        }
    }

    fn extract(&self, node: &TreeNode) -> Option<GeometryPayload> {
        match self.classify(node) {
            SemanticType::Instance => self.instance_to_payload(node),
            SemanticType::Mesh | SemanticType::CompositeModel => self.geometry_to_payload(node),
            SemanticType::Unknown => None,
        }
    }
}

//! Wavefront OBJ files.
//!
//! Each OBJ object/group becomes a `Mesh` child of a `Group` root named after
//! the resource. Faces are triangulated and a single index is shared by all
//! attributes. Material libraries are not resolved.

use futures::future::{FutureExt, LocalBoxFuture};
use uuid::Uuid;

use super::{read_with_progress, ModelParser, ParseResult, ProgressFn};
use crate::geometry::BufferGeometry;
use crate::source::{SourceNode, SourceRef};

/// Parser for Wavefront OBJ files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjParser;

impl ObjParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse an OBJ document held in memory.
    pub fn parse_slice(&self, data: &[u8], resource: &str) -> ParseResult<SourceRef> {
        let mut reader = data;
        let (models, _materials) = tobj::load_obj_buf(
            &mut reader,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ..Default::default()
            },
            |_| Err(tobj::LoadError::OpenFileFailed),
        )?;

        log::debug!("OBJ {} contains {} objects", resource, models.len());

        let mut root = SourceNode::group(Uuid::new_v4().to_string()).with_name(resource);
        for model in models {
            let mesh = model.mesh;
            let geometry = BufferGeometry {
                positions: mesh.positions,
                index: (!mesh.indices.is_empty()).then_some(mesh.indices),
                colors: (!mesh.vertex_color.is_empty()).then_some(mesh.vertex_color),
            };
            root = root.with_child(
                SourceNode::mesh(Uuid::new_v4().to_string(), geometry).with_name(model.name),
            );
        }
        Ok(root.into_ref())
    }
}

impl ModelParser for ObjParser {
    fn load<'a>(
        &'a self,
        resource: &'a str,
        progress: ProgressFn<'a>,
    ) -> LocalBoxFuture<'a, ParseResult<SourceRef>> {
        async move {
            let data = read_with_progress(resource, progress).await?;
            self.parse_slice(&data, resource)
        }
        .boxed_local()
    }

    fn parse<'a>(
        &'a self,
        data: &'a [u8],
        resource: &'a str,
    ) -> LocalBoxFuture<'a, ParseResult<SourceRef>> {
        async move { self.parse_slice(data, resource) }.boxed_local()
    }
}

//! JSON scene documents.
//!
//! ```json
//! {
//!   "type": "Group",
//!   "uuid": "3f0c...",
//!   "name": "Building",
//!   "matrixWorld": [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1],
//!   "children": [
//!     { "type": "Mesh", "geometry": { "position": [...], "index": [...], "color": [...] } }
//!   ]
//! }
//! ```
//!
//! `matrixWorld` is column-major. Nodes without a `uuid` get a random one.
//!
//! Documents are read with serde_json's default recursion limit of 128. Every
//! node level takes two of those (the node object and its `children` array),
//! so scenes nested deeper than about 60 nodes fail with [`ParseError::Json`].
//! Deeper hierarchies are handed to the loader through a custom
//! [`ModelParser`].

use arbor_math::Mat4;
use futures::future::{FutureExt, LocalBoxFuture};
use serde::Deserialize;
use uuid::Uuid;

use super::{read_with_progress, ModelParser, ParseError, ParseResult, ProgressFn};
use crate::geometry::BufferGeometry;
use crate::source::{SourceNode, SourceRef};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonNode {
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    matrix_world: Option<Vec<f32>>,
    #[serde(default)]
    geometry: Option<JsonGeometry>,
    #[serde(default)]
    children: Vec<JsonNode>,
}

#[derive(Debug, Deserialize)]
struct JsonGeometry {
    position: Vec<f32>,
    #[serde(default)]
    index: Option<Vec<u32>>,
    #[serde(default)]
    color: Option<Vec<f32>>,
}

/// Parser for JSON scene documents, limited to about 60 nesting levels.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSceneParser;

impl JsonSceneParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a document held in memory.
    pub fn parse_slice(&self, data: &[u8]) -> ParseResult<SourceRef> {
        let root: JsonNode = serde_json::from_slice(data)?;
        Ok(to_source_node(root)?.into_ref())
    }
}

fn to_source_node(node: JsonNode) -> ParseResult<SourceNode> {
    let id = node.uuid.unwrap_or_else(|| Uuid::new_v4().to_string());

    let matrix_world = match node.matrix_world {
        Some(cols) if cols.len() == 16 => Mat4::from_cols_slice(&cols),
        Some(cols) => {
            return Err(ParseError::Malformed(format!(
                "matrixWorld of node {} has {} elements, expected 16",
                id,
                cols.len()
            )))
        }
        None => Mat4::IDENTITY,
    };

    let geometry = match node.geometry {
        Some(g) if g.position.len() % 3 != 0 => {
            return Err(ParseError::Malformed(format!(
                "position buffer of node {} has {} elements, not a multiple of 3",
                id,
                g.position.len()
            )))
        }
        Some(g) => Some(BufferGeometry {
            positions: g.position,
            index: g.index,
            colors: g.color,
        }),
        None => None,
    };

    let mut source = SourceNode::new(id, node.type_tag).with_matrix_world(matrix_world);
    source.name = node.name;
    source.geometry = geometry;
    for child in node.children {
        source.children.push(to_source_node(child)?.into_ref());
    }
    Ok(source)
}

impl ModelParser for JsonSceneParser {
    fn load<'a>(
        &'a self,
        resource: &'a str,
        progress: ProgressFn<'a>,
    ) -> LocalBoxFuture<'a, ParseResult<SourceRef>> {
        async move {
            let data = read_with_progress(resource, progress).await?;
            self.parse_slice(&data)
        }
        .boxed_local()
    }

    fn parse<'a>(
        &'a self,
        data: &'a [u8],
        _resource: &'a str,
    ) -> LocalBoxFuture<'a, ParseResult<SourceRef>> {
        async move { self.parse_slice(data) }.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use arbor_math::Vec3;

    use super::*;

    const SCENE: &str = r#"{
        "type": "Group",
        "uuid": "root-uuid",
        "name": "Site",
        "children": [
            {
                "type": "Mesh",
                "uuid": "wall",
                "geometry": {
                    "position": [0, 0, 0, 1, 0, 0, 0, 1, 0],
                    "index": [0, 1, 2],
                    "color": [1, 0, 0, 1, 0, 0, 1, 0, 0]
                }
            },
            {
                "type": "Group",
                "uuid": "door",
                "matrixWorld": [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0, 5, 6, 7, 1]
            },
            { "type": "Sprite" }
        ]
    }"#;

    #[test]
    fn test_parse_scene_document() {
        let root = JsonSceneParser::new().parse_slice(SCENE.as_bytes()).unwrap();
        let root = root.borrow();

        assert_eq!(root.id, "root-uuid");
        assert_eq!(root.name.as_deref(), Some("Site"));
        assert_eq!(root.reachable_count(), 4);

        let wall = root.children[0].borrow();
        let geometry = wall.geometry.as_ref().unwrap();
        assert_eq!(geometry.vertex_count(), 3);
        assert_eq!(geometry.index, Some(vec![0, 1, 2]));
        assert!(geometry.has_colors());

        let door = root.children[1].borrow();
        assert_eq!(
            door.matrix_world.transform_point3(Vec3::ZERO),
            Vec3::new(5.0, 6.0, 7.0)
        );

        // Missing uuid gets a generated one
        assert!(!root.children[2].borrow().id.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_matrix() {
        let doc = r#"{ "type": "Group", "matrixWorld": [1, 0, 0] }"#;
        let result = JsonSceneParser::new().parse_slice(doc.as_bytes());

        assert!(matches!(result, Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let result = JsonSceneParser::new().parse_slice(b"{ not json");

        assert!(matches!(result, Err(ParseError::Json(_))));
    }

    fn nested(depth: usize) -> String {
        let mut doc = r#"{ "type": "Group", "children": ["#.repeat(depth);
        doc.push_str(r#"{ "type": "Mesh", "geometry": { "position": [0, 0, 0] } }"#);
        doc.push_str(&"] }".repeat(depth));
        doc
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let root = JsonSceneParser::new().parse_slice(nested(50).as_bytes()).unwrap();
        assert_eq!(root.borrow().reachable_count(), 51);

        let result = JsonSceneParser::new().parse_slice(nested(200).as_bytes());
        assert!(matches!(result, Err(ParseError::Json(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("arbor_scene_{}.json", std::process::id()));
        std::fs::write(&path, SCENE).unwrap();

        let last = std::cell::Cell::new((0, 0));
        let progress = |loaded: u64, total: u64| last.set((loaded, total));
        let resource = path.to_string_lossy().to_string();
        let root = pollster::block_on(JsonSceneParser::new().load(&resource, &progress)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(root.borrow().id, "root-uuid");
        assert_eq!(last.get(), (SCENE.len() as u64, SCENE.len() as u64));
    }
}

//! Arbor Core - Scene graph traversal and render tree building.
//!
//! This crate provides:
//!
//! - **Source graph**: `SourceNode`, the parsed scene handed over by a parser
//! - **Logical tree**: `WorldTree`, per-resource mirrors of source graphs
//! - **Conversion**: `NodeConverter` (traversal + per-type delegates) and
//!   `ModelGeometryConverter` (render payload extraction)
//! - **Render trees**: `RenderTree`, flat id -> payload maps per resource
//! - **Loading**: `Loader`, which chains parser, traversal and build
//!
//! # Example
//!
//! ```ignore
//! use std::{cell::RefCell, rc::Rc};
//! use arbor_core::{parsers::JsonSceneParser, Loader, WorldTree};
//!
//! let tree = Rc::new(RefCell::new(WorldTree::new()));
//! let loader = Loader::new(tree.clone(), "site.json", None, Box::new(JsonSceneParser::new()));
//! pollster::block_on(loader.load())?;
//!
//! let tree = tree.borrow();
//! println!("{} payloads", tree.render_tree("site.json").unwrap().len());
//! ```

pub mod config;
pub mod convert;
pub mod geometry;
pub mod loader;
pub mod parsers;
pub mod render;
pub mod schedule;
pub mod source;
pub mod tree;

// Re-export commonly used types
pub use config::{ConfigError, LoaderOptions};
pub use convert::{
    ChildTraversal, ConvertError, GeometryConverter, GeometryPayload, ModelGeometryConverter,
    NodeConverter, NodeConverterRegistry, SemanticType,
};
pub use geometry::BufferGeometry;
pub use loader::{LoadError, Loader, LoaderEvent, LoaderState};
pub use parsers::{JsonSceneParser, ModelParser, ObjParser, ParseError};
pub use render::{RenderTree, RenderTreeBuilder};
pub use source::{SourceNode, SourceRef};
pub use tree::{NodeKey, TreeError, WorldTree};

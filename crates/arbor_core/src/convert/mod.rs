//! Conversion of source nodes into logical and render data.
//!
//! Two stages live here:
//!
//! - [`node`]: the traversal engine that mirrors a source graph into the
//!   logical tree and runs per-type conversion delegates
//! - [`geometry`]: extraction of render-ready geometry payloads from logical
//!   tree nodes

pub mod geometry;
pub mod node;

use thiserror::Error;

use crate::tree::TreeError;

pub use geometry::{
    AttributeBuffer, AttributeChannel, GeometryAttributes, GeometryConverter, GeometryPayload,
    ModelGeometryConverter, SemanticType,
};
pub use node::{
    ChildTraversal, NodeConverter, NodeConverterRegistry, NodeDelegate, NodeFailure,
    TraversalReport,
};

/// Errors raised while converting a single node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("Invalid conversion factor {0}, expected a finite value greater than 0")]
    InvalidConversionFactor(f32),

    #[error("Invalid merge tolerance {0}, expected a finite value greater than 0")]
    InvalidMergeTolerance(f32),

    #[error("Conversion failed: {0}")]
    Failed(String),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
}

/// Result type for node conversion.
pub type ConvertResult<T> = Result<T, ConvertError>;

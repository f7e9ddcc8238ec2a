//! Model parsers: raw bytes -> root source node.
//!
//! Parsers are collaborators of the loader, not part of the conversion core.
//! Two are provided:
//!
//! - [`JsonSceneParser`]: JSON scene documents (`type`, `uuid`, `matrixWorld`,
//!   `geometry`, `children`)
//! - [`ObjParser`]: Wavefront OBJ files via `tobj`

mod json;
mod obj;

pub use json::JsonSceneParser;
pub use obj::ObjParser;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use futures::future::LocalBoxFuture;
use thiserror::Error;

use crate::schedule::yield_now;
use crate::source::SourceRef;

/// Size of the chunks read between two progress reports.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Errors that can occur while fetching or parsing a model.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OBJ error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed model: {0}")]
    Malformed(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Progress callback receiving `(loaded, total)` byte counts.
pub type ProgressFn<'a> = &'a dyn Fn(u64, u64);

/// Turns a resource into a root source node.
pub trait ModelParser {
    /// Fetch `resource` (a path or URL) and parse it, reporting byte progress.
    fn load<'a>(
        &'a self,
        resource: &'a str,
        progress: ProgressFn<'a>,
    ) -> LocalBoxFuture<'a, ParseResult<SourceRef>>;

    /// Parse an in-memory buffer for `resource`.
    fn parse<'a>(
        &'a self,
        data: &'a [u8],
        resource: &'a str,
    ) -> LocalBoxFuture<'a, ParseResult<SourceRef>>;
}

/// Read a file in chunks, reporting progress and yielding between chunks.
pub async fn read_with_progress(path: impl AsRef<Path>, progress: ProgressFn<'_>) -> ParseResult<Vec<u8>> {
    let mut file = File::open(path.as_ref())?;
    let total = file.metadata()?.len();
    let mut data = Vec::with_capacity(total as usize);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..read]);
        progress(data.len() as u64, total);
        yield_now().await;
    }

    Ok(data)
}

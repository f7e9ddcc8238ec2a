//! Resource loading: parser -> traversal -> render tree.
//!
//! A [`Loader`] owns one resource. It fetches the root source node from its
//! [`ModelParser`], mirrors it into the shared [`WorldTree`] and builds the
//! resource's render tree.
//!
//! # Example
//!
//! ```ignore
//! use std::{cell::RefCell, rc::Rc};
//! use arbor_core::{parsers::JsonSceneParser, Loader, WorldTree};
//!
//! let tree = Rc::new(RefCell::new(WorldTree::new()));
//! let loader = Loader::new(tree.clone(), "site.json", None, Box::new(JsonSceneParser::new()));
//! let built = pollster::block_on(loader.load())?;
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;

use crate::config::{ConfigResult, LoaderOptions};
use crate::convert::{ModelGeometryConverter, NodeConverter};
use crate::parsers::{ModelParser, ParseError};
use crate::schedule::YieldThrottle;
use crate::source::SourceRef;
use crate::tree::{TreeError, WorldTree};

/// Errors that end a load.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Could not load {resource}: {source}")]
    Parse {
        resource: String,
        #[source]
        source: ParseError,
    },

    #[error("Could not get render tree for {resource}: {source}")]
    Build {
        resource: String,
        #[source]
        source: TreeError,
    },
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Lifecycle of a loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Pending,
    Loading,
    Finished,
    Failed,
    Cancelled,
}

/// Notifications sent to loader listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum LoaderEvent {
    /// Fraction of bytes fetched (parse phase only)
    LoadProgress { id: String, progress: f32 },

    /// Load ended, successfully or not
    LoadComplete { id: String, success: bool },
}

/// Progress fraction for `(loaded, total)` bytes, safe for `total == 0`.
pub fn progress_fraction(loaded: u64, total: u64) -> f32 {
    (loaded as f64 / (total as f64 + 1.0)).clamp(0.0, 1.0) as f32
}

/// Loads one resource into a shared world tree.
pub struct Loader {
    resource: String,
    resource_data: Option<Vec<u8>>,
    tree: Rc<RefCell<WorldTree>>,
    parser: Box<dyn ModelParser>,
    converter: NodeConverter,
    geometry_converter: ModelGeometryConverter,
    state: Cell<LoaderState>,
    listeners: RefCell<Vec<Box<dyn Fn(&LoaderEvent)>>>,
}

impl Loader {
    /// Create a loader with default options.
    ///
    /// With `resource_data` the parser reads the buffer, otherwise it fetches
    /// `resource` itself.
    pub fn new(
        tree: Rc<RefCell<WorldTree>>,
        resource: impl Into<String>,
        resource_data: Option<Vec<u8>>,
        parser: Box<dyn ModelParser>,
    ) -> Self {
        let converter = NodeConverter::new(tree.clone());
        Self {
            resource: resource.into(),
            resource_data,
            tree,
            parser,
            converter,
            geometry_converter: ModelGeometryConverter::default(),
            state: Cell::new(LoaderState::Pending),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Create a loader with explicit options.
    ///
    /// Fails if the options carry an unusable conversion factor or merge
    /// tolerance.
    pub fn with_options(
        tree: Rc<RefCell<WorldTree>>,
        resource: impl Into<String>,
        resource_data: Option<Vec<u8>>,
        parser: Box<dyn ModelParser>,
        options: &LoaderOptions,
    ) -> ConfigResult<Self> {
        let geometry_converter = options.geometry_converter()?;
        let converter = NodeConverter::new(tree.clone())
            .with_throttle(YieldThrottle::new(options.yield_interval()))
            .with_strategy(options.child_traversal);

        Ok(Self {
            converter,
            geometry_converter,
            ..Self::new(tree, resource, resource_data, parser)
        })
    }

    /// Replace the node converter (custom delegates, throttle or strategy).
    pub fn with_node_converter(mut self, converter: NodeConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn state(&self) -> LoaderState {
        self.state.get()
    }

    /// Check if the last load completed and was not cancelled.
    pub fn finished(&self) -> bool {
        self.state.get() == LoaderState::Finished
    }

    /// Register an event listener.
    pub fn on_event(&self, listener: impl Fn(&LoaderEvent) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    fn emit(&self, event: LoaderEvent) {
        for listener in self.listeners.borrow().iter() {
            listener(&event);
        }
    }

    /// Fetch, traverse and build the resource.
    ///
    /// Resolves to `true` once the render tree is built. Node conversion
    /// failures are logged and do not fail the load.
    pub async fn load(&self) -> LoadResult<bool> {
        self.state.set(LoaderState::Loading);

        let root = match self.fetch_root().await {
            Ok(root) => root,
            Err(e) => {
                log::error!("Loading {} failed with {}", self.resource, e);
                self.fail();
                return Err(LoadError::Parse {
                    resource: self.resource.clone(),
                    source: e,
                });
            }
        };

        let report = self
            .converter
            .traverse(&self.resource, root, &|_| Ok(()), None)
            .await;
        log::debug!(
            "Traversed {}: {} nodes, {} converted, {} failed",
            self.resource,
            report.visited,
            report.converted,
            report.failures.len()
        );

        let t0 = Instant::now();
        let built = self
            .tree
            .borrow_mut()
            .build_render_tree(&self.resource, &self.geometry_converter)
            .map(|render_tree| render_tree.len());

        match built {
            Ok(entries) => {
                log::info!(
                    "Tree build time for {} -> {:?} ({} payloads)",
                    self.resource,
                    t0.elapsed(),
                    entries
                );
                if self.state.get() == LoaderState::Cancelled {
                    log::info!("{} was cancelled while loading", self.resource);
                } else {
                    self.state.set(LoaderState::Finished);
                }
                self.emit(LoaderEvent::LoadComplete {
                    id: self.resource.clone(),
                    success: true,
                });
                Ok(true)
            }
            Err(e) => {
                log::error!("Could not get render tree for {}: {}", self.resource, e);
                self.fail();
                Err(LoadError::Build {
                    resource: self.resource.clone(),
                    source: e,
                })
            }
        }
    }

    async fn fetch_root(&self) -> Result<SourceRef, ParseError> {
        match &self.resource_data {
            Some(data) => self.parser.parse(data, &self.resource).await,
            None => {
                let progress = |loaded: u64, total: u64| {
                    self.emit(LoaderEvent::LoadProgress {
                        id: self.resource.clone(),
                        progress: progress_fraction(loaded, total),
                    })
                };
                self.parser.load(&self.resource, &progress).await
            }
        }
    }

    fn fail(&self) {
        if self.state.get() != LoaderState::Cancelled {
            self.state.set(LoaderState::Failed);
        }
        self.emit(LoaderEvent::LoadComplete {
            id: self.resource.clone(),
            success: false,
        });
    }

    /// Mark the loader as not finished.
    ///
    /// Advisory only: an in-flight load keeps running and callers must
    /// discard its result themselves.
    pub fn cancel(&self) {
        log::debug!("Cancelling {}", self.resource);
        self.state.set(LoaderState::Cancelled);
    }

    /// Drop all event listeners.
    pub fn dispose(&self) {
        self.listeners.borrow_mut().clear();
    }
}

//! Traversal engine: source graph -> logical tree.
//!
//! Every source node gets exactly one logical node, created before any
//! conversion is attempted on it. Nodes whose type tag has a registered
//! delegate are converted in place; a failing delegate or callback is logged
//! and recorded, never propagated, so one bad node cannot abort a load.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};

use super::ConvertResult;
use crate::source::{SourceNode, SourceRef, COMPOSITE_MODEL_TYPE, GROUP_TYPE, MESH_TYPE};
use crate::schedule::YieldThrottle;
use crate::tree::{ModelData, NodeData, NodeKey, TreeResult, WorldTree};

/// Asynchronous per-type conversion routine.
pub type NodeDelegate = Rc<dyn Fn(SourceRef) -> LocalBoxFuture<'static, ConvertResult<ModelData>>>;

/// Callback invoked after a node has been converted.
pub type ConvertedCallback<'a> = &'a dyn Fn(NodeKey) -> ConvertResult<()>;

/// How child subtrees are scheduled relative to each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildTraversal {
    /// Each child subtree finishes before the next one starts. Callbacks and
    /// log output follow strict pre-order.
    #[default]
    Sequential,

    /// A node's children are all started once the node is converted and run
    /// interleaved until every subtree is done. Logical child order still
    /// follows source order; callback and log order between sibling subtrees
    /// is unspecified.
    Concurrent,
}

/// Mapping from source type tag to conversion delegate.
#[derive(Clone)]
pub struct NodeConverterRegistry {
    delegates: HashMap<String, NodeDelegate>,
}

impl NodeConverterRegistry {
    /// Registry without any delegates.
    pub fn empty() -> Self {
        Self {
            delegates: HashMap::new(),
        }
    }

    /// Register (or replace) the delegate for a type tag.
    pub fn register<F, Fut>(&mut self, type_tag: impl Into<String>, delegate: F)
    where
        F: Fn(SourceRef) -> Fut + 'static,
        Fut: Future<Output = ConvertResult<ModelData>> + 'static,
    {
        let delegate: NodeDelegate = Rc::new(move |source| delegate(source).boxed_local());
        self.delegates.insert(type_tag.into(), delegate);
    }

    /// Check if a delegate exists for a type tag.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.delegates.contains_key(type_tag)
    }

    /// Delegate for a type tag.
    pub fn get(&self, type_tag: &str) -> Option<NodeDelegate> {
        self.delegates.get(type_tag).cloned()
    }
}

impl Default for NodeConverterRegistry {
    /// Delegates for groups, meshes and composite models.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(GROUP_TYPE, group_to_model);
        registry.register(MESH_TYPE, mesh_to_model);
        registry.register(COMPOSITE_MODEL_TYPE, composite_to_model);
        registry
    }
}

async fn group_to_model(_source: SourceRef) -> ConvertResult<ModelData> {
    Ok(ModelData::default())
}

async fn mesh_to_model(source: SourceRef) -> ConvertResult<ModelData> {
    let node = source.borrow();
    match own_geometry(&node) {
        Some(data) => Ok(data),
        None => {
            log::warn!(
                "{} node {} has no vertex position data and will be ignored",
                node.type_tag,
                node.id
            );
            Ok(ModelData::default())
        }
    }
}

async fn composite_to_model(source: SourceRef) -> ConvertResult<ModelData> {
    let node = source.borrow();
    let mut data = own_geometry(&node).unwrap_or_default();
    data.extras = serde_json::json!({
        "format": node.type_tag,
        "name": node.name,
        "childCount": node.children.len(),
        "vertexCount": node.geometry.as_ref().map_or(0, |g| g.vertex_count()),
    });
    Ok(data)
}

fn own_geometry(node: &SourceNode) -> Option<ModelData> {
    let geometry = node.geometry.as_ref().filter(|g| !g.positions.is_empty())?;
    Some(ModelData {
        vertices: Some(geometry.positions.clone()),
        faces: geometry.index.clone(),
        colors: geometry.colors.clone(),
        ..Default::default()
    })
}

/// A node whose conversion failed.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeFailure {
    pub type_tag: String,
    pub id: String,
    pub message: String,
}

/// Outcome of one traversal.
#[derive(Clone, Debug, Default)]
pub struct TraversalReport {
    /// Logical node created for the traversal root
    pub root: Option<NodeKey>,

    /// Logical nodes created
    pub visited: usize,

    /// Nodes whose delegate and callback both succeeded
    pub converted: usize,

    /// Recovered per-node failures
    pub failures: Vec<NodeFailure>,
}

/// Walks a source graph depth-first and builds the logical tree.
pub struct NodeConverter {
    tree: Rc<RefCell<WorldTree>>,
    registry: NodeConverterRegistry,
    throttle: YieldThrottle,
    strategy: ChildTraversal,
}

impl NodeConverter {
    /// Create a converter with the default registry, throttle and strategy.
    pub fn new(tree: Rc<RefCell<WorldTree>>) -> Self {
        Self {
            tree,
            registry: NodeConverterRegistry::default(),
            throttle: YieldThrottle::default(),
            strategy: ChildTraversal::default(),
        }
    }

    /// Replace the delegate registry.
    pub fn with_registry(mut self, registry: NodeConverterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the yield throttle.
    pub fn with_throttle(mut self, throttle: YieldThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Choose how child subtrees are scheduled.
    pub fn with_strategy(mut self, strategy: ChildTraversal) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn throttle(&self) -> &YieldThrottle {
        &self.throttle
    }

    /// Mirror the subtree rooted at `source` into the logical tree.
    ///
    /// Without `parent` the new node becomes the root of the resource's
    /// subtree and takes the resource id; otherwise it is appended under
    /// `parent`. `on_converted` runs after each successful delegate.
    ///
    /// Pending nodes are kept in an explicit work list, so the depth of the
    /// source graph never shows up on the call stack.
    pub async fn traverse(
        &self,
        resource: &str,
        source: SourceRef,
        on_converted: ConvertedCallback<'_>,
        parent: Option<NodeKey>,
    ) -> TraversalReport {
        let slot = match parent {
            Some(parent) => self
                .tree
                .borrow()
                .node(parent)
                .map_or(0, |node| node.children.len()),
            None => 0,
        };

        let report = RefCell::new(TraversalReport::default());
        match self.strategy {
            ChildTraversal::Sequential => {
                let mut pending = vec![(source, parent, slot)];
                while let Some((source, parent, slot)) = pending.pop() {
                    let visited = self
                        .visit(resource, source, parent, slot, on_converted, &report)
                        .await;
                    if let Some((key, children)) = visited {
                        pending.extend(
                            children
                                .into_iter()
                                .enumerate()
                                .rev()
                                .map(|(slot, child)| (child, Some(key), slot)),
                        );
                    }
                }
            }
            ChildTraversal::Concurrent => {
                let mut in_flight = FuturesUnordered::new();
                in_flight.push(self.visit(resource, source, parent, slot, on_converted, &report));
                while let Some(visited) = in_flight.next().await {
                    if let Some((key, children)) = visited {
                        for (slot, child) in children.into_iter().enumerate() {
                            in_flight.push(self.visit(
                                resource,
                                child,
                                Some(key),
                                slot,
                                on_converted,
                                &report,
                            ));
                        }
                    }
                }
            }
        }
        report.into_inner()
    }

    /// Register and convert a single node.
    ///
    /// Returns the new logical node and the source children still to visit,
    /// or `None` when the node could not be registered.
    async fn visit(
        &self,
        resource: &str,
        source: SourceRef,
        parent: Option<NodeKey>,
        slot: usize,
        on_converted: ConvertedCallback<'_>,
        report: &RefCell<TraversalReport>,
    ) -> Option<(NodeKey, Vec<SourceRef>)> {
        self.throttle.checkpoint().await;

        let (id, type_tag, children) = {
            let node = source.borrow();
            (node.id.clone(), node.type_tag.clone(), node.children.clone())
        };

        let key = match self.register(resource, &source, &id, parent, slot) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("Could not register {} node {}: {}", type_tag, id, e);
                report.borrow_mut().failures.push(NodeFailure {
                    type_tag,
                    id,
                    message: e.to_string(),
                });
                return None;
            }
        };

        {
            let mut report = report.borrow_mut();
            report.visited += 1;
            if parent.is_none() && report.root.is_none() {
                report.root = Some(key);
            }
        }

        match self.registry.get(&type_tag) {
            Some(delegate) => match self.convert(delegate, &source, key, on_converted).await {
                Ok(()) => report.borrow_mut().converted += 1,
                Err(e) => {
                    log::warn!("Failed to convert {} with id {}: {}", type_tag, id, e);
                    report.borrow_mut().failures.push(NodeFailure {
                        type_tag,
                        id,
                        message: e.to_string(),
                    });
                }
            },
            None => log::debug!("No direct converter for {} node {}", type_tag, id),
        }

        Some((key, children))
    }

    fn register(
        &self,
        resource: &str,
        source: &SourceRef,
        id: &str,
        parent: Option<NodeKey>,
        slot: usize,
    ) -> TreeResult<NodeKey> {
        let mut tree = self.tree.borrow_mut();
        let key = tree.parse(NodeData {
            id: match parent {
                Some(_) => id.to_string(),
                None => resource.to_string(),
            },
            raw: source.clone(),
            atomic: true,
            slot,
        });

        match parent {
            None => tree.add_subtree(key)?,
            Some(parent) => tree.add_node(key, parent)?,
        }
        Ok(key)
    }

    async fn convert(
        &self,
        delegate: NodeDelegate,
        source: &SourceRef,
        key: NodeKey,
        on_converted: ConvertedCallback<'_>,
    ) -> ConvertResult<()> {
        let data = delegate(source.clone()).await?;
        self.tree.borrow_mut().node_mut(key)?.model.raw = data;
        on_converted(key)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;
    use crate::convert::ConvertError;
    use crate::geometry::BufferGeometry;
    use crate::schedule::ManualClock;

    fn triangle() -> BufferGeometry {
        BufferGeometry::new(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], Some(vec![0, 1, 2]))
    }

    /// root -> [a -> [a1, a2], b, c -> [c1]]
    fn sample_graph() -> SourceRef {
        SourceNode::group("root")
            .with_child(
                SourceNode::group("a")
                    .with_child(SourceNode::mesh("a1", triangle()))
                    .with_child(SourceNode::new("a2", "PointLight")),
            )
            .with_child(SourceNode::mesh("b", triangle()))
            .with_child(SourceNode::group("c").with_child(SourceNode::mesh("c1", triangle())))
            .into_ref()
    }

    fn ids_in_order(tree: &WorldTree, resource: &str) -> Vec<String> {
        let mut ids = Vec::new();
        tree.walk(resource, |_, node, _| ids.push(node.id.clone()))
            .unwrap();
        ids
    }

    fn no_op(_: NodeKey) -> ConvertResult<()> {
        Ok(())
    }

    #[test]
    fn test_traverse_creates_one_node_per_source_node() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let converter = NodeConverter::new(tree.clone());
        let source = sample_graph();
        let expected = source.borrow().reachable_count();

        let report = pollster::block_on(converter.traverse("scene.ifc", source, &no_op, None));

        assert_eq!(report.visited, expected);
        assert!(report.failures.is_empty());
        // Group, mesh and composite nodes are converted, the light is not
        assert_eq!(report.converted, expected - 1);

        let tree = tree.borrow();
        assert_eq!(tree.node_count("scene.ifc"), expected);
        assert_eq!(
            ids_in_order(&tree, "scene.ifc"),
            vec!["scene.ifc", "a", "a1", "a2", "b", "c", "c1"]
        );
    }

    #[test]
    fn test_mesh_delegate_copies_geometry() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let converter = NodeConverter::new(tree.clone());
        let colors = vec![1.0; 9];
        let source = SourceNode::mesh("m", triangle().with_colors(colors.clone())).into_ref();

        let report = pollster::block_on(converter.traverse("res", source, &no_op, None));

        let tree = tree.borrow();
        let node = tree.node(report.root.unwrap()).unwrap();
        assert_eq!(node.id, "res");
        assert!(node.atomic);
        assert_eq!(node.model.raw.vertices.as_ref().map(Vec::len), Some(9));
        assert_eq!(node.model.raw.faces, Some(vec![0, 1, 2]));
        assert_eq!(node.model.raw.colors, Some(colors));
    }

    #[test]
    fn test_mesh_without_positions_is_skipped() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let converter = NodeConverter::new(tree.clone());
        let source = SourceNode::mesh("m", BufferGeometry::default()).into_ref();

        let report = pollster::block_on(converter.traverse("res", source, &no_op, None));

        assert!(report.failures.is_empty());
        let tree = tree.borrow();
        assert!(tree.node(report.root.unwrap()).unwrap().model.raw.is_empty());
    }

    #[test]
    fn test_composite_delegate_records_extras() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let converter = NodeConverter::new(tree.clone());
        let source = SourceNode::new("model", COMPOSITE_MODEL_TYPE)
            .with_child(SourceNode::mesh("m", triangle()))
            .into_ref();

        let report = pollster::block_on(converter.traverse("res", source, &no_op, None));

        let tree = tree.borrow();
        let extras = &tree.node(report.root.unwrap()).unwrap().model.raw.extras;
        assert_eq!(extras["format"], COMPOSITE_MODEL_TYPE);
        assert_eq!(extras["childCount"], 1);
        assert_eq!(extras["vertexCount"], 0);
    }

    #[test]
    fn test_failing_delegate_does_not_stop_traversal() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let mut registry = NodeConverterRegistry::default();
        registry.register("Broken", |source: SourceRef| async move {
            Err::<ModelData, _>(ConvertError::Failed(format!(
                "cannot convert {}",
                source.borrow().id
            )))
        });
        let converter = NodeConverter::new(tree.clone()).with_registry(registry);

        let source = SourceNode::group("root")
            .with_child(SourceNode::new("bad", "Broken").with_child(SourceNode::mesh("under-bad", triangle())))
            .with_child(SourceNode::mesh("sibling", triangle()))
            .into_ref();

        let report = pollster::block_on(converter.traverse("res", source, &no_op, None));

        assert_eq!(report.visited, 4);
        assert_eq!(report.converted, 3);
        assert_eq!(
            report.failures,
            vec![NodeFailure {
                type_tag: "Broken".to_string(),
                id: "bad".to_string(),
                message: "Conversion failed: cannot convert bad".to_string(),
            }]
        );
        assert_eq!(
            ids_in_order(&tree.borrow(), "res"),
            vec!["res", "bad", "under-bad", "sibling"]
        );
    }

    #[test]
    fn test_failing_callback_is_recorded() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let converter = NodeConverter::new(tree.clone());
        let calls = Cell::new(0);
        let callback = |_: NodeKey| {
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                return Err(ConvertError::Failed("callback".to_string()));
            }
            Ok(())
        };

        let report = pollster::block_on(converter.traverse("res", sample_graph(), &callback, None));

        assert_eq!(calls.get(), 6);
        assert_eq!(report.converted, 5);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "a");
    }

    #[test]
    fn test_concurrent_strategy_keeps_source_order() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        // Every node read advances the clock past the budget, so every
        // checkpoint suspends and sibling subtrees interleave
        let clock = Rc::new(ManualClock::ticking(Duration::from_millis(100)));
        let converter = NodeConverter::new(tree.clone())
            .with_throttle(YieldThrottle::with_clock(Duration::from_millis(100), clock))
            .with_strategy(ChildTraversal::Concurrent);

        let report = pollster::block_on(converter.traverse("res", sample_graph(), &no_op, None));

        assert_eq!(report.visited, 7);
        assert!(converter.throttle().yield_count() > 0);
        assert_eq!(
            ids_in_order(&tree.borrow(), "res"),
            vec!["res", "a", "a1", "a2", "b", "c", "c1"]
        );
    }

    #[test]
    fn test_traverse_under_existing_parent() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let converter = NodeConverter::new(tree.clone());
        let first = pollster::block_on(converter.traverse(
            "res",
            SourceNode::group("root").into_ref(),
            &no_op,
            None,
        ));
        let root = first.root.unwrap();

        let second = pollster::block_on(converter.traverse(
            "res",
            SourceNode::mesh("extra", triangle()).into_ref(),
            &no_op,
            Some(root),
        ));

        assert_eq!(second.root, None);
        assert_eq!(ids_in_order(&tree.borrow(), "res"), vec!["res", "extra"]);
    }

    #[test]
    fn test_concurrent_strategy_isolates_failures() {
        let tree = Rc::new(RefCell::new(WorldTree::new()));
        let mut registry = NodeConverterRegistry::default();
        registry.register("Broken", |_: SourceRef| async {
            Err::<ModelData, _>(ConvertError::Failed("corrupt".to_string()))
        });
        let clock = Rc::new(ManualClock::ticking(Duration::from_millis(100)));
        let converter = NodeConverter::new(tree.clone())
            .with_registry(registry)
            .with_throttle(YieldThrottle::with_clock(Duration::from_millis(100), clock))
            .with_strategy(ChildTraversal::Concurrent);

        let source = SourceNode::group("root")
            .with_child(
                SourceNode::new("bad", "Broken").with_child(
                    SourceNode::mesh("under-bad", triangle())
                        .with_child(SourceNode::mesh("deep", triangle())),
                ),
            )
            .with_child(SourceNode::mesh("sibling", triangle()))
            .with_child(SourceNode::group("tail"))
            .into_ref();

        let callback = |key: NodeKey| -> ConvertResult<()> {
            if tree.borrow().node(key)?.id == "sibling" {
                return Err(ConvertError::Failed("rejected".to_string()));
            }
            Ok(())
        };

        let report = pollster::block_on(converter.traverse("res", source, &callback, None));

        assert_eq!(report.visited, 6);
        assert_eq!(report.converted, 4);
        let mut failed: Vec<_> = report.failures.iter().map(|f| f.id.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["bad", "sibling"]);
        assert_eq!(
            ids_in_order(&tree.borrow(), "res"),
            vec!["res", "bad", "under-bad", "deep", "sibling", "tail"]
        );

        let tree = tree.borrow();
        let mut converted = Vec::new();
        tree.walk("res", |_, node, _| {
            if node.model.raw.vertices.is_some() {
                converted.push(node.id.clone());
            }
        })
        .unwrap();
        assert_eq!(converted, vec!["under-bad", "deep", "sibling"]);
    }

    fn chain(depth: usize) -> SourceRef {
        let mut node = SourceNode::group(format!("n{depth}"));
        for i in (0..depth).rev() {
            node = SourceNode::group(format!("n{i}")).with_child(node);
        }
        node.into_ref()
    }

    #[test]
    fn test_deep_chain_does_not_grow_the_stack() {
        for strategy in [ChildTraversal::Sequential, ChildTraversal::Concurrent] {
            let tree = Rc::new(RefCell::new(WorldTree::new()));
            let converter = NodeConverter::new(tree.clone()).with_strategy(strategy);

            let report = pollster::block_on(converter.traverse("res", chain(100_000), &no_op, None));

            assert_eq!(report.visited, 100_001, "{strategy:?}");
            assert_eq!(report.converted, 100_001, "{strategy:?}");
            assert!(report.failures.is_empty());
            assert_eq!(tree.borrow().node_count("res"), 100_001);
        }
    }
}

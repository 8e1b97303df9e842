//! Build graph
//!
//! An arena of nodes addressed by their prefixed url. Nodes are kept in
//! insertion order and each one sits behind its own lock, so pipelines for
//! different nodes can transition their nodes concurrently while the arena
//! itself is only locked for the duration of a lookup.
//!
//! Node locks are not reentrant: do not call `select`, `dependents` or any
//! `mark_*` helper while holding the guard of a node in the same graph.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::GraphError;
use crate::url::NodeUrl;

pub mod node;
pub mod select;

pub use node::{
    DestinationFiles, EntryPointCache, EntryPointData, EntryPointDescriptor, GlobCache, GlobEntry,
    Node, NodeKind, NodePayload, NodeState, OutputFile, OutputFileCache, PackageCache,
    PackageDescriptor,
};
pub use select::NodePredicate;

/// Shared handle to a node in the graph.
pub type NodeRef = Arc<Mutex<Node>>;

#[derive(Default)]
pub struct BuildGraph {
    nodes: RwLock<IndexMap<NodeUrl, NodeRef>>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node, or returns the existing one when `url` is already
    /// present with the same kind.
    pub fn create_node(&self, url: NodeUrl, kind: NodeKind) -> Result<NodeRef, GraphError> {
        let mut nodes = self.nodes.write();

        if let Some(existing) = nodes.get(&url) {
            let existing_kind = existing.lock().kind();
            if existing_kind != kind {
                return Err(GraphError::KindMismatch {
                    url: url.to_string(),
                    existing: existing_kind,
                    requested: kind,
                });
            }
            return Ok(Arc::clone(existing));
        }

        debug!(node = %url, kind = ?kind, "node created");
        let node = Arc::new(Mutex::new(Node::new(url.clone(), kind)));
        nodes.insert(url, Arc::clone(&node));
        Ok(node)
    }

    pub fn get(&self, url: &NodeUrl) -> Option<NodeRef> {
        self.nodes.read().get(url).cloned()
    }

    fn require(&self, url: &NodeUrl) -> Result<NodeRef, GraphError> {
        self.get(url)
            .ok_or_else(|| GraphError::NotFound(url.to_string()))
    }

    pub fn contains(&self, url: &NodeUrl) -> bool {
        self.nodes.read().contains_key(url)
    }

    /// Nodes matching `predicate`, in insertion order.
    pub fn select(&self, predicate: &NodePredicate) -> Vec<NodeRef> {
        // Snapshot first so predicate evaluation never holds the arena lock.
        let snapshot: Vec<NodeRef> = self.nodes.read().values().cloned().collect();
        snapshot
            .into_iter()
            .filter(|node| predicate.matches(&node.lock()))
            .collect()
    }

    /// Records that `from` reads from `on`. Both nodes must exist.
    pub fn add_dependency(&self, from: &NodeUrl, on: &NodeUrl) -> Result<(), GraphError> {
        let target = self.require(from)?;
        if !self.contains(on) {
            return Err(GraphError::NotFound(on.to_string()));
        }
        target.lock().add_dependency(on.clone());
        Ok(())
    }

    /// Nodes that list `url` among their dependencies, in insertion order.
    pub fn dependents(&self, url: &NodeUrl) -> Vec<NodeRef> {
        let url = url.clone();
        self.select(&select::by(move |node| node.depends_on(&url)))
    }

    /// Forgets `path` in the sources file cache of every node that has
    /// started work, and marks the nodes that had read it dirty. Analysis
    /// reads and package glob lookups keep their entries. Returns the urls of
    /// the nodes that were dirtied.
    ///
    /// A node that is `InProgress` drops the entry but keeps its state; the
    /// scheduler reruns it once it settles.
    pub fn invalidate_sources(&self, path: &Path) -> Vec<NodeUrl> {
        let started = self.select(&select::by(|node| node.state() != NodeState::Pending));
        let mut dirtied = Vec::new();

        for node in started {
            let mut node = node.lock();
            let had_read = match node.kind() {
                NodeKind::EntryPoint => node
                    .entry_point_cache_mut()
                    .map(|cache| cache.sources_file_cache.invalidate(path)),
                NodeKind::Package => node
                    .package_cache_mut()
                    .map(|cache| cache.sources_file_cache.invalidate(path)),
            }
            .unwrap_or(false);

            if had_read && node.state().can_transition_to(NodeState::Dirty) {
                if let Err(e) = node.mark_dirty() {
                    debug!(node = %node.url(), "not dirtied: {}", e);
                    continue;
                }
                dirtied.push(node.url().clone());
            }
        }

        dirtied
    }

    pub fn mark_dirty(&self, url: &NodeUrl) -> Result<(), GraphError> {
        self.require(url)?.lock().mark_dirty()
    }

    pub fn mark_in_progress(&self, url: &NodeUrl) -> Result<(), GraphError> {
        self.require(url)?.lock().mark_in_progress()
    }

    pub fn mark_clean(&self, url: &NodeUrl) -> Result<(), GraphError> {
        self.require(url)?.lock().mark_clean()
    }

    pub fn mark_failed(&self, url: &NodeUrl, error: impl ToString) -> Result<(), GraphError> {
        self.require(url)?.lock().mark_failed(error)
    }

    pub fn state(&self, url: &NodeUrl) -> Option<NodeState> {
        self.get(url).map(|node| node.lock().state())
    }

    pub fn urls(&self) -> Vec<NodeUrl> {
        self.nodes.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::select::{is_dirty, is_entry_point_dirty, is_kind};

    fn entry_point(graph: &BuildGraph, name: &str) -> NodeUrl {
        let url = NodeUrl::ng(name);
        graph.create_node(url.clone(), NodeKind::EntryPoint).unwrap();
        url
    }

    /// Walks a node through Pending -> InProgress -> Clean -> Dirty.
    fn make_dirty(graph: &BuildGraph, url: &NodeUrl) {
        graph.mark_in_progress(url).unwrap();
        graph.mark_clean(url).unwrap();
        graph.mark_dirty(url).unwrap();
    }

    #[test]
    fn test_create_node_is_idempotent_for_same_kind() {
        let graph = BuildGraph::new();
        let url = NodeUrl::file("/work/lib/package.json");
        let a = graph.create_node(url.clone(), NodeKind::Package).unwrap();
        let b = graph.create_node(url.clone(), NodeKind::Package).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_create_node_rejects_kind_change() {
        let graph = BuildGraph::new();
        let url = NodeUrl::ng("lib");
        graph.create_node(url.clone(), NodeKind::Package).unwrap();
        let err = graph.create_node(url, NodeKind::EntryPoint).unwrap_err();
        assert!(matches!(err, GraphError::KindMismatch { .. }));
    }

    #[test]
    fn test_file_and_ng_ids_are_distinct_nodes() {
        let graph = BuildGraph::new();
        graph
            .create_node(NodeUrl::file("lib"), NodeKind::Package)
            .unwrap();
        graph
            .create_node(NodeUrl::ng("lib"), NodeKind::EntryPoint)
            .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_select_dirty_entry_points_in_insertion_order() {
        let graph = BuildGraph::new();
        graph
            .create_node(NodeUrl::file("/work/lib"), NodeKind::Package)
            .unwrap();
        let a = entry_point(&graph, "lib");
        let b = entry_point(&graph, "lib/testing");
        let c = entry_point(&graph, "lib/forms");
        let d = entry_point(&graph, "lib/http");

        make_dirty(&graph, &d);
        make_dirty(&graph, &a);
        make_dirty(&graph, &c);
        graph.mark_in_progress(&b).unwrap();

        // Package nodes never show up even when dirty
        make_dirty(&graph, &NodeUrl::file("/work/lib"));

        let selected: Vec<NodeUrl> = graph
            .select(&is_entry_point_dirty())
            .iter()
            .map(|n| n.lock().url().clone())
            .collect();
        assert_eq!(selected, vec![a, c, d]);

        let composed = is_dirty().and(is_kind(NodeKind::EntryPoint));
        assert_eq!(graph.select(&composed).len(), 3);
    }

    #[test]
    fn test_rejected_transition_leaves_state() {
        let graph = BuildGraph::new();
        let url = entry_point(&graph, "lib");

        assert!(graph.mark_clean(&url).is_err());
        assert_eq!(graph.state(&url), Some(NodeState::Pending));

        graph.mark_in_progress(&url).unwrap();
        assert!(graph.mark_dirty(&url).is_err());
        assert_eq!(graph.state(&url), Some(NodeState::InProgress));

        graph.mark_failed(&url, "boom").unwrap();
        assert_eq!(graph.state(&url), Some(NodeState::Failed));
    }

    #[test]
    fn test_unknown_node_is_reported() {
        let graph = BuildGraph::new();
        assert_eq!(
            graph.mark_dirty(&NodeUrl::ng("missing")),
            Err(GraphError::NotFound("ng://missing".to_string()))
        );
    }

    #[test]
    fn test_dependents_follow_edges() {
        let graph = BuildGraph::new();
        let primary = entry_point(&graph, "lib");
        let testing = entry_point(&graph, "lib/testing");
        let forms = entry_point(&graph, "lib/forms");

        graph.add_dependency(&testing, &primary).unwrap();
        graph.add_dependency(&forms, &primary).unwrap();

        let dependents: Vec<NodeUrl> = graph
            .dependents(&primary)
            .iter()
            .map(|n| n.lock().url().clone())
            .collect();
        assert_eq!(dependents, vec![testing, forms]);
        assert!(graph.dependents(&NodeUrl::ng("lib/forms")).is_empty());

        assert!(graph
            .add_dependency(&primary, &NodeUrl::ng("missing"))
            .is_err());
    }

    #[test]
    fn test_concurrent_transitions_on_distinct_nodes() {
        let graph = Arc::new(BuildGraph::new());
        let urls: Vec<NodeUrl> = (0..16)
            .map(|i| entry_point(&graph, &format!("lib/ep{}", i)))
            .collect();

        let handles: Vec<_> = urls
            .iter()
            .cloned()
            .map(|url| {
                let graph = Arc::clone(&graph);
                std::thread::spawn(move || {
                    graph.mark_in_progress(&url).unwrap();
                    graph.mark_clean(&url).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for url in &urls {
            assert_eq!(graph.state(url), Some(NodeState::Clean));
        }
    }

    #[test]
    fn test_invalidate_sources_spares_analysis_reads() {
        let graph = BuildGraph::new();
        let read_it = entry_point(&graph, "lib");
        let other = entry_point(&graph, "lib/testing");
        let pending = entry_point(&graph, "lib/forms");
        let path = Path::new("/work/lib/src/button.scss");

        for url in [&read_it, &other] {
            graph.mark_in_progress(url).unwrap();
            graph.mark_clean(url).unwrap();
        }
        {
            let node = graph.get(&read_it).unwrap();
            let mut node = node.lock();
            let cache = node.entry_point_cache_mut().unwrap();
            cache.sources_file_cache.set(path, ".btn{}");
            cache.analyses_sources_file_cache.set(path, ".btn{}");
        }

        assert_eq!(graph.invalidate_sources(path), vec![read_it.clone()]);
        assert_eq!(graph.state(&read_it), Some(NodeState::Dirty));
        assert_eq!(graph.state(&other), Some(NodeState::Clean));
        assert_eq!(graph.state(&pending), Some(NodeState::Pending));

        let node = graph.get(&read_it).unwrap();
        let node = node.lock();
        let cache = node.entry_point_cache().unwrap();
        assert!(cache.sources_file_cache.get(path).is_none());
        assert!(cache.analyses_sources_file_cache.get(path).is_some());
        drop(node);

        // Nothing cached any more, nothing to dirty
        assert!(graph.invalidate_sources(path).is_empty());
    }
}

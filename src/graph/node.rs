//! Build nodes.
//!
//! A node is a shared header (url, state, dependency edges) plus a payload
//! tagged by kind. Each payload owns its caches outright; nothing in one
//! node's cache points into another node.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::cache::key::hash_content;
use crate::error::GraphError;
use crate::file_cache::FileCache;
use crate::styles::importer::{ImportResolutionCache, NODE_MODULES};
use crate::styles::{StyleDialect, StylesheetProcessor};
use crate::url::NodeUrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Package,
    EntryPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Created, never worked on.
    Pending,
    InProgress,
    /// Output is stale and must be recomputed.
    Dirty,
    Clean,
    Failed,
}

impl NodeState {
    /// Allowed moves:
    ///
    /// ```text
    /// Pending      -> InProgress
    /// Dirty        -> InProgress
    /// InProgress   -> Clean | Failed
    /// Clean|Failed -> Dirty
    /// ```
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Dirty, InProgress)
                | (InProgress, Clean)
                | (InProgress, Failed)
                | (Clean, Dirty)
                | (Failed, Dirty)
        )
    }
}

/// Emitted file remembered between rebuilds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub version: String,
    pub content: String,
}

/// Emitted files keyed by logical output path.
///
/// A downstream consumer only needs to re-read a file when its version
/// changed since the last build.
#[derive(Debug, Default)]
pub struct OutputFileCache {
    files: IndexMap<String, OutputFile>,
}

impl OutputFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `content` for `path`. Returns `true` when the content differs
    /// from what was cached before.
    pub fn update(&mut self, path: impl Into<String>, content: impl Into<String>) -> bool {
        let content = content.into();
        let version = hash_content(&content);
        let path = path.into();

        match self.files.get(&path) {
            Some(existing) if existing.version == version => false,
            _ => {
                self.files.insert(path, OutputFile { version, content });
                true
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&OutputFile> {
        self.files.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<OutputFile> {
        self.files.shift_remove(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Result of a filesystem check made while discovering a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobEntry {
    Missing,
    Dir,
    File,
    /// Stylesheets found below a directory, sorted by path.
    Matches(Vec<PathBuf>),
}

/// Memoized filesystem checks of a package. Like the file caches, entries
/// only go away through explicit invalidation.
#[derive(Debug, Default)]
pub struct GlobCache {
    entries: HashMap<String, GlobEntry>,
}

impl GlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` is a file, a directory, or missing.
    pub fn stat(&mut self, path: &Path) -> GlobEntry {
        self.entries
            .entry(format!("stat:{}", path.display()))
            .or_insert_with(|| match std::fs::metadata(path) {
                Ok(meta) if meta.is_dir() => GlobEntry::Dir,
                Ok(_) => GlobEntry::File,
                Err(_) => GlobEntry::Missing,
            })
            .clone()
    }

    /// Stylesheets below `dir`, skipping `node_modules`.
    pub fn stylesheets(&mut self, dir: &Path) -> Vec<PathBuf> {
        let entry = self
            .entries
            .entry(format!("styles:{}", dir.display()))
            .or_insert_with(|| GlobEntry::Matches(find_stylesheets(dir)));
        match entry {
            GlobEntry::Matches(paths) => paths.clone(),
            _ => Vec::new(),
        }
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn find_stylesheets(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != NODE_MODULES)
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| StyleDialect::detect(path).is_some())
        .collect();
    found.sort();
    found
}

/// Parsed package descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: Option<String>,
    /// Directory holding the package's source manifest.
    pub base_path: PathBuf,
    /// Directory the packaged output is written to.
    pub dest: PathBuf,
}

#[derive(Debug, Default)]
pub struct PackageCache {
    pub glob_cache: GlobCache,
    pub sources_file_cache: FileCache,
}

#[derive(Debug, Default)]
pub struct PackageNode {
    pub(crate) cache: PackageCache,
    pub(crate) data: Option<PackageDescriptor>,
}

/// Where an entry point's build artifacts land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationFiles {
    pub directory: PathBuf,
    pub declarations: PathBuf,
    pub esm2020: PathBuf,
    pub fesm2020: PathBuf,
    pub fesm2015: PathBuf,
}

/// Declared entry-point metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPointDescriptor {
    /// Import specifier, e.g. `@scope/lib/testing`.
    pub module_id: String,
    pub entry_file: PathBuf,
    pub base_path: PathBuf,
    pub secondary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointData {
    pub destination_files: DestinationFiles,
    pub entry_point: EntryPointDescriptor,
}

#[derive(Default)]
pub struct EntryPointCache {
    pub output_cache: OutputFileCache,
    pub sources_file_cache: FileCache,
    /// Reads made for whole-package analysis. Invalidated separately from
    /// `sources_file_cache`.
    pub analyses_sources_file_cache: FileCache,
    pub resolution_cache: ImportResolutionCache,
    pub stylesheet_processor: Option<Arc<StylesheetProcessor>>,
}

impl std::fmt::Debug for EntryPointCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPointCache")
            .field("output_cache", &self.output_cache)
            .field("sources_file_cache", &self.sources_file_cache)
            .field(
                "analyses_sources_file_cache",
                &self.analyses_sources_file_cache,
            )
            .field("resolution_cache", &self.resolution_cache)
            .field(
                "stylesheet_processor",
                &self.stylesheet_processor.is_some(),
            )
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct EntryPointNode {
    pub(crate) cache: EntryPointCache,
    pub(crate) data: Option<EntryPointData>,
}

#[derive(Debug)]
pub enum NodePayload {
    Package(PackageNode),
    EntryPoint(EntryPointNode),
}

impl NodePayload {
    fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Package => Self::Package(PackageNode::default()),
            NodeKind::EntryPoint => Self::EntryPoint(EntryPointNode::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Package(_) => NodeKind::Package,
            Self::EntryPoint(_) => NodeKind::EntryPoint,
        }
    }
}

#[derive(Debug)]
pub struct Node {
    url: NodeUrl,
    state: NodeState,
    error: Option<String>,
    dependencies: IndexSet<NodeUrl>,
    payload: NodePayload,
}

impl Node {
    pub fn new(url: NodeUrl, kind: NodeKind) -> Self {
        Self {
            url,
            state: NodeState::Pending,
            error: None,
            dependencies: IndexSet::new(),
            payload: NodePayload::empty(kind),
        }
    }

    pub fn url(&self) -> &NodeUrl {
        &self.url
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Error recorded by the last `mark_failed`, cleared once the node is dirtied.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &NodeUrl> {
        self.dependencies.iter()
    }

    pub fn depends_on(&self, url: &NodeUrl) -> bool {
        self.dependencies.contains(url)
    }

    pub(crate) fn add_dependency(&mut self, url: NodeUrl) {
        self.dependencies.insert(url);
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    /// Moves the node to `next`, leaving it untouched when the move is not
    /// in the transition table.
    pub fn transition(&mut self, next: NodeState) -> Result<(), GraphError> {
        if !self.state.can_transition_to(next) {
            return Err(GraphError::InvalidTransition {
                url: self.url.to_string(),
                from: self.state,
                to: next,
            });
        }

        debug!(node = %self.url, from = ?self.state, to = ?next, "node transition");
        if next == NodeState::Dirty {
            self.error = None;
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_dirty(&mut self) -> Result<(), GraphError> {
        self.transition(NodeState::Dirty)
    }

    pub fn mark_in_progress(&mut self) -> Result<(), GraphError> {
        self.transition(NodeState::InProgress)
    }

    pub fn mark_clean(&mut self) -> Result<(), GraphError> {
        self.transition(NodeState::Clean)
    }

    pub fn mark_failed(&mut self, error: impl ToString) -> Result<(), GraphError> {
        self.transition(NodeState::Failed)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    fn ensure_populated(&self) -> Result<(), GraphError> {
        if self.state == NodeState::Pending {
            return Err(GraphError::NotPopulated(self.url.to_string()));
        }
        Ok(())
    }

    fn wrong_kind(&self, expected: NodeKind) -> GraphError {
        GraphError::WrongKind {
            url: self.url.to_string(),
            expected,
            actual: self.kind(),
        }
    }

    fn entry_point_payload(&self) -> Result<&EntryPointNode, GraphError> {
        match &self.payload {
            NodePayload::EntryPoint(ep) => Ok(ep),
            NodePayload::Package(_) => Err(self.wrong_kind(NodeKind::EntryPoint)),
        }
    }

    fn entry_point_payload_mut(&mut self) -> Result<&mut EntryPointNode, GraphError> {
        match &mut self.payload {
            NodePayload::EntryPoint(ep) => Ok(ep),
            NodePayload::Package(_) => Err(GraphError::WrongKind {
                url: self.url.to_string(),
                expected: NodeKind::EntryPoint,
                actual: NodeKind::Package,
            }),
        }
    }

    fn package_payload(&self) -> Result<&PackageNode, GraphError> {
        match &self.payload {
            NodePayload::Package(pkg) => Ok(pkg),
            NodePayload::EntryPoint(_) => Err(self.wrong_kind(NodeKind::Package)),
        }
    }

    fn package_payload_mut(&mut self) -> Result<&mut PackageNode, GraphError> {
        match &mut self.payload {
            NodePayload::Package(pkg) => Ok(pkg),
            NodePayload::EntryPoint(_) => Err(GraphError::WrongKind {
                url: self.url.to_string(),
                expected: NodeKind::Package,
                actual: NodeKind::EntryPoint,
            }),
        }
    }

    /// Populates an entry point's descriptive data. Allowed in any state so
    /// discovery can fill it in before work starts.
    pub fn set_entry_point_data(&mut self, data: EntryPointData) -> Result<(), GraphError> {
        self.entry_point_payload_mut()?.data = Some(data);
        Ok(())
    }

    pub fn set_package_data(&mut self, data: PackageDescriptor) -> Result<(), GraphError> {
        self.package_payload_mut()?.data = Some(data);
        Ok(())
    }

    pub fn entry_point_data(&self) -> Result<&EntryPointData, GraphError> {
        self.ensure_populated()?;
        self.entry_point_payload()?
            .data
            .as_ref()
            .ok_or_else(|| GraphError::NotPopulated(self.url.to_string()))
    }

    pub fn entry_point_cache(&self) -> Result<&EntryPointCache, GraphError> {
        self.ensure_populated()?;
        Ok(&self.entry_point_payload()?.cache)
    }

    pub fn entry_point_cache_mut(&mut self) -> Result<&mut EntryPointCache, GraphError> {
        self.ensure_populated()?;
        Ok(&mut self.entry_point_payload_mut()?.cache)
    }

    pub fn package_data(&self) -> Result<&PackageDescriptor, GraphError> {
        self.ensure_populated()?;
        self.package_payload()?
            .data
            .as_ref()
            .ok_or_else(|| GraphError::NotPopulated(self.url.to_string()))
    }

    pub fn package_cache(&self) -> Result<&PackageCache, GraphError> {
        self.ensure_populated()?;
        Ok(&self.package_payload()?.cache)
    }

    pub fn package_cache_mut(&mut self) -> Result<&mut PackageCache, GraphError> {
        self.ensure_populated()?;
        Ok(&mut self.package_payload_mut()?.cache)
    }
}

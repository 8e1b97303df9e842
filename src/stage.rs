//! Stylesheet stage for entry-point nodes
//!
//! Runs every stylesheet of an entry point through the node's processor,
//! records results in the node's output cache and moves the node through
//! `InProgress` to `Clean` or `Failed`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{BuildError, BuildResult, GraphError};
use crate::file_cache::FileCache;
use crate::graph::{BuildGraph, EntryPointCache, GlobEntry, Node, NodeRef, NodeState};
use crate::logging::BuildLog;
use crate::styles::{
    Postprocessor, Preprocessor, StyleDialect, StylesheetOptions, StylesheetProcessor,
};
use crate::url::NodeUrl;

/// What one stage run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    /// Output paths whose content changed since the previous run.
    pub changed: Vec<String>,
}

pub struct StylesheetStage {
    options: StylesheetOptions,
    log: Arc<dyn BuildLog>,
    preprocessors: Vec<(StyleDialect, Arc<dyn Preprocessor>)>,
    postprocessor: Option<Arc<dyn Postprocessor>>,
}

impl StylesheetStage {
    pub fn new(options: StylesheetOptions, log: Arc<dyn BuildLog>) -> Self {
        Self {
            options,
            log,
            preprocessors: Vec::new(),
            postprocessor: None,
        }
    }

    pub fn with_preprocessor(
        mut self,
        dialect: StyleDialect,
        preprocessor: Arc<dyn Preprocessor>,
    ) -> Self {
        self.preprocessors.push((dialect, preprocessor));
        self
    }

    pub fn with_postprocessor(mut self, postprocessor: Arc<dyn Postprocessor>) -> Self {
        self.postprocessor = Some(postprocessor);
        self
    }

    /// Processes `stylesheets` for the entry point at `url`.
    ///
    /// The node must be `Pending` or `Dirty`. Each stylesheet's output is
    /// stored under its path with a `.css` extension. Rerunning a dirty node
    /// forgets its memoized `~` import resolutions.
    pub async fn run(
        &self,
        graph: &BuildGraph,
        url: &NodeUrl,
        stylesheets: &[PathBuf],
    ) -> BuildResult<StageReport> {
        let node = graph
            .get(url)
            .ok_or_else(|| GraphError::NotFound(url.to_string()))?;

        let processor = {
            let mut guard = node.lock();
            let rebuilding = guard.state() == NodeState::Dirty;
            guard.mark_in_progress()?;
            if rebuilding {
                // node_modules may have changed since the last run
                if let Ok(cache) = guard.entry_point_cache_mut() {
                    cache.resolution_cache.clear();
                }
            }
            match self.processor_for(&mut guard) {
                Ok(processor) => processor,
                Err(e) => {
                    guard.mark_failed(&e)?;
                    return Err(e);
                }
            }
        };

        match self.process_all(&node, &processor, stylesheets).await {
            Ok(report) => {
                node.lock().mark_clean()?;
                processor.enforce_cache_limit().await;
                info!(
                    node = %url,
                    processed = report.processed,
                    changed = report.changed.len(),
                    "stylesheets processed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(node = %url, "stylesheet stage failed: {}", e);
                node.lock().mark_failed(&e)?;
                Err(e)
            }
        }
    }

    /// Returns the node's processor, creating it on first use.
    fn processor_for(&self, node: &mut Node) -> BuildResult<Arc<StylesheetProcessor>> {
        let base_path = match node.entry_point_data() {
            Ok(data) => data.entry_point.base_path.clone(),
            Err(GraphError::NotPopulated(_)) => self.options.base_path.clone(),
            Err(e) => return Err(e.into()),
        };

        let cache = node.entry_point_cache_mut()?;
        if let Some(processor) = &cache.stylesheet_processor {
            return Ok(Arc::clone(processor));
        }

        let options = StylesheetOptions {
            base_path,
            ..self.options.clone()
        };
        let mut processor = StylesheetProcessor::new(options, Arc::clone(&self.log))
            .with_importer(cache.resolution_cache.clone());
        for (dialect, preprocessor) in &self.preprocessors {
            processor = processor.with_preprocessor(*dialect, Arc::clone(preprocessor));
        }
        if let Some(postprocessor) = &self.postprocessor {
            processor = processor.with_postprocessor(Arc::clone(postprocessor));
        }

        let processor = Arc::new(processor);
        cache.stylesheet_processor = Some(Arc::clone(&processor));
        Ok(processor)
    }

    async fn process_all(
        &self,
        node: &NodeRef,
        processor: &StylesheetProcessor,
        stylesheets: &[PathBuf],
    ) -> BuildResult<StageReport> {
        let mut report = StageReport::default();

        for path in stylesheets {
            let content = read_source(node, path).await?;
            let css = processor.process(path, &content).await?;

            let output_path = path.with_extension("css").to_string_lossy().into_owned();
            let changed = node
                .lock()
                .entry_point_cache_mut()?
                .output_cache
                .update(output_path.clone(), css);
            if changed {
                report.changed.push(output_path);
            }
            report.processed += 1;
        }

        Ok(report)
    }
}

/// Which of an entry point's file caches a read goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadScope {
    Sources,
    Analyses,
}

/// Reads `path` through one of the node's file caches. The node lock is
/// never held across the read.
async fn read_through(node: &NodeRef, path: &Path, scope: ReadScope) -> BuildResult<String> {
    let cached = {
        let guard = node.lock();
        file_cache(guard.entry_point_cache()?, scope).lookup(path)
    };

    let content = match cached {
        Some(known) => known,
        None => {
            let outcome = tokio::fs::read_to_string(path).await;
            let mut guard = node.lock();
            file_cache_mut(guard.entry_point_cache_mut()?, scope)
                .record(path, outcome)
                .map_err(|e| BuildError::transform(path, e))?
        }
    };

    content.ok_or_else(|| BuildError::transform(path, "file not found"))
}

fn file_cache(cache: &EntryPointCache, scope: ReadScope) -> &FileCache {
    match scope {
        ReadScope::Sources => &cache.sources_file_cache,
        ReadScope::Analyses => &cache.analyses_sources_file_cache,
    }
}

fn file_cache_mut(cache: &mut EntryPointCache, scope: ReadScope) -> &mut FileCache {
    match scope {
        ReadScope::Sources => &mut cache.sources_file_cache,
        ReadScope::Analyses => &mut cache.analyses_sources_file_cache,
    }
}

async fn read_source(node: &NodeRef, path: &Path) -> BuildResult<String> {
    read_through(node, path, ReadScope::Sources).await
}

/// Reads a file for whole-package analysis of an entry point. These reads
/// are memoized apart from stylesheet sources and survive
/// [`BuildGraph::invalidate_sources`].
pub async fn read_for_analysis(
    graph: &BuildGraph,
    url: &NodeUrl,
    path: &Path,
) -> BuildResult<String> {
    let node = graph
        .get(url)
        .ok_or_else(|| GraphError::NotFound(url.to_string()))?;
    read_through(&node, path, ReadScope::Analyses).await
}

/// Stylesheets of `dir`, resolved against the package's base path, found
/// through the package's glob cache. The package must have its data set
/// and have started work.
pub fn discover_stylesheets(
    graph: &BuildGraph,
    package: &NodeUrl,
    dir: &Path,
) -> BuildResult<Vec<PathBuf>> {
    let node = graph
        .get(package)
        .ok_or_else(|| GraphError::NotFound(package.to_string()))?;
    let mut guard = node.lock();
    let root = guard.package_data()?.base_path.join(dir);
    let globs = &mut guard.package_cache_mut()?.glob_cache;

    let found = match globs.stat(&root) {
        GlobEntry::Dir => globs.stylesheets(&root),
        GlobEntry::File if StyleDialect::detect(&root).is_some() => vec![root],
        _ => Vec::new(),
    };
    debug!(package = %package, stylesheets = found.len(), "stylesheets discovered");
    Ok(found)
}

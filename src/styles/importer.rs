//! `~`-prefixed stylesheet imports
//!
//! `@import '~pkg/theme'` refers to `node_modules/pkg/theme` in the nearest
//! enclosing `node_modules` directory that has it, searching outwards from
//! the importing file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

pub(crate) const NODE_MODULES: &str = "node_modules";

/// Resolves `target` (without the leading `~`) against the `node_modules`
/// directories enclosing `from`, innermost first.
///
/// A candidate matches when the path itself or its parent directory exists,
/// so partial paths such as `pkg/theme` resolve before the preprocessor adds
/// its own extension or partial prefix.
pub fn resolve_tilde_import(target: &str, from: &Path) -> Option<PathBuf> {
    for dir in from.ancestors() {
        let node_modules = dir.join(NODE_MODULES);
        if !node_modules.is_dir() {
            continue;
        }

        let candidate = node_modules.join(target);
        let parent_exists = candidate.parent().is_some_and(|p| p.exists());
        if candidate.exists() || parent_exists {
            return Some(candidate);
        }
    }

    None
}

/// Memoized import resolutions owned by one entry point.
///
/// Clones share the same table, so a clone can be handed to a preprocessor
/// running on a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct ImportResolutionCache {
    entries: Arc<Mutex<HashMap<(String, PathBuf), Option<PathBuf>>>>,
}

impl ImportResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves an import URL as written in the stylesheet. URLs without a
    /// leading `~` are left to the preprocessor and yield `None`.
    pub fn resolve(&self, url: &str, from: &Path) -> Option<PathBuf> {
        let target = url.strip_prefix('~')?;
        let key = (target.to_string(), from.to_path_buf());

        if let Some(hit) = self.entries.lock().get(&key) {
            return hit.clone();
        }

        let resolved = resolve_tilde_import(target, from);
        debug!(
            "Resolved import {} from {} to {:?}",
            url,
            from.display(),
            resolved
        );
        self.entries.lock().insert(key, resolved.clone());
        resolved
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

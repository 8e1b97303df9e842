//! Stylesheet transform pipeline
//!
//! [`StylesheetProcessor::process`] turns one stylesheet into minified CSS:
//!
//! 1. When the content has no include markers and a content cache is
//!    configured, the raw content is fingerprinted and looked up. A hit
//!    skips every stage.
//! 2. The dialect preprocessor renders the content to plain CSS. This is
//!    never cached: its output depends on every included file.
//! 3. When step 1 did not produce a fingerprint, the rendered CSS is
//!    fingerprinted and looked up.
//! 4. The postprocessor and the minifier run against the support matrix.
//! 5. The result is written to the cache under the last fingerprint.
//! 6. Diagnostics are reported through the [`BuildLog`].
//!
//! Diagnostics stored with a cached result are replayed on every hit, so a
//! cached build reports the same warnings as a fresh one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{generate_key, CacheRecord, ContentCache, EvictionConfig, EvictionReport};
use crate::error::{BuildError, BuildResult};
use crate::logging::{operations, services, BuildLog};

pub mod browsers;
pub mod compact;
pub mod dialect;
pub mod importer;

pub use browsers::{SupportMatrix, DEFAULT_BROWSERS};
pub use compact::{compact_css, CompactMinifier, PassthroughPostprocessor};
pub use dialect::{has_include_markers, StyleDialect};
pub use importer::{resolve_tilde_import, ImportResolutionCache};

/// How `url(...)` references are handled by the postprocessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CssUrl {
    /// Inline referenced assets as data URIs.
    #[default]
    Inline,
    /// Leave references untouched.
    None,
}

impl CssUrl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::None => "none",
        }
    }
}

/// Stand-ins for the processed file's paths inside cached diagnostics, so a
/// hit names the file being processed rather than the one that produced
/// the entry.
const OUTPUT_PLACEHOLDER: &str = "\u{0}output\u{0}";
const SOURCE_PLACEHOLDER: &str = "\u{0}source\u{0}";

/// Input to a dialect preprocessor.
#[derive(Debug, Clone)]
pub struct PreprocessRequest {
    pub file_path: PathBuf,
    pub content: String,
    pub dialect: StyleDialect,
    /// Indented syntax (`.sass`).
    pub indented: bool,
    pub base_path: PathBuf,
    pub include_paths: Vec<PathBuf>,
    /// Resolves `~` imports. Shared with the owning entry point.
    pub importer: ImportResolutionCache,
}

/// Input to the environment transform.
#[derive(Debug, Clone)]
pub struct PostprocessRequest {
    pub from: PathBuf,
    /// `from` with its extension swapped to `.css`.
    pub to: PathBuf,
    pub content: String,
    pub css_url: CssUrl,
    pub browsers: Vec<String>,
}

/// Input to the minifier.
#[derive(Debug, Clone)]
pub struct MinifyRequest {
    pub source_file: PathBuf,
    pub content: String,
    /// `None` targets everything the minifier supports.
    pub targets: Option<Vec<String>>,
}

/// Output of a postprocess stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Processed {
    pub css: String,
    pub warnings: Vec<String>,
}

/// Renders a stylesheet dialect to plain CSS.
pub trait Preprocessor: Send + Sync {
    fn render(&self, request: &PreprocessRequest) -> anyhow::Result<String>;
}

/// Target-environment transform (prefixing, shimming, url handling).
pub trait Postprocessor: Send + Sync {
    fn process(&self, request: &PostprocessRequest) -> anyhow::Result<Processed>;
}

pub trait Minifier: Send + Sync {
    fn minify(&self, request: &MinifyRequest) -> anyhow::Result<Processed>;
}

/// Construction options for a [`StylesheetProcessor`].
#[derive(Debug, Clone, Default)]
pub struct StylesheetOptions {
    pub base_path: PathBuf,
    pub css_url: CssUrl,
    pub include_paths: Vec<PathBuf>,
    /// Disk cache location. `None` disables both cache checkpoints.
    pub cache_dir: Option<PathBuf>,
    pub browsers: SupportMatrix,
    /// Size limit enforced by [`StylesheetProcessor::enforce_cache_limit`].
    pub eviction: Option<EvictionConfig>,
}

pub struct StylesheetProcessor {
    base_path: PathBuf,
    css_url: CssUrl,
    include_paths: Vec<PathBuf>,
    browsers: SupportMatrix,
    targets: Option<Vec<String>>,
    cache: Option<ContentCache>,
    eviction: Option<EvictionConfig>,
    preprocessors: HashMap<StyleDialect, Arc<dyn Preprocessor>>,
    postprocessor: Arc<dyn Postprocessor>,
    minifier: Arc<dyn Minifier>,
    importer: ImportResolutionCache,
    log: Arc<dyn BuildLog>,
}

impl StylesheetProcessor {
    /// Derives the minifier targets once for the lifetime of the processor.
    pub fn new(options: StylesheetOptions, log: Arc<dyn BuildLog>) -> Self {
        log.debug(&format!(
            "determine browserslist for {}",
            options.base_path.display()
        ));
        let targets = options.browsers.to_targets();

        Self {
            base_path: options.base_path,
            css_url: options.css_url,
            include_paths: options.include_paths,
            browsers: options.browsers,
            targets,
            cache: options.cache_dir.map(ContentCache::on_disk),
            eviction: options.eviction,
            preprocessors: HashMap::new(),
            postprocessor: Arc::new(PassthroughPostprocessor),
            minifier: Arc::new(CompactMinifier),
            importer: ImportResolutionCache::new(),
            log,
        }
    }

    /// Replaces the cache built from `cache_dir`.
    pub fn with_content_cache(mut self, cache: ContentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_preprocessor(
        mut self,
        dialect: StyleDialect,
        preprocessor: Arc<dyn Preprocessor>,
    ) -> Self {
        self.preprocessors.insert(dialect, preprocessor);
        self
    }

    pub fn with_postprocessor(mut self, postprocessor: Arc<dyn Postprocessor>) -> Self {
        self.postprocessor = postprocessor;
        self
    }

    pub fn with_minifier(mut self, minifier: Arc<dyn Minifier>) -> Self {
        self.minifier = minifier;
        self
    }

    pub fn with_importer(mut self, importer: ImportResolutionCache) -> Self {
        self.importer = importer;
        self
    }

    pub fn targets(&self) -> Option<&[String]> {
        self.targets.as_deref()
    }

    pub fn browsers(&self) -> &SupportMatrix {
        &self.browsers
    }

    pub fn cache(&self) -> Option<&ContentCache> {
        self.cache.as_ref()
    }

    /// Trims the content cache when it has grown past the configured limit.
    /// Does nothing without a cache or an eviction config.
    pub async fn enforce_cache_limit(&self) -> Option<EvictionReport> {
        match (&self.cache, &self.eviction) {
            (Some(cache), Some(config)) => cache.trim(config).await,
            _ => None,
        }
    }

    pub async fn process(&self, file_path: &Path, content: &str) -> BuildResult<String> {
        let dialect = StyleDialect::from_path(file_path);
        let mut key = None;

        if let Some(cache) = &self.cache {
            if !has_include_markers(content) {
                let fast_key = self.fingerprint(content, dialect);
                if let Some(record) = cache.read(&fast_key).await {
                    debug!(
                        service = services::STYLES,
                        operation = operations::PROCESS,
                        path = %file_path.display(),
                        "served from content cache"
                    );
                    return Ok(self.replay(file_path, record));
                }
                key = Some(fast_key);
            }
        }

        let rendered = self.render(file_path, content).await?;

        if let Some(cache) = &self.cache {
            // A fast-path key already missed; the rendered content adds
            // nothing to a fingerprint of include-free input.
            if key.is_none() {
                let rendered_key = self.fingerprint(&rendered, dialect);
                if let Some(record) = cache.read(&rendered_key).await {
                    debug!(
                        service = services::STYLES,
                        operation = operations::PROCESS,
                        path = %file_path.display(),
                        "served rendered stylesheet from content cache"
                    );
                    return Ok(self.replay(file_path, record));
                }
                key = Some(rendered_key);
            }
        }

        let processed = self.postprocess(file_path, rendered).await?;

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            let record = CacheRecord {
                output: processed.css.clone(),
                diagnostics: detach_paths(&processed.warnings, file_path),
            };
            cache.write(key, &record).await;
        }

        for warning in &processed.warnings {
            self.log.warn(warning);
        }

        Ok(processed.css)
    }

    /// Cache key for `content`, covering every option that reaches a
    /// collaborator and can change the output.
    fn fingerprint(&self, content: &str, dialect: StyleDialect) -> String {
        let options = [
            format!("dialect={}", dialect),
            format!("css_url={}", self.css_url.as_str()),
        ];
        let include_paths = self
            .include_paths
            .iter()
            .map(|path| format!("include_path={}", path.display()));
        let params = self
            .browsers
            .entries()
            .iter()
            .cloned()
            .chain(options)
            .chain(include_paths);
        generate_key(content, params)
    }

    fn replay(&self, file_path: &Path, record: CacheRecord) -> String {
        for warning in attach_paths(&record.diagnostics, file_path) {
            self.log.warn(&warning);
        }
        record.output
    }

    async fn render(&self, file_path: &Path, content: &str) -> BuildResult<String> {
        let dialect = StyleDialect::from_path(file_path);
        if !dialect.needs_preprocessing() {
            return Ok(content.to_string());
        }

        let preprocessor = self.preprocessors.get(&dialect).cloned().ok_or_else(|| {
            BuildError::configuration(format!(
                "no {} preprocessor configured for {}",
                dialect,
                file_path.display()
            ))
        })?;

        let request = PreprocessRequest {
            file_path: file_path.to_path_buf(),
            content: content.to_string(),
            dialect,
            indented: dialect == StyleDialect::Sass,
            base_path: self.base_path.clone(),
            include_paths: self.include_paths.clone(),
            importer: self.importer.clone(),
        };

        tokio::task::spawn_blocking(move || preprocessor.render(&request))
            .await
            .map_err(|e| BuildError::transform(file_path, e))?
            .map_err(|e| BuildError::transform(file_path, format!("{:#}", e)))
    }

    async fn postprocess(&self, file_path: &Path, content: String) -> BuildResult<Processed> {
        let postprocessor = Arc::clone(&self.postprocessor);
        let minifier = Arc::clone(&self.minifier);
        let request = PostprocessRequest {
            from: file_path.to_path_buf(),
            to: file_path.with_extension("css"),
            content,
            css_url: self.css_url,
            browsers: self.browsers.entries().to_vec(),
        };
        let targets = self.targets.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Processed> {
            let transformed = postprocessor.process(&request)?;
            let minified = minifier.minify(&MinifyRequest {
                source_file: request.from,
                content: transformed.css,
                targets,
            })?;

            let mut warnings = transformed.warnings;
            warnings.extend(minified.warnings);
            Ok(Processed {
                css: minified.css,
                warnings,
            })
        })
        .await
        .map_err(|e| BuildError::transform(file_path, e))?
        .map_err(|e| BuildError::transform(file_path, format!("{:#}", e)))
    }
}

fn output_path(file_path: &Path) -> String {
    file_path.with_extension("css").display().to_string()
}

fn detach_paths(warnings: &[String], file_path: &Path) -> Vec<String> {
    let output = output_path(file_path);
    let source = file_path.display().to_string();
    warnings
        .iter()
        .map(|warning| {
            let mut warning = warning.clone();
            // The output path first: for `.css` sources both are equal
            if !output.is_empty() {
                warning = warning.replace(&output, OUTPUT_PLACEHOLDER);
            }
            if !source.is_empty() {
                warning = warning.replace(&source, SOURCE_PLACEHOLDER);
            }
            warning
        })
        .collect()
}

fn attach_paths(diagnostics: &[String], file_path: &Path) -> Vec<String> {
    let output = output_path(file_path);
    let source = file_path.display().to_string();
    diagnostics
        .iter()
        .map(|diagnostic| {
            diagnostic
                .replace(OUTPUT_PLACEHOLDER, &output)
                .replace(SOURCE_PLACEHOLDER, &source)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Strips `@import`/`@use` lines and `$` variable declarations, and
    /// counts invocations.
    #[derive(Default)]
    pub struct CountingPreprocessor {
        pub calls: AtomicUsize,
    }

    impl Preprocessor for CountingPreprocessor {
        fn render(&self, request: &PreprocessRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(request
                .content
                .lines()
                .filter(|line| {
                    let line = line.trim_start();
                    !(line.starts_with("@import") || line.starts_with("@use") || line.starts_with('$'))
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }

    /// Appends a marker comment, emits one warning, and counts invocations.
    #[derive(Default)]
    pub struct CountingPostprocessor {
        pub calls: AtomicUsize,
        pub seen_browsers: parking_lot::Mutex<Vec<Vec<String>>>,
    }

    impl Postprocessor for CountingPostprocessor {
        fn process(&self, request: &PostprocessRequest) -> anyhow::Result<Processed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_browsers.lock().push(request.browsers.clone());
            Ok(Processed {
                css: request.content.clone(),
                warnings: vec![format!("{}: gradient syntax is outdated", request.to.display())],
            })
        }
    }

    pub struct FailingPreprocessor;

    impl Preprocessor for FailingPreprocessor {
        fn render(&self, request: &PreprocessRequest) -> anyhow::Result<String> {
            anyhow::bail!("Undefined variable in {}", request.file_path.display())
        }
    }
}

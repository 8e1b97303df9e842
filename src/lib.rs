// Library interface for ngpack
// Incremental build core: build graph, memoized file reads, the disk-backed
// content cache and the tiered stylesheet pipeline.

pub mod cache;
pub mod config;
pub mod error;
pub mod file_cache;
pub mod graph;
pub mod logging;
pub mod stage;
pub mod styles;
pub mod url;

// Re-export commonly used types
pub use cache::{generate_key, CacheRecord, ContentCache, EvictionConfig};
pub use config::{discover_config, load_config_with_discovery, NgpackConfig};
pub use error::{BuildError, BuildResult, GraphError};
pub use file_cache::FileCache;
pub use graph::{BuildGraph, Node, NodeKind, NodePredicate, NodeRef, NodeState};
pub use logging::{BuildLog, MemoryLog, TracingLog};
pub use stage::{discover_stylesheets, read_for_analysis, StageReport, StylesheetStage};
pub use styles::{StylesheetOptions, StylesheetProcessor, SupportMatrix};
pub use url::NodeUrl;

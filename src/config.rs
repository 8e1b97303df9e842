use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cache::EvictionConfig;
use crate::error::{BuildError, BuildResult};
use crate::styles::{CssUrl, StylesheetOptions, SupportMatrix, DEFAULT_BROWSERS};

/// File name looked up by [`discover_config`].
pub const CONFIG_FILE_NAME: &str = "ngpack.toml";

/// Complete ngpack configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NgpackConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub styles: StylesConfig,
}

/// Disk content cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Disable to recompute every transform
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory path. Defaults to the platform cache directory.
    #[serde(default)]
    pub dir: Option<String>,

    /// Maximum cache size (e.g., "500MB", "1GB")
    #[serde(default = "default_max_size")]
    pub max_size: String,

    /// Eviction policy: lru, ttl
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,

    /// Entry lifetime for the ttl policy
    #[serde(default = "default_ttl")]
    pub default_ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_size: default_max_size(),
            eviction_policy: default_eviction_policy(),
            default_ttl: default_ttl(),
        }
    }
}

/// Stylesheet pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StylesConfig {
    #[serde(default)]
    pub css_url: CssUrl,

    /// Extra directories preprocessors search for includes
    #[serde(default)]
    pub include_paths: Vec<String>,

    /// Resolved support matrix entries ("chrome 120", "ios_saf 17.0-17.2")
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            css_url: CssUrl::default(),
            include_paths: Vec::new(),
            browsers: default_browsers(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_size() -> String {
    "1GB".to_string()
}

fn default_eviction_policy() -> String {
    "lru".to_string()
}

fn default_ttl() -> String {
    "30d".to_string()
}

fn default_browsers() -> Vec<String> {
    DEFAULT_BROWSERS.iter().map(|s| s.to_string()).collect()
}

impl NgpackConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: NgpackConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Applies `NGPACK_CACHE` and `NGPACK_CACHE_DIR`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("NGPACK_CACHE") {
            let value = value.trim().to_lowercase();
            if value == "0" || value == "false" {
                debug!("Disk cache disabled by NGPACK_CACHE");
                self.cache.enabled = false;
            }
        }

        if let Some(dir) = lookup("NGPACK_CACHE_DIR").filter(|d| !d.is_empty()) {
            debug!("Cache directory overridden by NGPACK_CACHE_DIR: {}", dir);
            self.cache.dir = Some(dir);
        }
    }

    /// Effective cache directory, `None` when caching is disabled.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }

        match &self.cache.dir {
            Some(dir) => Some(PathBuf::from(dir)),
            None => dirs::cache_dir().map(|dir| dir.join("ngpack")),
        }
    }

    pub fn eviction_config(&self) -> BuildResult<EvictionConfig> {
        EvictionConfig::from_cache_config(
            &self.cache.max_size,
            &self.cache.eviction_policy,
            &self.cache.default_ttl,
        )
        .map_err(|e| BuildError::configuration(format!("cache: {:#}", e)))
    }

    pub fn support_matrix(&self) -> BuildResult<SupportMatrix> {
        SupportMatrix::parse(&self.styles.browsers)
    }

    /// Options for processors of stylesheets under `base_path`.
    pub fn stylesheet_options(&self, base_path: &Path) -> BuildResult<StylesheetOptions> {
        Ok(StylesheetOptions {
            base_path: base_path.to_path_buf(),
            css_url: self.styles.css_url,
            include_paths: self
                .styles
                .include_paths
                .iter()
                .map(|p| base_path.join(p))
                .collect(),
            cache_dir: self.cache_dir(),
            browsers: self.support_matrix()?,
            eviction: Some(self.eviction_config()?),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> BuildResult<()> {
        if self.cache.enabled && matches!(&self.cache.dir, Some(dir) if dir.trim().is_empty()) {
            return Err(BuildError::configuration("cache.dir must not be empty"));
        }

        let eviction = self.eviction_config()?;
        if eviction.max_size_bytes == 0 {
            return Err(BuildError::configuration(
                "cache.max_size must be greater than zero",
            ));
        }

        self.support_matrix()?;
        Ok(())
    }
}

/// Walks up from `start_dir` looking for `ngpack.toml`.
pub fn discover_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Loads the explicit config file, or the discovered one, or defaults.
/// Environment overrides are applied and the result is validated.
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<NgpackConfig> {
    let mut config = match explicit_path {
        Some(path) => NgpackConfig::from_file(path)?,
        None => {
            let current_dir = std::env::current_dir()
                .context("Failed to get current directory for config discovery")?;
            match discover_config(&current_dir) {
                Some(path) => {
                    debug!("Using config file {}", path.display());
                    NgpackConfig::from_file(&path)?
                }
                None => NgpackConfig::default(),
            }
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

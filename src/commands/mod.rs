pub mod cache;
pub mod style;

use anyhow::Result;
use ngpack::config::{load_config_with_discovery, NgpackConfig};

use crate::cli::CommonConfigArgs;

/// Loads configuration and applies command-line overrides on top.
pub fn load_config(args: &CommonConfigArgs) -> Result<NgpackConfig> {
    let mut config = load_config_with_discovery(args.config.as_deref())?;

    if let Some(dir) = &args.cache_dir {
        config.cache.dir = Some(dir.to_string_lossy().into_owned());
    }

    Ok(config)
}

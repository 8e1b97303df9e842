/// `ngpack style` command implementation
///
/// Runs one stylesheet through the tiered pipeline.
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use ngpack::logging::TracingLog;
use ngpack::styles::{StylesheetProcessor, SupportMatrix};

use crate::cli::StyleArgs;
use crate::cli_utils::ngpack_prefix;

pub async fn run(args: StyleArgs) -> Result<()> {
    let config = super::load_config(&args.common)?;

    let file = std::path::absolute(&args.file)
        .with_context(|| format!("Failed to resolve path: {}", args.file.display()))?;
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read stylesheet: {}", file.display()))?;

    let base_path = file.parent().unwrap_or(Path::new("."));
    let mut options = config.stylesheet_options(base_path)?;
    if args.no_cache {
        options.cache_dir = None;
    }
    if !args.browsers.is_empty() {
        options.browsers = SupportMatrix::parse(&args.browsers)?;
    }

    let processor = StylesheetProcessor::new(options, Arc::new(TracingLog));
    let css = processor.process(&file, &content).await?;
    processor.enforce_cache_limit().await;

    match &args.out {
        Some(out) => {
            tokio::fs::write(out, &css)
                .await
                .with_context(|| format!("Failed to write output: {}", out.display()))?;
            eprintln!("{} Wrote {}", ngpack_prefix(), out.display());
        }
        None => println!("{}", css),
    }

    Ok(())
}

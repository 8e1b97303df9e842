use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// ngpack - Incremental library packaging core
///
/// Processes stylesheets through the cached transform pipeline and manages
/// the disk content cache.
#[derive(Parser, Debug)]
#[command(name = "ngpack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental library packaging core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration arguments shared across commands
#[derive(Args, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path (defaults to the nearest ngpack.toml)
    #[arg(short = 'c', long, env = "NGPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Content cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a stylesheet and print the resulting CSS
    Style(StyleArgs),

    /// Manage the disk content cache
    Cache(CacheArgs),
}

#[derive(Args, Debug)]
pub struct StyleArgs {
    /// Stylesheet to process
    pub file: PathBuf,

    /// Write the result to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Skip both content cache checkpoints
    #[arg(long)]
    pub no_cache: bool,

    /// Support matrix entries, replacing the configured ones ("chrome 120")
    #[arg(long = "browser")]
    pub browsers: Vec<String>,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Run one eviction pass using the configured policy
    Gc,

    /// Remove every cache entry
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_style_command() {
        let cli = Cli::try_parse_from([
            "ngpack",
            "style",
            "src/a.scss",
            "--browser",
            "chrome 120",
            "--browser",
            "safari TP",
            "--no-cache",
        ])
        .unwrap();

        let Commands::Style(args) = cli.command else {
            panic!("expected style command");
        };
        assert_eq!(args.file, PathBuf::from("src/a.scss"));
        assert_eq!(args.browsers, vec!["chrome 120", "safari TP"]);
        assert!(args.no_cache);
    }

    #[test]
    fn test_parse_cache_command() {
        let cli = Cli::try_parse_from(["ngpack", "cache", "--cache-dir", "/tmp/c", "gc"]).unwrap();

        let Commands::Cache(args) = cli.command else {
            panic!("expected cache command");
        };
        assert_eq!(args.command, CacheCommands::Gc);
        assert_eq!(args.common.cache_dir, Some(PathBuf::from("/tmp/c")));
    }
}

mod cli;
mod cli_utils;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    ngpack::logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Style(args) => commands::style::run(args).await,
        Commands::Cache(args) => commands::cache::run(args).await,
    }
}

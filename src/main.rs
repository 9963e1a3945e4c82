//! frametrace CLI entry point

use anyhow::Context;
use clap::Parser;
use frametrace::cli::{Cli, Commands};
use frametrace::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_env("FRAMETRACE_LOG"))
        .init();

    let cli = Cli::parse();

    // Surface a broken FRAMETRACE_CONFIG before doing any work
    Config::load().context("failed to load FRAMETRACE_CONFIG")?;

    match cli.command {
        Commands::Scope(args) => frametrace::cli::scope::run(args),
        Commands::Outline(args) => frametrace::cli::scope::outline(args),
        Commands::RenderGraph(args) => frametrace::cli::graph::run(args),
    }
    .context("command failed")
}

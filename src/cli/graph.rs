//! Call-graph rendering command
//!
//! @module cli/graph

use crate::core::error::Result;
use crate::trace::{load_call_graph, render_call_tree};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct RenderGraphArgs {
    /// JSON artifact written in call-graph mode
    pub path: PathBuf,

    /// Print the node list as JSON instead of a tree
    #[arg(long)]
    pub json: bool,
}

/// Run the render-graph command
pub fn run(args: RenderGraphArgs) -> Result<()> {
    let nodes = load_call_graph(&args.path)?;
    info!(nodes = nodes.len(), path = %args.path.display(), "Loaded call graph");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
    } else {
        print!("{}", render_call_tree(&nodes));
    }
    Ok(())
}

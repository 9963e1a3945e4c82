//! CLI command definitions and handlers

pub mod graph;
pub mod scope;

use clap::{Parser, Subcommand};

const LONG_ABOUT: &str = r#"
Selective execution tracing for Python programs.

The tracing engines are a library; the command line exposes the pieces
that work on files alone.

SCOPE QUERIES (also the out-of-process resolver protocol):
    frametrace scope get_statement_range app.py 12
    frametrace scope get_belonging_method app.py 12
    frametrace scope get_method_range app.py Parser.parse

    Each prints {"start_line": N, "end_line": M}, or nulls when nothing
    matches.

OUTLINE:
    frametrace outline app.py         Every class and function with its lines

CALL GRAPHS:
    frametrace render-graph graph.json

ENVIRONMENT:
    FRAMETRACE_LOG        Log filter (e.g. debug, frametrace=trace)
    FRAMETRACE_CONFIG     TOML configuration file
    FRAMETRACE_DISABLED   Non-empty to turn block tracing into a no-op
"#;

/// Selective execution tracer
#[derive(Parser, Debug)]
#[command(name = "frametrace")]
#[command(author, version)]
#[command(about = "Selective execution tracer for Python programs")]
#[command(long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer one scope query as JSON
    Scope(scope::ScopeArgs),

    /// List the qualified classes and functions of a file
    Outline(scope::OutlineArgs),

    /// Render a call-graph artifact as an indented tree
    #[command(visible_alias = "rg")]
    RenderGraph(graph::RenderGraphArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scope_command() {
        let cli = Cli::parse_from([
            "frametrace",
            "scope",
            "get_belonging_method",
            "app.py",
            "7",
        ]);
        match cli.command {
            Commands::Scope(args) => {
                assert_eq!(args.op, "get_belonging_method");
                assert_eq!(args.param, "7");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_render_graph_alias() {
        let cli = Cli::parse_from(["frametrace", "rg", "graph.json"]);
        assert!(matches!(cli.command, Commands::RenderGraph(_)));
    }
}

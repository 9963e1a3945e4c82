//! Scope commands
//!
//! `scope` speaks the resolver wire protocol: one query in, one JSON reply
//! out. A query that matches nothing still succeeds with null lines, so a
//! [`SubprocessResolver`](crate::scope::SubprocessResolver) can point at
//! this binary.
//!
//! @module cli/scope

use crate::core::error::{Error, Result};
use crate::scope::{absolute, cached_index, ScopeKind, ScopeQuery, ScopeReply, TreeSitterResolver};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct ScopeArgs {
    /// get_statement_range, get_belonging_method or get_method_range
    pub op: String,

    /// Python source file
    pub file: PathBuf,

    /// Line number, or dotted method name for get_method_range
    pub param: String,
}

#[derive(Args, Debug)]
pub struct OutlineArgs {
    /// Python source file
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct OutlineEntry {
    name: String,
    kind: ScopeKind,
    start_line: u32,
    end_line: u32,
}

/// Run the scope command
pub fn run(args: ScopeArgs) -> Result<()> {
    let query = ScopeQuery::from_parts(&args.op, &args.param).ok_or_else(|| {
        Error::InvalidTarget {
            message: format!("unknown scope query {} {}", args.op, args.param),
        }
    })?;
    let file = absolute(&args.file);
    debug!(op = query.op_name(), file = %file.display(), "Scope query");

    let reply = ScopeReply::from(query.run(&TreeSitterResolver::new(), &file));
    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}

/// Run the outline command
pub fn outline(args: OutlineArgs) -> Result<()> {
    let file = absolute(&args.file);
    let index = cached_index(&file);

    let mut entries: Vec<OutlineEntry> = index
        .ranges()
        .iter()
        .map(|(name, range)| OutlineEntry {
            name: name.clone(),
            kind: range.kind,
            start_line: range.span.start,
            end_line: range.span.end,
        })
        .collect();
    entries.sort_by(|a, b| a.start_line.cmp(&b.start_line).then(a.name.cmp(&b.name)));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No classes or functions found in {}", file.display());
        return Ok(());
    }
    for entry in entries {
        let kind = match entry.kind {
            ScopeKind::Class => "class",
            _ => "def",
        };
        println!(
            "{:>5}-{:<5} {:<5} {}",
            entry.start_line, entry.end_line, kind, entry.name
        );
    }
    Ok(())
}

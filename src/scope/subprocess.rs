//! Out-of-process scope resolution
//!
//! Sends one request per child process (`<program> [args..] <op> <file>
//! <param>`) and reads a single JSON reply from its stdout. Any failure
//! along the way degrades to "not found".
//!
//! @module scope/subprocess

use super::{LineSpan, ScopeQuery, ScopeResolver};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Wire form of a resolver answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScopeReply {
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

impl ScopeReply {
    pub fn into_span(self) -> Option<LineSpan> {
        match (self.start_line, self.end_line) {
            (Some(start), Some(end)) if start <= end => Some(LineSpan::new(start, end)),
            _ => None,
        }
    }

    /// Parse a reply as printed by a resolver process
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text.trim()).ok()
    }
}

impl From<Option<LineSpan>> for ScopeReply {
    fn from(span: Option<LineSpan>) -> Self {
        Self {
            start_line: span.map(|s| s.start),
            end_line: span.map(|s| s.end),
        }
    }
}

/// Resolver that asks an external process
#[derive(Debug, Clone)]
pub struct SubprocessResolver {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessResolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the operation name (e.g. a `scope` subcommand)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn request(&self, file: &Path, query: &ScopeQuery) -> Option<LineSpan> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(query.op_name())
            .arg(file)
            .arg(query.param())
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    "Scope resolver {} could not start: {}",
                    self.program.display(),
                    e
                );
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                "Scope resolver {} failed for {}: {}",
                query.op_name(),
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match ScopeReply::parse(&stdout) {
            Some(reply) => reply.into_span(),
            None => {
                tracing::warn!("Scope resolver returned malformed reply: {}", stdout.trim());
                None
            }
        }
    }
}

impl ScopeResolver for SubprocessResolver {
    fn statement_range(&self, file: &Path, line: u32) -> Option<LineSpan> {
        self.request(file, &ScopeQuery::StatementRange(line))
    }

    fn enclosing_method_range(&self, file: &Path, line: u32) -> Option<LineSpan> {
        self.request(file, &ScopeQuery::BelongingMethod(line))
    }

    fn method_range(&self, file: &Path, qualified_name: &str) -> Option<LineSpan> {
        self.request(file, &ScopeQuery::MethodRange(qualified_name.to_string()))
    }
}

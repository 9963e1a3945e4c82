//! Static scope resolution
//!
//! Answers "which construct contains this line" questions for Python source
//! files. Both tracers consult a [`ScopeResolver`] before a run to turn a
//! method name or a variable's line into a line range. "Not found" is an
//! ordinary answer here, never an error: a missing file, a syntax error or
//! an unknown name all come back as `None`.
//!
//! @module scope

pub mod index;
pub mod subprocess;

pub use index::{cached_index, ScopeIndex};
pub use subprocess::{ScopeReply, SubprocessResolver};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// TYPES
// =============================================================================

/// Inclusive 1-indexed line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: u32,
    pub end: u32,
}

impl LineSpan {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "line span {}..{} is inverted", start, end);
        Self { start, end }
    }

    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }

    /// Number of lines after the first one
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_single_line(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for LineSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single_line() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// What kind of construct a range belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Statement,
    Method,
    Class,
}

/// A recorded construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeRange {
    pub kind: ScopeKind,
    pub span: LineSpan,
}

// =============================================================================
// RESOLVER CONTRACT
// =============================================================================

/// Request/response contract for scope lookups
pub trait ScopeResolver: Send + Sync {
    /// Construct starting at `line`, grouped to its full multi-line extent
    fn statement_range(&self, file: &Path, line: u32) -> Option<LineSpan>;

    /// Innermost function or method containing `line`
    fn enclosing_method_range(&self, file: &Path, line: u32) -> Option<LineSpan>;

    /// Range of a function, method or class by dotted name
    fn method_range(&self, file: &Path, qualified_name: &str) -> Option<LineSpan>;
}

/// In-process resolver backed by the shared tree-sitter index cache
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterResolver;

impl TreeSitterResolver {
    pub fn new() -> Self {
        Self
    }
}

impl ScopeResolver for TreeSitterResolver {
    fn statement_range(&self, file: &Path, line: u32) -> Option<LineSpan> {
        cached_index(file).statement_range(line)
    }

    fn enclosing_method_range(&self, file: &Path, line: u32) -> Option<LineSpan> {
        cached_index(file).enclosing_method_range(line)
    }

    fn method_range(&self, file: &Path, qualified_name: &str) -> Option<LineSpan> {
        cached_index(file).method_range(qualified_name)
    }
}

/// One resolver request, as named on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeQuery {
    StatementRange(u32),
    BelongingMethod(u32),
    MethodRange(String),
}

impl ScopeQuery {
    /// Parse `op` + `param` as given on the command line
    pub fn from_parts(op: &str, param: &str) -> Option<Self> {
        match op {
            "get_statement_range" => param.parse().ok().map(ScopeQuery::StatementRange),
            "get_belonging_method" => param.parse().ok().map(ScopeQuery::BelongingMethod),
            "get_method_range" => Some(ScopeQuery::MethodRange(param.to_string())),
            _ => None,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            ScopeQuery::StatementRange(_) => "get_statement_range",
            ScopeQuery::BelongingMethod(_) => "get_belonging_method",
            ScopeQuery::MethodRange(_) => "get_method_range",
        }
    }

    pub fn param(&self) -> String {
        match self {
            ScopeQuery::StatementRange(line) | ScopeQuery::BelongingMethod(line) => {
                line.to_string()
            }
            ScopeQuery::MethodRange(name) => name.clone(),
        }
    }

    pub fn run(&self, resolver: &dyn ScopeResolver, file: &Path) -> Option<LineSpan> {
        match self {
            ScopeQuery::StatementRange(line) => resolver.statement_range(file, *line),
            ScopeQuery::BelongingMethod(line) => resolver.enclosing_method_range(file, *line),
            ScopeQuery::MethodRange(name) => resolver.method_range(file, name),
        }
    }
}

/// Absolute form of `path` without touching the filesystem
pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn python_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_span_display() {
        assert_eq!(LineSpan::new(4, 4).to_string(), "4");
        assert_eq!(LineSpan::new(4, 6).to_string(), "4-6");
    }

    #[test]
    fn test_query_round_trip_names() {
        let q = ScopeQuery::from_parts("get_belonging_method", "7").unwrap();
        assert_eq!(q, ScopeQuery::BelongingMethod(7));
        assert_eq!(q.op_name(), "get_belonging_method");
        assert!(ScopeQuery::from_parts("get_statement_range", "x").is_none());
        assert!(ScopeQuery::from_parts("nope", "1").is_none());
    }

    #[test]
    fn test_tree_sitter_resolver_on_disk() {
        let file = python_file("def f():\n    a = 1\n    def g():\n        return a\n    return g\n");
        let resolver = TreeSitterResolver::new();
        assert_eq!(
            resolver.enclosing_method_range(file.path(), 4),
            Some(LineSpan::new(3, 4))
        );
        assert_eq!(resolver.method_range(file.path(), "f"), Some(LineSpan::new(1, 5)));
        assert_eq!(
            ScopeQuery::StatementRange(2).run(&resolver, file.path()),
            Some(LineSpan::new(2, 2))
        );
    }

    #[test]
    fn test_scenario_nested_function_range() {
        let file = python_file(
            "import sys\n\ndef f():\n    x = 1\n    y = 2\n    def g():\n        z = x + y\n        return z\n    w = g()\n    return w\n",
        );
        let resolver = TreeSitterResolver::new();
        assert_eq!(
            resolver.enclosing_method_range(file.path(), 7),
            Some(LineSpan::new(6, 8))
        );
        assert_eq!(resolver.method_range(file.path(), "f"), Some(LineSpan::new(3, 10)));
    }
}

//! Structural range index for one Python source file
//!
//! Built once from a tree-sitter parse: every named node contributes its
//! line extent to the statement table, and every class and function is
//! recorded under its dotted name (enclosing classes and functions first).
//!
//! @module scope/index

use super::{LineSpan, ScopeKind, ScopeRange};
use crate::core::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tree_sitter::{Node, Parser};

/// Node kinds that never form a statement of their own
/// Nodes with no line of their own in the interpreter's syntax tree
const NON_STATEMENT_KINDS: &[&str] = &[
    "module",
    "block",
    "comment",
    "decorated_definition",
    "else_clause",
    "finally_clause",
];

static INDEX_CACHE: Lazy<RwLock<HashMap<PathBuf, Arc<ScopeIndex>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

// =============================================================================
// INDEX
// =============================================================================

/// Line ranges of statements, functions and classes in one file
#[derive(Debug, Default, Clone)]
pub struct ScopeIndex {
    /// Start line -> furthest end line of any construct starting there
    statement_ends: HashMap<u32, u32>,
    /// Qualified name -> range, for classes and functions
    ranges: HashMap<String, ScopeRange>,
}

impl ScopeIndex {
    /// Parse source text into an index
    ///
    /// Source with syntax errors is rejected rather than partially indexed.
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| Error::ScopeResolution {
                message: format!("failed to load python grammar: {}", e),
            })?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| Error::ScopeResolution {
                message: "parser returned no tree".to_string(),
            })?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(Error::ScopeResolution {
                message: "syntax error".to_string(),
            });
        }

        let mut index = ScopeIndex::default();
        let mut names = Vec::new();
        index.collect(root, source.as_bytes(), &mut names);
        Ok(index)
    }

    /// Read and parse a file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&String::from_utf8_lossy(&bytes))
    }

    /// Empty index: every query answers "not found"
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.statement_ends.is_empty() && self.ranges.is_empty()
    }

    /// Classes and functions by qualified name
    pub fn ranges(&self) -> &HashMap<String, ScopeRange> {
        &self.ranges
    }

    /// The construct starting exactly at `line` that reaches furthest
    pub fn statement_range(&self, line: u32) -> Option<LineSpan> {
        self.statement_ends
            .get(&line)
            .map(|&end| LineSpan::new(line, end))
    }

    /// Innermost function containing `line`
    pub fn enclosing_method_range(&self, line: u32) -> Option<LineSpan> {
        self.ranges
            .values()
            .filter(|r| r.kind == ScopeKind::Method && r.span.contains(line))
            .map(|r| r.span)
            .min_by_key(|span| (span.len(), std::cmp::Reverse(span.start)))
    }

    /// Exact lookup by dotted name (`Class.method`, `outer.inner`)
    pub fn method_range(&self, qualified_name: &str) -> Option<LineSpan> {
        self.ranges.get(qualified_name).map(|r| r.span)
    }

    fn collect(&mut self, node: Node<'_>, source: &[u8], names: &mut Vec<String>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let kind = child.kind();
            let span = node_span(&child);

            if !NON_STATEMENT_KINDS.contains(&kind) {
                self.statement_ends
                    .entry(span.start)
                    .and_modify(|end| *end = (*end).max(span.end))
                    .or_insert(span.end);
            }

            let scope_kind = match kind {
                "class_definition" => Some(ScopeKind::Class),
                "function_definition" => Some(ScopeKind::Method),
                _ => None,
            };

            let name = scope_kind.and_then(|_| {
                child
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(source).ok())
                    .map(str::to_string)
            });

            match (scope_kind, name) {
                (Some(kind), Some(name)) => {
                    names.push(name);
                    self.ranges
                        .insert(names.join("."), ScopeRange { kind, span });
                    self.collect(child, source, names);
                    names.pop();
                }
                _ => {
                    if child.named_child_count() > 0 {
                        self.collect(child, source, names);
                    }
                }
            }
        }
    }
}

/// 1-indexed inclusive line extent of a node
fn node_span(node: &Node<'_>) -> LineSpan {
    let start = node.start_position();
    let end = node.end_position();
    let start_line = start.row as u32 + 1;
    // A node ending at column 0 stops before that row's first character
    let end_row = if end.column == 0 && end.row > start.row {
        end.row - 1
    } else {
        end.row
    };
    LineSpan::new(start_line, end_row as u32 + 1)
}

// =============================================================================
// CACHE
// =============================================================================

/// Index for `path`, parsed at most once per process
///
/// Unreadable or unparsable files are memoized as empty indexes.
pub fn cached_index(path: &Path) -> Arc<ScopeIndex> {
    let key = super::absolute(path);

    if let Some(index) = INDEX_CACHE.read().get(&key) {
        return Arc::clone(index);
    }

    let index = match ScopeIndex::load(&key) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!("Scope index unavailable for {}: {}", key.display(), e);
            ScopeIndex::empty()
        }
    };

    let mut cache = INDEX_CACHE.write();
    Arc::clone(cache.entry(key).or_insert_with(|| Arc::new(index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os


def f():
    x = 0
    def g():
        y = x
        return y
    for i in range(3):
        x = x + i
    return g()


class Outer:
    class Inner:
        def method(self):
            return 1

    async def fetch(self,
                    url):
        return url
"#;

    #[test]
    fn test_method_and_class_ranges() {
        let index = ScopeIndex::parse(SAMPLE).unwrap();
        assert_eq!(index.method_range("f"), Some(LineSpan::new(4, 11)));
        assert_eq!(index.method_range("f.g"), Some(LineSpan::new(6, 8)));
        assert_eq!(index.method_range("Outer"), Some(LineSpan::new(14, 21)));
        assert_eq!(index.method_range("Outer.Inner"), Some(LineSpan::new(15, 17)));
        assert_eq!(
            index.method_range("Outer.Inner.method"),
            Some(LineSpan::new(16, 17))
        );
        assert_eq!(index.method_range("Outer.fetch"), Some(LineSpan::new(19, 21)));
        assert_eq!(index.method_range("missing"), None);
        assert_eq!(index.ranges()["Outer"].kind, ScopeKind::Class);
    }

    #[test]
    fn test_enclosing_method_prefers_innermost() {
        let index = ScopeIndex::parse(SAMPLE).unwrap();
        assert_eq!(index.enclosing_method_range(7), Some(LineSpan::new(6, 8)));
        assert_eq!(index.enclosing_method_range(10), Some(LineSpan::new(4, 11)));
        assert_eq!(index.enclosing_method_range(1), None);
    }

    #[test]
    fn test_statement_range_spans_multiline_constructs() {
        let index = ScopeIndex::parse(SAMPLE).unwrap();
        assert_eq!(index.statement_range(5), Some(LineSpan::new(5, 5)));
        assert_eq!(index.statement_range(9), Some(LineSpan::new(9, 10)));
        assert_eq!(index.statement_range(19), Some(LineSpan::new(19, 21)));
        assert_eq!(index.statement_range(2), None);
    }

    #[test]
    fn test_nested_child_range_wins_inside_child() {
        let index = ScopeIndex::parse(SAMPLE).unwrap();
        let parent = index.method_range("f").unwrap();
        let child = index.method_range("f.g").unwrap();
        assert!(parent.start <= child.start && child.end <= parent.end);
        for line in child.start..=child.end {
            assert_eq!(index.enclosing_method_range(line), Some(child));
        }
    }

    #[test]
    fn test_decorators_and_else_lines() {
        let source = "\
@decorator
def h():
    if True:
        pass
    else:
        pass
";
        let index = ScopeIndex::parse(source).unwrap();
        assert_eq!(index.statement_range(1), Some(LineSpan::new(1, 1)));
        assert_eq!(index.statement_range(2), Some(LineSpan::new(2, 6)));
        assert_eq!(index.statement_range(3), Some(LineSpan::new(3, 6)));
        assert_eq!(index.statement_range(5), None);
        assert_eq!(index.method_range("h"), Some(LineSpan::new(2, 6)));
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        assert!(ScopeIndex::parse("def broken(:\n    pass\n").is_err());
    }

    #[test]
    fn test_missing_file_caches_empty_index() {
        let index = cached_index(Path::new("/definitely/not/here.py"));
        assert!(index.is_empty());
        assert_eq!(index.statement_range(1), None);
    }
}

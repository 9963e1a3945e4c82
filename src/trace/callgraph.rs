//! Call graph assembly and rendering
//!
//! In call-graph mode the tracer buffers one node per call instead of
//! writing text. A node opens with the call marker and source path and is
//! closed by a return marker plus return value, or by the exception-ended
//! marker. Nodes are kept in call order; each node's depth is all a
//! renderer needs to rebuild the tree.
//!
//! @module trace/callgraph

use crate::core::error::{Error, Result};
use crate::host::FrameId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CALL_MARKER: &str = "Call ... ";
pub const RETURN_MARKER: &str = "Return ... ";
pub const RETURN_VALUE_MARKER: &str = "Return value:.. ";
pub const SOURCE_PATH_MARKER: &str = "Source path:... ";
pub const STARTING_VAR_MARKER: &str = "Starting var:.. ";
pub const ENDED_BY_EXCEPTION: &str = "Call ended by exception";

/// Tree drawing pieces
mod tree_chars {
    pub const BRANCH: &str = "├─ ";
    pub const CONTINUE: &str = "│  ";
    pub const GUIDE: &str = "│   ";
}

// =============================================================================
// TYPES
// =============================================================================

/// One call, as serialized in the call-graph artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraphNode {
    pub depth: i64,
    pub content: Vec<String>,
}

impl CallGraphNode {
    pub fn is_closed(&self) -> bool {
        self.content.last().map_or(false, |line| {
            line.starts_with(RETURN_VALUE_MARKER) || line == ENDED_BY_EXCEPTION
        })
    }
}

/// Buffer of call nodes for one session
#[derive(Debug, Default)]
pub struct CallGraph {
    nodes: Vec<CallGraphNode>,
    /// Frames whose node is still waiting for its closing marker
    open: HashMap<FrameId, usize>,
    output: Option<PathBuf>,
}

impl CallGraph {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn nodes(&self) -> &[CallGraphNode] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<CallGraphNode> {
        self.nodes
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Start a node for `frame`
    pub fn open(
        &mut self,
        frame: FrameId,
        depth: i64,
        source_line: &str,
        source_path: &str,
        starting_vars: Option<&str>,
    ) {
        let mut content = vec![
            format!("{}{}", CALL_MARKER, source_line),
            format!("{}{}", SOURCE_PATH_MARKER, source_path),
        ];
        if let Some(vars) = starting_vars {
            content.push(format!("{}{}", STARTING_VAR_MARKER, vars));
        }
        self.open.insert(frame, self.nodes.len());
        self.nodes.push(CallGraphNode { depth, content });
    }

    /// Close `frame`'s node with a normal return
    pub fn close_return(&mut self, frame: FrameId, source_line: &str, value: &str) -> Result<()> {
        let node = self.take_open(frame)?;
        node.content.push(format!("{}{}", RETURN_MARKER, source_line));
        node.content.push(format!("{}{}", RETURN_VALUE_MARKER, value));
        Ok(())
    }

    /// Close `frame`'s node as ended by an exception
    pub fn close_exception(&mut self, frame: FrameId) -> Result<()> {
        let node = self.take_open(frame)?;
        node.content.push(ENDED_BY_EXCEPTION.to_string());
        Ok(())
    }

    pub fn is_open(&self, frame: FrameId) -> bool {
        self.open.contains_key(&frame)
    }

    fn take_open(&mut self, frame: FrameId) -> Result<&mut CallGraphNode> {
        let index = self
            .open
            .remove(&frame)
            .ok_or_else(|| Error::StateInconsistency {
                message: format!("frame {} returned without a recorded call", frame.raw()),
            })?;
        Ok(&mut self.nodes[index])
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.nodes)?)
    }

    /// Rewrite the output file with the whole graph, if one is configured
    pub fn flush(&self) -> Result<()> {
        if let Some(path) = &self.output {
            std::fs::write(path, self.to_json()?)?;
        }
        Ok(())
    }
}

/// Read a call-graph artifact written by [`CallGraph::flush`]
pub fn load_call_graph(path: &Path) -> Result<Vec<CallGraphNode>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

// =============================================================================
// RENDERING
// =============================================================================

/// Indented tree of call nodes, relative to the shallowest node
pub fn render_call_tree(nodes: &[CallGraphNode]) -> String {
    let base = nodes.iter().map(|n| n.depth).min().unwrap_or(0);
    let mut output = String::new();

    for node in nodes {
        let level = (node.depth - base).max(0) as usize;
        let guide = tree_chars::GUIDE.repeat(level);
        for (i, line) in node.content.iter().enumerate() {
            output.push_str(&guide);
            output.push_str(if i == 0 {
                tree_chars::BRANCH
            } else {
                tree_chars::CONTINUE
            });
            output.push_str(line);
            output.push('\n');
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_ids() -> (FrameId, FrameId) {
        (FrameId::next(), FrameId::next())
    }

    #[test]
    fn test_nodes_open_and_close_in_call_order() {
        let (f, g) = frame_ids();
        let mut graph = CallGraph::new(None);
        graph.open(f, 1, "def f():", "/a.py", None);
        graph.open(g, 2, "def g(x):", "/a.py", Some("x = 1"));
        graph.close_return(g, "    return x", "1").unwrap();
        graph.close_exception(f).unwrap();

        let nodes = graph.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].content[2], "Starting var:.. x = 1");
        assert_eq!(nodes[1].content.last().unwrap(), "Return value:.. 1");
        assert_eq!(nodes[0].content.last().unwrap(), ENDED_BY_EXCEPTION);
        assert!(nodes.iter().all(CallGraphNode::is_closed));
    }

    #[test]
    fn test_close_unknown_frame_is_inconsistency() {
        let (f, _) = frame_ids();
        let mut graph = CallGraph::new(None);
        let err = graph.close_return(f, "return", "None").unwrap_err();
        assert!(matches!(err, Error::StateInconsistency { .. }));
    }

    #[test]
    fn test_flush_and_load_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        let (f, _) = frame_ids();
        let mut graph = CallGraph::new(Some(path.clone()));
        graph.open(f, 0, "def main():", "/m.py", None);
        graph.close_return(f, "return 0", "0").unwrap();
        graph.flush().unwrap();

        let loaded = load_call_graph(&path).unwrap();
        assert_eq!(loaded, graph.nodes());
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"depth\": 0"));
        assert!(raw.contains("\"content\""));
    }

    #[test]
    fn test_render_indents_by_relative_depth() {
        let nodes = vec![
            CallGraphNode {
                depth: 3,
                content: vec!["Call ... def f():".into(), "Return value:.. 1".into()],
            },
            CallGraphNode {
                depth: 4,
                content: vec!["Call ... def g():".into()],
            },
        ];
        let rendered = render_call_tree(&nodes);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[0], "├─ Call ... def f():");
        assert_eq!(lines[1], "│  Return value:.. 1");
        assert_eq!(lines[2], "│   ├─ Call ... def g():");
    }
}

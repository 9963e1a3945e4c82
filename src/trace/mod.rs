//! Execution tracing
//!
//! This module turns the host's event stream into a readable record:
//! - The tracer hook and its block-scoped installation
//! - Per-session state (targets, snapshots, loop counts, depth)
//! - Value and source rendering
//! - Output sinks
//! - Call-graph assembly
//!
//! @module trace

pub mod callgraph;
pub mod render;
pub mod session;
pub mod sink;
pub mod source;
pub mod tracer;
pub mod watch;

// =============================================================================
// RE-EXPORTS: Tracer (tracer.rs)
// =============================================================================

pub use tracer::{format_elapsed, observed_scope, snoop_block, Tracer};

// =============================================================================
// RE-EXPORTS: Session state (session.rs)
// =============================================================================

pub use session::{TraceSession, VarDiff};

// =============================================================================
// RE-EXPORTS: Rendering (render.rs, source.rs, sink.rs, watch.rs)
// =============================================================================

pub use render::{normalize_repr, truncate, ReprFormatter, ReprPredicate, ValueRenderer};
pub use sink::OutputSink;
pub use source::{SourceCache, UNAVAILABLE_SOURCE};
pub use watch::Watch;

// =============================================================================
// RE-EXPORTS: Call graph (callgraph.rs)
// =============================================================================

pub use callgraph::{load_call_graph, render_call_tree, CallGraph, CallGraphNode};

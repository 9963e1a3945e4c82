//! frametrace - selective execution tracing
//!
//! Attaches to an interpreter's event stream and records control flow and
//! variable changes for a chosen region only: a method, a line range or a
//! single variable. The interpreter boundary is modelled in [`host`]; the
//! engines are [`trace`] (execution tracer and call graphs), [`history`]
//! (variable history) and [`scope`] (static scope resolution).

pub mod cli;
pub mod core;
pub mod harness;
pub mod history;
pub mod host;
pub mod scope;
pub mod trace;

pub use core::config::Config;
pub use core::error::{Error, Result};
pub use harness::{call_graph, trace_method, trace_variable, TraceOutcome};
pub use history::{VarTracer, VariableRequest};
pub use host::{Machine, TargetProgram, TraceHook};
pub use scope::{ScopeResolver, SubprocessResolver, TreeSitterResolver};
pub use trace::{snoop_block, Tracer};

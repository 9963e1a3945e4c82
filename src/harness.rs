//! Run a program under one of the tracers
//!
//! The harness turns a user-level request (a method of a file, or a variable
//! at a line) into resolver queries, runs the program on a fresh
//! [`Machine`] with the matching hook installed, and hands back whatever was
//! produced. A failing program does not discard the output: the exception
//! travels next to it in [`TraceOutcome::failure`].

use crate::core::config::{CallGraphConfig, Config};
use crate::core::error::{Error, Result};
use crate::history::{judge_global, VarTracer, VariableHistoryEntry, VariableRequest};
use crate::host::{share, Machine, TargetProgram, TraceHook};
use crate::scope::{absolute, ScopeResolver};
use crate::trace::{observed_scope, render_call_tree, CallGraphNode, OutputSink, Tracer};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Output of one traced run
#[derive(Debug)]
pub struct TraceOutcome<T> {
    pub output: T,
    /// Tracer-internal failures, distinct from the program's own
    pub faults: Vec<Error>,
    /// The program's uncaught exception, if any
    pub failure: Option<Error>,
}

impl<T> TraceOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Call graph of one run, flat and rendered
#[derive(Debug, Clone)]
pub struct CallGraphReport {
    pub nodes: Vec<CallGraphNode>,
    pub tree: String,
}

/// History of one variable
#[derive(Debug, Clone)]
pub struct VariableReport {
    pub global: bool,
    pub history: Vec<VariableHistoryEntry>,
    pub report: String,
}

/// Trace `method` of `observed_file` and collect the rendered lines
pub fn trace_method(
    program: &dyn TargetProgram,
    observed_file: &Path,
    method: &str,
    config: &Config,
    resolver: &dyn ScopeResolver,
) -> Result<TraceOutcome<Vec<String>>> {
    let lines: Arc<Mutex<Vec<String>>> = Arc::default();
    let captured = Arc::clone(&lines);
    let sink = OutputSink::callback(move |line| captured.lock().push(line.to_string()));

    let tracer = method_tracer(observed_file, method, config, resolver, None)?.with_sink(sink);
    let (faults, failure) = run(program, tracer);

    let output = std::mem::take(&mut *lines.lock());
    Ok(TraceOutcome {
        output,
        faults,
        failure,
    })
}

/// Trace `method` in call-graph mode
///
/// With `output` set, the graph is also written there as JSON after every
/// completed call.
pub fn call_graph(
    program: &dyn TargetProgram,
    observed_file: &Path,
    method: &str,
    config: &Config,
    resolver: &dyn ScopeResolver,
    output: Option<PathBuf>,
) -> Result<TraceOutcome<CallGraphReport>> {
    let tracer = method_tracer(observed_file, method, config, resolver, Some(output))?;
    let hook = share(tracer);
    let failure = run_hook(program, &hook);

    let mut tracer = hook.lock();
    tracer.finish();
    let nodes = tracer
        .take_call_graph()
        .map(|graph| graph.into_nodes())
        .unwrap_or_default();
    let tree = render_call_tree(&nodes);
    Ok(TraceOutcome {
        output: CallGraphReport { nodes, tree },
        faults: tracer.take_faults(),
        failure,
    })
}

/// Record the history of one variable
///
/// The program runs twice: once to decide whether the name is global, then
/// under the history tracer.
pub fn trace_variable(
    program: &dyn TargetProgram,
    request: &VariableRequest,
    config: &Config,
    resolver: Arc<dyn ScopeResolver>,
) -> Result<TraceOutcome<VariableReport>> {
    let global = judge_global(program, request, resolver.as_ref())?;
    let tracer = VarTracer::new(request, global, resolver, &config.history)?;
    let hook = share(tracer);
    let failure = run_hook(program, &hook);

    let mut tracer = hook.lock();
    Ok(TraceOutcome {
        output: VariableReport {
            global: tracer.is_global(),
            history: tracer.history().to_vec(),
            report: tracer.report(),
        },
        faults: tracer.take_faults(),
        failure,
    })
}

fn method_tracer(
    observed_file: &Path,
    method: &str,
    config: &Config,
    resolver: &dyn ScopeResolver,
    graph_output: Option<Option<PathBuf>>,
) -> Result<Tracer> {
    let file = absolute(observed_file);
    let span = resolver
        .method_range(&file, method)
        .ok_or_else(|| Error::MethodNotFound {
            path: file.clone(),
            name: method.to_string(),
        })?;
    tracing::info!("Tracing {} at {}:{}", method, file.display(), span);

    let mut config = config.clone();
    config.tracer.observed = Some(observed_scope(file, span.start, span.end));
    if let Some(output) = graph_output {
        config.tracer.call_graph = Some(CallGraphConfig { output });
    }
    Tracer::from_config(&config)
}

fn run(program: &dyn TargetProgram, tracer: Tracer) -> (Vec<Error>, Option<Error>) {
    let hook = share(tracer);
    let failure = run_hook(program, &hook);
    let mut tracer = hook.lock();
    tracer.finish();
    (tracer.take_faults(), failure)
}

fn run_hook<H: TraceHook + 'static>(
    program: &dyn TargetProgram,
    hook: &Arc<Mutex<H>>,
) -> Option<Error> {
    let mut machine = Machine::new();
    let result = machine.with_trace(hook.clone(), |m| program.run(m));
    result.err().map(|exception| {
        tracing::warn!("Target program failed: {}", exception);
        Error::from(exception)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Code, ExceptionInfo, ScriptedProgram, Value};
    use crate::scope::TreeSitterResolver;
    use std::io::Write;

    const SOURCE: &str = "\
def helper(v):
    return v * 2

def compute(a):
    b = helper(a)
    return b

compute(2)
";

    fn python_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        file.write_all(SOURCE.as_bytes()).unwrap();
        file
    }

    fn run_compute(m: &mut Machine, path: &Path, fail: bool) -> std::result::Result<(), ExceptionInfo> {
        let module = m.enter_module(&Code::new(path, "<module>", 1));
        m.line(module, 8);
        let compute = m.call(&Code::new(path, "compute", 4), [("a", Value::Int(2))]);
        m.line(compute, 5);
        let helper = m.call(&Code::new(path, "helper", 1), [("v", Value::Int(2))]);
        m.line(helper, 2);
        if fail {
            let error = ExceptionInfo::new("ZeroDivisionError", "division by zero");
            m.raise(helper, error.clone());
            m.unwind(compute);
            m.unwind(module);
            return Err(error);
        }
        m.ret(helper, Value::Int(4));
        m.set_local(compute, "b", Value::Int(4));
        m.line(compute, 6);
        m.ret(compute, Value::Int(4));
        m.ret(module, Value::None);
        Ok(())
    }

    #[test]
    fn test_trace_method_renders_observed_method() {
        let file = python_file();
        let path = file.path().to_path_buf();
        let program = ScriptedProgram::new(path.clone(), move |m: &mut Machine| {
            run_compute(m, &path, false)
        });

        let outcome = trace_method(
            &program,
            file.path(),
            "compute",
            &Config::default(),
            &TreeSitterResolver::new(),
        )
        .unwrap();

        assert!(outcome.succeeded());
        assert!(outcome.faults.is_empty());
        let output = outcome.output;
        assert!(output.iter().any(|l| l.ends_with("def compute(a):")));
        assert!(output.iter().any(|l| l.contains("... (function body omitted)")));
        assert!(output.iter().any(|l| l.trim_start() == "Return value:.. 4"));
        assert!(!output.iter().any(|l| l.contains("compute(2)")));
    }

    #[test]
    fn test_call_graph_two_levels() {
        let file = python_file();
        let path = file.path().to_path_buf();
        let program = ScriptedProgram::new(path.clone(), move |m: &mut Machine| {
            run_compute(m, &path, false)
        });
        let config = Config {
            tracer: crate::core::config::TracerConfig {
                depth: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let dir = tempfile::TempDir::new().unwrap();
        let artifact = dir.path().join("graph.json");

        let outcome = call_graph(
            &program,
            file.path(),
            "compute",
            &config,
            &TreeSitterResolver::new(),
            Some(artifact.clone()),
        )
        .unwrap();

        let nodes = &outcome.output.nodes;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].depth, nodes[0].depth + 1);
        assert!(nodes[1].content[0].contains("def helper(v):"));
        assert_eq!(nodes[0].content.last().unwrap(), "Return value:.. 4");
        assert!(outcome.output.tree.starts_with("├─ Call ... def compute(a):"));
        assert_eq!(crate::trace::load_call_graph(&artifact).unwrap(), *nodes);
    }

    #[test]
    fn test_failure_is_reported_with_output() {
        let file = python_file();
        let path = file.path().to_path_buf();
        let program = ScriptedProgram::new(path.clone(), move |m: &mut Machine| {
            run_compute(m, &path, true)
        });

        let outcome = trace_method(
            &program,
            file.path(),
            "compute",
            &Config::default(),
            &TreeSitterResolver::new(),
        )
        .unwrap();

        let failure = outcome.failure.as_ref().unwrap();
        assert!(failure.is_program_failure());
        assert!(outcome
            .output
            .iter()
            .any(|l| l.trim_start() == "Call ended by exception"));
    }

    #[test]
    fn test_unknown_method_is_an_error() {
        let file = python_file();
        let path = file.path().to_path_buf();
        let program = ScriptedProgram::new(path.clone(), move |m: &mut Machine| {
            run_compute(m, &path, false)
        });
        let err = trace_method(
            &program,
            file.path(),
            "missing",
            &Config::default(),
            &TreeSitterResolver::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { .. }));
    }

    #[test]
    fn test_trace_variable_local() {
        let file = python_file();
        let path = file.path().to_path_buf();
        let program = ScriptedProgram::new(path.clone(), move |m: &mut Machine| {
            run_compute(m, &path, false)
        });
        let request = VariableRequest::new(file.path(), "b").at(file.path(), 5);

        let outcome = trace_variable(
            &program,
            &request,
            &Config::default(),
            Arc::new(TreeSitterResolver::new()),
        )
        .unwrap();

        let report = outcome.output;
        assert!(!report.global);
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.history[0].code, "    b = helper(a)");
        assert_eq!(report.history[0].value, "[Value] 4");
    }
}

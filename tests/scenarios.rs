//! End-to-end runs of scripted programs against real source files

use frametrace::history::LOOP_MARKER;
use frametrace::host::{share, Code, Machine, ScriptedProgram, SharedHook, Value};
use frametrace::scope::LineSpan;
use frametrace::trace::OutputSink;
use frametrace::{
    snoop_block, trace_method, trace_variable, Config, TraceHook, Tracer, TreeSitterResolver,
    VariableRequest,
};
use parking_lot::Mutex;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

const SHAPE_SOURCE: &str = "\
class Shape:
    def __init__(self, side):
        self.side = side

    def area(self):
        def square(v):
            return v * v
        return square(self.side)

s = Shape(3)
s.area()
";

const COUNTER_SOURCE: &str = "\
count = 0
for i in range(6):
    count = count + 1
print(count)
";

fn python_file(source: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

fn run_shape(m: &mut Machine, path: &Path) -> Result<(), frametrace::host::ExceptionInfo> {
    let module = m.enter_module(&Code::new(path, "<module>", 1));
    m.line(module, 10);
    let init = m.call(&Code::new(path, "__init__", 2), [("side", Value::Int(3))]);
    m.line(init, 3);
    m.ret(init, Value::None);

    m.line(module, 11);
    let area = m.call(&Code::new(path, "area", 5), []);
    m.line(area, 6);
    m.line(area, 8);
    let square = m.call(&Code::new(path, "square", 6), [("v", Value::Int(3))]);
    m.line(square, 7);
    m.ret(square, Value::Int(9));
    m.ret(area, Value::Int(9));
    m.ret(module, Value::None);
    Ok(())
}

fn run_counter(m: &mut Machine, path: &Path) -> Result<(), frametrace::host::ExceptionInfo> {
    let module = m.enter_module(&Code::new(path, "<module>", 1));
    m.line(module, 1);
    m.set_local(module, "count", Value::Int(0));
    m.line(module, 2);
    for k in 1..=6 {
        m.line(module, 3);
        m.set_local(module, "count", Value::Int(k));
        m.line(module, 2);
    }
    m.line(module, 4);
    m.ret(module, Value::None);
    Ok(())
}

#[test]
fn test_method_trace_includes_nested_function() {
    let file = python_file(SHAPE_SOURCE);
    let path = file.path().to_path_buf();
    let program = ScriptedProgram::new(path.clone(), move |m: &mut Machine| run_shape(m, &path));

    let outcome = trace_method(
        &program,
        file.path(),
        "Shape.area",
        &Config::default(),
        &TreeSitterResolver::new(),
    )
    .unwrap();

    assert!(outcome.succeeded());
    assert!(outcome.faults.is_empty());
    let lines: Vec<&str> = outcome.output.iter().map(|l| l.trim_start()).collect();
    assert!(lines.iter().any(|l| l.ends_with("def area(self):")));
    assert!(lines.iter().any(|l| l.ends_with("return v * v")));
    assert!(lines.contains(&"Return value:.. 9"));
    assert!(!lines.iter().any(|l| l.contains("self.side = side")));
    assert!(!lines.iter().any(|l| l.contains("s = Shape(3)")));
}

#[test]
fn test_global_counter_history_collapses_loop() {
    let file = python_file(COUNTER_SOURCE);
    let path = file.path().to_path_buf();
    let program =
        ScriptedProgram::new(path.clone(), move |m: &mut Machine| run_counter(m, &path));
    let request = VariableRequest::new(file.path(), "count");

    let outcome = trace_variable(
        &program,
        &request,
        &Config::default(),
        Arc::new(TreeSitterResolver::new()),
    )
    .unwrap();

    let report = outcome.output;
    assert!(report.global);
    assert_eq!(report.history.len(), 7);
    assert_eq!(report.history[0].code, "count = 0");
    assert_eq!(report.history[1].location, LineSpan::new(3, 3));
    assert_eq!(report.history[1].code.trim(), "count = count + 1");
    assert!(report.history[..5].iter().all(|e| !e.looped));
    assert!(report.history[5..].iter().all(|e| e.looped));
    assert_eq!(report.history[6].value, "[Value] 6");

    assert_eq!(report.report.matches(LOOP_MARKER).count(), 1);
    assert_eq!(report.report.matches("Location: ").count(), 5);
}

#[derive(Default)]
struct Silent;

impl TraceHook for Silent {
    fn on_event(&mut self, _ctx: &frametrace::host::EventContext<'_>) -> frametrace::host::Disposition {
        frametrace::host::Disposition::Continue
    }
}

fn block_tracer() -> (Arc<Mutex<Tracer>>, Arc<Mutex<Vec<String>>>) {
    let lines: Arc<Mutex<Vec<String>>> = Arc::default();
    let captured = Arc::clone(&lines);
    let mut tracer = Tracer::new(Default::default())
        .unwrap()
        .with_sink(OutputSink::callback(move |l| captured.lock().push(l.to_string())));
    tracer
        .sources_mut()
        .register("/virtual/block.py", "def f(a):\n    b = a + 1\n    return b\n");
    (share(tracer), lines)
}

#[test]
fn test_snoop_block_traces_current_frame() {
    let (tracer, lines) = block_tracer();
    let f = Code::new("/virtual/block.py", "f", 1);
    let mut machine = Machine::new();
    let id = machine.call(&f, [("a", Value::Int(1))]);

    let b = snoop_block(&mut machine, &tracer, |m| {
        m.line(id, 2);
        m.set_local(id, "b", Value::Int(2));
        m.line(id, 3);
        2
    });
    machine.ret(id, Value::Int(b));

    let lines = lines.lock();
    assert!(lines.iter().any(|l| l.ends_with("    b = a + 1")));
    assert!(lines.iter().any(|l| l.trim_start() == "New var:....... b = 2"));
    assert!(lines.iter().any(|l| l.trim_start().starts_with("Elapsed time: ")));
    assert!(machine.gettrace().is_none());
}

#[test]
fn test_snoop_block_restores_hook_after_panic() {
    let (tracer, lines) = block_tracer();
    let outer: SharedHook = share(Silent);
    let f = Code::new("/virtual/block.py", "f", 1);
    let mut machine = Machine::new();
    machine.settrace(Some(outer.clone()));
    let id = machine.call(&f, []);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        snoop_block(&mut machine, &tracer, |m| {
            m.line(id, 2);
            panic!("body failed");
        })
    }));
    assert!(result.is_err());

    let restored = machine.gettrace().unwrap();
    assert!(Arc::ptr_eq(&restored, &outer));
    assert_eq!(tracer.lock().session().tracked_frames(), 0);
    assert!(lines
        .lock()
        .iter()
        .any(|l| l.trim_start().starts_with("Elapsed time: ")));
}

//! The execution tracer
//!
//! [`Tracer`] is a [`TraceHook`]: the host calls it on every event and it
//! decides, frame by frame, whether the event belongs to the traced region.
//! A frame is traced when its code is a target, when it was attached with
//! [`Tracer::enter`], when its line lies inside the observed region, or when
//! an ancestor within `depth` levels is traced. Rendered events go to the
//! session's [`OutputSink`], or into a [`CallGraph`] in call-graph mode.
//!
//! Nothing raised while handling an event reaches the traced program:
//! failures (and panics) are logged and collected in [`Tracer::faults`].
//!
//! @module trace/tracer

use super::callgraph::CallGraph;
use super::render::{truncate, ValueRenderer};
use super::session::TraceSession;
use super::sink::OutputSink;
use super::source::SourceCache;
use super::watch::Watch;
use crate::core::config::{Config, ObservedScope, TracerConfig, MAX_SUMMARY_LENGTH};
use crate::core::error::{Error, Result};
use crate::host::{
    panic_message, CodeId, Disposition, Event, EventContext, Frame, FrameId, Machine, SharedHook, TraceHook,
    Value,
};
use crate::scope::absolute;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BODY_OMITTED: &str = "    ... (function body omitted)";

/// Outcome of looking for a traced ancestor
enum Inheritance {
    /// Render this event; `expanded` frames show only call and return
    Traced { expanded: bool },
    /// Keep receiving events without rendering this one
    Ignore,
    /// Stop delivering this frame's events
    Skip,
}

pub struct Tracer {
    config: TracerConfig,
    observed: Option<ObservedScope>,
    session: TraceSession,
    renderer: ValueRenderer,
    sources: SourceCache,
    sink: OutputSink,
    watches: Vec<Watch>,
    graph: Option<CallGraph>,
    last_source_path: Option<String>,
    thread_info_padding: usize,
    faults: Vec<Error>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Result<Self> {
        config.validate()?;

        let observed = config.observed.clone().map(|scope| ObservedScope {
            file: absolute(&scope.file),
            ..scope
        });
        let watches = config
            .watch
            .iter()
            .cloned()
            .map(Watch::Path)
            .chain(config.watch_explode.iter().cloned().map(Watch::Explode))
            .collect();
        let graph = config
            .call_graph
            .as_ref()
            .map(|graph| CallGraph::new(graph.output.clone()));

        Ok(Self {
            renderer: ValueRenderer::new(config.effective_max_length(), config.normalize),
            observed,
            session: TraceSession::new(),
            sources: SourceCache::default(),
            sink: OutputSink::default(),
            watches,
            graph,
            last_source_path: None,
            thread_info_padding: 0,
            faults: Vec::new(),
            config,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut tracer = Self::new(config.tracer.clone())?;
        tracer.sources = SourceCache::new(config.source_cache.max_files);
        Ok(tracer)
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }

    /// Trace every activation of `code`
    ///
    /// Ignored when an observed region is configured; the region decides.
    pub fn target_code(&mut self, code: CodeId) -> &mut Self {
        if self.observed.is_none() {
            self.session.target_codes.insert(code);
        }
        self
    }

    /// Add a custom value renderer; see [`ValueRenderer::register`]
    pub fn register_repr<P, F>(&mut self, predicate: P, formatter: F) -> &mut Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.renderer.register(predicate, formatter);
        self
    }

    pub fn sources_mut(&mut self) -> &mut SourceCache {
        &mut self.sources
    }

    pub fn session(&self) -> &TraceSession {
        &self.session
    }

    pub fn call_graph(&self) -> Option<&CallGraph> {
        self.graph.as_ref()
    }

    pub fn take_call_graph(&mut self) -> Option<CallGraph> {
        self.graph.take()
    }

    /// Internal failures seen so far
    pub fn faults(&self) -> &[Error] {
        &self.faults
    }

    pub fn take_faults(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.faults)
    }

    // -------------------------------------------------------------------------
    // Block targets
    // -------------------------------------------------------------------------

    /// Start tracing the running `frame` from its next event
    pub fn enter(&mut self, frame: FrameId) {
        if self.observed.is_none() {
            self.session.target_frames.insert(frame);
            self.session.start_timer(frame);
        }
    }

    /// Stop tracing a frame attached with [`Tracer::enter`]
    pub fn exit(&mut self, frame: FrameId) {
        if self.observed.is_some() {
            return;
        }
        self.session.target_frames.remove(&frame);
        self.session.drop_snapshot(frame);

        if let Some(elapsed) = self.session.take_timer(frame) {
            let depth = self.session.depth(std::thread::current().id());
            let line = format!(
                "{}Elapsed time: {}",
                indent(depth + 1),
                format_elapsed(elapsed)
            );
            self.write(&line);
        }
    }

    /// Write out the call graph, if one is being assembled
    pub fn finish(&mut self) {
        let result = match &self.graph {
            Some(graph) => graph.flush(),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.fault(e);
        }
    }

    // -------------------------------------------------------------------------
    // Event handling
    // -------------------------------------------------------------------------

    fn handle(&mut self, ctx: &EventContext<'_>) -> Result<Disposition> {
        let frame = ctx.frame;

        if let Event::Discard = ctx.event {
            self.session.evict(frame.id);
            self.session.target_frames.remove(&frame.id);
            if let Some(graph) = self.graph.as_mut() {
                if graph.is_open(frame.id) {
                    graph.close_exception(frame.id)?;
                }
            }
            return Ok(Disposition::Continue);
        }

        if let Some(disposition) = self.gate_observed(ctx) {
            return Ok(disposition);
        }

        let mut expanded = false;
        if !self.session.is_target(frame.code, frame.id) {
            match self.inherit(ctx) {
                Inheritance::Traced { expanded: e } => expanded = e,
                Inheritance::Ignore => return Ok(Disposition::Continue),
                Inheritance::Skip => return Ok(Disposition::SkipFrame),
            }
        }

        if let Some(limit) = self.config.effective_loop_limit() {
            if !matches!(ctx.event, Event::Return(_) | Event::Exception(_)) {
                let prior = self.session.hits(frame.id, frame.line);
                self.session.record_hit(frame.id, frame.line);
                // calls always render so depth stays balanced
                if prior >= limit && matches!(ctx.event, Event::Line) {
                    return Ok(Disposition::Continue);
                }
            }
        }

        self.render(ctx, expanded);
        Ok(Disposition::Continue)
    }

    /// Activation and deactivation against the observed region
    fn gate_observed(&mut self, ctx: &EventContext<'_>) -> Option<Disposition> {
        let scope = self.observed.as_ref()?;
        let frame = ctx.frame;
        let inside = in_region(scope, frame);
        let activating = matches!(ctx.event, Event::Call | Event::Line);

        if self.session.target_frames.is_empty() {
            if frame.file != scope.file {
                return Some(Disposition::SkipFrame);
            }
            if !inside || !activating {
                return Some(Disposition::Continue);
            }
            self.session.target_frames.insert(frame.id);
            self.session.start_timer(frame.id);
            self.session.set_depth(frame.thread, 0);
            tracing::debug!("observed region entered at {}:{}", frame.file.display(), frame.line);
        } else if inside && activating && !self.session.target_frames.contains(&frame.id) {
            self.session.start_timer(frame.id);
            self.session.target_frames.insert(frame.id);
        }

        if self.session.target_frames.contains(&frame.id) && !inside {
            if ctx.event.is_terminal() {
                self.session.adjust_depth(frame.thread, -1);
                self.session.target_frames.remove(&frame.id);
                self.session.evict(frame.id);
            }
            return Some(Disposition::Continue);
        }
        None
    }

    /// Look up to `depth` levels above an untracked frame for a traced one
    fn inherit(&self, ctx: &EventContext<'_>) -> Inheritance {
        let expanding = self.config.effective_depth_expanded();
        let budget = if expanding {
            self.config.depth + 1
        } else {
            self.config.depth
        };

        let mut candidate = ctx.frame;
        for level in 1..budget {
            let Some(back) = candidate.back.and_then(|id| ctx.lookup(id)) else {
                return Inheritance::Skip;
            };
            candidate = back;

            let traced = self.session.target_codes.contains(&candidate.code)
                || (self.session.target_frames.contains(&candidate.id)
                    && self.in_scope(candidate));
            if !traced {
                continue;
            }

            if let Some(limit) = self.config.effective_loop_limit() {
                if self.session.hits(candidate.id, candidate.line) > limit {
                    return Inheritance::Skip;
                }
            }
            if expanding && level == budget - 1 {
                if let Event::Line = ctx.event {
                    return Inheritance::Ignore;
                }
                return Inheritance::Traced { expanded: true };
            }
            return Inheritance::Traced { expanded: false };
        }

        match &self.observed {
            Some(scope) if ctx.frame.file == scope.file => Inheritance::Ignore,
            _ => Inheritance::Skip,
        }
    }

    /// Without an observed region every attached frame is in scope
    fn in_scope(&self, frame: &Frame) -> bool {
        self.observed
            .as_ref()
            .map_or(true, |scope| in_region(scope, frame))
    }

    fn render(&mut self, ctx: &EventContext<'_>, expanded: bool) {
        let frame = ctx.frame;
        let thread = frame.thread;
        let is_call = matches!(ctx.event, Event::Call);

        if is_call {
            self.session.adjust_depth(thread, 1);
        }
        let depth = self.session.depth(thread);
        let indent = indent(depth);

        let source_path = self.display_path(&frame.file);
        if self.last_source_path.as_deref() != Some(source_path.as_str()) {
            self.write(&format!("{}Source path:... {}", indent, source_path));
            self.last_source_path = Some(source_path.clone());
        }

        let mut line_no = frame.line;
        let mut source_line = self.sources.line(&frame.file, line_no);
        let thread_info = self.thread_info();

        let reprs = self.local_reprs(ctx);
        let diff = self.session.diff(frame.id, reprs);
        let starting = (!diff.new.is_empty()).then(|| summarize(&diff.new));

        if !expanded || is_call {
            let label = if is_call {
                "Starting var:.. "
            } else {
                "New var:....... "
            };
            if let Some(summary) = &starting {
                self.write(&format!("{}{}{}", indent, label, summary));
            }
            if !diff.modified.is_empty() {
                let summary = summarize(&diff.modified);
                self.write(&format!("{}Modified var:.. {}", indent, summary));
            }
        }

        if is_call && source_line.trim_start().starts_with('@') {
            if let Some((def_line, text)) = self.find_def(&frame.file, line_no) {
                line_no = def_line;
                source_line = text;
            }
        }

        let ended_by_exception =
            matches!(ctx.event, Event::Return(Value::None)) && !frame.ended_on_return_opcode();

        if ended_by_exception {
            self.write(&format!("{}Call ended by exception", indent));
        } else {
            self.write(&format!(
                "{}{}{:9} {:4} {}",
                indent,
                thread_info,
                ctx.event.name(),
                line_no,
                source_line
            ));
        }
        if expanded && is_call {
            self.write(&format!("{}{}{}", indent, thread_info, BODY_OMITTED));
        }

        let return_repr = match ctx.event {
            Event::Return(value) if !ended_by_exception => Some(self.renderer.render(value)),
            _ => None,
        };

        if let Some(graph) = self.graph.as_mut() {
            let result = match ctx.event {
                Event::Call => {
                    graph.open(frame.id, depth, &source_line, &source_path, starting.as_deref());
                    Ok(())
                }
                Event::Return(_) => {
                    let closed = match &return_repr {
                        Some(repr) => graph.close_return(frame.id, &source_line, repr),
                        None => graph.close_exception(frame.id),
                    };
                    closed.and_then(|_| graph.flush())
                }
                Event::Exception(_) => graph
                    .close_exception(frame.id)
                    .and_then(|_| graph.flush()),
                _ => Ok(()),
            };
            if let Err(e) = result {
                self.fault(e);
            }
        }

        match ctx.event {
            Event::Return(_) => {
                self.release(frame.id);
                self.session.adjust_depth(thread, -1);
                if let Some(repr) = return_repr {
                    self.write(&format!("{}Return value:.. {}", indent, repr));
                }
            }
            Event::Exception(exception) => {
                self.release(frame.id);
                self.session.adjust_depth(thread, -1);
                let mut text = exception.to_string();
                if let Some(max) = self.renderer.max_length() {
                    text = truncate(&text, max);
                }
                self.write(&format!("{}Exception:..... {}", indent, text));
            }
            _ => {}
        }
    }

    /// Frame-keyed cleanup after a terminal event
    fn release(&mut self, frame: FrameId) {
        if self.observed.is_some() {
            self.session.target_frames.remove(&frame);
            self.session.evict(frame);
        } else if !self.session.target_frames.contains(&frame) {
            // attached frames are released by exit()
            self.session.evict(frame);
        }
    }

    fn local_reprs(&self, ctx: &EventContext<'_>) -> Vec<(String, String)> {
        let mut reprs: Vec<(String, String)> = ctx
            .frame
            .locals
            .iter()
            .map(|(name, value)| (name.to_string(), self.renderer.render(value)))
            .collect();

        for watch in &self.watches {
            let mut items = watch.items(&ctx.frame.locals, ctx.globals(), &self.renderer);
            items.sort();
            for (label, repr) in items {
                match reprs.iter_mut().find(|(name, _)| *name == label) {
                    Some(existing) => existing.1 = repr,
                    None => reprs.push((label, repr)),
                }
            }
        }
        reprs
    }

    /// First `def` at or after a decorator line
    fn find_def(&mut self, file: &Path, from: u32) -> Option<(u32, String)> {
        let lines = self.sources.lines(file)?;
        lines
            .iter()
            .enumerate()
            .skip(from.saturating_sub(1) as usize)
            .find(|(_, line)| {
                let line = line.trim_start();
                line.starts_with("def") || line.starts_with("async def")
            })
            .map(|(i, line)| (i as u32 + 1, line.clone()))
    }

    fn display_path(&self, file: &Path) -> String {
        if self.config.normalize {
            file.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string())
        } else {
            file.display().to_string()
        }
    }

    fn thread_info(&mut self) -> String {
        if !self.config.thread_info {
            return String::new();
        }
        let current = std::thread::current();
        let info = format!(
            "{}-{} ",
            self.session.thread_ident(current.id()),
            current.name().unwrap_or("<unnamed>")
        );
        self.thread_info_padding = self.thread_info_padding.max(info.chars().count());
        format!("{:<width$}", info, width = self.thread_info_padding)
    }

    fn write(&mut self, line: &str) {
        if self.graph.is_some() {
            return;
        }
        let line = format!("{}{}", self.config.prefix, line);
        self.sink.write_line(&line);
    }

    fn fault(&mut self, error: Error) {
        tracing::error!("Tracer fault: {}", error);
        self.faults.push(error);
    }
}

impl TraceHook for Tracer {
    fn on_event(&mut self, ctx: &EventContext<'_>) -> Disposition {
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(ctx))) {
            Ok(Ok(disposition)) => disposition,
            Ok(Err(e)) => {
                self.fault(e);
                Disposition::Continue
            }
            Err(payload) => {
                self.fault(Error::StateInconsistency {
                    message: format!(
                        "panic while handling {} event: {}",
                        ctx.event.name(),
                        panic_message(payload.as_ref())
                    ),
                });
                Disposition::Continue
            }
        }
    }
}

/// Trace the current frame of `machine` while `body` runs
///
/// The tracer is installed for the duration of `body` and the previous hook
/// is restored afterwards, including when `body` panics. With
/// `FRAMETRACE_DISABLED` set, `body` runs untraced.
pub fn snoop_block<R>(
    machine: &mut Machine,
    tracer: &Arc<Mutex<Tracer>>,
    body: impl FnOnce(&mut Machine) -> R,
) -> R {
    snoop(machine, tracer, !Config::disabled(), body)
}

fn snoop<R>(
    machine: &mut Machine,
    tracer: &Arc<Mutex<Tracer>>,
    enabled: bool,
    body: impl FnOnce(&mut Machine) -> R,
) -> R {
    if !enabled {
        return body(machine);
    }

    let frame = machine.current();
    if let Some(frame) = frame {
        tracer.lock().enter(frame);
        machine.trace_frame(frame);
    }
    let _exit = ExitGuard { tracer, frame };
    let hook: SharedHook = tracer.clone();
    machine.with_trace(hook, body)
}

struct ExitGuard<'a> {
    tracer: &'a Arc<Mutex<Tracer>>,
    frame: Option<FrameId>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame {
            self.tracer.lock().exit(frame);
        }
    }
}

fn in_region(scope: &ObservedScope, frame: &Frame) -> bool {
    let same_file = frame.file == scope.file || absolute(&frame.file) == scope.file;
    same_file && (scope.start_line..=scope.end_line).contains(&frame.line)
}

fn indent(depth: i64) -> String {
    " ".repeat(4 * depth.max(0) as usize)
}

/// `name = repr` pairs, cut when the whole list gets long
fn summarize(pairs: &[(String, String)]) -> String {
    let joined = pairs
        .iter()
        .map(|(name, repr)| format!("{} = {}", name, repr))
        .collect::<Vec<_>>()
        .join(", ");
    if joined.chars().count() > MAX_SUMMARY_LENGTH {
        let head: String = joined.chars().take(MAX_SUMMARY_LENGTH - 6).collect();
        format!("{} ......", head)
    } else {
        joined
    }
}

/// `HH:MM:SS.ffffff`
pub fn format_elapsed(elapsed: Duration) -> String {
    let delta = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
    let micros = delta.num_microseconds().unwrap_or(i64::MAX) % 1_000_000;
    format!(
        "{:02}:{:02}:{:02}.{:06}",
        delta.num_hours(),
        delta.num_minutes() % 60,
        delta.num_seconds() % 60,
        micros
    )
}

/// Absolute observed file, for callers building an [`ObservedScope`]
pub fn observed_scope(file: impl Into<PathBuf>, start_line: u32, end_line: u32) -> ObservedScope {
    ObservedScope {
        file: absolute(&file.into()),
        start_line,
        end_line,
    }
}

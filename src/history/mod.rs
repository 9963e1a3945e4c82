//! Variable history tracing
//!
//! [`VarTracer`] follows one variable name through a run and records every
//! change of its described value, together with the statement that caused
//! it. In scoped mode only frames inside the method that contains the
//! variable's line are inspected, starting from a `call` event; in global
//! mode the name is looked up in the module namespace of the variable's
//! file (the entry file when no location is given), and frames of other
//! modules are skipped.
//!
//! A change is credited to the location the frame was at on its previous
//! inspected event: the value is observed to differ only once the statement
//! that changed it has finished.
//!
//! @module history

pub mod describe;
pub mod probe;

pub use describe::{describe_value, resolve_variable};
pub use probe::{judge_global, GlobalProbe};

use crate::core::config::HistoryConfig;
use crate::core::error::{Error, Result};
use crate::host::{panic_message, CodeId, Disposition, Event, EventContext, FrameId, TraceHook};
use crate::scope::{absolute, LineSpan, ScopeResolver};
use crate::trace::SourceCache;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shown once in place of a run of loop-tagged entries
pub const LOOP_MARKER: &str = "...Skipping repeated variable modification details in loop......";

// =============================================================================
// TYPES
// =============================================================================

/// Which variable to follow, and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRequest {
    /// File the program starts in
    pub entry: PathBuf,
    pub name: String,
    /// File and line where the variable appears; absent for globals
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
}

impl VariableRequest {
    pub fn new(entry: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            entry: absolute(&entry.into()),
            name: name.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: impl Into<PathBuf>, line: u32) -> Self {
        self.file = Some(absolute(&file.into()));
        self.line = Some(line);
        self
    }

    /// The checked location, or `None` when no location was given
    ///
    /// The file must exist, contain `line`, and mention the name on it.
    pub fn location(&self) -> Result<Option<(&Path, u32)>> {
        let (Some(file), Some(line)) = (self.file.as_deref(), self.line) else {
            return Ok(None);
        };
        let invalid = |message: String| Error::InvalidTarget { message };

        let source = std::fs::read_to_string(file)
            .map_err(|e| invalid(format!("cannot read {}: {}", file.display(), e)))?;
        let text = source
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .filter(|_| line >= 1)
            .ok_or_else(|| {
                invalid(format!(
                    "line {} exceeds the number of lines in {}",
                    line,
                    file.display()
                ))
            })?;
        if !text.contains(&self.name) {
            return Err(invalid(format!(
                "variable '{}' not found in line {} of {}",
                self.name,
                line,
                file.display()
            )));
        }
        Ok(Some((file, line)))
    }
}

/// One recorded change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableHistoryEntry {
    pub file: PathBuf,
    pub location: LineSpan,
    pub value: String,
    pub code: String,
    /// The statement had already run more than the loop threshold
    pub looped: bool,
}

impl VariableHistoryEntry {
    fn render(&self) -> String {
        format!(
            "Location: {}: {}\nCode:\n```\n{}\n```\nValue: {}\n",
            self.file.display(),
            self.location,
            self.code,
            self.value
        )
    }
}

// =============================================================================
// TRACER
// =============================================================================

pub struct VarTracer {
    entry: PathBuf,
    var_file: Option<PathBuf>,
    name: String,
    global: bool,
    /// Method containing the variable, in scoped mode
    span: Option<LineSpan>,
    started: bool,
    observed_code: Option<CodeId>,
    last_value: Option<String>,
    frame_locs: HashMap<FrameId, (PathBuf, u32)>,
    hits: HashMap<FrameId, HashMap<u32, u32>>,
    history: Vec<VariableHistoryEntry>,
    loop_limit: u32,
    resolver: Arc<dyn ScopeResolver>,
    sources: SourceCache,
    faults: Vec<Error>,
}

impl VarTracer {
    /// Build a tracer for `request`; `global` usually comes from [`judge_global`]
    pub fn new(
        request: &VariableRequest,
        global: bool,
        resolver: Arc<dyn ScopeResolver>,
        config: &HistoryConfig,
    ) -> Result<Self> {
        let location = request.location()?;

        let mut span = None;
        if !global {
            match location {
                Some((file, line)) => {
                    span = resolver.enclosing_method_range(file, line);
                    if span.is_none() {
                        tracing::warn!(
                            "No method contains {}:{}; watching '{}' globally",
                            file.display(),
                            line,
                            request.name
                        );
                    }
                }
                None => tracing::warn!(
                    "No location given for '{}'; watching it globally",
                    request.name
                ),
            }
        }

        Ok(Self {
            entry: request.entry.clone(),
            var_file: request.file.clone(),
            name: request.name.clone(),
            global: span.is_none(),
            span,
            started: false,
            observed_code: None,
            last_value: None,
            frame_locs: HashMap::new(),
            hits: HashMap::new(),
            history: Vec::new(),
            loop_limit: config.loop_limit,
            resolver,
            sources: SourceCache::default(),
            faults: Vec::new(),
        })
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn scope(&self) -> Option<LineSpan> {
        self.span
    }

    pub fn history(&self) -> &[VariableHistoryEntry] {
        &self.history
    }

    /// Internal failures, kept apart from the program's own
    pub fn faults(&self) -> &[Error] {
        &self.faults
    }

    pub fn take_faults(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.faults)
    }

    /// Chronological report; each run of loop-tagged entries becomes one marker
    pub fn report(&self) -> String {
        let mut blocks: Vec<String> = Vec::new();
        let mut in_loop = false;
        for entry in &self.history {
            if entry.looped {
                if !in_loop {
                    blocks.push(format!("{}\n", LOOP_MARKER));
                }
                in_loop = true;
            } else {
                in_loop = false;
                blocks.push(entry.render());
            }
        }
        blocks.join("\n")
    }

    fn record_hit(&mut self, frame: FrameId, line: u32) {
        *self.hits.entry(frame).or_default().entry(line).or_insert(0) += 1;
    }

    fn hits(&self, frame: FrameId, line: u32) -> u32 {
        self.hits
            .get(&frame)
            .and_then(|lines| lines.get(&line))
            .copied()
            .unwrap_or(0)
    }

    /// The full statement at `line`, and the lines it spans
    fn statement(&mut self, file: &Path, line: u32) -> (String, LineSpan) {
        let single = LineSpan::new(line, line);
        let Some(span) = self.resolver.statement_range(file, line) else {
            return (
                format!("<error extracting statement: no statement at line {}>", line),
                single,
            );
        };
        match self.sources.range(file, span.start, span.end) {
            Some(lines) => (lines.join("\n"), span),
            None => (
                format!(
                    "<error extracting statement: cannot read {}>",
                    file.display()
                ),
                single,
            ),
        }
    }

    fn observe(&mut self, ctx: &EventContext<'_>) {
        let frame = ctx.frame;
        let namespace = if self.global {
            ctx.globals()
        } else {
            &frame.locals
        };
        let here = (frame.file.clone(), frame.line);

        let Some(value) = namespace.get(&self.name) else {
            self.last_value = None;
            self.frame_locs.insert(frame.id, here);
            return;
        };

        let current = resolve_variable(value);
        if self.last_value.as_deref() != Some(current.as_str()) {
            // No earlier event in this frame: credit the current location
            let (file, line) = self
                .frame_locs
                .get(&frame.id)
                .cloned()
                .unwrap_or_else(|| here.clone());
            let (code, location) = self.statement(&file, line);
            let looped = self.hits(frame.id, line) > self.loop_limit;
            self.history.push(VariableHistoryEntry {
                file,
                location,
                value: current.clone(),
                code,
                looped,
            });
        }

        self.last_value = Some(current);
        self.frame_locs.insert(frame.id, here);
    }
}

impl TraceHook for VarTracer {
    fn on_event(&mut self, ctx: &EventContext<'_>) -> Disposition {
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(ctx))) {
            Ok(disposition) => disposition,
            Err(payload) => {
                let error = Error::StateInconsistency {
                    message: format!(
                        "panic while handling {} event: {}",
                        ctx.event.name(),
                        panic_message(payload.as_ref())
                    ),
                };
                tracing::error!("History tracer fault: {}", error);
                self.faults.push(error);
                Disposition::Continue
            }
        }
    }
}

impl VarTracer {
    fn handle(&mut self, ctx: &EventContext<'_>) -> Disposition {
        let frame = ctx.frame;

        if !self.started {
            if frame.file != self.entry {
                return Disposition::SkipFrame;
            }
            self.started = true;
        }
        // only the watched module's namespace is compared
        let watched = self.var_file.as_deref().unwrap_or(&self.entry);
        if !frame.file.starts_with(watched) {
            return Disposition::SkipFrame;
        }

        if let Event::Discard = ctx.event {
            self.frame_locs.remove(&frame.id);
            self.hits.remove(&frame.id);
            return Disposition::Continue;
        }

        if let Some(span) = self.span {
            if !span.contains(frame.line) {
                return Disposition::Continue;
            }
            if self.observed_code.is_none() && !matches!(ctx.event, Event::Call) {
                return Disposition::Continue;
            }
            self.observed_code = Some(frame.code);
        }

        self.record_hit(frame.id, frame.line);
        self.observe(ctx);

        if ctx.event.is_terminal() {
            self.frame_locs.remove(&frame.id);
            self.hits.remove(&frame.id);
        }
        Disposition::Continue
    }
}

//! Global-or-local decision for a watched variable
//!
//! Before tracing a variable's history the program is run once under a
//! [`GlobalProbe`]: if the name is never bound as a local inside the method
//! containing its line, it is treated as a module global. The program is
//! executed twice in total, so its side effects must be repeatable.

use super::VariableRequest;
use crate::core::error::Result;
use crate::host::{
    share, CodeId, Disposition, Event, EventContext, Machine, TargetProgram, TraceHook,
};
use crate::scope::{LineSpan, ScopeResolver};
use std::path::PathBuf;

/// Shadow hook that only looks for a local binding of one name
pub struct GlobalProbe {
    entry: PathBuf,
    var_file: PathBuf,
    name: String,
    span: LineSpan,
    started: bool,
    observed_code: Option<CodeId>,
    is_global: bool,
}

impl GlobalProbe {
    pub fn new(entry: PathBuf, var_file: PathBuf, name: String, span: LineSpan) -> Self {
        Self {
            entry,
            var_file,
            name,
            span,
            started: false,
            observed_code: None,
            is_global: true,
        }
    }

    pub fn is_global(&self) -> bool {
        self.is_global
    }
}

impl TraceHook for GlobalProbe {
    fn on_event(&mut self, ctx: &EventContext<'_>) -> Disposition {
        let frame = ctx.frame;
        if !self.started {
            if frame.file != self.entry {
                return Disposition::SkipFrame;
            }
            self.started = true;
        }
        if !frame.file.starts_with(&self.var_file) {
            return Disposition::SkipFrame;
        }
        if !self.span.contains(frame.line) {
            return Disposition::Continue;
        }
        if self.observed_code.is_none() && !matches!(ctx.event, Event::Call) {
            return Disposition::Continue;
        }
        self.observed_code = Some(frame.code);

        if frame.locals.contains(&self.name) {
            self.is_global = false;
        }
        Disposition::Continue
    }
}

/// Whether the requested variable should be watched as a global
///
/// A request without a location, or whose line is outside any method, is
/// global. Otherwise `program` runs once under a [`GlobalProbe`]. An invalid
/// location is an error.
pub fn judge_global(
    program: &dyn TargetProgram,
    request: &VariableRequest,
    resolver: &dyn ScopeResolver,
) -> Result<bool> {
    let Some((file, line)) = request.location()? else {
        return Ok(true);
    };
    let Some(span) = resolver.enclosing_method_range(file, line) else {
        return Ok(true);
    };

    let probe = share(GlobalProbe::new(
        request.entry.clone(),
        file.to_path_buf(),
        request.name.clone(),
        span,
    ));
    let mut machine = Machine::new();
    if let Err(exception) = machine.with_trace(probe.clone(), |m| program.run(m)) {
        tracing::warn!("Program failed during scope probe: {}", exception);
    }

    let is_global = probe.lock().is_global();
    tracing::debug!(
        "'{}' at {}:{} judged {}",
        request.name,
        file.display(),
        line,
        if is_global { "global" } else { "local" }
    );
    Ok(is_global)
}

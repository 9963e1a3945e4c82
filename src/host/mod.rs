//! Host interpreter boundary
//!
//! [`Machine`] is the per-thread event dispatcher a host VM drives while it
//! executes: it owns the frame arena and the module namespaces, and it calls
//! the installed [`TraceHook`] synchronously on every event. Hooks are
//! installed through a save/restore stack so a nested installation always
//! gives the previous hook back, even when the traced body panics.
//!
//! @module host

pub mod frame;
pub mod value;

pub use frame::{
    Code, CodeId, Disposition, Event, EventContext, ExceptionInfo, Frame, FrameArena, FrameId,
    RETURN_OPCODES,
};
pub use value::{CallableInfo, Namespace, ObjectInfo, Value, ValueKind};

use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// HOOKS
// =============================================================================

/// Per-event callback installed into a [`Machine`]
pub trait TraceHook: Send {
    fn on_event(&mut self, ctx: &EventContext<'_>) -> Disposition;
}

/// A hook shared between the installer and the machine(s) running it
pub type SharedHook = Arc<Mutex<dyn TraceHook>>;

/// Wrap a hook so it can be installed and still inspected afterwards
pub fn share<H: TraceHook + 'static>(hook: H) -> Arc<Mutex<H>> {
    Arc::new(Mutex::new(hook))
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// =============================================================================
// PROGRAMS
// =============================================================================

/// Something that can be executed on a [`Machine`]
///
/// Running a program must be repeatable: variable tracing executes it twice.
pub trait TargetProgram {
    /// File whose first event marks the start of the program
    fn entry_file(&self) -> &Path;

    /// Execute; an uncaught exception is returned as the error
    fn run(&self, machine: &mut Machine) -> Result<(), ExceptionInfo>;
}

/// A program given as a closure over the machine
pub struct ScriptedProgram<F> {
    entry: PathBuf,
    body: F,
}

impl<F> ScriptedProgram<F>
where
    F: Fn(&mut Machine) -> Result<(), ExceptionInfo>,
{
    pub fn new(entry: impl Into<PathBuf>, body: F) -> Self {
        Self {
            entry: entry.into(),
            body,
        }
    }
}

impl<F> TargetProgram for ScriptedProgram<F>
where
    F: Fn(&mut Machine) -> Result<(), ExceptionInfo>,
{
    fn entry_file(&self) -> &Path {
        &self.entry
    }

    fn run(&self, machine: &mut Machine) -> Result<(), ExceptionInfo> {
        (self.body)(machine)
    }
}

// =============================================================================
// MACHINE
// =============================================================================

/// Event dispatcher for one thread of execution
#[derive(Default)]
pub struct Machine {
    arena: FrameArena,
    stack: Vec<FrameId>,
    globals: HashMap<PathBuf, Namespace>,
    module_frames: HashSet<FrameId>,
    suspended: HashSet<FrameId>,
    untraced: HashSet<FrameId>,
    hook: Option<SharedHook>,
    saved_hooks: Vec<Option<SharedHook>>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Hook installation
    // -------------------------------------------------------------------------

    pub fn gettrace(&self) -> Option<SharedHook> {
        self.hook.clone()
    }

    pub fn settrace(&mut self, hook: Option<SharedHook>) {
        self.hook = hook;
    }

    /// Run `body` with `hook` installed, restoring the previous hook afterwards
    ///
    /// The previous hook is restored before a panic from `body` continues
    /// unwinding.
    pub fn with_trace<R>(&mut self, hook: SharedHook, body: impl FnOnce(&mut Machine) -> R) -> R {
        self.saved_hooks.push(self.hook.take());
        self.hook = Some(hook);
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self)));
        self.hook = self.saved_hooks.pop().flatten();
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.arena.get(id)
    }

    /// Innermost running frame
    pub fn current(&self) -> Option<FrameId> {
        self.stack.last().copied()
    }

    pub fn globals(&self, file: &Path) -> Option<&Namespace> {
        self.globals.get(file)
    }

    pub fn live_frames(&self) -> usize {
        self.arena.len()
    }

    /// Deliver every event of `frame` again, even if a hook skipped it
    pub fn trace_frame(&mut self, frame: FrameId) {
        self.untraced.remove(&frame);
    }

    // -------------------------------------------------------------------------
    // Execution events
    // -------------------------------------------------------------------------

    /// Start executing a module body; its locals are the module globals
    pub fn enter_module(&mut self, code: &Code) -> FrameId {
        let globals = self.globals.entry(code.file.clone()).or_default().clone();
        let id = self.push_frame(code, globals);
        self.module_frames.insert(id);
        self.dispatch(id, Event::Call);
        id
    }

    /// Call a function; fires a `call` event at the definition line
    pub fn call<'a>(
        &mut self,
        code: &Code,
        args: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> FrameId {
        let locals = args.into_iter().collect();
        let id = self.push_frame(code, locals);
        self.dispatch(id, Event::Call);
        id
    }

    /// Move `frame` to `line` and fire a `line` event
    pub fn line(&mut self, frame: FrameId, line: u32) {
        if let Some(f) = self.arena.get_mut(frame) {
            f.line = line;
            f.last_opcode = None;
        }
        self.dispatch(frame, Event::Line);
    }

    /// Bind a local without firing an event
    pub fn set_local(&mut self, frame: FrameId, name: &str, value: Value) {
        let module_file = if self.module_frames.contains(&frame) {
            self.arena.get(frame).map(|f| f.file.clone())
        } else {
            None
        };
        if let Some(f) = self.arena.get_mut(frame) {
            f.locals.set(name, value.clone());
        }
        if let Some(file) = module_file {
            self.globals.entry(file).or_default().set(name, value);
        }
    }

    /// Bind a module global without firing an event
    pub fn set_global(&mut self, file: &Path, name: &str, value: Value) {
        self.globals
            .entry(file.to_path_buf())
            .or_default()
            .set(name, value.clone());
        let module_frames: Vec<FrameId> = self
            .module_frames
            .iter()
            .copied()
            .filter(|id| self.arena.get(*id).map_or(false, |f| f.file == file))
            .collect();
        for id in module_frames {
            if let Some(f) = self.arena.get_mut(id) {
                f.locals.set(name, value.clone());
            }
        }
    }

    /// Normal return with `value`
    pub fn ret(&mut self, frame: FrameId, value: Value) {
        self.set_opcode(frame, "RETURN_VALUE");
        self.dispatch(frame, Event::Return(value));
        self.pop_frame(frame);
    }

    /// A pending exception leaves `frame` without a raise event of its own
    pub fn unwind(&mut self, frame: FrameId) {
        self.set_opcode(frame, "CALL");
        self.dispatch(frame, Event::Return(Value::None));
        self.pop_frame(frame);
    }

    /// `frame` is left by raising `exception`
    pub fn raise(&mut self, frame: FrameId, exception: ExceptionInfo) {
        self.dispatch(frame, Event::Exception(exception));
        self.pop_frame(frame);
    }

    /// Suspend a generator frame, handing `value` to its consumer
    pub fn yield_value(&mut self, frame: FrameId, value: Value) {
        self.set_opcode(frame, "YIELD_VALUE");
        self.dispatch(frame, Event::Return(value));
        self.stack.retain(|id| *id != frame);
        self.suspended.insert(frame);
    }

    /// Resume a suspended generator frame from the current frame
    pub fn resume(&mut self, frame: FrameId) {
        if !self.suspended.remove(&frame) {
            tracing::debug!("resume of frame {:?} that is not suspended", frame);
            return;
        }
        let back = self.current();
        if let Some(f) = self.arena.get_mut(frame) {
            f.back = back;
            f.last_opcode = None;
        }
        self.stack.push(frame);
        self.dispatch(frame, Event::Call);
    }

    /// Drop a suspended generator that was never exhausted
    pub fn discard(&mut self, frame: FrameId) {
        if !self.suspended.remove(&frame) {
            return;
        }
        self.dispatch(frame, Event::Discard);
        self.forget(frame);
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn push_frame(&mut self, code: &Code, locals: Namespace) -> FrameId {
        let frame = Frame::new(code, self.current(), locals);
        let id = frame.id;
        self.arena.insert(frame);
        self.stack.push(id);
        id
    }

    fn pop_frame(&mut self, frame: FrameId) {
        match self.stack.last() {
            Some(top) if *top == frame => {
                self.stack.pop();
            }
            _ => {
                tracing::debug!("frame {:?} left out of stack order", frame);
                self.stack.retain(|id| *id != frame);
            }
        }
        self.suspended.remove(&frame);
        self.forget(frame);
    }

    fn forget(&mut self, frame: FrameId) {
        self.arena.remove(frame);
        self.untraced.remove(&frame);
        self.module_frames.remove(&frame);
    }

    fn set_opcode(&mut self, frame: FrameId, opcode: &str) {
        if let Some(f) = self.arena.get_mut(frame) {
            f.last_opcode = Some(opcode.to_string());
        }
    }

    fn dispatch(&mut self, id: FrameId, event: Event) {
        let Some(hook) = self.hook.clone() else {
            return;
        };
        let is_call = matches!(event, Event::Call);
        if !is_call && self.untraced.contains(&id) {
            return;
        }
        let Some(frame) = self.arena.get(id) else {
            return;
        };

        let empty = Namespace::new();
        let globals = self.globals.get(&frame.file).unwrap_or(&empty);
        let ctx = EventContext::new(frame, &event, &self.arena, globals);
        let disposition = hook.lock().on_event(&ctx);

        match disposition {
            Disposition::SkipFrame => {
                self.untraced.insert(id);
            }
            Disposition::Continue if is_call => {
                self.untraced.remove(&id);
            }
            Disposition::Continue => {}
        }
    }
}

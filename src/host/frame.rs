//! Frames, code identities and execution events
//!
//! Frames are owned by the host. The tracers only ever hold a [`FrameId`],
//! an opaque handle that stays unique for the whole process, and look the
//! record up through [`EventContext`] while an event is being dispatched.
//!
//! @module host/frame

use super::value::{Namespace, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Opcodes that end a frame normally (or suspend it)
pub const RETURN_OPCODES: &[&str] = &[
    "RETURN_GENERATOR",
    "RETURN_VALUE",
    "RETURN_CONST",
    "INSTRUMENTED_RETURN_GENERATOR",
    "INSTRUMENTED_RETURN_VALUE",
    "INSTRUMENTED_RETURN_CONST",
    "YIELD_VALUE",
    "INSTRUMENTED_YIELD_VALUE",
];

// =============================================================================
// IDENTITIES
// =============================================================================

/// Handle of one activation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl FrameId {
    pub(crate) fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Identity of a code object (one function body)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeId(u64);

impl CodeId {
    pub fn new(file: &Path, qualified_name: &str, first_line: u32) -> Self {
        let key = format!("{}\0{}\0{}", file.display(), qualified_name, first_line);
        CodeId(xxhash_rust::xxh3::xxh3_64(key.as_bytes()))
    }
}

/// Static description of a function body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub id: CodeId,
    pub name: String,
    pub file: PathBuf,
    pub first_line: u32,
}

impl Code {
    pub fn new(file: impl Into<PathBuf>, name: impl Into<String>, first_line: u32) -> Self {
        let file = file.into();
        let name = name.into();
        Self {
            id: CodeId::new(&file, &name, first_line),
            name,
            file,
            first_line,
        }
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// One activation record of a function call
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub code: CodeId,
    pub function: String,
    pub file: PathBuf,
    /// Line currently executing (1-indexed)
    pub line: u32,
    /// Caller, if any
    pub back: Option<FrameId>,
    pub locals: Namespace,
    /// Name of the last instruction executed, used to classify returns
    pub last_opcode: Option<String>,
    pub thread: ThreadId,
}

impl Frame {
    pub(crate) fn new(code: &Code, back: Option<FrameId>, locals: Namespace) -> Self {
        Self {
            id: FrameId::next(),
            code: code.id,
            function: code.name.clone(),
            file: code.file.clone(),
            line: code.first_line,
            back,
            locals,
            last_opcode: None,
            thread: std::thread::current().id(),
        }
    }

    /// True when the last instruction is a recognized return or yield
    pub fn ended_on_return_opcode(&self) -> bool {
        self.last_opcode
            .as_deref()
            .map_or(false, |op| RETURN_OPCODES.contains(&op))
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Exception payload carried by an exception event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

/// A notification point in program execution
///
/// `Return`, `Exception` and `Discard` are terminal: a frame receives exactly
/// one of them per activation (a resumed generator is a new activation of the
/// same frame).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Call,
    Line,
    Return(Value),
    Exception(ExceptionInfo),
    /// A suspended generator was dropped before it was exhausted
    Discard,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Call => "call",
            Event::Line => "line",
            Event::Return(_) => "return",
            Event::Exception(_) => "exception",
            Event::Discard => "discard",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Return(_) | Event::Exception(_) | Event::Discard)
    }
}

/// What the hook wants for the rest of this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Do not deliver further non-call events for this frame
    SkipFrame,
}

// =============================================================================
// ARENA
// =============================================================================

/// Storage for live frames, keyed by handle
#[derive(Debug, Default)]
pub struct FrameArena {
    frames: HashMap<FrameId, Frame>,
}

impl FrameArena {
    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        self.frames.get_mut(&id)
    }

    pub(crate) fn insert(&mut self, frame: Frame) {
        self.frames.insert(frame.id, frame);
    }

    pub(crate) fn remove(&mut self, id: FrameId) -> Option<Frame> {
        self.frames.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Everything a hook may inspect while handling one event
pub struct EventContext<'a> {
    pub frame: &'a Frame,
    pub event: &'a Event,
    frames: &'a FrameArena,
    globals: &'a Namespace,
}

impl<'a> EventContext<'a> {
    pub fn new(
        frame: &'a Frame,
        event: &'a Event,
        frames: &'a FrameArena,
        globals: &'a Namespace,
    ) -> Self {
        Self {
            frame,
            event,
            frames,
            globals,
        }
    }

    /// Look up another live frame (typically an ancestor)
    pub fn lookup(&self, id: FrameId) -> Option<&'a Frame> {
        self.frames.get(id)
    }

    /// Module namespace of the current frame
    pub fn globals(&self) -> &'a Namespace {
        self.globals
    }
}

//! Mutable state of one tracer installation
//!
//! Everything keyed by frame is evicted when the frame reaches a terminal
//! event, so the maps never outgrow the live call stack.
//!
//! @module trace/session

use crate::host::{CodeId, FrameId};
use std::collections::{HashMap, HashSet};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

/// Depth before the first traced call on a thread
const INITIAL_DEPTH: i64 = -1;

/// Locals that appeared or changed since the previous event of a frame
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VarDiff {
    pub new: Vec<(String, String)>,
    pub modified: Vec<(String, String)>,
}

impl VarDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TraceSession {
    pub(crate) target_codes: HashSet<CodeId>,
    pub(crate) target_frames: HashSet<FrameId>,
    /// Last rendered `(name, repr)` pairs per frame
    snapshots: HashMap<FrameId, Vec<(String, String)>>,
    line_hits: HashMap<FrameId, HashMap<u32, u32>>,
    depths: HashMap<ThreadId, i64>,
    thread_idents: HashMap<ThreadId, usize>,
    start_times: HashMap<FrameId, Instant>,
}

impl TraceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_target(&self, code: CodeId, frame: FrameId) -> bool {
        self.target_codes.contains(&code) || self.target_frames.contains(&frame)
    }

    // -------------------------------------------------------------------------
    // Depth
    // -------------------------------------------------------------------------

    pub fn depth(&self, thread: ThreadId) -> i64 {
        self.depths.get(&thread).copied().unwrap_or(INITIAL_DEPTH)
    }

    pub fn set_depth(&mut self, thread: ThreadId, depth: i64) {
        self.depths.insert(thread, depth);
    }

    pub fn adjust_depth(&mut self, thread: ThreadId, delta: i64) -> i64 {
        let depth = self.depths.entry(thread).or_insert(INITIAL_DEPTH);
        *depth += delta;
        *depth
    }

    /// Number for `thread` in order of first appearance, starting at 1
    pub fn thread_ident(&mut self, thread: ThreadId) -> usize {
        let next = self.thread_idents.len() + 1;
        *self.thread_idents.entry(thread).or_insert(next)
    }

    // -------------------------------------------------------------------------
    // Loop counting
    // -------------------------------------------------------------------------

    /// Hits of `line` in `frame` so far
    pub fn hits(&self, frame: FrameId, line: u32) -> u32 {
        self.line_hits
            .get(&frame)
            .and_then(|lines| lines.get(&line))
            .copied()
            .unwrap_or(0)
    }

    /// Count one more hit and return the new total
    pub fn record_hit(&mut self, frame: FrameId, line: u32) -> u32 {
        let count = self
            .line_hits
            .entry(frame)
            .or_default()
            .entry(line)
            .or_insert(0);
        *count += 1;
        *count
    }

    // -------------------------------------------------------------------------
    // Variable snapshots
    // -------------------------------------------------------------------------

    /// Replace the frame's snapshot with `current` and report what differs
    pub fn diff(&mut self, frame: FrameId, current: Vec<(String, String)>) -> VarDiff {
        let previous = self.snapshots.remove(&frame).unwrap_or_default();
        let mut diff = VarDiff::default();
        for (name, repr) in &current {
            match previous.iter().find(|(old, _)| old == name) {
                None => diff.new.push((name.clone(), repr.clone())),
                Some((_, old_repr)) if old_repr != repr => {
                    diff.modified.push((name.clone(), repr.clone()))
                }
                Some(_) => {}
            }
        }
        self.snapshots.insert(frame, current);
        diff
    }

    pub fn has_snapshot(&self, frame: FrameId) -> bool {
        self.snapshots.contains_key(&frame)
    }

    pub fn drop_snapshot(&mut self, frame: FrameId) {
        self.snapshots.remove(&frame);
    }

    // -------------------------------------------------------------------------
    // Timing
    // -------------------------------------------------------------------------

    /// Start the clock for `frame` unless it is already running
    pub fn start_timer(&mut self, frame: FrameId) {
        self.start_times.entry(frame).or_insert_with(Instant::now);
    }

    pub fn take_timer(&mut self, frame: FrameId) -> Option<Duration> {
        self.start_times.remove(&frame).map(|start| start.elapsed())
    }

    /// Drop every per-frame entry
    pub fn evict(&mut self, frame: FrameId) {
        self.snapshots.remove(&frame);
        self.line_hits.remove(&frame);
        self.start_times.remove(&frame);
    }

    /// Number of frames with any per-frame state
    pub fn tracked_frames(&self) -> usize {
        let mut frames: HashSet<&FrameId> = self.snapshots.keys().collect();
        frames.extend(self.line_hits.keys());
        frames.extend(self.start_times.keys());
        frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reprs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, r)| (n.to_string(), r.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_reports_new_then_modified() {
        let mut session = TraceSession::new();
        let frame = FrameId::next();

        let first = session.diff(frame, reprs(&[("a", "1")]));
        assert_eq!(first.new, reprs(&[("a", "1")]));
        assert!(first.modified.is_empty());

        let second = session.diff(frame, reprs(&[("a", "2"), ("b", "[]")]));
        assert_eq!(second.new, reprs(&[("b", "[]")]));
        assert_eq!(second.modified, reprs(&[("a", "2")]));

        let third = session.diff(frame, reprs(&[("a", "2"), ("b", "[]")]));
        assert!(third.is_empty());
    }

    #[test]
    fn test_diff_never_reports_name_twice() {
        let mut session = TraceSession::new();
        let frame = FrameId::next();
        session.diff(frame, reprs(&[("x", "0"), ("y", "0")]));
        for step in 1..5 {
            let value = step.to_string();
            let diff = session.diff(frame, reprs(&[("x", &value), ("y", "0"), ("z", &value)]));
            for (name, _) in &diff.new {
                assert!(!diff.modified.iter().any(|(m, _)| m == name));
            }
            assert!(!diff.modified.iter().any(|(m, _)| m == "y"));
        }
    }

    #[test]
    fn test_depth_defaults_and_balances() {
        let mut session = TraceSession::new();
        let thread = std::thread::current().id();
        assert_eq!(session.depth(thread), -1);
        assert_eq!(session.adjust_depth(thread, 1), 0);
        assert_eq!(session.adjust_depth(thread, 1), 1);
        session.adjust_depth(thread, -1);
        session.adjust_depth(thread, -1);
        assert_eq!(session.depth(thread), -1);
    }

    #[test]
    fn test_thread_idents_follow_first_appearance() {
        let mut session = TraceSession::new();
        let here = std::thread::current().id();
        let other = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();
        assert_eq!(session.thread_ident(here), 1);
        assert_eq!(session.thread_ident(other), 2);
        assert_eq!(session.thread_ident(here), 1);
    }

    #[test]
    fn test_evict_clears_frame_state() {
        let mut session = TraceSession::new();
        let frame = FrameId::next();
        session.record_hit(frame, 4);
        session.start_timer(frame);
        session.diff(frame, reprs(&[("a", "1")]));
        assert_eq!(session.tracked_frames(), 1);

        session.evict(frame);
        assert_eq!(session.tracked_frames(), 0);
        assert_eq!(session.hits(frame, 4), 0);
    }
}

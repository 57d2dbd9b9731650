//! Capture hook pair: turns before/after events into execution records
//!
//! The "before" hook stamps a start time on the call context; the "after"
//! hook computes the duration, evaluates the user context function, records
//! the call stack and hands the finished [`ExecutionRecord`] to the sink.
//!
//! # Footgun
//!
//! The user context function runs inline on the thread executing the
//! observed operation. If it fails, the failure is returned to whoever
//! issued the operation. Keep it cheap and infallible where possible.
//!
//! The "after" hook only records raw frame addresses ([`RawStack`]); on
//! unix targets the walk takes no lock. Symbolization happens later, on the
//! consumer's thread, when records are collected or aggregated. It goes
//! through `backtrace`'s process-wide lock and is slow, so resolve in
//! batches with a [`StackResolver`]. On other targets the walk itself uses
//! the synchronized `backtrace::trace` and can wait behind a concurrent
//! symbolization.

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::record::{ExecutionRecord, StackFrame, Timestamp};
use crate::registry::{CallContext, ExecutionHook, ExecutionOutcome, SessionId};
use crate::sink::Sink;
use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Function evaluated once per captured execution; its value is stored
/// verbatim as the record's user context
pub type UserContextFn =
    Arc<dyn Fn(&CallContext, &ExecutionOutcome) -> Result<serde_json::Value> + Send + Sync>;

/// Frames from the capture machinery itself, dropped from the top of
/// every captured stack
const CAPTURE_FRAME_MARKERS: &[&str] = &[
    "backtrace::",
    "_Unwind_",
    "querytap::capture::",
    "querytap::registry::",
];

/// Extra addresses kept beyond `max_depth` to cover the capture frames
/// skipped at resolve time
const CAPTURE_FRAME_BUDGET: usize = 24;

fn is_capture_frame(function: &str) -> bool {
    CAPTURE_FRAME_MARKERS
        .iter()
        .any(|marker| function.trim_start_matches('<').starts_with(marker))
}

#[cfg(unix)]
fn walk_stack<F: FnMut(&backtrace::Frame) -> bool>(f: F) {
    // SAFETY: on unix the walk goes through the system unwinder, which is
    // safe to call from several threads at once.
    unsafe { backtrace::trace_unsynchronized(f) }
}

#[cfg(not(unix))]
fn walk_stack<F: FnMut(&backtrace::Frame) -> bool>(f: F) {
    backtrace::trace(f)
}

/// Unsymbolized call stack: instruction pointers, innermost first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStack {
    ips: Vec<usize>,
    max_depth: usize,
}

impl RawStack {
    /// Walk the current thread's stack without symbolizing it
    pub fn capture(max_depth: usize) -> Self {
        let limit = max_depth.saturating_add(CAPTURE_FRAME_BUDGET);
        let mut ips = Vec::with_capacity(limit.min(128));
        walk_stack(|frame| {
            ips.push(frame.ip() as usize);
            ips.len() < limit
        });
        Self { ips, max_depth }
    }

    pub fn len(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

/// Symbolizes raw stacks, caching frames per address
///
/// One resolver per batch keeps repeated call sites cheap.
#[derive(Debug, Default)]
pub struct StackResolver {
    cache: HashMap<usize, Vec<StackFrame>>,
}

impl StackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn symbols(&mut self, ip: usize) -> &[StackFrame] {
        self.cache.entry(ip).or_insert_with(|| {
            let mut frames = Vec::new();
            backtrace::resolve(ip as *mut c_void, |symbol| {
                frames.push(StackFrame {
                    function: symbol
                        .name()
                        .map(|name| format!("{:#}", name))
                        .unwrap_or_else(|| "<unknown>".to_string()),
                    file: symbol.filename().map(|p| p.display().to_string()),
                    line: symbol.lineno(),
                });
            });
            frames
        })
    }

    /// Frames of `raw`, leading capture frames dropped, capped at its depth
    pub fn resolve(&mut self, raw: &RawStack) -> Vec<StackFrame> {
        let mut frames = Vec::new();
        let mut skipping = true;
        for &ip in &raw.ips {
            for frame in self.symbols(ip) {
                if skipping && is_capture_frame(&frame.function) {
                    continue;
                }
                skipping = false;
                if frames.len() == raw.max_depth {
                    return frames;
                }
                frames.push(frame.clone());
            }
        }
        frames
    }

    /// Replace a record's pending raw stack with resolved frames
    pub fn resolve_record(&mut self, record: &mut ExecutionRecord) {
        if let Some(raw) = record.raw_stack.take() {
            record.stack = self.resolve(&raw);
        }
    }
}

/// Decides which frames are library code when attributing a query
#[derive(Debug, Clone, Default)]
pub struct LibraryFrames {
    patterns: Vec<Regex>,
}

impl LibraryFrames {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn from_config(config: &CaptureConfig) -> Result<Self> {
        Ok(Self::new(config.compile_library_patterns()?))
    }

    pub fn is_library(&self, frame: &StackFrame) -> bool {
        self.patterns.iter().any(|p| p.is_match(&frame.function))
    }

    /// Innermost frame that is not library code: the query's caller
    pub fn user_frame<'a>(&self, stack: &'a [StackFrame]) -> Option<&'a StackFrame> {
        stack.iter().find(|frame| !self.is_library(frame))
    }
}

/// The hook pair one session registers with the event source
pub struct CaptureHooks {
    session: SessionId,
    active: AtomicBool,
    capture_stack: bool,
    max_stack_depth: usize,
    user_context_fn: Option<UserContextFn>,
    sink: Sink,
}

impl CaptureHooks {
    pub(crate) fn new(
        session: SessionId,
        config: &CaptureConfig,
        user_context_fn: Option<UserContextFn>,
        sink: Sink,
    ) -> Self {
        Self {
            session,
            active: AtomicBool::new(false),
            capture_stack: config.capture_stack,
            max_stack_depth: config.max_stack_depth,
            user_context_fn,
            sink,
        }
    }

    /// Gate delivery at the session boundary
    ///
    /// Once deactivated, "after" events arriving through a listener list
    /// snapshotted before unregistration produce no records.
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    fn user_context(
        &self,
        ctx: &CallContext,
        outcome: &ExecutionOutcome,
    ) -> Result<Option<serde_json::Value>, CaptureError> {
        match &self.user_context_fn {
            Some(f) => f(ctx, outcome).map(Some).map_err(CaptureError::UserContext),
            None => Ok(None),
        }
    }
}

impl ExecutionHook for CaptureHooks {
    fn before_execute(&self, ctx: &CallContext) {
        if self.is_active() {
            ctx.mark_start(self.session, Timestamp::now());
        }
    }

    fn after_execute(
        &self,
        ctx: &CallContext,
        outcome: &ExecutionOutcome,
    ) -> Result<(), CaptureError> {
        if !self.is_active() {
            return Ok(());
        }
        let end = Timestamp::now();
        // Started after the operation began: report zero duration
        let start = ctx.take_start(self.session).unwrap_or(end);
        let user_context = self.user_context(ctx, outcome)?;
        let raw_stack = self
            .capture_stack
            .then(|| RawStack::capture(self.max_stack_depth));

        let record = ExecutionRecord {
            text: ctx.statement().to_string(),
            stack: Vec::new(),
            raw_stack,
            start,
            end,
            user_context,
            params: ctx.params().clone(),
            rowcount: outcome.rowcount,
        };
        tracing::trace!(
            session = self.session.0,
            execution = ctx.id().0,
            duration_us = record.duration().as_micros() as u64,
            "captured execution"
        );
        self.sink.deliver(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::registry::EngineId;
    use std::time::Duration;

    fn hooks(config: &CaptureConfig, user_context_fn: Option<UserContextFn>) -> CaptureHooks {
        let hooks = CaptureHooks::new(SessionId(1), config, user_context_fn, Sink::queue());
        hooks.set_active(true);
        hooks
    }

    fn drain(hooks: &CaptureHooks) -> Vec<ExecutionRecord> {
        hooks.sink().as_queue().unwrap().drain()
    }

    #[inline(never)]
    fn issue_query(hooks: &CaptureHooks) {
        let ctx = CallContext::new(EngineId(1), "SELECT 1", Params::None);
        hooks.before_execute(&ctx);
        hooks.after_execute(&ctx, &ExecutionOutcome::rows(1)).unwrap();
    }

    #[test]
    fn test_after_without_before_has_zero_duration() {
        let hooks = hooks(&CaptureConfig::without_stacks(), None);
        let ctx = CallContext::new(EngineId(1), "SELECT 1", Params::None);
        hooks.after_execute(&ctx, &ExecutionOutcome::default()).unwrap();

        let records = drain(&hooks);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration(), Duration::ZERO);
        assert_eq!(records[0].rowcount, None);
    }

    #[test]
    fn test_duration_measured_between_hooks() {
        let hooks = hooks(&CaptureConfig::without_stacks(), None);
        let ctx = CallContext::new(EngineId(1), "SELECT 1", Params::None);
        hooks.before_execute(&ctx);
        std::thread::sleep(Duration::from_millis(5));
        hooks.after_execute(&ctx, &ExecutionOutcome::rows(3)).unwrap();

        let records = drain(&hooks);
        assert!(records[0].duration() >= Duration::from_millis(5));
        assert_eq!(records[0].rowcount, Some(3));
        assert!(records[0].stack.is_empty());
    }

    #[test]
    fn test_inactive_hooks_record_nothing() {
        let hooks = hooks(&CaptureConfig::without_stacks(), None);
        hooks.set_active(false);
        issue_query(&hooks);
        assert!(drain(&hooks).is_empty());
    }

    #[test]
    fn test_user_context_stored_verbatim() {
        let f: UserContextFn = Arc::new(|ctx: &CallContext, _: &ExecutionOutcome| {
            Ok(serde_json::json!({ "engine": ctx.engine().0 }))
        });
        let hooks = hooks(&CaptureConfig::without_stacks(), Some(f));
        issue_query(&hooks);
        let records = drain(&hooks);
        assert_eq!(records[0].user_context, Some(serde_json::json!({ "engine": 1 })));
    }

    #[test]
    fn test_user_context_failure_propagates_and_drops_record() {
        let f: UserContextFn = Arc::new(
            |_: &CallContext, _: &ExecutionOutcome| -> Result<serde_json::Value> {
                anyhow::bail!("no request bound")
            },
        );
        let hooks = hooks(&CaptureConfig::without_stacks(), Some(f));
        let ctx = CallContext::new(EngineId(1), "SELECT 1", Params::None);
        let err = hooks.after_execute(&ctx, &ExecutionOutcome::default()).unwrap_err();
        assert!(err.to_string().contains("no request bound"));
        assert!(drain(&hooks).is_empty());
    }

    #[test]
    fn test_hook_defers_symbolization() {
        let hooks = hooks(&CaptureConfig::default(), None);
        issue_query(&hooks);
        let mut records = drain(&hooks);
        let record = &mut records[0];
        assert!(record.has_pending_stack());
        assert!(record.stack.is_empty());

        record.resolve_stack();
        assert!(!record.has_pending_stack());
        // Resolving twice keeps the first result
        let resolved = record.stack.clone();
        record.resolve_stack();
        assert_eq!(record.stack, resolved);
    }

    #[test]
    fn test_stack_excludes_capture_frames_and_respects_depth() {
        let config = CaptureConfig {
            max_stack_depth: 8,
            ..CaptureConfig::default()
        };
        let hooks = hooks(&config, None);
        issue_query(&hooks);
        let mut records = drain(&hooks);
        records[0].resolve_stack();
        let stack = &records[0].stack;
        assert!(stack.len() <= 8);
        if let Some(top) = stack.first() {
            assert!(!is_capture_frame(&top.function), "top frame: {}", top.function);
        }
    }

    #[test]
    fn test_raw_stack_keeps_budget_for_skipped_frames() {
        let raw = RawStack::capture(2);
        assert!(!raw.is_empty());
        assert!(raw.len() <= 2 + CAPTURE_FRAME_BUDGET);
        assert!(StackResolver::new().resolve(&raw).len() <= 2);
    }

    #[test]
    fn test_same_call_site_same_stack_text() {
        let hooks = hooks(&CaptureConfig::default(), None);
        for _ in 0..2 {
            issue_query(&hooks);
        }
        let mut records = drain(&hooks);
        let mut resolver = StackResolver::new();
        for record in &mut records {
            resolver.resolve_record(record);
        }
        assert_eq!(records[0].stack_text(), records[1].stack_text());
    }

    /// Another thread holding backtrace's global lock must not stall the hook
    #[cfg(unix)]
    #[test]
    fn test_capture_does_not_wait_on_backtrace_lock() {
        use std::sync::mpsc;
        use std::time::Instant;

        let (locked_tx, locked_rx) = mpsc::channel();
        let holder = std::thread::spawn(move || {
            let mut signalled = false;
            backtrace::trace(|_| {
                if !signalled {
                    signalled = true;
                    let _ = locked_tx.send(());
                    std::thread::sleep(Duration::from_millis(1500));
                }
                false
            });
        });
        locked_rx.recv().unwrap();

        let hooks = hooks(&CaptureConfig::default(), None);
        let started = Instant::now();
        issue_query(&hooks);
        let elapsed = started.elapsed();
        holder.join().unwrap();

        assert!(elapsed < Duration::from_millis(750), "capture took {:?}", elapsed);
        assert_eq!(drain(&hooks).len(), 1);
    }

    #[test]
    fn test_is_capture_frame() {
        assert!(is_capture_frame("backtrace::backtrace::trace"));
        assert!(is_capture_frame("querytap::capture::RawStack::capture"));
        assert!(is_capture_frame(
            "<querytap::capture::CaptureHooks as querytap::registry::ExecutionHook>::after_execute"
        ));
        assert!(!is_capture_frame("app::handlers::checkout"));
    }

    #[test]
    fn test_user_frame_skips_library_frames() {
        let frames = LibraryFrames::from_config(&CaptureConfig {
            library_patterns: vec!["^sqlx::".to_string(), "^<?std::".to_string()],
            ..CaptureConfig::default()
        })
        .unwrap();
        let stack = vec![
            StackFrame::new("sqlx::query::fetch_all", None, None),
            StackFrame::new("<std::pin::Pin<P> as core::future::Future>::poll", None, None),
            StackFrame::new("shop::orders::load", Some("src/orders.rs".into()), Some(12)),
            StackFrame::new("shop::main", None, None),
        ];
        assert_eq!(
            frames.user_frame(&stack).map(|f| f.function.as_str()),
            Some("shop::orders::load")
        );
        assert_eq!(frames.user_frame(&stack[..2]), None);
    }
}

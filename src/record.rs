//! Execution records: one immutable value per observed operation

use crate::capture::{RawStack, StackResolver};
use crate::params::Params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic timestamp in nanoseconds since the process-wide profiling epoch
///
/// The epoch is fixed the first time any timestamp is taken. Using an
/// integer offset instead of a raw `Instant` keeps records serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(epoch().elapsed().as_nanos() as u64)
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis * 1_000_000)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Elapsed time between `earlier` and `self`, zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// A single call-site frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(function: impl Into<String>, file: Option<String>, line: Option<u32>) -> Self {
        Self {
            function: function.into(),
            file,
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({}:{})", self.function, file, line),
            (Some(file), None) => write!(f, "{} ({})", self.function, file),
            _ => write!(f, "{}", self.function),
        }
    }
}

/// Stable textual rendering of a call stack
///
/// Equal stacks always render identically; this string is the call-site
/// half of a query group's identity.
pub fn format_stack(stack: &[StackFrame]) -> String {
    stack
        .iter()
        .map(|frame| frame.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Statistics about one observed operation
///
/// Created once by the capture hook on the "after" event. The hook leaves
/// the call stack unsymbolized; [`ExecutionRecord::resolve_stack`] (or
/// collecting the session, or aggregating) fills in `stack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Rendered operation text; the primary grouping key
    pub text: String,
    /// Call stack at execution time, innermost frame first
    pub stack: Vec<StackFrame>,
    /// Frame addresses awaiting symbolization
    #[serde(skip)]
    pub raw_stack: Option<RawStack>,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Value returned by the session's user context function, if any
    #[serde(default)]
    pub user_context: Option<serde_json::Value>,
    #[serde(default)]
    pub params: Params,
    /// Rows affected; absent for operations that report none (e.g. DDL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rowcount: Option<u64>,
}

impl ExecutionRecord {
    pub fn builder(text: impl Into<String>) -> ExecutionRecordBuilder {
        ExecutionRecordBuilder {
            record: ExecutionRecord {
                text: text.into(),
                stack: Vec::new(),
                raw_stack: None,
                start: Timestamp::default(),
                end: Timestamp::default(),
                user_context: None,
                params: Params::None,
                rowcount: None,
            },
        }
    }

    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    /// Symbolize a pending raw stack into `stack`; no-op once resolved
    pub fn resolve_stack(&mut self) {
        StackResolver::new().resolve_record(self);
    }

    pub fn has_pending_stack(&self) -> bool {
        self.raw_stack.is_some()
    }

    /// Call-site signature; empty while the stack is still pending
    pub fn stack_text(&self) -> String {
        format_stack(&self.stack)
    }
}

/// Builder for records assembled outside the capture hooks
#[derive(Debug, Clone)]
pub struct ExecutionRecordBuilder {
    record: ExecutionRecord,
}

impl ExecutionRecordBuilder {
    pub fn stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.record.stack = stack;
        self
    }

    pub fn timing(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.record.start = start;
        self.record.end = end;
        self
    }

    /// Shorthand for a record starting at the epoch and lasting `duration`
    pub fn duration(self, duration: Duration) -> Self {
        self.timing(Timestamp(0), Timestamp(duration.as_nanos() as u64))
    }

    pub fn user_context(mut self, value: serde_json::Value) -> Self {
        self.record.user_context = Some(value);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.record.params = params;
        self
    }

    pub fn rowcount(mut self, rowcount: u64) -> Self {
        self.record.rowcount = Some(rowcount);
        self
    }

    pub fn build(self) -> ExecutionRecord {
        self.record
    }
}

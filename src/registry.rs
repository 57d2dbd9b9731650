//! Event source registry: the seam between a host driver and profiling sessions
//!
//! A host (database driver, ORM, connection pool) owns one [`HookRegistry`]
//! and calls [`HookRegistry::before_execute`] / [`HookRegistry::after_execute`]
//! around every operation it runs, or wraps the operation with
//! [`HookRegistry::observe`]. Sessions register hook pairs against a
//! [`Target`]: either one engine or every engine.
//!
//! # Design
//!
//! ```text
//! ┌──────────────┐  before/after   ┌──────────────┐   fan-out   ┌───────────┐
//! │ host driver  │ ──────────────▶ │ HookRegistry │ ──────────▶ │ session A │
//! │ (CallContext)│                 │ Engine(E)+All│ ──────────▶ │ session B │
//! └──────────────┘                 └──────────────┘             └───────────┘
//! ```
//!
//! The listener list is cloned out of the lock before dispatch, so hooks
//! never run while the registry lock is held and registration never waits
//! on an in-flight operation.

use crate::error::CaptureError;
use crate::params::Params;
use crate::record::Timestamp;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Identifier of one engine (connection pool, database handle, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(pub u64);

/// What a session observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every engine dispatching through the registry
    All,
    Engine(EngineId),
}

impl From<EngineId> for Target {
    fn from(engine: EngineId) -> Self {
        Target::Engine(engine)
    }
}

/// Registration key of one session's hook pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Unique identity of one in-flight invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(pub u64);

/// One in-flight operation, as seen by the hooks
///
/// Start times are stored on the context itself, one slot per session, so
/// concurrent operations never observe each other's timings regardless of
/// which thread or task runs them.
#[derive(Debug)]
pub struct CallContext {
    id: ExecutionId,
    engine: EngineId,
    statement: String,
    params: Params,
    starts: Mutex<Vec<(SessionId, Timestamp)>>,
}

impl CallContext {
    pub fn new(engine: EngineId, statement: impl Into<String>, params: Params) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: ExecutionId(NEXT.fetch_add(1, Ordering::Relaxed)),
            engine,
            statement: statement.into(),
            params,
            starts: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn engine(&self) -> EngineId {
        self.engine
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn mark_start(&self, session: SessionId, at: Timestamp) {
        let mut starts = self.starts.lock().unwrap_or_else(PoisonError::into_inner);
        match starts.iter_mut().find(|(id, _)| *id == session) {
            Some(slot) => slot.1 = at,
            None => starts.push((session, at)),
        }
    }

    pub(crate) fn take_start(&self, session: SessionId) -> Option<Timestamp> {
        let mut starts = self.starts.lock().unwrap_or_else(PoisonError::into_inner);
        let index = starts.iter().position(|(id, _)| *id == session)?;
        Some(starts.swap_remove(index).1)
    }
}

/// Result metadata handed to the "after" hooks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Rows affected, absent when the operation reports none (DDL)
    pub rowcount: Option<u64>,
}

impl ExecutionOutcome {
    pub fn rows(rowcount: u64) -> Self {
        Self {
            rowcount: Some(rowcount),
        }
    }
}

/// A before/after hook pair
pub trait ExecutionHook: Send + Sync {
    /// Called immediately before the operation runs; must not fail
    fn before_execute(&self, ctx: &CallContext);

    /// Called immediately after the operation completes
    ///
    /// # Errors
    /// Errors propagate to the caller of the observed operation.
    fn after_execute(&self, ctx: &CallContext, outcome: &ExecutionOutcome)
        -> Result<(), CaptureError>;
}

type Listeners = Vec<(SessionId, Arc<dyn ExecutionHook>)>;

/// Process-owned mapping from target to the hook pairs registered against it
#[derive(Default)]
pub struct HookRegistry {
    listeners: RwLock<HashMap<Target, Listeners>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&Target, usize> =
            listeners.iter().map(|(t, l)| (t, l.len())).collect();
        f.debug_struct("HookRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook pair; a second registration under the same id on the
    /// same target replaces the first
    pub fn register(&self, target: Target, session: SessionId, hook: Arc<dyn ExecutionHook>) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let entry = listeners.entry(target).or_default();
        entry.retain(|(id, _)| *id != session);
        entry.push((session, hook));
    }

    /// Remove a hook pair, returning whether it was registered
    pub fn unregister(&self, target: Target, session: SessionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = listeners.get_mut(&target) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != session);
        let removed = entry.len() != before;
        if entry.is_empty() {
            listeners.remove(&target);
        }
        removed
    }

    /// Number of hook pairs registered exactly on `target`
    pub fn listener_count(&self, target: Target) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, engine: EngineId) -> Vec<Arc<dyn ExecutionHook>> {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        [Target::Engine(engine), Target::All]
            .iter()
            .filter_map(|target| listeners.get(target))
            .flatten()
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }

    pub fn before_execute(&self, ctx: &CallContext) {
        for hook in self.snapshot(ctx.engine()) {
            hook.before_execute(ctx);
        }
    }

    /// Dispatch the "after" event to every matching hook
    ///
    /// Every hook sees the event even if an earlier one fails; the first
    /// failure is returned.
    pub fn after_execute(
        &self,
        ctx: &CallContext,
        outcome: &ExecutionOutcome,
    ) -> Result<(), CaptureError> {
        let mut first_error = None;
        for hook in self.snapshot(ctx.engine()) {
            if let Err(e) = hook.after_execute(ctx, outcome) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run `op` between the before and after events
    ///
    /// `op` returns its value along with the outcome metadata reported to
    /// the hooks.
    pub fn observe<T, F>(&self, ctx: &CallContext, op: F) -> Result<T, CaptureError>
    where
        F: FnOnce(&CallContext) -> (T, ExecutionOutcome),
    {
        self.before_execute(ctx);
        let (value, outcome) = op(ctx);
        self.after_execute(ctx, &outcome)?;
        Ok(value)
    }
}

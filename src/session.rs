//! Profiling sessions: lifecycle-managed subscriptions to an event source
//!
//! A session captures every operation executed on its [`Target`] while it is
//! started. Any number of sessions may be active at once, on the same or
//! different targets; each receives its own record for every matching
//! operation.
//!
//! ```text
//!            start()                 stop()
//! Stopped ───────────▶ Started ───────────▶ Stopped
//!   │  start() twice → AlreadyStarted   stop() twice → AlreadyStopped
//! ```
//!
//! # Example
//!
//! ```
//! use querytap::registry::{CallContext, EngineId, ExecutionOutcome, HookRegistry, Target};
//! use querytap::params::Params;
//! use querytap::session::ProfilingSession;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HookRegistry::new());
//! let session = ProfilingSession::builder(Arc::clone(&registry))
//!     .target(Target::Engine(EngineId(1)))
//!     .build()?;
//!
//! session.profile(|| {
//!     let ctx = CallContext::new(EngineId(1), "SELECT * FROM users", Params::None);
//!     registry.observe(&ctx, |_| ((), ExecutionOutcome::rows(3)))
//! })??;
//!
//! assert_eq!(session.collect()?.len(), 1);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::capture::{CaptureHooks, StackResolver, UserContextFn};
use crate::config::CaptureConfig;
use crate::error::SessionError;
use crate::record::ExecutionRecord;
use crate::registry::{CallContext, ExecutionOutcome, HookRegistry, SessionId, Target};
use crate::sink::Sink;
use anyhow::Result;
use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Started,
}

/// Configures a [`ProfilingSession`]
pub struct SessionBuilder {
    registry: Arc<HookRegistry>,
    target: Target,
    capture: CaptureConfig,
    user_context_fn: Option<UserContextFn>,
    sink: Option<Sink>,
}

impl SessionBuilder {
    /// Observe one engine, or [`Target::All`] (the default)
    pub fn target(mut self, target: impl Into<Target>) -> Self {
        self.target = target.into();
        self
    }

    pub fn capture(mut self, config: CaptureConfig) -> Self {
        self.capture = config;
        self
    }

    /// Function whose result is stored with every record
    ///
    /// It runs inline with the observed operation; an error it returns is
    /// handed back to the operation's caller.
    pub fn user_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext, &ExecutionOutcome) -> Result<serde_json::Value>
            + Send
            + Sync
            + 'static,
    {
        self.user_context_fn = Some(Arc::new(f));
        self
    }

    /// Deliver records to `f` instead of the internal queue
    ///
    /// [`ProfilingSession::collect`] is unavailable on such a session.
    pub fn collect_with<F>(mut self, f: F) -> Self
    where
        F: Fn(ExecutionRecord) + Send + Sync + 'static,
    {
        self.sink = Some(Sink::callback(f));
        self
    }

    /// # Errors
    /// Returns error if the capture configuration is invalid.
    pub fn build(self) -> Result<ProfilingSession> {
        if self.capture.capture_stack && self.capture.max_stack_depth == 0 {
            anyhow::bail!("max_stack_depth must be > 0 when capture_stack is enabled");
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> ProfilingSession {
        let id = SessionId::next();
        let hooks = CaptureHooks::new(
            id,
            &self.capture,
            self.user_context_fn,
            self.sink.unwrap_or_else(Sink::queue),
        );
        ProfilingSession {
            id,
            target: self.target,
            registry: self.registry,
            hooks: Arc::new(hooks),
            state: Mutex::new(SessionState::Stopped),
        }
    }
}

/// Captures operations run against a target while started
pub struct ProfilingSession {
    id: SessionId,
    target: Target,
    registry: Arc<HookRegistry>,
    hooks: Arc<CaptureHooks>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for ProfilingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingSession")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .field("sink", self.hooks.sink())
            .finish()
    }
}

impl ProfilingSession {
    pub fn builder(registry: Arc<HookRegistry>) -> SessionBuilder {
        SessionBuilder {
            registry,
            target: Target::All,
            capture: CaptureConfig::default(),
            user_context_fn: None,
            sink: None,
        }
    }

    /// A queue-backed session with default capture settings
    pub fn new(registry: Arc<HookRegistry>, target: impl Into<Target>) -> Self {
        Self::builder(registry).target(target).assemble()
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_started(&self) -> bool {
        self.state() == SessionState::Started
    }

    /// Register the hook pair and begin capturing
    ///
    /// # Errors
    /// [`SessionError::AlreadyStarted`] if the session is already started.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Started {
            return Err(SessionError::AlreadyStarted);
        }
        self.hooks.set_active(true);
        let hooks: Arc<dyn crate::registry::ExecutionHook> = self.hooks.clone();
        self.registry.register(self.target, self.id, hooks);
        *state = SessionState::Started;
        tracing::debug!(session = self.id.0, target = ?self.target, "profiling session started");
        Ok(())
    }

    /// Unregister the hook pair and stop capturing
    ///
    /// No record is produced for an operation whose "after" event fires once
    /// this returns.
    ///
    /// # Errors
    /// [`SessionError::AlreadyStopped`] if the session is already stopped.
    pub fn stop(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == SessionState::Stopped {
            return Err(SessionError::AlreadyStopped);
        }
        self.hooks.set_active(false);
        self.registry.unregister(self.target, self.id);
        *state = SessionState::Stopped;
        tracing::debug!(session = self.id.0, target = ?self.target, "profiling session stopped");
        Ok(())
    }

    /// Drain and return every record captured so far, stacks symbolized
    ///
    /// # Errors
    /// [`SessionError::CollectWithCallback`] if records go to a callback.
    pub fn collect(&self) -> Result<Vec<ExecutionRecord>, SessionError> {
        let queue = self
            .hooks
            .sink()
            .as_queue()
            .ok_or(SessionError::CollectWithCallback)?;
        let mut records = queue.drain();
        let mut resolver = StackResolver::new();
        for record in &mut records {
            resolver.resolve_record(record);
        }
        tracing::debug!(session = self.id.0, records = records.len(), "collected records");
        Ok(records)
    }

    /// Discard queued records without returning them
    ///
    /// # Errors
    /// [`SessionError::CollectWithCallback`] if records go to a callback.
    pub fn purge(&self) -> Result<usize, SessionError> {
        let queue = self
            .hooks
            .sink()
            .as_queue()
            .ok_or(SessionError::CollectWithCallback)?;
        Ok(queue.clear())
    }

    /// Start now and stop when the returned guard is dropped
    ///
    /// # Errors
    /// [`SessionError::AlreadyStarted`] if the session is already started.
    pub fn scope(&self) -> Result<SessionGuard<'_>, SessionError> {
        self.start()?;
        Ok(SessionGuard { session: self })
    }

    /// Run `f` with the session started, stopping afterwards even if `f`
    /// panics
    ///
    /// # Errors
    /// [`SessionError::AlreadyStarted`] if the session is already started.
    pub fn profile<T, F: FnOnce() -> T>(&self, f: F) -> Result<T, SessionError> {
        let _guard = self.scope()?;
        Ok(f())
    }
}

impl Drop for ProfilingSession {
    fn drop(&mut self) {
        if self.is_started() {
            let _ = self.stop();
        }
    }
}

/// Keeps a session started for a lexical scope
#[must_use = "the session stops as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SessionGuard<'a> {
    session: &'a ProfilingSession,
}

impl SessionGuard<'_> {
    pub fn session(&self) -> &ProfilingSession {
        self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.stop() {
            tracing::warn!(session = self.session.id.0, "scope exit could not stop session: {}", e);
        }
    }
}

/// Create a queue-backed session on `target` and start it
///
/// # Errors
/// Never fails for a fresh session; the `Result` mirrors [`ProfilingSession::start`].
pub fn start(
    registry: Arc<HookRegistry>,
    target: impl Into<Target>,
) -> Result<ProfilingSession, SessionError> {
    let session = ProfilingSession::new(registry, target);
    session.start()?;
    Ok(session)
}

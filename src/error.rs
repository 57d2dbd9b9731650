//! Error types for profiling sessions, capture hooks and the control surface

use thiserror::Error;

/// Misuse of the session lifecycle
///
/// All variants are caller-recoverable and indicate a programming mistake
/// rather than a runtime fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("profiling session is already started")]
    AlreadyStarted,

    #[error("profiling session is already stopped")]
    AlreadyStopped,

    /// `collect()` is only defined for sessions that own their queue
    #[error("cannot collect from a session that delivers records to a callback")]
    CollectWithCallback,
}

/// Failure raised inline with an observed operation
///
/// Hooks run synchronously on the thread executing the operation, so these
/// errors surface to whoever issued the operation.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("user context function failed: {0}")]
    UserContext(#[source] anyhow::Error),
}

/// Rejected control surface request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("parameter \"turn=(on|off)\" required, got {0:?}")]
    InvalidTurn(String),

    #[error("no control command in request body")]
    MissingCommand,

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
}

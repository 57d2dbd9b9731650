//! On/off control surface for long-running hosts
//!
//! [`ProfilerControl`] keeps one callback-mode session and an accumulated
//! record store. A web host maps its dashboard endpoint onto
//! [`ProfilerControl::handle`]: `GET` renders the report, `POST` with a
//! form body of `turn=on`, `turn=off` or `clear=1` applies the command and
//! then renders. No HTTP server lives here.

use crate::aggregate::{aggregate_with, Report};
use crate::capture::LibraryFrames;
use crate::config::ProfilerConfig;
use crate::error::ControlError;
use crate::record::ExecutionRecord;
use crate::registry::{HookRegistry, Target};
use crate::report::{render, ReportFormat};
use crate::session::ProfilingSession;
use anyhow::Result;
use std::sync::{Arc, Mutex, PoisonError};

/// Command accepted by the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TurnOn,
    TurnOff,
    Clear,
}

impl ControlCommand {
    /// Parse an `application/x-www-form-urlencoded` body
    ///
    /// Any `clear` field wins over `turn`.
    pub fn parse_form(body: &str) -> Result<Self, ControlError> {
        let mut turn = None;
        for pair in body.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let (key, value) = (decode_form_component(key), decode_form_component(value));
            match key.trim() {
                "clear" if !value.is_empty() => return Ok(ControlCommand::Clear),
                "turn" if turn.is_none() => turn = Some(value.trim().to_ascii_lowercase()),
                _ => {}
            }
        }
        match turn.as_deref() {
            Some("on") => Ok(ControlCommand::TurnOn),
            Some("off") => Ok(ControlCommand::TurnOff),
            Some(other) => Err(ControlError::InvalidTurn(other.to_string())),
            None => Err(ControlError::MissingCommand),
        }
    }
}

/// Undo form encoding: `+` is a space and `%XX` a byte
///
/// Malformed escapes are kept literally; invalid UTF-8 is replaced.
fn decode_form_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Response for the host to send back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ControlResponse {
    fn plain(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body,
        }
    }
}

/// Toggleable profiler with an accumulated record store
pub struct ProfilerControl {
    session: ProfilingSession,
    stats: Arc<Mutex<Vec<ExecutionRecord>>>,
    frames: LibraryFrames,
    config: ProfilerConfig,
}

impl std::fmt::Debug for ProfilerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilerControl")
            .field("session", &self.session)
            .field("records", &self.record_count())
            .finish()
    }
}

impl ProfilerControl {
    /// Observe every engine dispatching through `registry`
    ///
    /// # Errors
    /// Returns error if `config` is invalid.
    pub fn new(registry: Arc<HookRegistry>, config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stats);
        let session = ProfilingSession::builder(registry)
            .target(Target::All)
            .capture(config.capture.clone())
            .collect_with(move |record| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(record);
            })
            .build()?;
        Ok(Self {
            session,
            stats,
            frames: LibraryFrames::from_config(&config.capture)?,
            config,
        })
    }

    pub fn is_on(&self) -> bool {
        self.session.is_started()
    }

    /// Start capturing; no-op when already on
    pub fn turn_on(&self) {
        if self.session.start().is_ok() {
            tracing::info!("query profiling turned on");
        }
    }

    /// Stop capturing; no-op when already off
    pub fn turn_off(&self) {
        if self.session.stop().is_ok() {
            tracing::info!("query profiling turned off");
        }
    }

    /// Discard every accumulated record
    pub fn clear(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(discarded = stats.len(), "cleared accumulated records");
        stats.clear();
    }

    pub fn apply(&self, command: ControlCommand) {
        match command {
            ControlCommand::TurnOn => self.turn_on(),
            ControlCommand::TurnOff => self.turn_off(),
            ControlCommand::Clear => self.clear(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Aggregate a snapshot of the accumulated records
    pub fn snapshot(&self) -> Report {
        let records = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        aggregate_with(records, &self.frames)
    }

    /// Render the current snapshot with the configured title
    pub fn report(&self, format: ReportFormat) -> Result<String> {
        let status = if self.is_on() { "on" } else { "off" };
        let title = format!("{} (profiling {})", self.config.report.title, status);
        render(&self.snapshot(), format, &title)
    }

    fn render_response(&self) -> ControlResponse {
        let format = self.config.report.format;
        match self.report(format) {
            Ok(body) => ControlResponse {
                status: 200,
                content_type: format.content_type(),
                body,
            },
            Err(e) => ControlResponse::plain(500, format!("500 Internal Server Error: {:#}", e)),
        }
    }

    /// Handle one dashboard request
    pub fn handle(&self, method: &str, body: &str) -> ControlResponse {
        match method.trim().to_ascii_uppercase().as_str() {
            "GET" => self.render_response(),
            "POST" => match ControlCommand::parse_form(body) {
                Ok(command) => {
                    self.apply(command);
                    self.render_response()
                }
                Err(e) => {
                    tracing::warn!("rejected control request: {}", e);
                    ControlResponse::plain(400, format!("400 Bad Request: {}", e))
                }
            },
            other => {
                let e = ControlError::MethodNotAllowed(other.to_string());
                ControlResponse::plain(405, format!("405 Method Not Allowed: {}", e))
            }
        }
    }
}

//! Report rendering for aggregated query statistics
//!
//! Renderers are pure functions of a [`Report`] and a title. Three formats
//! are available: an aligned text table, a standalone HTML page and JSON.

mod html;
mod json;
mod text;

pub use html::HtmlReport;
pub use json::{JsonGroup, JsonParamSet, JsonReport, JsonSummary};
pub use text::TextReport;

use crate::aggregate::Report;
use crate::capture::StackResolver;
use crate::record::ExecutionRecord;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable text table
    Text,
    /// Standalone HTML page (default)
    #[default]
    Html,
    /// JSON for machine parsing
    Json,
}

impl ReportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ReportFormat::Text => "text/plain; charset=utf-8",
            ReportFormat::Html => "text/html; charset=utf-8",
            ReportFormat::Json => "application/json",
        }
    }
}

/// Render a report in the requested format
pub fn render(report: &Report, format: ReportFormat, title: &str) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(TextReport::new(report, title).render()),
        ReportFormat::Html => Ok(HtmlReport::new(report, title).render()),
        ReportFormat::Json => JsonReport::from_report(report, title).to_json(),
    }
}

/// Render a report and write it to `path`, replacing any existing content
///
/// Returns the rendered text.
pub fn write_report<P: AsRef<Path>>(
    report: &Report,
    format: ReportFormat,
    title: &str,
    path: P,
) -> Result<String> {
    let rendered = render(report, format, title)?;
    fs::write(path.as_ref(), &rendered)
        .with_context(|| format!("Failed to write report: {}", path.as_ref().display()))?;
    tracing::debug!(path = %path.as_ref().display(), bytes = rendered.len(), "report written");
    Ok(rendered)
}

/// Save raw records as a JSON array
///
/// Pending stacks are symbolized on the way out; the file only ever holds
/// resolved frames.
pub fn export_records<P: AsRef<Path>>(records: &[ExecutionRecord], path: P) -> Result<()> {
    let json = if records.iter().any(ExecutionRecord::has_pending_stack) {
        let mut resolver = StackResolver::new();
        let resolved: Vec<ExecutionRecord> = records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                resolver.resolve_record(&mut record);
                record
            })
            .collect();
        serde_json::to_string_pretty(&resolved)
    } else {
        serde_json::to_string_pretty(records)
    }
    .context("Failed to serialize records")?;
    fs::write(path.as_ref(), json)
        .with_context(|| format!("Failed to write records: {}", path.as_ref().display()))
}

/// Load records previously saved with [`export_records`]
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<ExecutionRecord>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read records: {}", path.as_ref().display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid records file: {}", path.as_ref().display()))
}

/// Duration as fractional milliseconds
pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

//! JSON report format

use super::millis;
use crate::aggregate::{QueryGroup, Report};
use crate::params::Params;
use crate::record::format_stack;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One distinct parameter set within a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonParamSet {
    /// Hex key: text hash followed by params hash
    pub key: String,
    pub count: usize,
    pub params: Params,
    /// Stack of the first execution seen with these parameters
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack: String,
}

/// One query group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonGroup {
    pub text: String,
    pub stack: String,
    /// Innermost non-library frame, if a stack was captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    pub count: usize,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub rowcounts: u64,
    pub param_sets: Vec<JsonParamSet>,
}

/// Summary over every record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total_queries: usize,
    pub unique_queries: usize,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub rowcounts: u64,
}

/// Root JSON output structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub title: String,
    pub summary: JsonSummary,
    /// Groups, costliest first
    pub groups: Vec<JsonGroup>,
}

impl JsonGroup {
    fn from_group(group: &QueryGroup) -> Self {
        let (stack, caller) = group
            .stacks_by_count()
            .first()
            .map(|(stack_text, _)| {
                let caller = group
                    .callers
                    .get(*stack_text)
                    .and_then(|c| c.as_ref())
                    .map(|f| f.to_string());
                (stack_text.to_string(), caller)
            })
            .unwrap_or_default();

        Self {
            text: group.text.clone(),
            stack,
            caller,
            count: group.count(),
            total_ms: millis(group.sum),
            mean_ms: millis(group.mean),
            median_ms: millis(group.median),
            min_ms: millis(group.min),
            max_ms: millis(group.max),
            rowcounts: group.rowcounts,
            param_sets: group
                .param_sets()
                .into_iter()
                .map(|entry| JsonParamSet {
                    key: entry.key.to_hex(),
                    count: entry.count,
                    params: entry.params.clone(),
                    stack: format_stack(&entry.stack),
                })
                .collect(),
        }
    }
}

impl JsonReport {
    pub fn from_report(report: &Report, title: &str) -> Self {
        let all = &report.all;
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "querytap-json-v1".to_string(),
            title: title.to_string(),
            summary: JsonSummary {
                total_queries: all.count(),
                unique_queries: report.unique_queries(),
                total_ms: millis(all.sum),
                mean_ms: millis(all.mean),
                median_ms: millis(all.median),
                min_ms: millis(all.min),
                max_ms: millis(all.max),
                rowcounts: all.rowcounts,
            },
            groups: report.groups.iter().map(JsonGroup::from_group).collect(),
        }
    }

    /// Serialize to pretty JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize JSON report")
    }
}

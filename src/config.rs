//! Profiler configuration, loadable from TOML
//!
//! ```toml
//! [capture]
//! capture_stack = true
//! max_stack_depth = 32
//! library_patterns = ["^<?std::", "^<?sqlx::"]
//!
//! [report]
//! title = "Checkout service queries"
//! format = "text"
//! ```

use crate::report::ReportFormat;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_REPORT_TITLE: &str = "QueryTap Profiling Report";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    pub capture: CaptureConfig,
    pub report: ReportConfig,
}

/// How records are captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Capture the call stack of every operation
    ///
    /// Disabling it makes every operation with the same text fall into a
    /// single group.
    pub capture_stack: bool,

    /// Maximum number of frames kept per record
    pub max_stack_depth: usize,

    /// Regexes matched against frame function names; matching frames are
    /// library code and are skipped when attributing a query to its caller
    pub library_patterns: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_stack: true,
            max_stack_depth: 64,
            library_patterns: vec![
                "^<?std::".to_string(),
                "^<?core::".to_string(),
                "^<?alloc::".to_string(),
            ],
        }
    }
}

impl CaptureConfig {
    /// Configuration that records no stacks at all
    pub fn without_stacks() -> Self {
        Self {
            capture_stack: false,
            ..Self::default()
        }
    }

    pub fn compile_library_patterns(&self) -> Result<Vec<Regex>> {
        self.library_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid library pattern: {}", p)))
            .collect()
    }
}

/// How reports are rendered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub title: String,
    pub format: ReportFormat,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_REPORT_TITLE.to_string(),
            format: ReportFormat::Html,
        }
    }
}

impl ProfilerConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if the file can't be read, isn't valid TOML, or fails
    /// [`ProfilerConfig::validate`].
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capture.capture_stack && self.capture.max_stack_depth == 0 {
            anyhow::bail!("max_stack_depth must be > 0 when capture_stack is enabled");
        }
        self.capture.compile_library_patterns()?;
        Ok(())
    }
}

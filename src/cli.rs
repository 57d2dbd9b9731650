//! CLI argument parsing for QueryTap

use crate::report::ReportFormat;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "querytap")]
#[command(version)]
#[command(about = "Aggregate and report captured query executions", long_about = None)]
pub struct Cli {
    /// JSON file of execution records (as written by export_records)
    #[arg(value_name = "RECORDS")]
    pub records: PathBuf,

    /// Report format (overrides the config file)
    #[arg(long = "format", value_enum)]
    pub format: Option<ReportFormat>,

    /// Write the report to FILE instead of stdout
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report title (overrides the config file)
    #[arg(long = "title")]
    pub title: Option<String>,

    /// TOML configuration file
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_records() {
        assert!(Cli::try_parse_from(["querytap"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["querytap", "records.json"]);
        assert_eq!(cli.records, PathBuf::from("records.json"));
        assert!(cli.format.is_none());
        assert!(cli.output.is_none());
        assert!(cli.title.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_format_flag() {
        let cli = Cli::parse_from(["querytap", "--format", "json", "r.json"]);
        assert_eq!(cli.format, Some(ReportFormat::Json));
    }

    #[test]
    fn test_cli_invalid_format() {
        assert!(Cli::try_parse_from(["querytap", "--format", "xml", "r.json"]).is_err());
    }

    #[test]
    fn test_cli_output_and_title() {
        let cli = Cli::parse_from([
            "querytap", "-o", "out.html", "--title", "Nightly", "--debug", "r.json",
        ]);
        assert_eq!(cli.output, Some(PathBuf::from("out.html")));
        assert_eq!(cli.title.as_deref(), Some("Nightly"));
        assert!(cli.debug);
    }
}

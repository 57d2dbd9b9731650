use anyhow::Result;
use clap::Parser;
use querytap::aggregate::aggregate_with;
use querytap::capture::LibraryFrames;
use querytap::cli::Cli;
use querytap::config::ProfilerConfig;
use querytap::report::{load_records, render, write_report};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_toml(path)?,
        None => ProfilerConfig::default(),
    };
    if let Some(format) = args.format {
        config.report.format = format;
    }
    if let Some(title) = args.title {
        config.report.title = title;
    }
    config.validate()?;

    let records = load_records(&args.records)?;
    tracing::debug!(records = records.len(), path = %args.records.display(), "loaded records");

    let frames = LibraryFrames::from_config(&config.capture)?;
    let report = aggregate_with(records, &frames);

    match &args.output {
        Some(path) => {
            write_report(&report, config.report.format, &config.report.title, path)?;
        }
        None => print!("{}", render(&report, config.report.format, &config.report.title)?),
    }
    Ok(())
}

use std::str::FromStr;

use anyhow::{Context, Result};
use log::LevelFilter;

use crate::config::LoggingConfig;

pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or(LevelFilter::Info)
}

/// Routes `log` records to the log file, and to stderr when enabled.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(parse_level(&config.level))
        .chain(
            fern::log_file(&config.file)
                .with_context(|| format!("Failed to open log file {}", config.file.display()))?,
        );

    if config.stderr {
        dispatch = dispatch.chain(std::io::stderr());
    }

    dispatch.apply().context("Logger already initialized")?;
    Ok(())
}

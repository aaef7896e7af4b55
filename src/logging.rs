use std::fs::File;
use std::str::FromStr;

use anyhow::{Context, Result};
use simplelog::{ConfigBuilder, LevelFilter, ThreadLogMode, WriteLogger};

use crate::settings::Settings;

/// Parse a level name, falling back to `Info` for anything unrecognised
#[must_use]
pub fn parse_level(name: &str) -> LevelFilter {
    LevelFilter::from_str(name.trim()).unwrap_or(LevelFilter::Info)
}

/// Install the file logger described by `settings`
pub fn init_logging(settings: &Settings) -> Result<()> {
    let level = parse_level(&settings.log_level);
    // Unit and loader threads are named, so show names on every line
    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Error)
        .set_thread_mode(ThreadLogMode::Names)
        .build();
    let file = File::create(&settings.log_file)
        .with_context(|| format!("Failed to create log file {}", settings.log_file))?;
    WriteLogger::init(level, config, file).context("Failed to install logger")?;
    Ok(())
}

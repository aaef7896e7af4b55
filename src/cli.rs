use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::pipeline::{InputEntry, InputSpec};
use crate::settings::Settings;

/// Decode a mixed list of documents into one ordered page list
#[derive(Debug, Parser)]
#[command(name = "pageflow", version, about)]
pub struct Cli {
    /// Document locators in reading order (paths, file:// or http(s):// URLs)
    pub locators: Vec<String>,

    /// Numbered inputs BASE/1.EXT .. BASE/COUNT.EXT instead of a list
    #[arg(
        long,
        num_args = 3,
        value_names = ["BASE", "EXT", "COUNT"],
        conflicts_with = "locators"
    )]
    pub pattern: Option<Vec<String>>,

    /// Write every ready page to DIR as page-NNNN.png
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Decode one job at a time regardless of the device
    #[arg(long)]
    pub sequential: bool,

    /// Print a JSON summary instead of text
    #[arg(long)]
    pub json: bool,

    /// Embed each ready page as a PNG data URL in the JSON summary
    #[arg(long, requires = "json")]
    pub data_urls: bool,

    /// Settings file (default: <config dir>/pageflow/config.yaml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "N")]
    pub max_units: Option<usize>,

    /// Device memory hint in GB
    #[arg(long, value_name = "GB")]
    pub memory_gb: Option<f64>,

    /// Size the pool for a mobile-class device
    #[arg(long)]
    pub mobile: bool,

    /// off, error, warn, info, debug or trace
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

impl Cli {
    /// The input list these arguments describe
    pub fn input_spec(&self) -> Result<InputSpec> {
        if let Some(pattern) = &self.pattern {
            let [base, extension, count] = pattern.as_slice() else {
                bail!("--pattern takes BASE EXT COUNT");
            };
            let count = count
                .parse()
                .with_context(|| format!("Invalid pattern count {count:?}"))?;
            return Ok(InputSpec::Pattern {
                base_folder: base.clone(),
                extension: extension.clone(),
                count,
            });
        }

        if self.locators.is_empty() {
            bail!("No documents given; pass locators or --pattern");
        }
        Ok(InputSpec::List(
            self.locators.iter().cloned().map(InputEntry::new).collect(),
        ))
    }

    /// Flags override whatever the settings file says
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(max_units) = self.max_units {
            settings.max_units = max_units;
        }
        if self.memory_gb.is_some() {
            settings.memory_gb = self.memory_gb;
        }
        if self.mobile {
            settings.mobile = true;
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
        if let Some(file) = &self.log_file {
            settings.log_file.clone_from(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_become_a_list() {
        let cli = Cli::parse_from(["pageflow", "a.pdf", "b.png", "--sequential"]);
        assert!(cli.sequential);
        let spec = cli.input_spec().unwrap();
        let refs = spec.expand().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].locator, "b.png");
    }

    #[test]
    fn pattern_expands() {
        let cli = Cli::parse_from(["pageflow", "--pattern", "scans", "tif", "3"]);
        let refs = cli.input_spec().unwrap().expand().unwrap();
        let locators: Vec<_> = refs.iter().map(|r| r.locator.as_str()).collect();
        assert_eq!(locators, vec!["scans/1.tif", "scans/2.tif", "scans/3.tif"]);
    }

    #[test]
    fn bad_pattern_count_and_empty_input_are_rejected() {
        let cli = Cli::parse_from(["pageflow", "--pattern", "scans", "tif", "many"]);
        assert!(cli.input_spec().is_err());
        let cli = Cli::parse_from(["pageflow"]);
        assert!(cli.input_spec().is_err());
    }

    #[test]
    fn data_urls_need_json_output() {
        assert!(Cli::try_parse_from(["pageflow", "a.png", "--data-urls"]).is_err());
        let cli = Cli::parse_from(["pageflow", "a.png", "--json", "--data-urls"]);
        assert!(cli.json && cli.data_urls);
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "pageflow",
            "a.png",
            "--max-units",
            "2",
            "--mobile",
            "--log-level",
            "debug",
        ]);
        let mut settings = Settings::default();
        cli.apply_to(&mut settings);
        assert_eq!(settings.max_units, 2);
        assert!(settings.mobile);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.memory_gb, None);
    }
}

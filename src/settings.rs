use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::pipeline::{DEFAULT_EVENTS_PER_POLL, DEFAULT_MAX_UNITS, DEFAULT_PDF_SCALE};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pageflow";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Upper bound on execution units; the device may allow fewer
    #[serde(default = "default_max_units")]
    pub max_units: usize,

    /// Device memory in GB, when known; low values shrink the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,

    #[serde(default)]
    pub mobile: bool,

    #[serde(default = "default_events_per_poll")]
    pub events_per_poll: usize,

    #[serde(default = "default_pdf_scale")]
    pub pdf_scale: f32,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_max_units() -> usize {
    DEFAULT_MAX_UNITS
}

fn default_events_per_poll() -> usize {
    DEFAULT_EVENTS_PER_POLL
}

fn default_pdf_scale() -> f32 {
    DEFAULT_PDF_SCALE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "pageflow.log".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            max_units: default_max_units(),
            memory_gb: None,
            mobile: false,
            events_per_poll: default_events_per_poll(),
            pdf_scale: default_pdf_scale(),
            log_level: default_log_level(),
            log_file: default_log_file(),
        }
    }
}

#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `explicit`, or from the per-user config file.
///
/// A missing explicit file yields defaults; a missing per-user file is
/// created with defaults. Unreadable or malformed files are errors so the
/// caller can report them once logging is up.
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings, SettingsError> {
    if let Some(path) = explicit {
        if !path.exists() {
            warn!("Settings file {path:?} not found, using defaults");
            return Ok(Settings::default());
        }
        return load_settings_from_path(path);
    }

    let Some(path) = default_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Ok(Settings::default());
    };
    if path.exists() {
        return load_settings_from_path(&path);
    }

    info!("Settings file not found, creating with defaults at {path:?}");
    let settings = Settings::default();
    save_settings_to_file(&settings, &path);
    Ok(settings)
}

pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings: Settings =
        serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Loaded settings from {path:?}");

    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
        save_settings_to_file(&settings, path);
    }
    Ok(settings)
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);
    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => warn!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();
    content.push_str(SETTINGS_HEADER);
    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("max_units: {}\n", settings.max_units));
    match settings.memory_gb {
        Some(gb) => content.push_str(&format!("memory_gb: {gb}\n")),
        None => content.push_str("# memory_gb: 4\n"),
    }
    content.push_str(&format!("mobile: {}\n", settings.mobile));
    content.push_str(&format!("events_per_poll: {}\n", settings.events_per_poll));
    content.push_str(&format!("pdf_scale: {}\n", settings.pdf_scale));
    content.push_str(&format!("log_level: \"{}\"\n", settings.log_level));
    content.push_str(&format!("log_file: \"{}\"\n", settings.log_file));
    content
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# pageflow settings
# ============================================================================
# max_units        ceiling on parallel decode units (the device may allow fewer)
# memory_gb        device memory hint; 4 or less counts as constrained
# mobile           treat the device as mobile-class (smaller pool)
# events_per_poll  unit/loader messages handled per scheduling tick
# pdf_scale        PDF rasterization scale relative to 72 dpi
# log_level        off, error, warn, info, debug or trace
"#;

//! Bootstrap configuration loading
//!
//! Configuration is resolved once at startup, in priority order:
//! 1. Command-line argument (handled by the binary, highest priority)
//! 2. TOML config file
//! 3. Compiled default (fallback)
//!
//! A missing TOML file is not fatal: the service logs a warning and starts
//! with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_ENV_VAR: &str = "SMILE_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional so partial files stay valid; unset values fall
/// back to [`CompiledDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Directory the raw request/sample files land in
    #[serde(default)]
    pub landing_path: Option<PathBuf>,

    /// SQLite database holding the audit log, upsert tables and file ledger
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// File name suffix that marks a request file
    #[serde(default)]
    pub request_suffix: Option<String>,

    /// File name suffix that marks a standalone sample file
    #[serde(default)]
    pub sample_suffix: Option<String>,

    /// Landing store polling interval in milliseconds
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Offset (hours from UTC) used to derive the reporting `ingest_date`
    #[serde(default)]
    pub reporting_utc_offset_hours: Option<i32>,

    /// Port of the read-only HTTP query surface
    #[serde(default)]
    pub http_port: Option<u16>,

    /// Whether to serve the HTTP query surface at all
    #[serde(default)]
    pub http_enabled: Option<bool>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled defaults used when neither CLI nor TOML provide a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub request_suffix: String,
    pub sample_suffix: String,
    pub poll_interval_ms: u64,
    /// US Eastern standard offset, matching the reporting timezone of the feed
    pub reporting_utc_offset_hours: i32,
    pub http_port: u16,
    pub http_enabled: bool,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform the binary runs on
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            request_suffix: "request.json".to_string(),
            sample_suffix: "sample.json".to_string(),
            poll_interval_ms: 5_000,
            reporting_utc_offset_hours: -5,
            http_port: 5780,
            http_enabled: true,
            log_level: default_log_level(),
        }
    }

    /// Default SQLite database location inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("smile-lakehouse.db")
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("smile-lakehouse"))
        .unwrap_or_else(|| PathBuf::from("./smile_lakehouse_data"))
}

/// Locate the TOML config file
///
/// Priority: explicit path → `SMILE_CONFIG` → `<config_dir>/smile-lakehouse/config.toml`.
/// Returns `None` when no candidate exists on disk.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("smile-lakehouse").join("config.toml"))
        .filter(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the TOML config, degrading to defaults when the file is absent
///
/// A file that exists but does not parse is still an error: silently
/// ignoring a broken config would run the pipeline against the wrong store.
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        Some(p) if p.exists() => {
            let config = load_toml_config(p)?;
            info!("Loaded configuration from {}", p.display());
            Ok(config)
        }
        Some(p) => {
            warn!(
                "Config file {} not found, using compiled defaults",
                p.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            warn!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    // Write to a sibling temp file first so readers never see a partial file
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

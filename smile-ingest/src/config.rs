//! Service configuration resolution
//!
//! Each value resolves independently: CLI argument → TOML → compiled default.
//! The landing path has no default; it must come from the CLI or the TOML file.

use smile_common::config::{CompiledDefaults, TomlConfig};
use smile_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::workflow::PipelineConfig;

/// Values given on the command line (or their environment fallbacks)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub landing_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub http_port: Option<u16>,
}

/// Fully resolved configuration of the service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub pipeline: PipelineConfig,
    pub database_path: PathBuf,
    pub http_port: u16,
    pub http_enabled: bool,
    pub log_level: String,
}

/// Resolve the service configuration from all tiers
pub fn resolve_service_config(
    cli: &CliOverrides,
    toml: &TomlConfig,
    defaults: &CompiledDefaults,
) -> Result<ServiceConfig> {
    let landing_path = cli
        .landing_path
        .clone()
        .or_else(|| toml.landing_path.clone())
        .ok_or_else(|| {
            Error::Config(
                "Landing path not configured. Pass --landing-path, set SMILE_LANDING_PATH, \
                 or add landing_path to the config file"
                    .to_string(),
            )
        })?;

    let request_suffix = toml
        .request_suffix
        .clone()
        .unwrap_or_else(|| defaults.request_suffix.clone());
    let sample_suffix = toml
        .sample_suffix
        .clone()
        .unwrap_or_else(|| defaults.sample_suffix.clone());
    if request_suffix.is_empty() || sample_suffix.is_empty() {
        return Err(Error::Config("File name suffixes must not be empty".to_string()));
    }
    if request_suffix == sample_suffix {
        return Err(Error::Config(format!(
            "Request and sample suffix are both {:?}",
            request_suffix
        )));
    }

    let poll_interval_ms = cli
        .poll_interval_ms
        .or(toml.poll_interval_ms)
        .unwrap_or(defaults.poll_interval_ms);
    if poll_interval_ms == 0 {
        return Err(Error::Config("poll_interval_ms must be positive".to_string()));
    }

    let config = ServiceConfig {
        pipeline: PipelineConfig {
            landing_path,
            request_suffix,
            sample_suffix,
            poll_interval: Duration::from_millis(poll_interval_ms),
            reporting_utc_offset_hours: toml
                .reporting_utc_offset_hours
                .unwrap_or(defaults.reporting_utc_offset_hours),
        },
        database_path: cli
            .database_path
            .clone()
            .or_else(|| toml.database_path.clone())
            .unwrap_or_else(|| defaults.database_path()),
        http_port: cli
            .http_port
            .or(toml.http_port)
            .unwrap_or(defaults.http_port),
        http_enabled: toml.http_enabled.unwrap_or(defaults.http_enabled),
        log_level: toml.logging.level.clone(),
    };

    info!(
        landing_path = %config.pipeline.landing_path.display(),
        database = %config.database_path.display(),
        "Configuration resolved"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CompiledDefaults {
        CompiledDefaults::for_current_platform()
    }

    #[test]
    fn test_missing_landing_path_is_config_error() {
        let result = resolve_service_config(&CliOverrides::default(), &TomlConfig::default(), &defaults());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_overrides_toml_overrides_defaults() {
        let toml = TomlConfig {
            landing_path: Some(PathBuf::from("/toml/landing")),
            poll_interval_ms: Some(250),
            http_port: Some(6000),
            ..TomlConfig::default()
        };
        let cli = CliOverrides {
            landing_path: Some(PathBuf::from("/cli/landing")),
            http_port: Some(7000),
            ..CliOverrides::default()
        };

        let config = resolve_service_config(&cli, &toml, &defaults()).unwrap();
        assert_eq!(config.pipeline.landing_path, PathBuf::from("/cli/landing"));
        assert_eq!(config.pipeline.poll_interval, Duration::from_millis(250));
        assert_eq!(config.http_port, 7000);
        assert_eq!(config.pipeline.request_suffix, "request.json");
        assert_eq!(config.pipeline.reporting_utc_offset_hours, -5);
        assert_eq!(config.database_path, defaults().database_path());
    }

    #[test]
    fn test_identical_suffixes_rejected() {
        let toml = TomlConfig {
            landing_path: Some(PathBuf::from("/l")),
            request_suffix: Some(".json".to_string()),
            sample_suffix: Some(".json".to_string()),
            ..TomlConfig::default()
        };
        assert!(resolve_service_config(&CliOverrides::default(), &toml, &defaults()).is_err());
    }
}

//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::PipelineConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variables that override transport references and telemetry settings.
pub const ENV_QUEUE_URL: &str = "QUEUE_URL";
pub const ENV_JOB_QUEUE: &str = "BATCH_JOB_QUEUE";
pub const ENV_JOB_DEFINITION: &str = "BATCH_JOB_DEFINITION";
pub const ENV_STATE_MACHINE_ARN: &str = "STATE_MACHINE_ARN";
pub const ENV_SERVICE_NAME: &str = "SERVICE_NAME";
pub const ENV_TELEMETRY_API_KEY: &str = "TELEMETRY_API_KEY";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: PipelineConfig = toml::from_str(&content)?;

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load from `path` when given, otherwise start from defaults. Overrides and
/// validation apply either way.
pub fn load_or_default(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = PipelineConfig::default();
            apply_overrides(&mut config, |key| std::env::var(key).ok());
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Apply overrides from a key lookup (the process environment in production).
pub fn apply_overrides<F>(config: &mut PipelineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut set = |key: &str, target: &mut String| {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
            tracing::debug!(key, "Configuration overridden from environment");
            *target = value;
        }
    };

    set(ENV_QUEUE_URL, &mut config.transports.queue_url);
    set(ENV_JOB_QUEUE, &mut config.transports.job_queue);
    set(ENV_JOB_DEFINITION, &mut config.transports.job_definition);
    set(ENV_STATE_MACHINE_ARN, &mut config.transports.state_machine_arn);
    set(ENV_SERVICE_NAME, &mut config.telemetry.service_name);

    let mut api_key = config.telemetry.api_key.take().unwrap_or_default();
    set(ENV_TELEMETRY_API_KEY, &mut api_key);
    config.telemetry.api_key = (!api_key.is_empty()).then_some(api_key);
}

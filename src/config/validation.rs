//! Configuration validation.
//!
//! Semantic checks only (serde handles syntax). Returns every problem found,
//! not just the first.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{ExporterKind, PipelineConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("telemetry.endpoint: invalid url '{0}'")]
    InvalidEndpoint(String),

    #[error("telemetry.endpoint is required for the http exporter")]
    MissingEndpoint,

    #[error("observability.log_level: unknown level '{0}'")]
    UnknownLogLevel(String),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.ingress.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "ingress.bind_address",
            value: config.ingress.bind_address.clone(),
        });
    }
    if config.ingress.max_body_size == 0 {
        errors.push(ValidationError::Zero("ingress.max_body_size"));
    }
    if config.ingress.channel_capacity == 0 {
        errors.push(ValidationError::Zero("ingress.channel_capacity"));
    }

    let transports = [
        ("transports.queue_url", &config.transports.queue_url),
        ("transports.job_queue", &config.transports.job_queue),
        ("transports.job_definition", &config.transports.job_definition),
        ("transports.state_machine_arn", &config.transports.state_machine_arn),
    ];
    for (field, value) in transports {
        if value.trim().is_empty() {
            errors.push(ValidationError::Empty(field));
        }
    }

    if config.timeouts.handoff_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.handoff_ms"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    let telemetry = &config.telemetry;
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::Empty("telemetry.service_name"));
    }
    if telemetry.batch_size == 0 {
        errors.push(ValidationError::Zero("telemetry.batch_size"));
    }
    match (&telemetry.exporter, &telemetry.endpoint) {
        (ExporterKind::Http, None) => errors.push(ValidationError::MissingEndpoint),
        (_, Some(endpoint)) if url::Url::parse(endpoint).is_err() => {
            errors.push(ValidationError::InvalidEndpoint(endpoint.clone()));
        }
        _ => {}
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

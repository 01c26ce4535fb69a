//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → cloned into each stage at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; stages never re-read it
//! - All fields have defaults to allow minimal configs
//! - Transport references are opaque strings resolved by the deployment

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    CarrierPrecedence, ExporterKind, IngressConfig, LogFormat, ObservabilityConfig,
    PipelineConfig, PropagationConfig, TelemetryConfig, TimeoutConfig, TransportConfig,
    WorkConfig,
};

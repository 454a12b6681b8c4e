pub mod app;
pub mod cache;
pub mod database;
pub mod resilience;

use thiserror::Error;

pub use app::{AppConfig, AppMetadata, HealthConfig, LogFormat, ObservabilityConfig, ServerConfig};
pub use cache::{CacheBackendKind, CacheConfig};
pub use database::{DatabaseConfig, DatabaseIdentity};
pub use resilience::{CircuitBreakerConfig, ResilienceConfig};

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value was loaded but is out of range
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Range and consistency checks run after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Build a section populated only from its defaults
pub trait WithDefaults {
    fn with_defaults() -> Self;
}

/// Load the application configuration from files and environment variables
pub fn load() -> Result<AppConfig, ConfigError> {
    app::load_config()
}

use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, WithDefaults};

/// Resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    /// Circuit breaker configuration
    #[serde(default = "CircuitBreakerConfig::default")]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Circuit breaker configuration
///
/// The breaker is binary: it opens after `threshold` consecutive store failures
/// and closes again on the next successful health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_circuit_breaker_threshold")]
    pub threshold: u32,
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_circuit_breaker_threshold(),
        }
    }
}

impl Validate for ResilienceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()?;
        Ok(())
    }
}

impl Validate for CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.circuit_breaker.threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for ResilienceConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for CircuitBreakerConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

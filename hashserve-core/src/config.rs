//! Process configuration, loaded from environment variables.
//!
//! Mirrors the shape of the original Go service's `config.load()`: every
//! required variable is read once, missing variables are collected into a
//! [`ConfigError`], and `LOG_LEVEL` falls back to `"INFO"` rather than
//! failing the whole load.

use thiserror::Error as ThisError;

/// The default hasher base URL, matching the hardcoded address the original
/// service used before this was made configurable.
const DEFAULT_HASHER_BASE_URL: &str = "http://localhost:8080";

/// The default log level when `LOG_LEVEL` is unset.
const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Errors encountered while loading [`Config`] from the environment.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("required environment variable {0:?} is not set")]
    Missing(&'static str),

    /// An environment variable was set but could not be parsed as the
    /// expected type.
    #[error("environment variable {var:?} has value {value:?} which could not be parsed: {source}")]
    Invalid {
        /// The name of the offending variable.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
        /// The underlying parse error.
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Process-wide configuration for the hashserve worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// The environment tag used in queue/binding names (`ENV`).
    pub env: String,

    /// Comma-separated AMQP broker URIs (`MULTIPLE_BROKERS`), already split.
    pub broker_uris: Vec<String>,

    /// Number of image worker tasks (`NO_IMAGE_WORKER_THREADS`).
    pub n_image_workers: u16,

    /// Maximum DLQ retry count before a transient failure is treated as
    /// terminal (`MAX_RETRY_COUNT`).
    pub max_retry_count: u32,

    /// Minimum log level (`LOG_LEVEL`, defaults to `INFO`).
    pub log_level: String,

    /// Whether the ingress queue should be declared as a quorum queue
    /// (`queue-type=quorum`).
    pub quorum_queue: bool,

    /// Base URL of the hashing microservice (`HASHER_BASE_URL`).
    pub hasher_base_url: String,
}

impl Config {
    /// Loads configuration from the current process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] if a required variable is absent, or
    /// [`ConfigError::Invalid`] if a variable is present but fails to parse.
    pub fn load() -> Result<Self, ConfigError> {
        let env = require_env("ENV")?;

        let broker_uris: Vec<String> = require_env("MULTIPLE_BROKERS")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        let n_image_workers = parse_env("NO_IMAGE_WORKER_THREADS")?;
        let max_retry_count = parse_env("MAX_RETRY_COUNT")?;

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let quorum_queue = std::env::var("queue-type")
            .map(|v| v == "quorum")
            .unwrap_or(false);

        let hasher_base_url =
            std::env::var("HASHER_BASE_URL").unwrap_or_else(|_| DEFAULT_HASHER_BASE_URL.to_string());

        Ok(Self {
            env,
            broker_uris,
            n_image_workers,
            max_retry_count,
            log_level,
            quorum_queue,
            hasher_base_url,
        })
    }
}

/// Reads a required environment variable, or returns [`ConfigError::Missing`].
fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

/// Reads and parses a required environment variable as an integer.
fn parse_env<T>(name: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    let value = require_env(name)?;
    value.parse().map_err(|source| ConfigError::Invalid {
        var: name,
        value,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-global, so these tests run serially
    // via a single test function rather than racing each other in parallel.
    #[test]
    fn missing_required_variable_is_reported_by_name() {
        std::env::remove_var("ENV_FOR_CONFIG_TEST_DOES_NOT_EXIST");
        let err = require_env("ENV_FOR_CONFIG_TEST_DOES_NOT_EXIST").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ENV_FOR_CONFIG_TEST_DOES_NOT_EXIST")));
    }

    #[test]
    fn invalid_integer_is_reported_with_the_offending_value() {
        std::env::set_var("HASHSERVE_TEST_NOT_AN_INT", "not-a-number");
        let err = parse_env::<u16>("HASHSERVE_TEST_NOT_AN_INT").unwrap_err();
        match err {
            ConfigError::Invalid { var, value, .. } => {
                assert_eq!(var, "HASHSERVE_TEST_NOT_AN_INT");
                assert_eq!(value, "not-a-number");
            }
            other => panic!("expected ConfigError::Invalid, got {other:?}"),
        }
        std::env::remove_var("HASHSERVE_TEST_NOT_AN_INT");
    }
}

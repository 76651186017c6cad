//! hashserve-specific error types.

use thiserror::Error as ThisError;

/// Errors that may be returned by [`crate::supervisor::run`], all of which are
/// fatal to the process: a connection could not be established, configuration
/// was invalid, or no broker URIs were given at all.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Configuration could not be loaded from the environment.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Every broker URI in `MULTIPLE_BROKERS` failed to connect.
    #[error("Failed to connect to any of the configured broker URIs: {0}")]
    Connect(#[source] lapin::Error),

    /// `MULTIPLE_BROKERS` parsed to an empty list of URIs.
    #[error("No broker URIs were configured")]
    NoBrokerUris,

    /// An underlying `lapin` call failed outside of per-message handling
    /// (e.g. declaring the ingress queue during bootstrap).
    #[error("An underlying `lapin` call failed: {0}")]
    Lapin(#[from] lapin::Error),
}

//! Client for the hashing microservice.
//!
//! The microservice's own internals are out of scope for this crate (see
//! spec's "Out of scope" list); only the HTTP contract it exposes is
//! implemented here: `POST /v1/hash/image` and `GET /health`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::types::{HashRequest, ImageHashResponse};

/// Client timeout for hasher calls (spec §4.4/§6).
const HASHER_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval at which [`HasherClient::wait_until_ready`] polls `/health`.
const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Errors produced by a hasher call. Distinct from [`HasherOutcome`]:
/// these are failures of the call itself (network, non-2xx, unparseable
/// body); a successful call with `statusCode != 1` is still `Ok` and is
/// represented as [`HasherOutcome::Transient`] or
/// [`HasherOutcome::FileNotFound`].
#[derive(Debug, ThisError)]
pub enum HasherCallError {
    /// The request could not be sent, or the response could not be read.
    #[error("request to hasher failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The classified result of a hasher call, already folded against the
/// retry policy in spec §3/§4.4.
#[derive(Debug, Clone)]
pub enum HasherOutcome {
    /// `statusCode == 1`.
    Success(ImageHashResponse),
    /// `statusCode == 4`: terminal, ack and drop.
    FileNotFound(ImageHashResponse),
    /// Any other status code, or a network-level failure: retry via DLQ
    /// until `maxRetry` is reached.
    Transient,
    /// The hasher returned a 2xx response whose body could not be parsed
    /// as [`ImageHashResponse`]. Per the spec's Open Questions, this is
    /// pinned to reject-no-requeue rather than folded into `Transient`.
    UnparseableBody,
}

/// Abstracts the hashing microservice so the image worker's state machine
/// can be tested without a real HTTP server, in the trait-based-fake idiom
/// used throughout this codebase's tests (and by
/// `p2p-org-rust-utils`'s `MessageProcessor`/`MessageHandler` split).
#[async_trait]
pub trait HasherClient: Send + Sync {
    /// Calls the image hashing endpoint for `req`.
    ///
    /// # Errors
    /// Returns [`HasherCallError`] only for failures of the call itself;
    /// hasher-reported failures are folded into `Ok(HasherOutcome::...)`.
    async fn hash_image(&self, req: &HashRequest) -> Result<HasherOutcome, HasherCallError>;

    /// Polls the hasher's health endpoint until it reports ready, sleeping
    /// [`READINESS_POLL_INTERVAL`] between attempts.
    async fn wait_until_ready(&self);
}

/// Production [`HasherClient`] backed by `reqwest`.
pub struct ReqwestHasherClient {
    /// The underlying HTTP client, configured with the hasher timeout.
    client: reqwest::Client,
    /// Base URL of the hashing microservice, e.g. `http://localhost:8080`.
    base_url: String,
}

impl ReqwestHasherClient {
    /// Builds a client for the hasher at `base_url`.
    ///
    /// # Panics
    /// Panics if the underlying `reqwest::Client` cannot be built, which
    /// only happens if the TLS backend fails to initialize.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HASHER_TIMEOUT)
            .build()
            .expect("failed to build hasher HTTP client");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HasherClient for ReqwestHasherClient {
    async fn hash_image(&self, req: &HashRequest) -> Result<HasherOutcome, HasherCallError> {
        let url = format!("{}/v1/hash/image", self.base_url);
        let response = match self.client.post(&url).json(req).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("hasher request failed for {:?}: {e}", req.url);
                return Ok(HasherOutcome::Transient);
            }
        };

        if !response.status().is_success() {
            warn!(
                "hasher returned non-2xx status {} for {:?}",
                response.status(),
                req.url
            );
            return Ok(HasherOutcome::Transient);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("failed reading hasher response body for {:?}: {e}", req.url);
                return Ok(HasherOutcome::Transient);
            }
        };

        let parsed: ImageHashResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("hasher returned unparseable body for {:?}: {e}", req.url);
                return Ok(HasherOutcome::UnparseableBody);
            }
        };

        debug!(
            "hasher status {} for {:?}: {}",
            parsed.status_code, req.url, parsed.status_message
        );

        if parsed.is_success() {
            Ok(HasherOutcome::Success(parsed))
        } else if parsed.is_file_not_found() {
            Ok(HasherOutcome::FileNotFound(parsed))
        } else {
            Ok(HasherOutcome::Transient)
        }
    }

    async fn wait_until_ready(&self) {
        let url = format!("{}/health", self.base_url);
        loop {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("hasher at {} is ready", self.base_url);
                    return;
                }
                Ok(response) => {
                    debug!("hasher health check returned {}, retrying", response.status());
                }
                Err(e) => {
                    debug!("hasher health check failed: {e}, retrying");
                }
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_variants_are_constructible() {
        // Smoke-checks that the enum shape matches what the image worker expects to match on.
        let _ = HasherOutcome::Transient;
        let _ = HasherOutcome::UnparseableBody;
    }
}

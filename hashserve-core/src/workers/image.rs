//! The image worker pool (C4): the hash/validate/retry state machine.
//!
//! `n_image` tasks share one [`async_channel::Receiver`] (a true MPMC
//! queue), so no mutex is needed to let them pull from the same backlog —
//! this is the direct analogue of the original Go worker's unbuffered
//! `imageIngestChan`, which already supported multiple receiving
//! goroutines without synchronization.

use std::sync::Arc;

use chrono::Utc;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use lapin::Connection;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

use crate::broker::{ConfirmPublisher, Publish};
use crate::hasher::{HasherClient, HasherOutcome};
use crate::types::{HashRequest, ImageFingerprintRequest, ScanRequest};

/// Exchange successfully-hashed fingerprints are published to.
pub const PDNA_EXCHANGE: &str = "pdna-processor";
/// Exchange transiently-failed scans are republished to for retry.
pub const DLQ_EXCHANGE: &str = "hashserve-dlq";

/// The routing key used for all downstream publishes in `env`.
fn routing_key(env: &str) -> String {
    format!("#.{env}-v2")
}

/// Spawns `n` image worker tasks, each with its own dedicated
/// [`ConfirmPublisher`] channel, all pulling from clones of `receiver`.
///
/// # Errors
/// Returns the underlying `lapin` error if a worker's publisher channel
/// could not be opened.
pub async fn spawn_image_workers(
    n: u16,
    conn: &Connection,
    receiver: async_channel::Receiver<Delivery>,
    hasher: Arc<dyn HasherClient>,
    env: String,
    max_retry: u32,
    cancel_tx: mpsc::Sender<()>,
    shutdown: &broadcast::Sender<()>,
) -> Result<Vec<JoinHandle<()>>, lapin::Error> {
    let mut handles = Vec::with_capacity(n.into());
    for worker_id in 0..n {
        let publisher = ConfirmPublisher::new(conn).await?;
        let receiver = receiver.clone();
        let hasher = hasher.clone();
        let env = env.clone();
        let cancel_tx = cancel_tx.clone();
        let shutdown = shutdown.subscribe();

        handles.push(tokio::spawn(async move {
            debug!("image worker {worker_id} starting");
            worker_loop(receiver, publisher, &*hasher, &env, max_retry, cancel_tx, shutdown).await;
            debug!("image worker {worker_id} exiting");
        }));
    }
    Ok(handles)
}

/// Pulls deliveries from `receiver` until it is closed or `shutdown` fires,
/// processing each via [`process_one`].
///
/// Mirrors `kanin::app::task::handler_task`'s biased `tokio::select!`
/// between a shutdown signal and the next unit of work, so a fatal error
/// reported by any worker stops this one from picking up further deliveries
/// immediately rather than waiting for the channel to drain.
async fn worker_loop<P: Publish>(
    receiver: async_channel::Receiver<Delivery>,
    publisher: P,
    hasher: &dyn HasherClient,
    env: &str,
    max_retry: u32,
    cancel_tx: mpsc::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("image worker received shutdown signal");
                break;
            }
            delivery = receiver.recv() => match delivery {
                Ok(delivery) => {
                    let span = info_span!("delivery", routing_key = %delivery.routing_key, content_type = "image");
                    process_one(delivery, &publisher, hasher, env, max_retry, &cancel_tx)
                        .instrument(span)
                        .await;
                }
                Err(_) => break,
            },
        }
    }
}

/// Processes a single delivery through the hash/validate/retry state
/// machine described in the image worker's design.
async fn process_one<P: Publish>(
    delivery: Delivery,
    publisher: &P,
    hasher: &dyn HasherClient,
    env: &str,
    max_retry: u32,
    cancel_tx: &mpsc::Sender<()>,
) {
    let scan: ScanRequest = match serde_json::from_slice(&delivery.data) {
        Ok(scan) => scan,
        Err(e) => {
            error!("failed to parse scan request, rejecting: {e}");
            reject(&delivery, cancel_tx).await;
            return;
        }
    };

    let hash_request = match HashRequest::from_scan(&scan) {
        Ok(req) => req,
        Err(e) => {
            error!("scan request failed validation, rejecting: {e}");
            reject(&delivery, cancel_tx).await;
            return;
        }
    };

    let outcome = match hasher.hash_image(&hash_request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("hasher call failed for {:?}: {e}", scan.url);
            HasherOutcome::Transient
        }
    };

    match outcome {
        HasherOutcome::Success(response) => {
            let fingerprint = ImageFingerprintRequest::from_hash_response(&scan, &response);
            match fingerprint.validate() {
                Ok(()) => publish_fingerprint(&delivery, publisher, &fingerprint, env, cancel_tx).await,
                Err(e) => {
                    error!("hasher response produced an invalid fingerprint, rejecting: {e}");
                    reject(&delivery, cancel_tx).await;
                }
            }
        }
        HasherOutcome::FileNotFound(response) => {
            error!("hasher reported file not found for {:?}: {}", response.url, response.status_message);
            ack(&delivery, cancel_tx).await;
        }
        HasherOutcome::Transient | HasherOutcome::UnparseableBody => {
            if matches!(outcome, HasherOutcome::UnparseableBody) {
                error!("hasher returned an unparseable body for {:?}, rejecting", scan.url);
                reject(&delivery, cancel_tx).await;
                return;
            }
            retry_or_drop(&delivery, publisher, &scan, env, max_retry, cancel_tx).await;
        }
    }
}

/// Rejects `delivery` without requeueing, escalating to cancellation if the
/// reject itself fails — the consumer channel is in the same
/// possibly-compromised state as a failed ack.
async fn reject(delivery: &Delivery, cancel_tx: &mpsc::Sender<()>) {
    if let Err(e) = delivery.reject(BasicRejectOptions { requeue: false }).await {
        error!("failed to reject delivery: {e}");
        request_cancellation(cancel_tx).await;
    }
}

/// Acks `delivery`, escalating to cancellation if the ack itself fails.
async fn ack(delivery: &Delivery, cancel_tx: &mpsc::Sender<()>) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!("failed to ack delivery: {e}");
        request_cancellation(cancel_tx).await;
    }
}

/// Publishes `fingerprint` to [`PDNA_EXCHANGE`] and acks the source
/// delivery on success. Publish failure is fatal.
async fn publish_fingerprint<P: Publish>(
    delivery: &Delivery,
    publisher: &P,
    fingerprint: &ImageFingerprintRequest,
    env: &str,
    cancel_tx: &mpsc::Sender<()>,
) {
    let body = match serde_json::to_vec(&crate::types::Fingerprints::single(fingerprint.clone())) {
        Ok(body) => body,
        Err(e) => {
            error!("failed to serialize fingerprint (this should be impossible): {e}");
            reject(delivery, cancel_tx).await;
            return;
        }
    };

    match publisher.publish(&body, PDNA_EXCHANGE, &routing_key(env)).await {
        Ok(()) => {
            info!("published fingerprint for {:?}", fingerprint.path);
            ack(delivery, cancel_tx).await;
        }
        Err(e) => {
            error!("failed to publish fingerprint for {:?}: {e}", fingerprint.path);
            request_cancellation(cancel_tx).await;
        }
    }
}

/// Republishes `scan` to [`DLQ_EXCHANGE`] with an incremented retry count,
/// or acks-and-drops once `max_retry` is exhausted.
async fn retry_or_drop<P: Publish>(
    delivery: &Delivery,
    publisher: &P,
    scan: &ScanRequest,
    env: &str,
    max_retry: u32,
    cancel_tx: &mpsc::Sender<()>,
) {
    if scan.retry_count >= max_retry {
        error!(
            "exhausted retries ({}/{max_retry}) for {:?}, dropping",
            scan.retry_count, scan.url
        );
        ack(delivery, cancel_tx).await;
        return;
    }

    let retried = scan.for_retry(Utc::now());
    let body = match serde_json::to_vec(&retried) {
        Ok(body) => body,
        Err(e) => {
            error!("failed to serialize retried scan request (this should be impossible): {e}");
            reject(delivery, cancel_tx).await;
            return;
        }
    };

    match publisher.publish(&body, DLQ_EXCHANGE, &routing_key(env)).await {
        Ok(()) => {
            debug!("republished {:?} to DLQ, retry {}", retried.url, retried.retry_count);
            ack(delivery, cancel_tx).await;
        }
        Err(e) => {
            error!("failed to republish {:?} to DLQ: {e}", retried.url);
            request_cancellation(cancel_tx).await;
        }
    }
}

/// Signals the supervisor that a fatal, unrecoverable error has occurred.
/// Best-effort: if the cancellation channel is already closed, shutdown is
/// already underway.
async fn request_cancellation(cancel_tx: &mpsc::Sender<()>) {
    let _ = cancel_tx.send(()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::HasherCallError;
    use crate::test_support::delivery;
    use crate::types::{Hashes, ImageHashResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeHasher {
        outcome: HasherOutcome,
    }

    #[async_trait]
    impl HasherClient for FakeHasher {
        async fn hash_image(&self, _req: &HashRequest) -> Result<HasherOutcome, HasherCallError> {
            Ok(self.outcome.clone())
        }

        async fn wait_until_ready(&self) {}
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl Publish for RecordingPublisher {
        async fn publish(&self, body: &[u8], exchange: &str, routing_key: &str) -> Result<(), crate::broker::PublishError> {
            if self.fail {
                return Err(crate::broker::PublishError::Nacked);
            }
            self.published
                .lock()
                .unwrap()
                .push((exchange.to_string(), routing_key.to_string(), body.to_vec()));
            Ok(())
        }
    }

    fn scan_body(url: &str, retry_count: u32) -> Vec<u8> {
        serde_json::to_vec(&ScanRequest {
            url: url.to_string(),
            product: "p1".to_string(),
            cert: None,
            retry_count,
            publish_time: None,
            identifiers: Default::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn success_publishes_fingerprint_and_acks() {
        let hasher = FakeHasher {
            outcome: HasherOutcome::Success(ImageHashResponse {
                url: "https://example.com/a.jpg".to_string(),
                status_code: 1,
                status_message: "ok".to_string(),
                hashes: Some(Hashes {
                    pdna: Some("PD".to_string()),
                    md5: None,
                    sha1: None,
                }),
                ml_scores: None,
            }),
        };
        let publisher = RecordingPublisher::default();
        let (cancel_tx, _cancel_rx) = mpsc::channel(1);

        let d = delivery(&scan_body("https://example.com/a.jpg", 0));
        process_one(d, &publisher, &hasher, "test", 3, &cancel_tx).await;

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, PDNA_EXCHANGE);
        assert_eq!(published[0].1, "#.test-v2");
    }

    #[tokio::test]
    async fn transient_failure_republishes_to_dlq_with_incremented_retry() {
        let hasher = FakeHasher {
            outcome: HasherOutcome::Transient,
        };
        let publisher = RecordingPublisher::default();
        let (cancel_tx, _cancel_rx) = mpsc::channel(1);

        let d = delivery(&scan_body("https://example.com/a.jpg", 1));
        process_one(d, &publisher, &hasher, "test", 3, &cancel_tx).await;

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, DLQ_EXCHANGE);
        let retried: ScanRequest = serde_json::from_slice(&published[0].2).unwrap();
        assert_eq!(retried.retry_count, 2);
    }

    #[tokio::test]
    async fn transient_failure_past_max_retry_drops_without_republish() {
        let hasher = FakeHasher {
            outcome: HasherOutcome::Transient,
        };
        let publisher = RecordingPublisher::default();
        let (cancel_tx, _cancel_rx) = mpsc::channel(1);

        let d = delivery(&scan_body("https://example.com/a.jpg", 3));
        process_one(d, &publisher, &hasher, "test", 3, &cancel_tx).await;

        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_rejects_without_requeue_rather_than_retrying() {
        let hasher = FakeHasher {
            outcome: HasherOutcome::UnparseableBody,
        };
        let publisher = RecordingPublisher::default();
        let (cancel_tx, _cancel_rx) = mpsc::channel(1);

        let d = delivery(&scan_body("https://example.com/a.jpg", 0));
        process_one(d, &publisher, &hasher, "test", 3, &cancel_tx).await;

        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_requests_cancellation() {
        let hasher = FakeHasher {
            outcome: HasherOutcome::Success(ImageHashResponse {
                url: "https://example.com/a.jpg".to_string(),
                status_code: 1,
                status_message: "ok".to_string(),
                hashes: Some(Hashes {
                    pdna: Some("PD".to_string()),
                    md5: None,
                    sha1: None,
                }),
                ml_scores: None,
            }),
        };
        let publisher = RecordingPublisher {
            published: Mutex::default(),
            fail: true,
        };
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);

        let d = delivery(&scan_body("https://example.com/a.jpg", 0));
        process_one(d, &publisher, &hasher, "test", 3, &cancel_tx).await;

        assert!(cancel_rx.recv().await.is_some());
    }
}

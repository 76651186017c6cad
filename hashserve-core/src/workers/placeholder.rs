//! The video and misc placeholder workers (C5).
//!
//! Neither performs any enrichment: both simply acknowledge well-formed
//! envelopes and reject malformed ones, matching the Non-goal that
//! video/misc content is not yet handled beyond acknowledgement.

use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info_span, Instrument};

use crate::types::ScanRequest;

/// Runs the placeholder worker for `label` (`"video"` or `"misc"`),
/// consuming from `receiver` until it closes or `shutdown` fires.
pub async fn run(
    label: &str,
    receiver: async_channel::Receiver<Delivery>,
    mut shutdown: broadcast::Receiver<()>,
    cancel_tx: mpsc::Sender<()>,
) {
    loop {
        let delivery = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("{label} worker received shutdown signal");
                break;
            }
            delivery = receiver.recv() => match delivery {
                Ok(delivery) => delivery,
                Err(_) => break,
            },
        };

        let span = info_span!("delivery", routing_key = %delivery.routing_key, content_type = label);
        process_one(label, delivery, &cancel_tx).instrument(span).await;
    }
    debug!("{label} worker exiting, channel closed");
}

/// Acks a well-formed envelope, rejects a malformed one. Either failure
/// escalates to cancellation — the consumer channel is in the same
/// possibly-compromised state regardless of which acknowledgement call
/// fails.
async fn process_one(label: &str, delivery: Delivery, cancel_tx: &mpsc::Sender<()>) {
    match serde_json::from_slice::<ScanRequest>(&delivery.data) {
        Ok(scan) => {
            debug!("{label} worker acknowledging {:?}", scan.url);
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!("{label} worker failed to ack delivery: {e}");
                let _ = cancel_tx.send(()).await;
            }
        }
        Err(e) => {
            error!("{label} worker failed to parse scan request, rejecting: {e}");
            if let Err(reject_err) = delivery.reject(BasicRejectOptions { requeue: false }).await {
                error!("{label} worker failed to reject delivery: {reject_err}");
                let _ = cancel_tx.send(()).await;
            }
        }
    }
}

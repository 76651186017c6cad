//! The content-type router (C3): the single task standing between the
//! ingress consumer and the three typed worker pools.

use lapin::message::Delivery;
use lapin::options::BasicRejectOptions;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, Instrument};

use crate::types::{self, ContentType, ScanRequest};

/// Consumes deliveries from `jobs`, classifies each by its `ScanRequest.url`
/// suffix, and forwards it on the matching typed channel.
///
/// Terminates when `jobs` is closed (its sender dropped), at which point it
/// drops `image_tx`/`video_tx`/`misc_tx`, propagating shutdown to the
/// worker pools downstream.
pub async fn run(
    mut jobs: mpsc::Receiver<Delivery>,
    image_tx: async_channel::Sender<Delivery>,
    video_tx: async_channel::Sender<Delivery>,
    misc_tx: async_channel::Sender<Delivery>,
    cancel_tx: mpsc::Sender<()>,
) {
    while let Some(delivery) = jobs.recv().await {
        let span = info_span!("delivery", routing_key = %delivery.routing_key, content_type = "unclassified");
        let should_stop = route_one(delivery, &image_tx, &video_tx, &misc_tx, &cancel_tx)
            .instrument(span)
            .await;
        if should_stop {
            break;
        }
    }

    debug!("router exiting, jobs channel closed");
}

/// Classifies and forwards a single delivery. Returns `true` if the router
/// should stop (its downstream pool has shut down).
async fn route_one(
    delivery: Delivery,
    image_tx: &async_channel::Sender<Delivery>,
    video_tx: &async_channel::Sender<Delivery>,
    misc_tx: &async_channel::Sender<Delivery>,
    cancel_tx: &mpsc::Sender<()>,
) -> bool {
    let scan: ScanRequest = match serde_json::from_slice(&delivery.data) {
        Ok(scan) => scan,
        Err(e) => {
            error!("failed to parse scan request, rejecting: {e}");
            reject(&delivery, cancel_tx).await;
            return false;
        }
    };

    let content_type = types::classify(&scan.url);
    debug!("classified {:?} as {content_type:?}", scan.url);

    let tx = match content_type {
        ContentType::Image => image_tx,
        ContentType::Video => video_tx,
        ContentType::Misc => misc_tx,
    };

    if tx.send(delivery).await.is_err() {
        info!("worker pool for {content_type:?} has shut down, stopping router");
        return true;
    }

    false
}

/// Rejects `delivery` without requeueing, escalating to cancellation if the
/// reject itself fails — the consumer channel is in the same
/// possibly-compromised state as a failed ack.
async fn reject(delivery: &Delivery, cancel_tx: &mpsc::Sender<()>) {
    if let Err(e) = delivery.reject(BasicRejectOptions { requeue: false }).await {
        error!("failed to reject unparseable delivery: {e}");
        let _ = cancel_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::delivery as scan_delivery;

    #[tokio::test]
    async fn routes_by_classified_content_type() {
        let (jobs_tx, jobs_rx) = mpsc::channel(4);
        let (image_tx, image_rx) = async_channel::bounded(4);
        let (video_tx, video_rx) = async_channel::bounded(4);
        let (misc_tx, misc_rx) = async_channel::bounded(4);
        let (cancel_tx, _cancel_rx) = mpsc::channel(1);

        let handle = tokio::spawn(run(jobs_rx, image_tx, video_tx, misc_tx, cancel_tx));

        let image_scan = br#"{"url":"https://example.com/a.jpg","product":"p"}"#;
        let video_scan = br#"{"url":"https://example.com/a.mp4","product":"p"}"#;
        let misc_scan = br#"{"url":"https://example.com/a.pdf","product":"p"}"#;

        jobs_tx.send(scan_delivery(image_scan)).await.unwrap();
        jobs_tx.send(scan_delivery(video_scan)).await.unwrap();
        jobs_tx.send(scan_delivery(misc_scan)).await.unwrap();
        drop(jobs_tx);

        assert!(image_rx.recv().await.is_ok());
        assert!(video_rx.recv().await.is_ok());
        assert!(misc_rx.recv().await.is_ok());

        handle.await.unwrap();
    }
}

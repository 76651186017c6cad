//! Wiring (C6): bootstraps the broker session and the hasher client, spawns
//! the router and worker pools, and drives them to a clean shutdown on
//! SIGINT/SIGTERM or on a worker reporting a fatal error.

use std::sync::Arc;

use futures::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::broker::BrokerSession;
use crate::hasher::{HasherClient, ReqwestHasherClient};
use crate::{router, workers, Config, Error};

/// Runs the worker until SIGINT/SIGTERM is received or a fatal error is
/// reported, then shuts down gracefully.
///
/// # Errors
/// Returns [`Error::NoBrokerUris`] or [`Error::Connect`] if the broker
/// connection could not be established, or [`Error::Lapin`] if declaring
/// the ingress topology failed.
pub async fn run(config: Config) -> Result<(), Error> {
    let hasher: Arc<dyn HasherClient> = Arc::new(ReqwestHasherClient::new(config.hasher_base_url.clone()));
    info!("waiting for hasher at {} to become ready...", config.hasher_base_url);
    hasher.wait_until_ready().await;
    info!("hasher is ready");

    let session = BrokerSession::connect(&config.broker_uris).await?;
    let (channel, mut consumer) = session
        .initialize(&config.env, config.n_image_workers, config.quorum_queue)
        .await?;
    info!("listening on queue hashserve-{} with prefetch {}", config.env, config.n_image_workers);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);

    let jobs_capacity = usize::from(config.n_image_workers).max(1);
    let (jobs_tx, jobs_rx) = mpsc::channel(jobs_capacity);
    let (image_tx, image_rx) = async_channel::bounded(jobs_capacity);
    let (video_tx, video_rx) = async_channel::bounded(jobs_capacity);
    let (misc_tx, misc_rx) = async_channel::bounded(jobs_capacity);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(router::run(
        jobs_rx,
        image_tx,
        video_tx,
        misc_tx,
        cancel_tx.clone(),
    )));
    tasks.push(tokio::spawn(workers::placeholder::run(
        "video",
        video_rx,
        shutdown_tx.subscribe(),
        cancel_tx.clone(),
    )));
    tasks.push(tokio::spawn(workers::placeholder::run(
        "misc",
        misc_rx,
        shutdown_tx.subscribe(),
        cancel_tx.clone(),
    )));

    let image_handles = workers::image::spawn_image_workers(
        config.n_image_workers,
        session.connection(),
        image_rx,
        hasher,
        config.env.clone(),
        config.max_retry_count,
        cancel_tx,
        &shutdown_tx,
    )
    .await?;
    tasks.extend(image_handles);

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    loop {
        tokio::select! {
            biased;

            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = cancel_rx.recv() => {
                error!("a worker reported a fatal error, shutting down");
                break;
            }
            delivery = consumer.next() => match delivery {
                Some(Ok(delivery)) => {
                    if jobs_tx.send(delivery).await.is_err() {
                        error!("router has shut down unexpectedly, stopping ingestion");
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("error receiving delivery from broker: {e}");
                }
                None => {
                    error!("consumer was cancelled, shutting down");
                    break;
                }
            },
        }
    }

    let _ = shutdown_tx.send(());
    drop(jobs_tx);

    debug!("waiting for {} tasks to finish draining...", tasks.len());
    for task in tasks {
        if let Err(e) = task.await {
            error!("a worker task panicked during shutdown: {e}");
        }
    }
    info!("all workers exited, shutdown complete");

    drop(channel);
    Ok(())
}

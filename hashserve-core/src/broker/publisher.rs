//! Confirm-mode publishing to downstream exchanges.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Channel, Connection};
use thiserror::Error as ThisError;

/// Delivery mode value for a persistent message, per the AMQP spec.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Errors from a confirm-mode publish.
#[derive(Debug, ThisError)]
pub enum PublishError {
    /// The broker nacked the publish.
    #[error("broker nacked the publish")]
    Nacked,
    /// The underlying `lapin` call failed.
    #[error("publish failed: {0}")]
    Lapin(#[from] lapin::Error),
}

/// Abstracts publishing so the image worker's retry/publish path can be
/// unit-tested with an in-memory fake, the same seam
/// [`crate::hasher::HasherClient`] provides for the hashing microservice.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Publishes `body` to `exchange` with `routing_key` and awaits the
    /// broker's confirm.
    ///
    /// # Errors
    /// Returns [`PublishError::Nacked`] if the broker nacks the publish, or
    /// [`PublishError::Lapin`] if the call itself fails.
    async fn publish(&self, body: &[u8], exchange: &str, routing_key: &str) -> Result<(), PublishError>;
}

/// Production [`Publish`] implementation backed by a dedicated
/// confirm-mode `lapin` channel.
///
/// Kept one-per-worker-task (never shared), so no mutex is required to
/// serialize publishes.
pub struct ConfirmPublisher {
    /// Dedicated channel, placed into confirm mode in [`ConfirmPublisher::new`].
    channel: Channel,
}

impl ConfirmPublisher {
    /// Opens a new channel on `conn` and puts it into confirm mode.
    ///
    /// # Errors
    /// Returns the underlying `lapin` error if the channel could not be
    /// opened or confirm mode could not be enabled.
    pub async fn new(conn: &Connection) -> Result<Self, lapin::Error> {
        let channel = conn.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(Self { channel })
    }
}

#[async_trait]
impl Publish for ConfirmPublisher {
    async fn publish(&self, body: &[u8], exchange: &str, routing_key: &str) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;

        let confirmation = confirm.await?;
        if confirmation.is_nack() {
            Err(PublishError::Nacked)
        } else {
            Ok(())
        }
    }
}

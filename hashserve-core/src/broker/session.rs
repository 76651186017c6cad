//! Connection bootstrap and ingress topology declaration.

use lapin::options::{BasicConsumeOptions, BasicQosOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use rand::seq::SliceRandom;
use tracing::{debug, trace, warn};

use crate::Error;

/// Exchange the ingress queue is bound to.
const INGRESS_EXCHANGE: &str = "hashserve";

/// A live connection to one of the configured broker URIs.
pub struct BrokerSession {
    /// The underlying lapin connection.
    conn: Connection,
}

impl BrokerSession {
    /// Connects to one of `uris`, tried in random order.
    ///
    /// Mirrors `original_source/pkg/rabbitmq/dial.go`'s `Dial`, generalized
    /// to the comma-separated, randomized broker list this worker accepts:
    /// every URI is tried in turn and the first successful connection wins,
    /// so a single broker outage does not prevent startup.
    ///
    /// # Errors
    /// Returns [`Error::NoBrokerUris`] if `uris` is empty, or
    /// [`Error::Connect`] wrapping the last connection error if every URI
    /// failed.
    pub async fn connect(uris: &[String]) -> Result<Self, Error> {
        if uris.is_empty() {
            return Err(Error::NoBrokerUris);
        }

        let mut shuffled: Vec<&String> = uris.iter().collect();
        shuffled.shuffle(&mut rand::thread_rng());

        let mut last_err = None;
        for uri in shuffled {
            debug!("attempting to connect to broker at {uri}");
            match Connection::connect(uri, ConnectionProperties::default()).await {
                Ok(conn) => {
                    debug!("connected to broker at {uri}");
                    return Ok(Self { conn });
                }
                Err(e) => {
                    warn!("failed to connect to broker at {uri}: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::Connect(
            last_err.expect("uris is non-empty, so at least one attempt was made"),
        ))
    }

    /// Opens a new channel on this connection.
    ///
    /// # Errors
    /// Returns the underlying `lapin` error if the channel could not be
    /// opened.
    pub async fn channel(&self) -> Result<Channel, lapin::Error> {
        self.conn.create_channel().await
    }

    /// Returns the underlying connection, so callers can open further
    /// channels of their own (e.g. one per image worker's publisher).
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Declares and binds the ingress queue `hashserve-<env>`, sets the
    /// channel's prefetch, and opens a consumer on it.
    ///
    /// # Errors
    /// Returns the underlying `lapin` error if any step of the topology
    /// declaration or consumer creation fails.
    pub async fn initialize(
        &self,
        env: &str,
        prefetch: u16,
        quorum: bool,
    ) -> Result<(Channel, Consumer), lapin::Error> {
        let channel = self.channel().await?;

        let queue_name = format!("hashserve-{env}");
        let binding_key = format!("#.{env}");

        let mut arguments = FieldTable::default();
        if quorum {
            arguments.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
        }

        trace!("declaring queue {queue_name:?} (quorum={quorum})");
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await?;

        trace!("binding queue {queue_name:?} to exchange {INGRESS_EXCHANGE:?} with key {binding_key:?}");
        channel
            .queue_bind(
                &queue_name,
                INGRESS_EXCHANGE,
                &binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        trace!("setting prefetch to {prefetch}");
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                "hashserve-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok((channel, consumer))
    }
}

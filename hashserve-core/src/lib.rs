//! # hashserve-core
//!
//! The ingestion pipeline for the hashserve content-dispatch worker: AMQP
//! topology bootstrap, a bounded fan-out worker pool, a content-type
//! router, the image worker's hash/validate/retry state machine, and a
//! confirm-mode publisher, all wired together by [`supervisor::run`].

// hashserve-core is 100% Safe Rust.
#![forbid(unsafe_code)]
#![warn(
    // Warns on ::path, allows crate::path.
    absolute_paths_not_starting_with_crate,

    // Warns you about missing documentation comments.
    missing_docs,
    clippy::missing_docs_in_private_items,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,

    // Warns you when you have dependencies you're not using.
    unused_crate_dependencies,

    // Warns on converting values using the `as` keyword.
    clippy::as_conversions,
)]

// Re-exporting the underlying lapin version so callers don't have to match it themselves.
pub use lapin;

pub mod broker;
pub mod config;
pub mod error;
pub mod hasher;
pub mod router;
pub mod supervisor;
pub mod types;
pub mod workers;

pub use config::Config;
pub use error::Error;

/// Convenience type for a result with this crate's top-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Helpers shared by this crate's own `#[cfg(test)]` modules for building
/// fake `lapin::message::Delivery` values without a real broker connection.
#[cfg(test)]
pub(crate) mod test_support {
    use lapin::message::Delivery;
    use lapin::types::ShortString;

    /// Builds a delivery carrying `body`, acked through a no-op `Acker`.
    pub(crate) fn delivery(body: &[u8]) -> Delivery {
        Delivery {
            delivery_tag: 1,
            exchange: ShortString::from("hashserve"),
            routing_key: ShortString::from("#.test"),
            redelivered: false,
            properties: Default::default(),
            data: body.to_vec(),
            acker: lapin::acker::Acker::default(),
        }
    }
}

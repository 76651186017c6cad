//! AMQP connection bootstrap and publishing (C1/C2).

mod publisher;
mod session;

pub use publisher::{ConfirmPublisher, Publish, PublishError};
pub use session::BrokerSession;

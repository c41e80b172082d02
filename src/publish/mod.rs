// SPDX-License-Identifier: MIT
//! Sink capability surface shared by the broker publisher and the
//! simple key-value sink.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::ChangeEvent;

pub mod amqp;
pub mod memory;

pub use amqp::AmqpPublisher;
pub use memory::MemorySink;

/// Errors surfaced by a sink.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Publish attempted while the sink is not ready. Transient; the
    /// caller may retry later.
    #[error("not connected to the broker")]
    NotConnected,

    /// Close called on a sink that is not open.
    #[error("already closed: not connected to the broker")]
    AlreadyClosed,

    /// The publish retry loop was aborted because the sink is closing.
    #[error("sink is shutting down")]
    Shutdown,

    /// The broker URL did not parse.
    #[error("invalid broker URL: {0}")]
    InvalidUrl(String),

    /// The event could not be encoded for the wire.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Broker-level failure surfaced from teardown.
    #[error(transparent)]
    Broker(#[from] lapin::Error),
}

/// A sink that accepts change events.
///
/// `publish` may block for a long time while a resilient implementation
/// rides out a broker outage; callers must tolerate multi-second (or
/// longer) stalls per call.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &ChangeEvent) -> Result<(), PublishError>;

    /// Release the sink. Closing a sink that is not open returns
    /// [`PublishError::AlreadyClosed`].
    async fn close(&self) -> Result<(), PublishError>;
}

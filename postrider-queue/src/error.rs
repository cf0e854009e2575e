use thiserror::Error;

/// Errors surfaced by a queue transport.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The transport has been shut down; no further work will arrive.
    #[error("queue {0:?} is closed")]
    Closed(String),

    /// A publish could not be completed.
    #[error("failed to publish to {queue:?}: {reason}")]
    PublishFailed { queue: String, reason: String },

    /// An ack or reject referenced a delivery that is not in flight.
    #[error("no in-flight delivery {tag} on queue {queue:?}")]
    UnknownDelivery { queue: String, tag: String },
}

impl QueueError {
    /// Returns `true` if the transport is gone and consumers should stop.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

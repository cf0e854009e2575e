//! Delivery outcome taxonomy.
//!
//! Exactly three things can come out of dispatching a unit: it was delivered,
//! the remote end could not be reached (worth retrying), or it was refused
//! (not worth retrying). The consumer maps these onto ack / requeue / drop.

use postrider_common::Domain;
use thiserror::Error;

use crate::dns::DnsError;

/// Why a delivery attempt failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No SMTP session could be established with any resolved host, or name
    /// resolution itself failed. The unit is eligible for requeue.
    #[error("connection failure: {0}")]
    Connection(String),

    /// A session was established but the message was refused or failed
    /// mid-transmission. Terminal: retrying would repeat the refusal.
    #[error("send failure: {0}")]
    Send(String),
}

impl DeliveryError {
    /// Returns `true` if the unit should be re-published for another cycle.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<DnsError> for DeliveryError {
    fn from(err: DnsError) -> Self {
        Self::Connection(err.to_string())
    }
}

/// A delivery attempt as seen through the circuit breaker.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The breaker for the sender's domain rejected the call before any
    /// network activity. The unit is requeued for a later cycle.
    #[error("circuit open for sender domain {0}")]
    CircuitOpen(Domain),

    /// The delivery ran and failed.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

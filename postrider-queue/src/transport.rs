//! The transport trait and its wire-adjacent types.

use std::fmt::{self, Display};

use async_trait::async_trait;
use ulid::Ulid;

use crate::Result;

/// Queue fed by the single-send endpoint; payloads are serialized `MailItem`s.
pub const SINGLE_QUEUE: &str = "singleQueue";

/// Queue fed by the bulk endpoint; payloads are serialized `DispatchUnit`s.
pub const BULK_QUEUE: &str = "bulkQueue";

/// Identifies one in-flight delivery until it is acked or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(Ulid);

impl DeliveryTag {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dequeued payload together with the tag used to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
}

/// The broker contract the dispatcher depends on.
///
/// Semantics required of any implementation:
/// - per-queue FIFO ordering; a re-published payload goes to the back
/// - `dequeue` waits until a payload is available or the transport closes
/// - a dequeued payload stays invisible to other consumers until settled
///   with `ack` (done) or `reject` (discard)
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    async fn dequeue(&self, queue: &str) -> Result<Delivery>;

    async fn ack(&self, queue: &str, tag: DeliveryTag) -> Result<()>;

    async fn reject(&self, queue: &str, tag: DeliveryTag) -> Result<()>;
}

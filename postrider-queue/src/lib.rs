//! Queue transport boundary.
//!
//! The dispatcher treats its message broker as an external collaborator: the
//! [`QueueTransport`] trait is the whole contract (publish, dequeue, ack,
//! reject on named FIFO queues), and [`MemoryQueue`] is the in-process
//! backend used for development and tests.

pub mod config;
pub mod error;
pub mod memory;
pub mod transport;

pub use config::QueueConfig;
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use transport::{BULK_QUEUE, Delivery, DeliveryTag, QueueTransport, SINGLE_QUEUE};

pub type Result<T> = std::result::Result<T, QueueError>;

pub mod address;
pub mod domain;
pub mod logging;
pub mod message;

pub use address::{AddressError, Mailbox};
pub use domain::Domain;
pub use message::{BulkItem, BulkRequest, DispatchUnit, MailItem};

pub use tracing;

/// Control signal broadcast to long-running tasks.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
